use chrono::Utc;
use research_types::{NewTask, ResearchError, ResearchTask, Result, TaskStatus};
use rusqlite::{params, OptionalExtension, Row};

use crate::ResearchStore;

const TASK_COLUMNS: &str = "id, session_id, section_id, parent_id, topic, description, file_path, \
     status, priority, depth, word_count, citation_count, is_gap_fill, retry_count, created_at, \
     completed_at, error_message";

fn task_from_row(row: &Row) -> rusqlite::Result<ResearchTask> {
    let status: String = row.get("status")?;
    Ok(ResearchTask {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        section_id: row.get("section_id")?,
        parent_id: row.get("parent_id")?,
        topic: row.get("topic")?,
        description: row.get("description")?,
        file_path: row.get("file_path")?,
        status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Pending),
        priority: row.get("priority")?,
        depth: row.get("depth")?,
        word_count: row.get("word_count")?,
        citation_count: row.get("citation_count")?,
        is_gap_fill: row.get::<_, i64>("is_gap_fill")? != 0,
        retry_count: row.get("retry_count")?,
        created_at: row.get("created_at")?,
        completed_at: row.get("completed_at")?,
        error_message: row.get("error_message")?,
    })
}

impl ResearchStore {
    pub async fn add_task(&self, session_id: i64, task: &NewTask) -> Result<i64> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO tasks (session_id, section_id, parent_id, topic, description, file_path, \
             status, priority, depth, is_gap_fill, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?8, ?9, ?10)",
            params![
                session_id,
                task.section_id,
                task.parent_id,
                task.topic,
                task.description,
                task.file_path,
                task.priority,
                task.depth,
                task.is_gap_fill as i64,
                Utc::now(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn add_tasks(&self, session_id: i64, tasks: &[NewTask]) -> Result<Vec<i64>> {
        let mut ids = Vec::with_capacity(tasks.len());
        for task in tasks {
            ids.push(self.add_task(session_id, task).await?);
        }
        Ok(ids)
    }

    pub async fn get_task(&self, id: i64) -> Result<Option<ResearchTask>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
            params![id],
            task_from_row,
        )
        .optional()
        .map_err(ResearchError::from)
    }

    pub async fn get_tasks(&self, session_id: i64) -> Result<Vec<ResearchTask>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE session_id = ?1 ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map(params![session_id], task_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub async fn get_tasks_for_section(&self, section_id: i64) -> Result<Vec<ResearchTask>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE section_id = ?1 ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map(params![section_id], task_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub async fn count_tasks(&self, session_id: i64) -> Result<i64> {
        let conn = self.conn.lock().await;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM tasks WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?)
    }

    /// Atomically claim up to `limit` pending tasks and transition them to
    /// `in_progress`, ordered by priority (desc), depth (asc, breadth before
    /// recursion) then id (asc, FIFO within a tie). This single statement is
    /// the scheduler's only admission primitive: two schedulers racing on the
    /// same database can never claim the same row, because the store
    /// serializes all callers behind one connection mutex and the
    /// `UPDATE ... RETURNING` itself executes as one indivisible statement.
    pub async fn claim_next(&self, session_id: i64, limit: i64) -> Result<Vec<ResearchTask>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "UPDATE tasks SET status = 'in_progress' WHERE id IN (
                SELECT id FROM tasks WHERE session_id = ?1 AND status = 'pending'
                ORDER BY priority DESC, depth ASC, id ASC LIMIT ?2
             ) RETURNING {TASK_COLUMNS}"
        ))?;
        let rows = stmt.query_map(params![session_id, limit], task_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub async fn mark_task_completed(
        &self,
        id: i64,
        word_count: i64,
        citation_count: i64,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE tasks SET status = 'completed', word_count = ?1, citation_count = ?2, \
             completed_at = ?3, error_message = NULL WHERE id = ?4",
            params![word_count, citation_count, Utc::now(), id],
        )?;
        Ok(())
    }

    pub async fn mark_task_failed(&self, id: i64, error_message: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE tasks SET status = 'failed', error_message = ?1, completed_at = ?2 WHERE id = ?3",
            params![error_message, Utc::now(), id],
        )?;
        Ok(())
    }

    pub async fn mark_task_skipped(&self, id: i64, reason: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE tasks SET status = 'skipped', error_message = ?1, completed_at = ?2 WHERE id = ?3",
            params![reason, Utc::now(), id],
        )?;
        Ok(())
    }

    /// Requeue failed tasks below `max_retries`, bumping their retry counter.
    /// Mirrors the scheduler's idle-sweep retry policy: tasks that have
    /// exhausted their retries stay `failed` and count toward the session's
    /// partial-completion status.
    pub async fn retry_failed(&self, session_id: i64, max_retries: i64) -> Result<i64> {
        let conn = self.conn.lock().await;
        let affected = conn.execute(
            "UPDATE tasks SET status = 'pending', retry_count = retry_count + 1, error_message = NULL \
             WHERE session_id = ?1 AND status = 'failed' AND retry_count < ?2",
            params![session_id, max_retries],
        )?;
        Ok(affected as i64)
    }

    pub async fn pending_and_in_progress_count(&self, session_id: i64) -> Result<i64> {
        let conn = self.conn.lock().await;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM tasks WHERE session_id = ?1 AND status IN ('pending', 'in_progress')",
            params![session_id],
            |row| row.get(0),
        )?)
    }
}
