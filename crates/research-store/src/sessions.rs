use chrono::Utc;
use research_types::{Phase, ResearchError, Result, Session, SessionStatus};
use rusqlite::{params, OptionalExtension, Row};

use crate::ResearchStore;

fn session_from_row(row: &Row) -> rusqlite::Result<Session> {
    let status: String = row.get("status")?;
    let phase: String = row.get("phase")?;
    Ok(Session {
        id: row.get("id")?,
        query: row.get("query")?,
        refined_brief: row.get("refined_brief")?,
        refinement_qa: row.get("refinement_qa")?,
        pre_plan_context: row.get("pre_plan_context")?,
        status: SessionStatus::parse(&status).unwrap_or(SessionStatus::Running),
        phase: parse_phase(&phase),
        started_at: row.get("started_at")?,
        ended_at: row.get("ended_at")?,
        cancel_requested_at: row.get("cancel_requested_at")?,
        total_tasks: row.get("total_tasks")?,
        completed_tasks: row.get("completed_tasks")?,
        total_words: row.get("total_words")?,
        total_sources: row.get("total_sources")?,
        executive_summary: row.get("executive_summary")?,
        conclusion: row.get("conclusion")?,
        report_markdown_path: row.get("report_markdown_path")?,
        report_html_path: row.get("report_html_path")?,
    })
}

fn parse_phase(s: &str) -> Phase {
    match s {
        "idle" => Phase::Idle,
        "pre_planning" => Phase::PrePlanning,
        "outline_design" => Phase::OutlineDesign,
        "task_planning" => Phase::TaskPlanning,
        "researching" => Phase::Researching,
        "gap_analysis" => Phase::GapAnalysis,
        "synthesizing" => Phase::Synthesizing,
        "compiling" => Phase::Compiling,
        _ => Phase::Complete,
    }
}

const SESSION_COLUMNS: &str = "id, query, refined_brief, refinement_qa, pre_plan_context, status, phase, \
     started_at, ended_at, cancel_requested_at, total_tasks, completed_tasks, total_words, total_sources, \
     executive_summary, conclusion, report_markdown_path, report_html_path";

impl ResearchStore {
    pub async fn create_session(&self, query: &str) -> Result<i64> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO sessions (query, status, phase, started_at) VALUES (?1, 'running', 'idle', ?2)",
            params![query, Utc::now()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn get_session(&self, id: i64) -> Result<Option<Session>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
            params![id],
            session_from_row,
        )
        .optional()
        .map_err(ResearchError::from)
    }

    /// The single session currently `running`, if any — used to reject a
    /// second concurrent `start` request.
    pub async fn get_current_session(&self) -> Result<Option<Session>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE status = 'running' \
                 ORDER BY id DESC LIMIT 1"
            ),
            [],
            session_from_row,
        )
        .optional()
        .map_err(ResearchError::from)
    }

    /// Resume heuristic: fall back to the most recent session that still has
    /// pending or in-progress tasks, regardless of its recorded status (a
    /// process crash can leave `running` unset on disk).
    pub async fn get_most_recent_resumable_session(&self) -> Result<Option<Session>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE id IN (
                    SELECT DISTINCT session_id FROM tasks WHERE status IN ('pending', 'in_progress')
                 ) ORDER BY id DESC LIMIT 1"
            ),
            [],
            session_from_row,
        )
        .optional()
        .map_err(ResearchError::from)
    }

    pub async fn get_most_recent_session(&self) -> Result<Option<Session>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM sessions ORDER BY id DESC LIMIT 1"),
            [],
            session_from_row,
        )
        .optional()
        .map_err(ResearchError::from)
    }

    pub async fn set_phase(&self, session_id: i64, phase: Phase) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE sessions SET phase = ?1 WHERE id = ?2",
            params![phase.as_str(), session_id],
        )?;
        Ok(())
    }

    pub async fn set_refined_brief(
        &self,
        session_id: i64,
        brief: &str,
        qa: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE sessions SET refined_brief = ?1, refinement_qa = ?2 WHERE id = ?3",
            params![brief, qa, session_id],
        )?;
        Ok(())
    }

    pub async fn mark_cancel_requested(&self, session_id: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE sessions SET cancel_requested_at = ?1 WHERE id = ?2 AND cancel_requested_at IS NULL",
            params![Utc::now(), session_id],
        )?;
        Ok(())
    }

    /// Clear a stale cancellation flag from a session's prior run. Used when
    /// re-entering a finalized session for more work, so that run's own
    /// cancellation doesn't immediately re-trigger on resume.
    pub async fn clear_cancel_requested(&self, session_id: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE sessions SET cancel_requested_at = NULL WHERE id = ?1",
            params![session_id],
        )?;
        Ok(())
    }

    pub async fn set_pre_plan_context(&self, session_id: i64, context: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE sessions SET pre_plan_context = ?1 WHERE id = ?2",
            params![context, session_id],
        )?;
        Ok(())
    }

    pub async fn is_cancel_requested(&self, session_id: i64) -> Result<bool> {
        let conn = self.conn.lock().await;
        let flag: Option<String> = conn
            .query_row(
                "SELECT cancel_requested_at FROM sessions WHERE id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(flag.is_some())
    }

    pub async fn set_compiled_report(
        &self,
        session_id: i64,
        executive_summary: Option<&str>,
        conclusion: Option<&str>,
        markdown_path: Option<&str>,
        html_path: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE sessions SET executive_summary = ?1, conclusion = ?2, \
             report_markdown_path = ?3, report_html_path = ?4 WHERE id = ?5",
            params![executive_summary, conclusion, markdown_path, html_path, session_id],
        )?;
        Ok(())
    }

    /// Recompute the denormalized rollup counters on `sessions` from the
    /// `tasks`/`sources` tables. Called after each task completes and once
    /// more at finalization so `get_run_status` never has to join.
    pub async fn refresh_session_counters(&self, session_id: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        let (total_tasks, completed_tasks, total_words): (i64, i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(status = 'completed'), 0), COALESCE(SUM(word_count), 0) \
             FROM tasks WHERE session_id = ?1",
            params![session_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        let total_sources: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT ts.source_id) FROM task_sources ts \
             JOIN tasks t ON t.id = ts.task_id WHERE t.session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        conn.execute(
            "UPDATE sessions SET total_tasks = ?1, completed_tasks = ?2, total_words = ?3, \
             total_sources = ?4 WHERE id = ?5",
            params![total_tasks, completed_tasks, total_words, total_sources, session_id],
        )?;
        Ok(())
    }

    /// Finalize a session: pick the terminal status from the priority
    /// contract (cancelled > partial-with-errors > partial > completed-with-
    /// errors > completed), persist it and stamp `ended_at`.
    pub async fn finalize_session(&self, session_id: i64) -> Result<SessionStatus> {
        self.refresh_session_counters(session_id).await?;
        let conn = self.conn.lock().await;
        let (pending, failed): (i64, i64) = conn.query_row(
            "SELECT COALESCE(SUM(status IN ('pending', 'in_progress')), 0), \
                    COALESCE(SUM(status = 'failed'), 0) \
             FROM tasks WHERE session_id = ?1",
            params![session_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let cancelled = conn
            .query_row(
                "SELECT cancel_requested_at FROM sessions WHERE id = ?1",
                params![session_id],
                |row| row.get::<_, Option<String>>(0),
            )?
            .is_some();
        let status = SessionStatus::finalize(pending, failed, cancelled);
        conn.execute(
            "UPDATE sessions SET status = ?1, phase = 'complete', ended_at = ?2 WHERE id = ?3",
            params![status.as_str(), Utc::now(), session_id],
        )?;
        Ok(status)
    }
}
