use chrono::Utc;
use research_types::{NewSource, Result, Source};
use rusqlite::{params, OptionalExtension, Row};

use crate::ResearchStore;

const SOURCE_COLUMNS: &str =
    "id, url, title, domain, snippet, full_content, quality_score, is_academic, accessed_at";

fn source_from_row(row: &Row) -> rusqlite::Result<Source> {
    Ok(Source {
        id: row.get("id")?,
        url: row.get("url")?,
        title: row.get("title")?,
        domain: row.get("domain")?,
        snippet: row.get("snippet")?,
        full_content: row.get("full_content")?,
        quality_score: row.get("quality_score")?,
        is_academic: row.get::<_, i64>("is_academic")? != 0,
        accessed_at: row.get("accessed_at")?,
        extracted_content: None,
        task_ids: Vec::new(),
    })
}

impl ResearchStore {
    /// Upsert a source by URL and link it to `task_id` at `position`. A URL
    /// already seen by an earlier task reuses the same source row; the link
    /// table is what makes a source show up under multiple tasks with
    /// per-task citation positions.
    pub async fn add_source(
        &self,
        task_id: i64,
        source: &NewSource,
        position: i64,
    ) -> Result<i64> {
        let conn = self.conn.lock().await;
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM sources WHERE url = ?1",
                params![source.url],
                |row| row.get(0),
            )
            .optional()?;

        let source_id = if let Some(id) = existing {
            conn.execute(
                "UPDATE sources SET full_content = COALESCE(?1, full_content) WHERE id = ?2",
                params![source.full_content, id],
            )?;
            id
        } else {
            conn.execute(
                "INSERT INTO sources (url, title, domain, snippet, full_content, quality_score, \
                 is_academic, accessed_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    source.url,
                    source.title,
                    source.domain,
                    source.snippet,
                    source.full_content,
                    source.quality_score,
                    source.is_academic as i64,
                    Utc::now(),
                ],
            )?;
            conn.last_insert_rowid()
        };

        conn.execute(
            "INSERT OR REPLACE INTO task_sources (task_id, source_id, position, extracted_content) \
             VALUES (?1, ?2, ?3, (SELECT extracted_content FROM task_sources WHERE task_id = ?1 AND source_id = ?2))",
            params![task_id, source_id, position],
        )?;
        Ok(source_id)
    }

    pub async fn set_extracted_content(
        &self,
        task_id: i64,
        source_id: i64,
        content: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE task_sources SET extracted_content = ?1 WHERE task_id = ?2 AND source_id = ?3",
            params![content, task_id, source_id],
        )?;
        Ok(())
    }

    pub async fn next_position_for_task(&self, task_id: i64) -> Result<i64> {
        let conn = self.conn.lock().await;
        let max: Option<i64> = conn.query_row(
            "SELECT MAX(position) FROM task_sources WHERE task_id = ?1",
            params![task_id],
            |row| row.get(0),
        )?;
        Ok(max.map(|m| m + 1).unwrap_or(0))
    }

    pub async fn get_sources_for_task(&self, task_id: i64) -> Result<Vec<Source>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {cols}, ts.extracted_content as extracted_content FROM sources s \
             JOIN task_sources ts ON ts.source_id = s.id \
             WHERE ts.task_id = ?1 ORDER BY ts.position ASC",
            cols = SOURCE_COLUMNS
                .split(", ")
                .map(|c| format!("s.{c} as {c}"))
                .collect::<Vec<_>>()
                .join(", ")
        ))?;
        let rows = stmt.query_map(params![task_id], |row| {
            let mut source = source_from_row(row)?;
            source.extracted_content = row.get("extracted_content")?;
            source.task_ids = vec![task_id];
            Ok(source)
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Sources across every task in a section, in presentation order
    /// (task creation order, then per-task position), deduplicated by
    /// source id while preserving the order of first encounter.
    pub async fn get_sources_for_section(&self, section_id: i64) -> Result<Vec<Source>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {cols}, ts.extracted_content as extracted_content, ts.task_id as task_id FROM sources s \
             JOIN task_sources ts ON ts.source_id = s.id \
             JOIN tasks t ON t.id = ts.task_id \
             WHERE t.section_id = ?1 ORDER BY t.id ASC, ts.position ASC",
            cols = SOURCE_COLUMNS
                .split(", ")
                .map(|c| format!("s.{c} as {c}"))
                .collect::<Vec<_>>()
                .join(", ")
        ))?;
        let rows = stmt.query_map(params![section_id], |row| {
            let mut source = source_from_row(row)?;
            source.extracted_content = row.get("extracted_content")?;
            source.task_ids = vec![row.get("task_id")?];
            Ok(source)
        })?;

        let mut seen = std::collections::HashSet::new();
        let mut ordered = Vec::new();
        for source in rows {
            let source = source?;
            if seen.insert(source.id) {
                ordered.push(source);
            }
        }
        Ok(ordered)
    }

    pub async fn get_sources_for_session(&self, session_id: i64) -> Result<Vec<Source>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {cols} FROM sources s \
             JOIN task_sources ts ON ts.source_id = s.id \
             JOIN tasks t ON t.id = ts.task_id \
             WHERE t.session_id = ?1 ORDER BY t.id ASC, ts.position ASC",
            cols = SOURCE_COLUMNS
                .split(", ")
                .map(|c| format!("s.{c} as {c}"))
                .collect::<Vec<_>>()
                .join(", ")
        ))?;
        let rows = stmt.query_map(params![session_id], source_from_row)?;

        let mut seen = std::collections::HashSet::new();
        let mut ordered = Vec::new();
        for source in rows {
            let source = source?;
            if seen.insert(source.id) {
                ordered.push(source);
            }
        }
        Ok(ordered)
    }

    pub async fn get_existing_source_urls(&self, session_id: i64) -> Result<std::collections::HashSet<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT s.url FROM sources s \
             JOIN task_sources ts ON ts.source_id = s.id \
             JOIN tasks t ON t.id = ts.task_id WHERE t.session_id = ?1",
        )?;
        let rows = stmt.query_map(params![session_id], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<std::collections::HashSet<_>>>()?)
    }
}
