use chrono::Utc;
use research_types::{ResearchError, Result, Section, SectionStatus};
use rusqlite::{params, OptionalExtension, Row};

use crate::ResearchStore;

const SECTION_COLUMNS: &str = "id, session_id, title, description, position, status, \
     synthesized_content, word_count, citation_count, is_gap_fill, created_at, synthesized_at";

fn section_from_row(row: &Row) -> rusqlite::Result<Section> {
    let status: String = row.get("status")?;
    Ok(Section {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        position: row.get("position")?,
        status: SectionStatus::parse(&status).unwrap_or(SectionStatus::Planned),
        synthesized_content: row.get("synthesized_content")?,
        word_count: row.get("word_count")?,
        citation_count: row.get("citation_count")?,
        is_gap_fill: row.get::<_, i64>("is_gap_fill")? != 0,
        created_at: row.get("created_at")?,
        synthesized_at: row.get("synthesized_at")?,
    })
}

impl ResearchStore {
    /// Plan a new outline section and return its id. `position` is the
    /// section's order in the final report, assigned by the outline stage.
    pub async fn add_section(
        &self,
        session_id: i64,
        title: &str,
        description: &str,
        position: i64,
        is_gap_fill: bool,
    ) -> Result<i64> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO sections (session_id, title, description, position, status, is_gap_fill, created_at) \
             VALUES (?1, ?2, ?3, ?4, 'planned', ?5, ?6)",
            params![session_id, title, description, position, is_gap_fill as i64, Utc::now()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn get_section(&self, id: i64) -> Result<Option<Section>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!("SELECT {SECTION_COLUMNS} FROM sections WHERE id = ?1"),
            params![id],
            section_from_row,
        )
        .optional()
        .map_err(ResearchError::from)
    }

    pub async fn get_sections(&self, session_id: i64) -> Result<Vec<Section>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SECTION_COLUMNS} FROM sections WHERE session_id = ?1 ORDER BY position ASC"
        ))?;
        let rows = stmt.query_map(params![session_id], section_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub async fn set_section_status(&self, id: i64, status: SectionStatus) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE sections SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        Ok(())
    }

    /// Persist the synthesized content for a section, moving it to
    /// `complete` and stamping word/citation counts derived by the caller.
    pub async fn mark_section_synthesized(
        &self,
        id: i64,
        content: &str,
        word_count: i64,
        citation_count: i64,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE sections SET status = 'complete', synthesized_content = ?1, word_count = ?2, \
             citation_count = ?3, synthesized_at = ?4 WHERE id = ?5",
            params![content, word_count, citation_count, Utc::now(), id],
        )?;
        Ok(())
    }
}
