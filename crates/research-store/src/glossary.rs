use research_types::{GlossaryTerm, Result};
use rusqlite::{params, Row};

use crate::ResearchStore;

fn term_from_row(row: &Row) -> rusqlite::Result<GlossaryTerm> {
    Ok(GlossaryTerm {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        term: row.get("term")?,
        definition: row.get("definition")?,
        first_occurrence_task_id: row.get("first_occurrence_task_id")?,
    })
}

impl ResearchStore {
    /// Add a glossary term, case-insensitively deduplicated per session. A
    /// term already present keeps its original definition and
    /// first-occurrence task; later tasks that surface the same term are
    /// silently ignored rather than overwriting it.
    pub async fn add_glossary_term(
        &self,
        session_id: i64,
        term: &str,
        definition: &str,
        first_occurrence_task_id: Option<i64>,
    ) -> Result<bool> {
        let conn = self.conn.lock().await;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO glossary (session_id, term, definition, first_occurrence_task_id) \
             VALUES (?1, ?2, ?3, ?4)",
            params![session_id, term, definition, first_occurrence_task_id],
        )?;
        Ok(inserted > 0)
    }

    pub async fn get_glossary(&self, session_id: i64) -> Result<Vec<GlossaryTerm>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, session_id, term, definition, first_occurrence_task_id FROM glossary \
             WHERE session_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![session_id], term_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
