use std::collections::HashSet;

use research_types::Result;
use rusqlite::Connection;

pub(crate) fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sessions (
            id                     INTEGER PRIMARY KEY AUTOINCREMENT,
            query                  TEXT NOT NULL,
            refined_brief          TEXT,
            refinement_qa          TEXT,
            pre_plan_context       TEXT,
            status                 TEXT NOT NULL DEFAULT 'running',
            phase                  TEXT NOT NULL DEFAULT 'idle',
            started_at             TEXT NOT NULL,
            ended_at               TEXT,
            cancel_requested_at    TEXT,
            total_tasks            INTEGER NOT NULL DEFAULT 0,
            completed_tasks        INTEGER NOT NULL DEFAULT 0,
            total_words            INTEGER NOT NULL DEFAULT 0,
            total_sources          INTEGER NOT NULL DEFAULT 0,
            executive_summary      TEXT,
            conclusion             TEXT,
            report_markdown_path   TEXT,
            report_html_path       TEXT
        );

        CREATE TABLE IF NOT EXISTS sections (
            id                     INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id             INTEGER NOT NULL REFERENCES sessions(id),
            title                  TEXT NOT NULL,
            description            TEXT NOT NULL,
            position               INTEGER NOT NULL,
            status                 TEXT NOT NULL DEFAULT 'planned',
            synthesized_content    TEXT,
            word_count             INTEGER NOT NULL DEFAULT 0,
            citation_count         INTEGER NOT NULL DEFAULT 0,
            is_gap_fill            INTEGER NOT NULL DEFAULT 0,
            created_at             TEXT NOT NULL,
            synthesized_at         TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_sections_session ON sections(session_id, position);

        CREATE TABLE IF NOT EXISTS tasks (
            id                     INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id             INTEGER NOT NULL REFERENCES sessions(id),
            section_id             INTEGER REFERENCES sections(id),
            parent_id              INTEGER REFERENCES tasks(id),
            topic                  TEXT NOT NULL,
            description            TEXT NOT NULL,
            file_path              TEXT NOT NULL,
            status                 TEXT NOT NULL DEFAULT 'pending',
            priority               INTEGER NOT NULL DEFAULT 5,
            depth                  INTEGER NOT NULL DEFAULT 0,
            word_count             INTEGER NOT NULL DEFAULT 0,
            citation_count         INTEGER NOT NULL DEFAULT 0,
            is_gap_fill            INTEGER NOT NULL DEFAULT 0,
            retry_count            INTEGER NOT NULL DEFAULT 0,
            created_at             TEXT NOT NULL,
            completed_at           TEXT,
            error_message          TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_claim ON tasks(session_id, status, priority DESC, depth ASC, id ASC);
        CREATE INDEX IF NOT EXISTS idx_tasks_section ON tasks(section_id);

        CREATE TABLE IF NOT EXISTS sources (
            id                     INTEGER PRIMARY KEY AUTOINCREMENT,
            url                    TEXT NOT NULL UNIQUE,
            title                  TEXT NOT NULL,
            domain                 TEXT NOT NULL,
            snippet                TEXT NOT NULL,
            full_content           TEXT,
            quality_score          REAL NOT NULL DEFAULT 0,
            is_academic            INTEGER NOT NULL DEFAULT 0,
            accessed_at            TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS task_sources (
            task_id                INTEGER NOT NULL REFERENCES tasks(id),
            source_id              INTEGER NOT NULL REFERENCES sources(id),
            position               INTEGER NOT NULL DEFAULT 0,
            extracted_content      TEXT,
            PRIMARY KEY (task_id, source_id)
        );
        CREATE INDEX IF NOT EXISTS idx_task_sources_task ON task_sources(task_id, position);

        CREATE TABLE IF NOT EXISTS glossary (
            id                          INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id                  INTEGER NOT NULL REFERENCES sessions(id),
            term                        TEXT NOT NULL,
            definition                  TEXT NOT NULL,
            first_occurrence_task_id    INTEGER REFERENCES tasks(id)
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_glossary_dedup ON glossary(session_id, term COLLATE NOCASE);

        CREATE TABLE IF NOT EXISTS run_events (
            id                     INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id             INTEGER NOT NULL REFERENCES sessions(id),
            task_id                INTEGER REFERENCES tasks(id),
            event_type             TEXT NOT NULL,
            query_group            TEXT,
            query_text             TEXT,
            url                    TEXT,
            title                  TEXT,
            snippet                TEXT,
            quality_score          REAL,
            phase                  TEXT,
            severity               TEXT,
            payload_json           TEXT,
            created_at_micros      INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_run_events_page ON run_events(session_id, created_at_micros, id);
        ",
    )?;
    Ok(())
}

/// Forward-only migrations: every new column is added conditionally via
/// `PRAGMA table_info` introspection. Columns are never dropped or renamed
/// so that an engine binary older than the database on disk still opens it.
pub(crate) fn migrate(conn: &Connection) -> Result<()> {
    add_column_if_missing(conn, "sessions", "cancel_requested_at", "TEXT")?;
    add_column_if_missing(conn, "tasks", "retry_count", "INTEGER NOT NULL DEFAULT 0")?;
    add_column_if_missing(conn, "sections", "is_gap_fill", "INTEGER NOT NULL DEFAULT 0")?;
    add_column_if_missing(conn, "sessions", "pre_plan_context", "TEXT")?;
    Ok(())
}

fn add_column_if_missing(conn: &Connection, table: &str, column: &str, ddl_type: &str) -> Result<()> {
    let existing: HashSet<String> = {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
        rows.collect::<rusqlite::Result<HashSet<_>>>()?
    };
    if !existing.contains(column) {
        conn.execute(
            &format!("ALTER TABLE {table} ADD COLUMN {column} {ddl_type}"),
            [],
        )?;
    }
    Ok(())
}
