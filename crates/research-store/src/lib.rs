//! Durable state store for the research engine.
//!
//! A single SQLite database (WAL mode) holds sessions, sections, tasks,
//! sources, glossary terms and the run-event log. All access funnels through
//! one connection guarded by an async mutex: the scheduler's atomic
//! `claim_next` and the event log's append-only writes both depend on that
//! serialization rather than on SQLite-level transaction isolation.

mod events;
mod glossary;
mod schema;
mod sections;
mod sessions;
mod sources;
mod stats;
mod tasks;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use research_types::Result;
use rusqlite::Connection;
use tokio::sync::Mutex;

pub use research_types::entities::*;
pub use research_types::events::*;

/// Handle to the on-disk state store. Cheap to clone; all clones share the
/// same underlying connection.
#[derive(Clone)]
pub struct ResearchStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl ResearchStore {
    /// Open (creating if absent) the database at `db_path`, enable WAL mode
    /// and run forward-only migrations.
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(30))?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.execute("PRAGMA synchronous = NORMAL", [])?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: db_path.to_path_buf(),
        };

        store.init_schema().await?;
        store.validate_integrity().await?;

        Ok(store)
    }

    /// In-memory database, used by tests and by `research-engine validate`.
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: PathBuf::from(":memory:"),
        };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    async fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        schema::create_tables(&conn)?;
        schema::migrate(&conn)?;
        Ok(())
    }

    /// `PRAGMA quick_check` run once at startup; a malformed database is a
    /// fatal integrity error rather than something the engine can recover
    /// from by itself.
    async fn validate_integrity(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        let check: String = conn.query_row("PRAGMA quick_check(1)", [], |row| row.get(0))?;
        if check.trim().eq_ignore_ascii_case("ok") {
            return Ok(());
        }
        Err(research_types::ResearchError::Integrity(format!(
            "quick_check reported: {check}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_and_reopens_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.sqlite3");
        {
            let store = ResearchStore::open(&path).await.unwrap();
            let id = store.create_session("first query").await.unwrap();
            assert_eq!(id, 1);
        }
        // Reopening must not choke on already-created tables/columns.
        let store = ResearchStore::open(&path).await.unwrap();
        let session = store.get_session(1).await.unwrap().unwrap();
        assert_eq!(session.query, "first query");
    }

    #[tokio::test]
    async fn claim_next_never_hands_out_a_task_twice() {
        let store = ResearchStore::open_in_memory().await.unwrap();
        let session_id = store.create_session("q").await.unwrap();
        for i in 0..10 {
            store
                .add_task(
                    session_id,
                    &research_types::NewTask {
                        section_id: None,
                        parent_id: None,
                        topic: format!("topic {i}"),
                        description: "d".into(),
                        file_path: format!("task_{i}.md"),
                        priority: 5,
                        depth: 0,
                        is_gap_fill: false,
                    },
                )
                .await
                .unwrap();
        }

        let store = std::sync::Arc::new(store);
        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.claim_next(session_id, 3).await.unwrap() }));
        }
        let mut claimed = Vec::new();
        for handle in handles {
            claimed.extend(handle.await.unwrap());
        }

        let mut ids: Vec<i64> = claimed.iter().map(|t| t.id).collect();
        let before_dedup = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), before_dedup, "claim_next must never double-claim a task");
        assert!(ids.len() <= 10);
    }

    #[tokio::test]
    async fn add_source_upserts_by_url_and_links_both_tasks() {
        let store = ResearchStore::open_in_memory().await.unwrap();
        let session_id = store.create_session("q").await.unwrap();
        let task_a = store
            .add_task(
                session_id,
                &research_types::NewTask {
                    section_id: None,
                    parent_id: None,
                    topic: "a".into(),
                    description: "d".into(),
                    file_path: "a.md".into(),
                    priority: 5,
                    depth: 0,
                    is_gap_fill: false,
                },
            )
            .await
            .unwrap();
        let task_b = store
            .add_task(
                session_id,
                &research_types::NewTask {
                    section_id: None,
                    parent_id: None,
                    topic: "b".into(),
                    description: "d".into(),
                    file_path: "b.md".into(),
                    priority: 5,
                    depth: 0,
                    is_gap_fill: false,
                },
            )
            .await
            .unwrap();

        let new_source = research_types::NewSource {
            url: "https://example.com/article".into(),
            title: "Article".into(),
            domain: "example.com".into(),
            snippet: "snippet".into(),
            full_content: None,
            quality_score: 0.8,
            is_academic: false,
        };
        let id_a = store.add_source(task_a, &new_source, 0).await.unwrap();
        let id_b = store.add_source(task_b, &new_source, 0).await.unwrap();
        assert_eq!(id_a, id_b, "same URL must resolve to one source row");

        let for_a = store.get_sources_for_task(task_a).await.unwrap();
        let for_b = store.get_sources_for_task(task_b).await.unwrap();
        assert_eq!(for_a.len(), 1);
        assert_eq!(for_b.len(), 1);
    }

    #[tokio::test]
    async fn events_after_paginates_without_gaps_or_overlap() {
        let store = ResearchStore::open_in_memory().await.unwrap();
        let session_id = store.create_session("q").await.unwrap();
        for i in 0..25 {
            store
                .add_event(
                    session_id,
                    research_types::NewRunEvent::new(format!("event_{i}")),
                )
                .await
                .unwrap();
        }

        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let (page, next) = store.events_after(session_id, cursor, 10).await.unwrap();
            if page.is_empty() {
                break;
            }
            seen.extend(page.iter().map(|e| e.id));
            cursor = next;
        }

        assert_eq!(seen.len(), 25);
        let mut sorted = seen.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 25, "pagination must not repeat or skip events");
        assert_eq!(seen, sorted, "events must come back in insertion order");
    }

    #[tokio::test]
    async fn retry_failed_respects_max_retries() {
        let store = ResearchStore::open_in_memory().await.unwrap();
        let session_id = store.create_session("q").await.unwrap();
        let task_id = store
            .add_task(
                session_id,
                &research_types::NewTask {
                    section_id: None,
                    parent_id: None,
                    topic: "t".into(),
                    description: "d".into(),
                    file_path: "t.md".into(),
                    priority: 5,
                    depth: 0,
                    is_gap_fill: false,
                },
            )
            .await
            .unwrap();
        store.claim_next(session_id, 1).await.unwrap();
        store.mark_task_failed(task_id, "boom").await.unwrap();

        let requeued = store.retry_failed(session_id, 2).await.unwrap();
        assert_eq!(requeued, 1);
        let task = store.get_task(task_id).await.unwrap().unwrap();
        assert_eq!(task.retry_count, 1);
        assert_eq!(task.status.as_str(), "pending");

        store.claim_next(session_id, 1).await.unwrap();
        store.mark_task_failed(task_id, "boom again").await.unwrap();
        let requeued = store.retry_failed(session_id, 2).await.unwrap();
        assert_eq!(requeued, 1, "retry_count 1 is still below the ceiling of 2");

        store.claim_next(session_id, 1).await.unwrap();
        store.mark_task_failed(task_id, "boom a third time").await.unwrap();
        let requeued = store.retry_failed(session_id, 2).await.unwrap();
        assert_eq!(requeued, 0, "a task at its retry ceiling must stay failed");
    }
}
