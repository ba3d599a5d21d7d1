//! Source ledger: turns the store's task/source tables into the
//! presentation-ordered, globally-citation-numbered material the synthesis
//! stage and final compiler consume.

mod citations;

pub use citations::{strip_phantom_citations, CitationRemapper};

use research_store::ResearchStore;
use research_types::{NewSource, Result, Source};

/// Gap-fill sources are appended after a task's initial research pass; their
/// citation positions start at this offset so they always sort after the
/// initial sources within the same task, never interleaving with them.
pub const GAP_FILL_POSITION_OFFSET: i64 = 100;

#[derive(Clone)]
pub struct SourceLedger {
    store: ResearchStore,
}

impl SourceLedger {
    pub fn new(store: ResearchStore) -> Self {
        Self { store }
    }

    /// Record a source found during a task's initial research pass, in
    /// discovery order.
    pub async fn record_source(&self, task_id: i64, source: &NewSource) -> Result<i64> {
        let position = self.store.next_position_for_task(task_id).await?;
        self.store.add_source(task_id, source, position).await
    }

    /// Record a source found while gap-filling the same task. `index` is the
    /// source's rank within this gap-fill batch (0-based).
    pub async fn record_gap_fill_source(
        &self,
        task_id: i64,
        source: &NewSource,
        index: i64,
    ) -> Result<i64> {
        let position = GAP_FILL_POSITION_OFFSET + index;
        self.store.add_source(task_id, source, position).await
    }

    pub async fn sources_for_task(&self, task_id: i64) -> Result<Vec<Source>> {
        self.store.get_sources_for_task(task_id).await
    }

    pub async fn sources_for_section(&self, section_id: i64) -> Result<Vec<Source>> {
        self.store.get_sources_for_section(section_id).await
    }

    pub async fn sources_for_session(&self, session_id: i64) -> Result<Vec<Source>> {
        self.store.get_sources_for_session(session_id).await
    }

    /// URLs already attached to this session, used to keep gap-fill search
    /// from re-surfacing a source the initial pass already cited.
    pub async fn known_urls(&self, session_id: i64) -> Result<std::collections::HashSet<String>> {
        self.store.get_existing_source_urls(session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn gap_fill_sources_sort_after_initial_ones() {
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
        let ledger = SourceLedger::new(store);

        for i in 0..3 {
            ledger
                .record_source(
                    task_id,
                    &NewSource {
                        url: format!("https://a.com/{i}"),
                        title: "a".into(),
                        domain: "a.com".into(),
                        snippet: "s".into(),
                        full_content: None,
                        quality_score: 0.5,
                        is_academic: false,
                    },
                )
                .await
                .unwrap();
        }
        ledger
            .record_gap_fill_source(
                task_id,
                &NewSource {
                    url: "https://gap.com/0".into(),
                    title: "gap".into(),
                    domain: "gap.com".into(),
                    snippet: "s".into(),
                    full_content: None,
                    quality_score: 0.5,
                    is_academic: false,
                },
                0,
            )
            .await
            .unwrap();

        let sources = ledger.sources_for_task(task_id).await.unwrap();
        assert_eq!(sources.len(), 4);
        assert_eq!(sources.last().unwrap().domain, "gap.com");
    }
}
