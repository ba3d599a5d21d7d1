use research_types::{Result, RunEvent, RunStatistics, TokenUsage};
use rusqlite::params;

use crate::ResearchStore;

impl ResearchStore {
    pub async fn get_statistics(&self, session_id: i64) -> Result<RunStatistics> {
        let conn = self.conn.lock().await;
        let (total_tasks, pending_tasks, completed_tasks, failed_tasks, total_words): (
            i64,
            i64,
            i64,
            i64,
            i64,
        ) = conn.query_row(
            "SELECT COUNT(*), \
                    COALESCE(SUM(status IN ('pending', 'in_progress')), 0), \
                    COALESCE(SUM(status = 'completed'), 0), \
                    COALESCE(SUM(status = 'failed'), 0), \
                    COALESCE(SUM(word_count), 0) \
             FROM tasks WHERE session_id = ?1",
            params![session_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )?;
        let total_sources: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT ts.source_id) FROM task_sources ts \
             JOIN tasks t ON t.id = ts.task_id WHERE t.session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        let glossary_terms: i64 = conn.query_row(
            "SELECT COUNT(*) FROM glossary WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(RunStatistics {
            total_tasks,
            pending_tasks,
            completed_tasks,
            failed_tasks,
            total_sources,
            total_words,
            glossary_terms,
        })
    }

    /// Sources that were fetched during research but filtered out by the
    /// quality gate, recorded as `source_rejected` run events rather than a
    /// dedicated table — they never become citable sources, so there is
    /// nothing for the ledger to hold.
    pub async fn get_rejected_results(&self, session_id: i64) -> Result<Vec<RunEvent>> {
        let (events, _) = self
            .events_filtered(session_id, "source_rejected", None)
            .await?;
        Ok(events)
    }

    pub async fn get_run_queries_by_task(&self, task_id: i64) -> Result<Vec<RunEvent>> {
        let (events, _) = self.events_filtered(0, "query_generated", Some(task_id)).await?;
        Ok(events)
    }

    async fn events_filtered(
        &self,
        session_id: i64,
        event_type: &str,
        task_id: Option<i64>,
    ) -> Result<(Vec<RunEvent>, ())> {
        let conn = self.conn.lock().await;
        let rows = if let Some(task_id) = task_id {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, task_id, event_type, query_group, query_text, url, title, \
                 snippet, quality_score, phase, severity, payload_json, created_at_micros \
                 FROM run_events WHERE task_id = ?1 AND event_type = ?2 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![task_id, event_type], crate::events::event_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, task_id, event_type, query_group, query_text, url, title, \
                 snippet, quality_score, phase, severity, payload_json, created_at_micros \
                 FROM run_events WHERE session_id = ?1 AND event_type = ?2 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![session_id, event_type], crate::events::event_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        Ok((rows, ()))
    }

    /// Aggregate token usage from `model_call` events, whose payload carries
    /// `prompt_tokens`/`completion_tokens` as logged by the providers crate.
    pub async fn get_token_usage(&self, session_id: i64) -> Result<TokenUsage> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT payload_json FROM run_events WHERE session_id = ?1 AND event_type = 'model_call'",
        )?;
        let mut usage = TokenUsage::default();
        let rows = stmt.query_map(params![session_id], |row| row.get::<_, Option<String>>(0))?;
        for row in rows {
            let Some(payload) = row? else { continue };
            let Ok(value) = serde_json::from_str::<serde_json::Value>(&payload) else {
                continue;
            };
            usage.prompt_tokens += value.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
            usage.completion_tokens += value
                .get("completion_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            usage.total_calls += 1;
        }
        Ok(usage)
    }
}
