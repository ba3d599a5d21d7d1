use serde::{Deserialize, Serialize};

/// Statistics surfaced by `get_run_status` — see spec §6 Service-facade operations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStatistics {
    pub total_tasks: i64,
    pub pending_tasks: i64,
    pub completed_tasks: i64,
    pub failed_tasks: i64,
    pub total_sources: i64,
    pub total_words: i64,
    pub glossary_terms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_calls: u64,
}

impl Default for TokenUsage {
    fn default() -> Self {
        Self {
            prompt_tokens: 0,
            completion_tokens: 0,
            total_calls: 0,
        }
    }
}
