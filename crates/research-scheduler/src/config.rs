use std::time::Duration;

/// Scheduling knobs, sourced from the `research`/`quality` config sections.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_concurrent_tasks: usize,
    pub max_retries: i64,
    pub max_loops: u32,
    pub max_runtime: Duration,
    pub consecutive_failure_limit: u32,
    pub idle_poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 5,
            max_retries: 2,
            max_loops: 200,
            max_runtime: Duration::from_secs(3 * 3600),
            consecutive_failure_limit: 3,
            idle_poll_interval: Duration::from_secs(2),
        }
    }
}
