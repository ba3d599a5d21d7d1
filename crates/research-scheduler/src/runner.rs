use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use research_store::ResearchStore;
use research_types::{NewTask, ResearchTask, Result};
use tokio::task::JoinSet;

use crate::config::SchedulerConfig;

/// Shared soft-cancellation signal: executors are expected to check this
/// between steps of a single task's work (e.g. between a search call and a
/// scrape call) rather than being forcibly killed mid-flight.
pub type CancelFlag = Arc<AtomicBool>;

pub enum TaskOutcome {
    Completed {
        word_count: i64,
        citation_count: i64,
        new_tasks: Vec<NewTask>,
        glossary: Vec<(String, String)>,
    },
    Failed(String),
}

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Run one task to completion. Must not panic: internal errors are
    /// reported as `TaskOutcome::Failed` so the scheduler's failure
    /// accounting stays accurate.
    async fn execute(&self, task: ResearchTask, cancel: CancelFlag) -> TaskOutcome;
}

#[derive(Debug, Default)]
pub struct RunOutcome {
    pub completed: i64,
    pub failed: i64,
    pub aborted_consecutive_failures: bool,
    pub cancelled: bool,
    pub hit_max_loops: bool,
    pub hit_max_runtime: bool,
}

pub struct Scheduler {
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    pub async fn run(
        &self,
        store: &ResearchStore,
        session_id: i64,
        max_total_tasks: i64,
        executor: Arc<dyn TaskExecutor>,
    ) -> Result<RunOutcome> {
        let cancel_flag: CancelFlag = Arc::new(AtomicBool::new(false));
        let mut active: JoinSet<(i64, TaskOutcome)> = JoinSet::new();
        let mut outcome = RunOutcome::default();
        let mut consecutive_failures: u32 = 0;
        let start = Instant::now();
        let mut loop_count = 0u32;

        loop {
            if store.is_cancel_requested(session_id).await? {
                cancel_flag.store(true, Ordering::SeqCst);
                outcome.cancelled = true;
                break;
            }
            if loop_count >= self.config.max_loops {
                outcome.hit_max_loops = true;
                break;
            }
            if start.elapsed() >= self.config.max_runtime {
                outcome.hit_max_runtime = true;
                break;
            }
            loop_count += 1;

            let capacity = self.config.max_concurrent_tasks.saturating_sub(active.len());
            if capacity > 0 {
                let claimed = store.claim_next(session_id, capacity as i64).await?;
                for task in claimed {
                    let executor = executor.clone();
                    let cancel_flag = cancel_flag.clone();
                    active.spawn(async move {
                        let id = task.id;
                        let result = executor.execute(task, cancel_flag).await;
                        (id, result)
                    });
                }
            }

            if active.is_empty() {
                let requeued = store.retry_failed(session_id, self.config.max_retries).await?;
                if requeued == 0 {
                    let remaining = store.pending_and_in_progress_count(session_id).await?;
                    if remaining == 0 {
                        break;
                    }
                }
                tokio::time::sleep(self.config.idle_poll_interval).await;
                continue;
            }

            match tokio::time::timeout(self.config.idle_poll_interval, active.join_next()).await {
                Ok(Some(joined)) => {
                    self.apply_outcome(
                        store,
                        session_id,
                        max_total_tasks,
                        joined,
                        &mut outcome,
                        &mut consecutive_failures,
                    )
                    .await?;
                }
                Ok(None) | Err(_) => {}
            }

            if consecutive_failures >= self.config.consecutive_failure_limit {
                cancel_flag.store(true, Ordering::SeqCst);
                outcome.aborted_consecutive_failures = true;
                break;
            }
        }

        // Drain whatever was still in flight rather than abandoning it; the
        // cancel flag set above asks executors to wind down quickly.
        while let Some(joined) = active.join_next().await {
            self.apply_outcome(
                store,
                session_id,
                max_total_tasks,
                joined,
                &mut outcome,
                &mut consecutive_failures,
            )
            .await?;
        }

        store.refresh_session_counters(session_id).await?;
        Ok(outcome)
    }

    async fn apply_outcome(
        &self,
        store: &ResearchStore,
        session_id: i64,
        max_total_tasks: i64,
        joined: std::result::Result<(i64, TaskOutcome), tokio::task::JoinError>,
        outcome: &mut RunOutcome,
        consecutive_failures: &mut u32,
    ) -> Result<()> {
        let (task_id, task_outcome) = match joined {
            Ok(pair) => pair,
            Err(join_err) => {
                tracing::warn!(%join_err, "task executor panicked");
                return Ok(());
            }
        };

        match task_outcome {
            TaskOutcome::Completed {
                word_count,
                citation_count,
                new_tasks,
                glossary,
            } => {
                store.mark_task_completed(task_id, word_count, citation_count).await?;
                *consecutive_failures = 0;
                outcome.completed += 1;

                let total_tasks = store.count_tasks(session_id).await?;
                let remaining_capacity = (max_total_tasks - total_tasks).max(0);
                let to_add = new_tasks.into_iter().take(remaining_capacity as usize).collect::<Vec<_>>();
                if !to_add.is_empty() {
                    store.add_tasks(session_id, &to_add).await?;
                }
                for (term, definition) in glossary {
                    store
                        .add_glossary_term(session_id, &term, &definition, Some(task_id))
                        .await?;
                }
            }
            TaskOutcome::Failed(message) => {
                store.mark_task_failed(task_id, &message).await?;
                *consecutive_failures += 1;
                outcome.failed += 1;
            }
        }
        Ok(())
    }
}
