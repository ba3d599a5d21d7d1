//! Concurrent task scheduler for the `researching` phase: claims pending
//! tasks off the store, runs up to `max_concurrent_tasks` of them at once via
//! an executor supplied by the pipeline crate, and applies the retry/abort
//! policy the original orchestrator used around its thread pool.

mod config;
mod runner;

pub use config::SchedulerConfig;
pub use runner::{CancelFlag, RunOutcome, Scheduler, TaskExecutor, TaskOutcome};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use research_store::ResearchStore;
    use research_types::{NewTask, ResearchTask};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct AlwaysSucceeds;

    #[async_trait]
    impl TaskExecutor for AlwaysSucceeds {
        async fn execute(&self, task: ResearchTask, _cancel: CancelFlag) -> TaskOutcome {
            TaskOutcome::Completed {
                word_count: 100,
                citation_count: 1,
                new_tasks: if task.depth == 0 {
                    vec![NewTask {
                        section_id: task.section_id,
                        parent_id: Some(task.id),
                        topic: "follow-up".into(),
                        description: "d".into(),
                        file_path: format!("followup_{}.md", task.id),
                        priority: task.priority,
                        depth: task.depth + 1,
                        is_gap_fill: false,
                    }]
                } else {
                    Vec::new()
                },
                glossary: Vec::new(),
            }
        }
    }

    struct AlwaysFails(AtomicUsize);

    #[async_trait]
    impl TaskExecutor for AlwaysFails {
        async fn execute(&self, _task: ResearchTask, _cancel: CancelFlag) -> TaskOutcome {
            self.0.fetch_add(1, Ordering::SeqCst);
            TaskOutcome::Failed("boom".into())
        }
    }

    async fn new_session_with_tasks(n: usize) -> (ResearchStore, i64) {
        let store = ResearchStore::open_in_memory().await.unwrap();
        let session_id = store.create_session("q").await.unwrap();
        for i in 0..n {
            store
                .add_task(
                    session_id,
                    &NewTask {
                        section_id: None,
                        parent_id: None,
                        topic: format!("t{i}"),
                        description: "d".into(),
                        file_path: format!("t{i}.md"),
                        priority: 5,
                        depth: 0,
                        is_gap_fill: false,
                    },
                )
                .await
                .unwrap();
        }
        (store, session_id)
    }

    #[tokio::test]
    async fn runs_to_completion_and_admits_recursive_followups() {
        let (store, session_id) = new_session_with_tasks(3).await;
        let scheduler = Scheduler::new(SchedulerConfig {
            idle_poll_interval: Duration::from_millis(20),
            ..Default::default()
        });

        let outcome = scheduler
            .run(&store, session_id, 10, Arc::new(AlwaysSucceeds))
            .await
            .unwrap();

        assert_eq!(outcome.completed, 6); // 3 initial + 3 depth-1 followups
        assert!(!outcome.cancelled);
        assert!(!outcome.aborted_consecutive_failures);
        assert_eq!(store.count_tasks(session_id).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn aborts_after_consecutive_failure_limit() {
        let (store, session_id) = new_session_with_tasks(10).await;
        let scheduler = Scheduler::new(SchedulerConfig {
            max_concurrent_tasks: 1,
            idle_poll_interval: Duration::from_millis(20),
            consecutive_failure_limit: 3,
            ..Default::default()
        });

        let outcome = scheduler
            .run(&store, session_id, 10, Arc::new(AlwaysFails(AtomicUsize::new(0))))
            .await
            .unwrap();

        assert!(outcome.aborted_consecutive_failures);
        assert_eq!(outcome.failed, 3);
    }

    #[tokio::test]
    async fn recursive_followups_are_clamped_to_max_total_tasks() {
        let (store, session_id) = new_session_with_tasks(3).await;
        let scheduler = Scheduler::new(SchedulerConfig {
            idle_poll_interval: Duration::from_millis(20),
            ..Default::default()
        });

        scheduler
            .run(&store, session_id, 4, Arc::new(AlwaysSucceeds))
            .await
            .unwrap();

        assert_eq!(store.count_tasks(session_id).await.unwrap(), 4);
    }
}
