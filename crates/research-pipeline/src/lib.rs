//! The research pipeline: configuration, the 7-phase state machine, the
//! per-task research stage, section synthesis and final compilation. This
//! is the crate a service facade or CLI wires up against a store and a set
//! of model/search/extraction providers.

pub mod compile;
pub mod config;
pub mod parsing;
pub mod phases;
pub mod prompts;
pub mod rate_limit;
pub mod research_stage;
pub mod synthesis;

pub use compile::Compiler;
pub use config::ResearchConfig;
pub use phases::PhaseRunner;
pub use prompts::PromptLibrary;
pub use rate_limit::RateLimiter;
pub use research_stage::ResearchStage;
pub use synthesis::SynthesisStage;

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    use research_ledger::SourceLedger;
    use research_providers::{CompletionResponse, MockExtractionClient, MockLlmClient, MockSearchClient, SearchResult};
    use research_scheduler::{TaskExecutor, TaskOutcome};
    use research_store::ResearchStore;
    use research_types::Phase;

    use crate::config::ResearchConfig;
    use crate::phases::PhaseRunner;
    use crate::prompts::PromptLibrary;
    use crate::research_stage::ResearchStage;

    fn text_response(content: impl Into<String>) -> CompletionResponse {
        CompletionResponse {
            content: Some(content.into()),
            tool_call: None,
            prompt_tokens: 0,
            completion_tokens: 0,
        }
    }

    fn outline_response() -> CompletionResponse {
        text_response(r#"{"sections": [{"title": "Background", "description": "context and history"}]}"#)
    }

    fn note_response() -> CompletionResponse {
        text_response("Background claim supported by evidence [1].")
    }

    #[tokio::test]
    async fn happy_path_runs_all_phases_to_a_compiled_report() {
        let store = ResearchStore::open_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();

        let mut config = ResearchConfig::default();
        config.output.directory = dir.path().to_string_lossy().to_string();
        config.research.min_initial_tasks = 1;
        config.research.tasks_per_section = 1;
        config.research.max_total_tasks = 4;
        config.gap_analysis.enabled = false;
        config.search.queries_per_task = 1;

        let llm = Arc::new(MockLlmClient::new(vec![
            // pre-planning: query generation, per-page analysis, landscape fold-in
            text_response(r#"["background of the topic"]"#),
            text_response(
                r#"{"relevance": "high", "entities": ["Topic"], "subtopics": ["Origins"], "notable_claims": ["Claim one"], "gaps": ["Gap one"]}"#,
            ),
            text_response("Structured landscape analysis of the topic."),
            // outline design
            outline_response(),
            // task planning for the single section
            text_response(
                r#"{"tasks": [{"topic": "background of the topic", "description": "context and history", "priority": 5}]}"#,
            ),
            // research stage: query generation, note synthesis
            text_response(r#"["background of the topic"]"#),
            note_response(),
            // synthesis: section, executive summary, conclusion
            text_response("The background section, citing [1] for its central claim."),
            text_response("Executive summary text."),
            text_response("Conclusion text."),
        ]));
        let search = Arc::new(MockSearchClient::new(vec![SearchResult {
            url: "https://example.edu/article".into(),
            title: "An academic article".into(),
            snippet: "relevant snippet".into(),
            score: 0.9,
        }]));
        let extraction = Arc::new(MockExtractionClient);

        let runner = PhaseRunner::new(store.clone(), llm, search, extraction, config).unwrap();
        let session_id = runner.run_new("what is the topic").await.unwrap();

        let session = store.get_session(session_id).await.unwrap().unwrap();
        assert_eq!(session.phase, Phase::Complete);
        assert!(session.report_markdown_path.is_some());

        let markdown_path = session.report_markdown_path.unwrap();
        let content = tokio::fs::read_to_string(&markdown_path).await.unwrap();
        assert!(content.contains("Background"));
        assert!(content.contains("[1]"));
        assert!(content.contains("example.edu"));
    }

    #[tokio::test]
    async fn cancellation_mid_research_leaves_pending_tasks_and_compiles_partial_report() {
        use research_types::{NewTask, Phase as P, SessionStatus};

        let store = ResearchStore::open_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();

        let mut config = ResearchConfig::default();
        config.output.directory = dir.path().to_string_lossy().to_string();

        let session_id = store.create_session("a cancelled query").await.unwrap();
        let section_id = store.add_section(session_id, "Background", "context", 0, false).await.unwrap();
        let task_ids = store
            .add_tasks(
                session_id,
                &[
                    NewTask {
                        section_id: Some(section_id),
                        parent_id: None,
                        topic: "Background - angle 1".into(),
                        description: "context".into(),
                        file_path: format!("{session_id}/1.md"),
                        priority: 100,
                        depth: 0,
                        is_gap_fill: false,
                    },
                    NewTask {
                        section_id: Some(section_id),
                        parent_id: None,
                        topic: "Background - angle 2".into(),
                        description: "context".into(),
                        file_path: format!("{session_id}/2.md"),
                        priority: 100,
                        depth: 0,
                        is_gap_fill: false,
                    },
                ],
            )
            .await
            .unwrap();
        // Simulate the scheduler having already finished the first task.
        store.mark_task_completed(task_ids[0], 120, 1).await.unwrap();
        store.set_phase(session_id, P::Researching).await.unwrap();

        // cancel_run(): request cancellation before resuming.
        store.mark_cancel_requested(session_id).await.unwrap();

        let llm = Arc::new(MockLlmClient::new(vec![]));
        let search = Arc::new(MockSearchClient::new(vec![]));
        let extraction = Arc::new(MockExtractionClient);
        let runner = PhaseRunner::new(store.clone(), llm, search, extraction, config).unwrap();
        runner.resume(session_id).await.unwrap();

        let session = store.get_session(session_id).await.unwrap().unwrap();
        assert!(session.cancel_requested_at.is_some());
        assert_eq!(session.status, SessionStatus::Cancelled);
        assert_eq!(session.phase, P::Complete);
        assert!(session.report_markdown_path.is_some());

        let remaining = store.pending_and_in_progress_count(session_id).await.unwrap();
        assert_eq!(remaining, 1, "the second task was never claimed");
    }

    #[tokio::test]
    async fn outline_design_errors_instead_of_fabricating_a_section() {
        let store = ResearchStore::open_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();

        let mut config = ResearchConfig::default();
        config.output.directory = dir.path().to_string_lossy().to_string();

        let llm = Arc::new(MockLlmClient::new(vec![
            // pre-planning query generation (search comes back empty, so nothing else fires)
            text_response(r#"["an unplannable query"]"#),
            // outline design
            text_response("not an outline at all"),
        ]));
        let search = Arc::new(MockSearchClient::new(vec![]));
        let extraction = Arc::new(MockExtractionClient);

        let runner = PhaseRunner::new(store.clone(), llm, search, extraction, config).unwrap();
        let result = runner.run_new("an unplannable query").await;
        assert!(result.is_err(), "zero parsed sections must surface as an error, not a fallback section");
    }

    #[tokio::test]
    async fn resume_reopens_a_complete_session_that_still_has_unsynthesized_sections() {
        use research_types::{NewTask, Phase as P};

        let store = ResearchStore::open_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();

        let mut config = ResearchConfig::default();
        config.output.directory = dir.path().to_string_lossy().to_string();
        config.gap_analysis.enabled = false;

        let session_id = store.create_session("a resumed query").await.unwrap();
        let section_id = store.add_section(session_id, "Background", "context", 0, false).await.unwrap();
        store
            .add_tasks(
                session_id,
                &[NewTask {
                    section_id: Some(section_id),
                    parent_id: None,
                    topic: "Background - angle 1".into(),
                    description: "context".into(),
                    file_path: format!("{session_id}/1.md"),
                    priority: 100,
                    depth: 0,
                    is_gap_fill: false,
                }],
            )
            .await
            .unwrap();
        // A prior run finalized the session while a section was still pending.
        store.set_phase(session_id, P::Complete).await.unwrap();
        store.mark_cancel_requested(session_id).await.unwrap();

        let llm = Arc::new(MockLlmClient::new(vec![]));
        let search = Arc::new(MockSearchClient::new(vec![]));
        let extraction = Arc::new(MockExtractionClient);
        let runner = PhaseRunner::new(store.clone(), llm, search, extraction, config).unwrap();
        runner.resume(session_id).await.unwrap();

        let session = store.get_session(session_id).await.unwrap().unwrap();
        // Resuming work clears the stale cancellation marker left by the prior run.
        assert!(session.cancel_requested_at.is_none());
    }

    #[tokio::test]
    async fn sourceless_task_gets_an_honest_note_with_no_phantom_citations() {
        let store = ResearchStore::open_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let ledger = SourceLedger::new(store.clone());
        let prompts = Arc::new(PromptLibrary::load().unwrap());

        let mut config = ResearchConfig::default();
        config.output.directory = dir.path().to_string_lossy().to_string();
        config.gap_analysis.enabled = false;

        let session_id = store.create_session("a thin topic").await.unwrap();
        let section_id = store.add_section(session_id, "Background", "context", 0, false).await.unwrap();
        let task_ids = store
            .add_tasks(
                session_id,
                &[research_types::NewTask {
                    section_id: Some(section_id),
                    parent_id: None,
                    topic: "an obscure angle".into(),
                    description: "nothing much written about this".into(),
                    file_path: format!("{session_id}/1.md"),
                    priority: 100,
                    depth: 0,
                    is_gap_fill: false,
                }],
            )
            .await
            .unwrap();
        let task = store.get_task(task_ids[0]).await.unwrap().unwrap();

        let llm = Arc::new(MockLlmClient::new(vec![
            text_response("[]"),
            text_response("Nothing substantive turned up, citing [1] anyway for good measure."),
        ]));
        let search = Arc::new(MockSearchClient::new(vec![]));
        let extraction = Arc::new(MockExtractionClient);

        let stage = ResearchStage::new(
            store.clone(),
            ledger,
            llm,
            search,
            extraction,
            config,
            prompts,
            dir.path().to_path_buf(),
        );

        let cancel = Arc::new(AtomicBool::new(false));
        let outcome = stage.execute(task.clone(), cancel).await;
        let TaskOutcome::Completed { citation_count, .. } = outcome else {
            panic!("expected a completed outcome even with no sources");
        };
        assert_eq!(citation_count, 0, "a phantom [1] must be stripped when no sources were recorded");

        let notes = research_tools::read_task_notes(dir.path(), &task.file_path).await.unwrap().unwrap();
        assert!(!notes.contains("[1]"));
    }
}
