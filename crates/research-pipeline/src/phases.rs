//! The 7-phase state machine: pre-planning, outline design, task planning,
//! researching, gap analysis (which may cycle back into researching once),
//! synthesizing, and compiling. One `PhaseRunner` drives one session end to
//! end, whether freshly started or resumed.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use research_ledger::SourceLedger;
use research_providers::{ChatMessage, CompletionRequest, ExtractionClient, LlmClient, SearchClient, SearchResult};
use research_scheduler::{Scheduler, SchedulerConfig};
use research_store::ResearchStore;
use research_types::{NewRunEvent, NewTask, Phase, Result, SessionStatus};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::compile::Compiler;
use crate::config::ResearchConfig;
use crate::parsing::{parse_json_object, strip_fenced_block};
use crate::prompts::PromptLibrary;
use crate::research_stage::{domain_of, submit_queries_tool, truncate_content, ResearchStage};
use crate::synthesis::SynthesisStage;

/// A scraped and scored candidate source from the pre-planning landscape
/// search, before any per-page analysis has run against it.
#[derive(Debug, Clone)]
struct PrePlanSource {
    url: String,
    title: String,
    snippet: String,
    content: String,
}

const PRE_PLAN_MAX_SOURCES: usize = 30;
const PRE_PLAN_EXTRACTION_POOL: usize = 5;
const PRE_PLAN_ANALYSIS_POOL: usize = 3;

pub struct PhaseRunner {
    store: ResearchStore,
    ledger: SourceLedger,
    llm: Arc<dyn LlmClient>,
    search: Arc<dyn SearchClient>,
    extraction: Arc<dyn ExtractionClient>,
    config: ResearchConfig,
    prompts: Arc<PromptLibrary>,
    base_dir: PathBuf,
}

impl PhaseRunner {
    pub fn new(
        store: ResearchStore,
        llm: Arc<dyn LlmClient>,
        search: Arc<dyn SearchClient>,
        extraction: Arc<dyn ExtractionClient>,
        config: ResearchConfig,
    ) -> Result<Self> {
        let ledger = SourceLedger::new(store.clone());
        let prompts = Arc::new(PromptLibrary::load()?);
        let base_dir = PathBuf::from(&config.output.directory).join("notes");
        Ok(Self { store, ledger, llm, search, extraction, config, prompts, base_dir })
    }

    async fn set_phase(&self, session_id: i64, phase: Phase) -> Result<()> {
        self.store.set_phase(session_id, phase).await?;
        self.store
            .add_event(
                session_id,
                NewRunEvent::new("phase_changed")
                    .with_phase(phase.as_str())
                    .with_payload(json!({ "phase": phase.as_str() })),
            )
            .await?;
        info!(session_id, phase = phase.as_str(), "phase changed");
        Ok(())
    }

    /// Start a brand new session for `query` and run it to completion.
    pub async fn run_new(&self, query: &str) -> Result<i64> {
        let session_id = self.store.create_session(query).await?;
        self.run_from_current_phase(session_id).await?;
        Ok(session_id)
    }

    /// Resume a session from whatever phase it was last in. Used both for
    /// explicit `--resume` and for the most-recent-resumable-session
    /// fallback when no session id is given.
    ///
    /// `finalize_session` always leaves a session in `Phase::Complete`, so a
    /// session that was previously cancelled or left partial needs its phase
    /// pulled back into a re-enterable state here rather than there —
    /// finalization is a terminal write for the run that just ended, while
    /// deciding whether that session still has unfinished work to resume is
    /// this call's job. A session still genuinely mid-run (phase other than
    /// `Complete`) is left untouched, cancellation flag included.
    pub async fn resume(&self, session_id: i64) -> Result<()> {
        let session = self.store.get_session(session_id).await?.ok_or_else(|| {
            research_types::ResearchError::TaskExecution(format!("session {session_id} vanished"))
        })?;
        if session.phase == Phase::Complete {
            let sections = self.store.get_sections(session_id).await?;
            if !sections.is_empty() {
                self.store.clear_cancel_requested(session_id).await?;
                self.set_phase(session_id, Phase::Researching).await?;
            }
        }
        self.run_from_current_phase(session_id).await
    }

    async fn run_from_current_phase(&self, session_id: i64) -> Result<()> {
        loop {
            if self.store.is_cancel_requested(session_id).await? {
                self.compile_partial_on_cancel(session_id).await;
                self.finalize(session_id).await?;
                return Ok(());
            }
            let session = self
                .store
                .get_session(session_id)
                .await?
                .ok_or_else(|| research_types::ResearchError::TaskExecution(format!("session {session_id} vanished")))?;

            match session.phase {
                Phase::Idle | Phase::PrePlanning => self.run_pre_planning(session_id, &session.query).await?,
                Phase::OutlineDesign => self.run_outline_design(session_id).await?,
                Phase::TaskPlanning => self.run_task_planning(session_id).await?,
                Phase::Researching => self.run_researching(session_id).await?,
                Phase::GapAnalysis => self.run_gap_analysis(session_id).await?,
                Phase::Synthesizing => self.run_synthesizing(session_id).await?,
                Phase::Compiling => {
                    self.run_compiling(session_id).await?;
                    self.finalize(session_id).await?;
                    return Ok(());
                }
                Phase::Complete => return Ok(()),
            }
        }
    }

    /// Land-scan a topic before any outline exists: generate a handful of
    /// diverse queries, search and scrape the top results, run a per-page
    /// analysis pass, then fold everything into one structured landscape
    /// summary. Each tier degrades to a plainer one rather than failing the
    /// phase: scrape failure falls back to search snippets, analysis failure
    /// falls back to raw content previews.
    async fn run_pre_planning(&self, session_id: i64, query: &str) -> Result<()> {
        self.set_phase(session_id, Phase::PrePlanning).await?;

        let search_context = self.pre_search(query).await;
        let context = if search_context.is_empty() {
            search_context
        } else {
            self.pre_plan_landscape(query, &search_context).await
        };

        if !context.is_empty() {
            self.store.set_pre_plan_context(session_id, &context).await?;
        }
        self.set_phase(session_id, Phase::OutlineDesign).await?;
        Ok(())
    }

    async fn generate_planning_queries(&self, query: &str, count: u32) -> Vec<String> {
        let count = (count as usize).max(1);
        let request = CompletionRequest {
            model: self.config.llm.model_analyzer.clone(),
            messages: vec![
                ChatMessage::system(self.prompts.system("pre_plan_queries")),
                ChatMessage::user(format!(
                    "Research query: {query}\nGenerate {count} diverse, short web search queries."
                )),
            ],
            temperature: 0.4,
            max_tokens: self.config.llm.max_tokens_analyzer,
            json_mode: false,
            tools: Some(vec![submit_queries_tool()]),
        };
        match self.llm.complete(request).await {
            Ok(response) => {
                let queries = crate::parsing::parse_query_list(&response, count);
                if queries.is_empty() {
                    vec![query.to_string()]
                } else {
                    queries
                }
            }
            Err(e) => {
                warn!(error = %e, "pre-planning query generation failed, falling back to the raw query");
                vec![query.to_string()]
            }
        }
    }

    async fn pre_plan_search(&self, queries: &[String]) -> Vec<SearchResult> {
        let max_results = self.config.search.pre_plan_max_results as usize;
        let futures: Vec<_> = queries.iter().map(|q| self.search.search(q, max_results)).collect();
        let outcomes = futures::future::join_all(futures).await;

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for (query, outcome) in queries.iter().zip(outcomes) {
            match outcome {
                Ok(results) => {
                    for result in results {
                        if seen.insert(result.url.clone()) {
                            out.push(result);
                        }
                    }
                }
                Err(e) => warn!(error = %e, query, "pre-planning search call failed"),
            }
        }
        out
    }

    fn passes_pre_plan_gate(&self, result: &SearchResult) -> bool {
        if result.score < self.config.search.min_tavily_score {
            return false;
        }
        let lower = result.url.to_ascii_lowercase();
        if self.config.scraping.blocked_domains.iter().any(|d| lower.contains(d.as_str())) {
            return false;
        }
        if self.config.scraping.blocked_extensions.iter().any(|ext| lower.ends_with(ext.as_str())) {
            return false;
        }
        research_tools::validate_url(&result.url).is_ok()
    }

    async fn pre_plan_scrape(&self, results: Vec<SearchResult>) -> Vec<PrePlanSource> {
        let candidates: Vec<SearchResult> = results
            .into_iter()
            .filter(|r| self.passes_pre_plan_gate(r))
            .take(PRE_PLAN_MAX_SOURCES)
            .collect();

        let mut out = Vec::new();
        for chunk in candidates.chunks(PRE_PLAN_EXTRACTION_POOL) {
            let futures: Vec<_> = chunk.iter().map(|r| self.extraction.extract(&r.url)).collect();
            let extracted = futures::future::join_all(futures).await;
            for (result, extraction) in chunk.iter().zip(extracted) {
                let content = match extraction {
                    Ok(content) => content,
                    Err(e) => {
                        warn!(error = %e, url = result.url, "pre-planning scrape failed");
                        continue;
                    }
                };
                let domain = domain_of(&result.url);
                let quality = research_tools::score_source(research_tools::ScoreInputs {
                    search_relevance: result.score,
                    domain: &domain,
                    content_length: content.content.len(),
                });
                if quality < self.config.quality.min_source_quality {
                    continue;
                }
                out.push(PrePlanSource {
                    url: result.url.clone(),
                    title: content.title.unwrap_or_else(|| result.title.clone()),
                    snippet: result.snippet.clone(),
                    content: content.content,
                });
            }
        }
        out
    }

    /// Per-page analysis, returned aligned index-for-index with `sources` so
    /// a page that failed to analyze can be told apart from one that
    /// genuinely had nothing to say.
    async fn pre_plan_analyze(&self, query: &str, sources: &[PrePlanSource]) -> Vec<Option<Value>> {
        let mut out = Vec::with_capacity(sources.len());
        for chunk in sources.chunks(PRE_PLAN_ANALYSIS_POOL) {
            let futures: Vec<_> = chunk
                .iter()
                .map(|source| {
                    let preview = truncate_content(&source.content, 4000);
                    let prompt =
                        format!("Research query: {query}\nPage title: {}\nPage content:\n{preview}", source.title);
                    self.llm.complete(CompletionRequest {
                        model: self.config.llm.model_analyzer.clone(),
                        messages: vec![
                            ChatMessage::system(self.prompts.system("pre_plan_analysis")),
                            ChatMessage::user(prompt),
                        ],
                        temperature: 0.2,
                        max_tokens: self.config.llm.max_tokens_analyzer,
                        json_mode: true,
                        tools: None,
                    })
                })
                .collect();
            let responses = futures::future::join_all(futures).await;
            for response in responses {
                match response {
                    Ok(r) => out.push(parse_json_object(&r.content.unwrap_or_default())),
                    Err(e) => {
                        warn!(error = %e, "pre-planning page analysis failed");
                        out.push(None);
                    }
                }
            }
        }
        out
    }

    /// Search, scrape and analyze the topic landscape, degrading one tier at
    /// a time: full per-source analysis, then raw content previews if
    /// analysis came back empty, then search snippets alone if scraping
    /// never produced a source to analyze, then nothing if search itself
    /// found nothing.
    async fn pre_search(&self, query: &str) -> String {
        let queries = self.generate_planning_queries(query, self.config.search.pre_plan_queries).await;
        let results = self.pre_plan_search(&queries).await;
        if results.is_empty() {
            return String::new();
        }

        let scraped = self.pre_plan_scrape(results.clone()).await;
        if scraped.is_empty() {
            return format_snippet_context(&results);
        }

        let analyses = self.pre_plan_analyze(query, &scraped).await;
        if analyses.iter().all(Option::is_none) {
            return format_content_preview_context(&scraped);
        }
        format_analysis_context(&scraped, &analyses)
    }

    /// Fold the raw source material into a structured landscape summary.
    /// Falls back to the raw material alone if the model call fails.
    async fn pre_plan_landscape(&self, query: &str, search_context: &str) -> String {
        let request = CompletionRequest {
            model: self.config.llm.model_analyzer.clone(),
            messages: vec![
                ChatMessage::system(self.prompts.system("pre_plan_landscape")),
                ChatMessage::user(format!("Research query: {query}\n\nRaw source material:\n{search_context}")),
            ],
            temperature: 0.2,
            max_tokens: self.config.llm.max_tokens_analyzer,
            json_mode: true,
            tools: None,
        };
        match self.llm.complete(request).await {
            Ok(response) => {
                let structured = response.content.unwrap_or_default();
                format!("## Raw Source Analysis\n{search_context}\n\n## Structured Analysis\n{structured}")
            }
            Err(e) => {
                warn!(error = %e, "pre-planning landscape analysis failed, keeping raw source context alone");
                search_context.to_string()
            }
        }
    }

    /// Design the report outline. Targets `min_initial_tasks` sections, hard
    /// caps the list at `max(target+2, ceil(target*1.5))` so a verbose model
    /// can't balloon the report, and treats a zero-section response as a
    /// phase failure rather than inventing a placeholder section.
    async fn run_outline_design(&self, session_id: i64) -> Result<()> {
        let session = self.store.get_session(session_id).await?.ok_or_else(|| {
            research_types::ResearchError::TaskExecution(format!("session {session_id} vanished"))
        })?;
        let brief = session.refined_brief.clone().unwrap_or_else(|| session.query.clone());

        let target_sections = self.config.research.min_initial_tasks.max(1) as usize;
        let max_sections = (target_sections + 2).max((target_sections * 3 + 1) / 2);

        let mut user_prompt = format!("Design an outline for a research report on: {brief}");
        if let Some(pre_plan_context) = session.pre_plan_context.filter(|c| !c.is_empty()) {
            user_prompt.push_str(&format!("\n\nSource landscape gathered during pre-planning:\n{pre_plan_context}"));
        }
        user_prompt.push_str(&format!("\n\nAim for around {target_sections} sections."));

        let request = CompletionRequest {
            model: self.config.llm.model_analyzer.clone(),
            messages: vec![
                ChatMessage::system(self.prompts.system("outline_design")),
                ChatMessage::user(user_prompt),
            ],
            temperature: 0.3,
            max_tokens: self.config.llm.max_tokens_analyzer,
            json_mode: true,
            tools: None,
        };

        let response = self.llm.complete(request).await?;
        let mut sections = parse_outline(&response.content.unwrap_or_default());
        if sections.is_empty() {
            return Err(research_types::ResearchError::TaskExecution(
                "outline design produced zero sections".into(),
            ));
        }
        if sections.len() > max_sections {
            sections.truncate(max_sections);
        }

        for (position, (title, description)) in sections.into_iter().enumerate() {
            self.store.add_section(session_id, &title, &description, position as i64, false).await?;
        }

        self.set_phase(session_id, Phase::TaskPlanning).await?;
        Ok(())
    }

    /// Plan research tasks per section with a real model call, in pools of
    /// up to four sections concurrently. `tasks_per_section` is capped by
    /// the per-section share of `max_total_tasks` so a report with many
    /// sections doesn't blow the total task budget. Falls back to a single
    /// task built from the section's own title/description only when the
    /// model call returns nothing usable — a call error still propagates.
    async fn run_task_planning(&self, session_id: i64) -> Result<()> {
        let sections = self.store.get_sections(session_id).await?;
        if sections.is_empty() {
            return Err(research_types::ResearchError::TaskExecution(
                "task planning has no sections to plan against".into(),
            ));
        }

        let outline_text = sections
            .iter()
            .enumerate()
            .map(|(i, s)| format!("{}. {} - {}", i + 1, s.title, s.description))
            .collect::<Vec<_>>()
            .join("\n");

        let budget_per_section = (self.config.research.max_total_tasks / sections.len() as i64).max(1);
        let tasks_per_section =
            (self.config.research.tasks_per_section as i64).min(budget_per_section).max(1) as u32;

        const PLANNING_POOL: usize = 4;
        let mut new_tasks = Vec::new();
        for chunk in sections.chunks(PLANNING_POOL) {
            let futures: Vec<_> = chunk
                .iter()
                .map(|section| {
                    let prompt = format!(
                        "{outline_text}\n\nTarget section: {}\nDescription: {}\n\nGenerate {tasks_per_section} focused research tasks for this section.",
                        section.title, section.description
                    );
                    self.llm.complete(CompletionRequest {
                        model: self.config.llm.model_analyzer.clone(),
                        messages: vec![
                            ChatMessage::system(self.prompts.system("task_planning")),
                            ChatMessage::user(prompt),
                        ],
                        temperature: 0.3,
                        max_tokens: self.config.llm.max_tokens_analyzer,
                        json_mode: true,
                        tools: None,
                    })
                })
                .collect();
            let responses = futures::future::join_all(futures).await;

            for (section, response) in chunk.iter().zip(responses) {
                let planned = match response {
                    Ok(r) => crate::parsing::parse_task_list(&r.content.unwrap_or_default()),
                    Err(e) => {
                        warn!(error = %e, section_id = section.id, "task planning call failed");
                        Vec::new()
                    }
                };

                if planned.is_empty() {
                    new_tasks.push(NewTask {
                        section_id: Some(section.id),
                        parent_id: None,
                        topic: section.title.clone(),
                        description: section.description.clone(),
                        file_path: format!("{}/{}_0.md", session_id, section.id),
                        priority: 100,
                        depth: 0,
                        is_gap_fill: false,
                    });
                    continue;
                }
                for (i, (topic, description, priority)) in planned.into_iter().enumerate() {
                    new_tasks.push(NewTask {
                        section_id: Some(section.id),
                        parent_id: None,
                        topic,
                        description,
                        file_path: format!("{}/{}_{}.md", session_id, section.id, i),
                        priority,
                        depth: 0,
                        is_gap_fill: false,
                    });
                }
            }
        }

        self.store.add_tasks(session_id, &new_tasks).await?;
        for section in &sections {
            self.store.set_section_status(section.id, research_types::SectionStatus::Researching).await?;
        }

        self.set_phase(session_id, Phase::Researching).await?;
        Ok(())
    }

    async fn run_researching(&self, session_id: i64) -> Result<()> {
        let stage = ResearchStage::new(
            self.store.clone(),
            self.ledger.clone(),
            self.llm.clone(),
            self.search.clone(),
            self.extraction.clone(),
            self.config.clone(),
            self.prompts.clone(),
            self.base_dir.clone(),
        );
        let scheduler_config = SchedulerConfig {
            max_concurrent_tasks: self.config.research.max_concurrent_tasks,
            max_retries: self.config.research.max_retries,
            max_loops: self.config.research.max_loops,
            max_runtime: std::time::Duration::from_secs_f64(self.config.research.max_runtime_hours * 3600.0),
            consecutive_failure_limit: 3,
            idle_poll_interval: std::time::Duration::from_secs(2),
        };
        let scheduler = Scheduler::new(scheduler_config);
        let outcome = scheduler
            .run(&self.store, session_id, self.config.research.max_total_tasks, Arc::new(stage))
            .await?;

        info!(session_id, completed = outcome.completed, failed = outcome.failed, "research phase finished");
        self.store.refresh_session_counters(session_id).await?;

        if outcome.cancelled {
            return Ok(());
        }
        self.set_phase(session_id, Phase::GapAnalysis).await?;
        Ok(())
    }

    /// Gap analysis runs at most once per session: if it decides sections
    /// are thin, it spawns gap-fill tasks and loops back to `researching`;
    /// either way the second pass through this phase moves straight to
    /// synthesis.
    async fn run_gap_analysis(&self, session_id: i64) -> Result<()> {
        let cycled_event_count = self.count_gap_analysis_events(session_id).await?;
        if !self.config.gap_analysis.enabled || cycled_event_count > 0 {
            self.set_phase(session_id, Phase::Synthesizing).await?;
            return Ok(());
        }

        self.store
            .add_event(session_id, NewRunEvent::new("gap_analysis_pass").with_phase(Phase::GapAnalysis.as_str()))
            .await?;

        let sections = self.store.get_sections(session_id).await?;
        let mut gap_tasks = Vec::new();
        let max_new = self.config.gap_analysis.max_gap_fill_tasks as usize;

        for section in &sections {
            if gap_tasks.len() >= max_new {
                break;
            }
            if section.word_count < self.config.synthesis.min_words_per_section.into() {
                gap_tasks.push(NewTask {
                    section_id: Some(section.id),
                    parent_id: None,
                    topic: format!("{} - gap fill", section.title),
                    description: section.description.clone(),
                    file_path: format!("{}/{}_gap.md", session_id, section.id),
                    priority: 50,
                    depth: 0,
                    is_gap_fill: true,
                });
            }
        }

        if gap_tasks.is_empty() {
            self.set_phase(session_id, Phase::Synthesizing).await?;
            return Ok(());
        }

        self.store.add_tasks(session_id, &gap_tasks).await?;
        self.set_phase(session_id, Phase::Researching).await?;
        Ok(())
    }

    async fn count_gap_analysis_events(&self, session_id: i64) -> Result<usize> {
        let (events, _cursor) = self.store.events_after(session_id, None, 500).await?;
        Ok(events.iter().filter(|e| e.event_type == "gap_analysis_pass").count())
    }

    async fn run_synthesizing(&self, session_id: i64) -> Result<()> {
        let stage = SynthesisStage::new(
            self.store.clone(),
            self.llm.clone(),
            self.config.clone(),
            self.prompts.clone(),
            self.base_dir.clone(),
        );
        stage.synthesize_all(session_id).await?;
        let (summary, conclusion) = stage.synthesize_executive_summary_and_conclusion(session_id).await?;
        self.store.set_compiled_report(session_id, Some(&summary), Some(&conclusion), None, None).await?;
        self.set_phase(session_id, Phase::Compiling).await?;
        Ok(())
    }

    async fn run_compiling(&self, session_id: i64) -> Result<()> {
        let compiler = Compiler::new(self.store.clone(), self.ledger.clone(), self.config.clone());
        match compiler.compile(session_id).await {
            Ok(_) => {}
            Err(e) => {
                info!(session_id, error = %e, "normal compile failed, using emergency compile");
                compiler.emergency_compile(session_id, &self.base_dir).await;
            }
        }
        Ok(())
    }

    /// Cancellation can land mid-research, well before the synthesizing/
    /// compiling phases would normally run. Compile whatever the session
    /// has so a cancelled run still leaves a report behind, the same
    /// guarantee a normal completion gets.
    async fn compile_partial_on_cancel(&self, session_id: i64) {
        let compiler = Compiler::new(self.store.clone(), self.ledger.clone(), self.config.clone());
        compiler.emergency_compile(session_id, &self.base_dir).await;
    }

    async fn finalize(&self, session_id: i64) -> Result<SessionStatus> {
        self.store.finalize_session(session_id).await
    }
}

/// Parse an outline response shaped `{"sections": [...]}`, tolerating a
/// bare array too since some models drop the wrapper object regardless of
/// what's asked for.
fn parse_outline(content: &str) -> Vec<(String, String)> {
    let text = content.trim();
    let candidate = if text.starts_with('[') || text.starts_with('{') {
        text.to_string()
    } else {
        strip_fenced_block(text).unwrap_or_else(|| text.to_string())
    };
    let Ok(value) = serde_json::from_str::<Value>(&candidate) else {
        return Vec::new();
    };
    let items = match &value {
        Value::Array(items) => Some(items),
        Value::Object(map) => map.get("sections").and_then(Value::as_array),
        _ => None,
    };
    let Some(items) = items else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let title = item.get("title")?.as_str()?.to_string();
            let description = item.get("description").and_then(|d| d.as_str()).unwrap_or("").to_string();
            Some((title, description))
        })
        .collect()
}

/// Search-snippet fallback when scraping came back empty entirely.
fn format_snippet_context(results: &[SearchResult]) -> String {
    let mut out = String::new();
    for (i, result) in results.iter().take(PRE_PLAN_MAX_SOURCES).enumerate() {
        out.push_str(&format!("[{}] {} ({})\n{}\n\n", i + 1, result.title, result.url, result.snippet));
    }
    out
}

/// Raw content-preview fallback when the analysis pass came back empty.
fn format_content_preview_context(sources: &[PrePlanSource]) -> String {
    let mut out = String::new();
    for (i, source) in sources.iter().enumerate() {
        let preview = truncate_content(&source.content, 800);
        out.push_str(&format!("[{}] {} ({})\n{}\n\n", i + 1, source.title, source.url, preview));
    }
    out
}

/// The full landscape context: a deduplicated cross-source summary of
/// entities, subtopics, notable claims and gaps, followed by a per-source
/// breakdown with each page's reported relevance.
fn format_analysis_context(sources: &[PrePlanSource], analyses: &[Option<Value>]) -> String {
    let entities = collect_strings(analyses, "entities", 20);
    let subtopics = collect_strings(analyses, "subtopics", 20);
    let claims = collect_strings(analyses, "notable_claims", 20);
    let gaps = collect_strings(analyses, "gaps", 15);

    let mut out = String::from("## Cross-Source Summary\n\n");
    push_list(&mut out, "Entities", &entities);
    push_list(&mut out, "Subtopics", &subtopics);
    push_list(&mut out, "Notable claims", &claims);
    push_list(&mut out, "Open gaps", &gaps);

    out.push_str("\n## Sources\n\n");
    for (i, source) in sources.iter().enumerate() {
        out.push_str(&format!("[{}] {} ({})\n", i + 1, source.title, source.url));
        let relevance = analyses
            .get(i)
            .and_then(|a| a.as_ref())
            .and_then(|v| v.get("relevance"))
            .and_then(Value::as_str);
        if let Some(relevance) = relevance {
            out.push_str(&format!("Relevance: {relevance}\n"));
        }
        out.push('\n');
    }
    out
}

fn collect_strings(analyses: &[Option<Value>], key: &str, cap: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for analysis in analyses.iter().flatten() {
        let Some(items) = analysis.get(key).and_then(Value::as_array) else {
            continue;
        };
        for item in items {
            let Some(text) = item.as_str() else { continue };
            let key = text.to_ascii_lowercase();
            if out.len() >= cap || !seen.insert(key) {
                continue;
            }
            out.push(text.to_string());
        }
    }
    out
}

fn push_list(out: &mut String, label: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    out.push_str(&format!("{label}: {}\n", items.join("; ")));
}
