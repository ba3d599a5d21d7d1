//! The research stage: each task runs query generation, search, filtering,
//! extraction, a single gap-fill round if sources are thin, and note
//! synthesis, in that order. This is the `TaskExecutor` the scheduler drives.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use research_ledger::{strip_phantom_citations, SourceLedger};
use research_providers::{
    ChatMessage, CompletionRequest, ExtractionClient, LlmClient, SearchClient, SearchResult, ToolDefinition,
};
use research_scheduler::{CancelFlag, TaskExecutor, TaskOutcome};
use research_store::ResearchStore;
use research_tools::{score_source, validate_url, write_task_notes, ScoreInputs};
use research_types::{NewSource, NewTask, ResearchTask};
use tracing::warn;

use crate::config::ResearchConfig;
use crate::parsing::{build_fallback_queries, extract_note_metadata, parse_gap_queries, parse_query_list};
use crate::prompts::PromptLibrary;
use crate::rate_limit::RateLimiter;

pub struct ResearchStage {
    store: ResearchStore,
    ledger: SourceLedger,
    llm: Arc<dyn LlmClient>,
    search: Arc<dyn SearchClient>,
    extraction: Arc<dyn ExtractionClient>,
    config: ResearchConfig,
    prompts: Arc<PromptLibrary>,
    search_limiter: RateLimiter,
    scrape_limiter: RateLimiter,
    base_dir: PathBuf,
}

impl ResearchStage {
    pub fn new(
        store: ResearchStore,
        ledger: SourceLedger,
        llm: Arc<dyn LlmClient>,
        search: Arc<dyn SearchClient>,
        extraction: Arc<dyn ExtractionClient>,
        config: ResearchConfig,
        prompts: Arc<PromptLibrary>,
        base_dir: PathBuf,
    ) -> Self {
        let search_limiter = RateLimiter::per_minute(config.search.searches_per_minute);
        let scrape_limiter = RateLimiter::per_minute(config.scraping.scrapes_per_minute);
        Self {
            store,
            ledger,
            llm,
            search,
            extraction,
            config,
            prompts,
            search_limiter,
            scrape_limiter,
            base_dir,
        }
    }

    /// Three attempts in falling order of structure: a native tool call, a
    /// JSON-mode completion, then plain text, topping up the running list at
    /// each step rather than discarding what an earlier attempt produced.
    /// Whatever's still missing after all three is filled from
    /// `build_fallback_queries` instead of ever returning short.
    async fn generate_queries(&self, task: &ResearchTask, count: u32) -> Vec<String> {
        let count = (count as usize).max(1);
        let prompt = format!(
            "Topic: {}\nDescription: {}\nGenerate {} focused, non-overlapping web search queries.",
            task.topic, task.description, count
        );

        let mut queries = Vec::new();

        let tool_request = CompletionRequest {
            model: self.config.llm.model_researcher.clone(),
            messages: vec![
                ChatMessage::system(self.prompts.system("query_generation")),
                ChatMessage::user(prompt.clone()),
            ],
            temperature: 0.2,
            max_tokens: self.config.llm.max_tokens_researcher,
            json_mode: false,
            tools: Some(vec![submit_queries_tool()]),
        };
        match self.llm.complete(tool_request).await {
            Ok(response) => top_up(&mut queries, parse_query_list(&response, count), count),
            Err(e) => warn!(error = %e, task_id = task.id, "tool-call query generation failed"),
        }

        if queries.len() < count {
            let json_request = CompletionRequest {
                model: self.config.llm.model_researcher.clone(),
                messages: vec![
                    ChatMessage::system(self.prompts.system("query_generation")),
                    ChatMessage::user(prompt.clone()),
                ],
                temperature: 0.2,
                max_tokens: self.config.llm.max_tokens_researcher,
                json_mode: true,
                tools: None,
            };
            match self.llm.complete(json_request).await {
                Ok(response) => top_up(&mut queries, parse_query_list(&response, count), count),
                Err(e) => warn!(error = %e, task_id = task.id, "json-mode query generation failed"),
            }
        }

        if queries.len() < count {
            let text_request = CompletionRequest {
                model: self.config.llm.model_researcher.clone(),
                messages: vec![
                    ChatMessage::system(self.prompts.system("query_generation")),
                    ChatMessage::user(prompt),
                ],
                temperature: 0.2,
                max_tokens: self.config.llm.max_tokens_researcher,
                json_mode: false,
                tools: None,
            };
            match self.llm.complete(text_request).await {
                Ok(response) => top_up(&mut queries, parse_query_list(&response, count), count),
                Err(e) => warn!(error = %e, task_id = task.id, "plain-text query generation failed"),
            }
        }

        if queries.len() < count {
            let needed = count - queries.len();
            let fallback = build_fallback_queries(&task.topic, &task.description, &queries, needed);
            queries.extend(fallback);
        }
        queries.truncate(count);
        queries
    }

    /// Identify whether the sources gathered so far leave a gap worth a
    /// second, narrower round of search. Disabled entirely when
    /// `gap_fill_queries` is zero; any parse or call failure means "no gaps".
    async fn identify_gaps(&self, task: &ResearchTask, sources: &[(SearchResult, NewSource)]) -> Vec<String> {
        if self.config.gap_analysis.gap_fill_queries == 0 {
            return Vec::new();
        }
        let mut context = String::new();
        for (i, (_, source)) in sources.iter().enumerate() {
            context.push_str(&format!("[{}] {} ({})\n{}\n\n", i + 1, source.title, source.url, source.snippet));
        }
        let prompt = format!(
            "Topic: {}\nDescription: {}\n\nSources found so far:\n{}",
            task.topic, task.description, context
        );
        let request = CompletionRequest {
            model: self.config.llm.model_researcher.clone(),
            messages: vec![
                ChatMessage::system(self.prompts.system("gap_identification")),
                ChatMessage::user(prompt),
            ],
            temperature: 0.1,
            max_tokens: self.config.llm.max_tokens_researcher,
            json_mode: true,
            tools: None,
        };
        match self.llm.complete(request).await {
            Ok(response) => {
                let content = response.content.unwrap_or_default();
                parse_gap_queries(&content, self.config.gap_analysis.gap_fill_queries as usize)
            }
            Err(e) => {
                warn!(error = %e, task_id = task.id, "gap identification failed");
                Vec::new()
            }
        }
    }

    async fn search_queries(&self, queries: &[String], results_per_query: usize) -> Vec<SearchResult> {
        let mut all_results = Vec::new();
        for query in queries {
            self.search_limiter.wait().await;
            match self.search.search(query, results_per_query).await {
                Ok(results) => all_results.extend(results),
                Err(e) => warn!(error = %e, query, "search call failed"),
            }
        }
        all_results
    }

    fn passes_quality_gate(&self, url: &str) -> bool {
        let lower = url.to_ascii_lowercase();
        if self
            .config
            .scraping
            .blocked_domains
            .iter()
            .any(|d| lower.contains(d.as_str()))
        {
            return false;
        }
        if self
            .config
            .scraping
            .blocked_extensions
            .iter()
            .any(|ext| lower.ends_with(ext.as_str()))
        {
            return false;
        }
        validate_url(url).is_ok()
    }

    async fn extract_and_score(&self, results: Vec<SearchResult>) -> Vec<(SearchResult, NewSource)> {
        let mut out = Vec::new();
        // Sequential with a small pool semantics: spec bounds extraction to
        // <=4 concurrent, but a single task's result set rarely exceeds that
        // anyway once the quality gate above has run.
        const EXTRACTION_POOL: usize = 4;
        for chunk in results.chunks(EXTRACTION_POOL) {
            let mut futures = Vec::new();
            for result in chunk {
                self.scrape_limiter.wait().await;
                futures.push(self.extraction.extract(&result.url));
            }
            let extracted = futures::future::join_all(futures).await;
            for (result, extraction) in chunk.iter().zip(extracted) {
                let content = match extraction {
                    Ok(content) => content.content,
                    Err(e) => {
                        warn!(error = %e, url = result.url, "extraction failed");
                        continue;
                    }
                };
                let domain = domain_of(&result.url);
                let quality = score_source(ScoreInputs {
                    search_relevance: result.score,
                    domain: &domain,
                    content_length: content.len(),
                });
                if quality < self.config.quality.min_source_quality {
                    continue;
                }
                let is_academic = research_tools::is_academic_domain(&domain);
                let truncated = truncate_content(&content, self.config.scraping.max_content_length);
                out.push((
                    result.clone(),
                    NewSource {
                        url: result.url.clone(),
                        title: result.title.clone(),
                        domain,
                        snippet: result.snippet.clone(),
                        full_content: Some(truncated),
                        quality_score: quality,
                        is_academic,
                    },
                ));
            }
        }
        out
    }

    async fn synthesize_note(&self, task: &ResearchTask, sources: &[NewSource]) -> (String, crate::parsing::NoteMetadata) {
        if sources.is_empty() {
            return self.synthesize_note_without_sources(task).await;
        }

        let mut context = String::new();
        for (i, source) in sources.iter().enumerate() {
            context.push_str(&format!(
                "[{}] {} ({})\n{}\n\n",
                i + 1,
                source.title,
                source.url,
                source.full_content.as_deref().unwrap_or(&source.snippet)
            ));
        }
        let prompt = format!(
            "Task: {}\n{}\n\nSources:\n{}\n\nWrite a research note synthesizing these sources, citing them inline as [1], [2], etc. Optionally end with a fenced json block containing \"new_tasks\" (follow-up topics worth a dedicated task) and \"glossary_terms\" (term/definition pairs) if any emerged.",
            task.topic, task.description, context
        );
        let request = CompletionRequest {
            model: self.config.llm.model_researcher.clone(),
            messages: vec![
                ChatMessage::system(self.prompts.system("note_synthesis")),
                ChatMessage::user(prompt),
            ],
            temperature: 0.3,
            max_tokens: self.config.llm.max_tokens_researcher,
            json_mode: false,
            tools: None,
        };
        match self.llm.complete(request).await {
            Ok(response) => {
                let content = response.content.unwrap_or_default();
                extract_note_metadata(&content)
            }
            Err(e) => {
                warn!(error = %e, task_id = task.id, "note synthesis failed");
                (String::new(), crate::parsing::NoteMetadata::default())
            }
        }
    }

    /// No sources survived search and scoring. Ask for an honest note about
    /// that instead of the usual cite-your-sources prompt, then strip any
    /// citation markers the model invents anyway before returning the body.
    async fn synthesize_note_without_sources(&self, task: &ResearchTask) -> (String, crate::parsing::NoteMetadata) {
        let prompt = format!(
            "Task: {}\n{}\n\nNo usable sources were found for this task after searching and filtering. Write a short research note stating this plainly and summarizing what was searched for. Do not invent citations or claim any source exists. Optionally end with a fenced json block containing \"new_tasks\" and \"glossary_terms\" if useful follow-ups come to mind.",
            task.topic, task.description
        );
        let request = CompletionRequest {
            model: self.config.llm.model_researcher.clone(),
            messages: vec![
                ChatMessage::system(self.prompts.system("note_synthesis")),
                ChatMessage::user(prompt),
            ],
            temperature: 0.3,
            max_tokens: self.config.llm.max_tokens_researcher,
            json_mode: false,
            tools: None,
        };
        match self.llm.complete(request).await {
            Ok(response) => {
                let content = response.content.unwrap_or_default();
                let (body, metadata) = extract_note_metadata(&content);
                (strip_phantom_citations(&body, 0), metadata)
            }
            Err(e) => {
                warn!(error = %e, task_id = task.id, "note synthesis failed");
                (String::new(), crate::parsing::NoteMetadata::default())
            }
        }
    }
}

/// Tool definition offered on the first query-generation attempt. Mirrors
/// the JSON-object shape the JSON-mode and text fallbacks also accept, so
/// `parse_query_list` handles all three uniformly.
pub(crate) fn submit_queries_tool() -> ToolDefinition {
    ToolDefinition {
        name: "submit_queries".to_string(),
        description: "Submit the generated list of web search queries.".to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "queries": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["queries"]
        }),
    }
}

/// Merge `candidates` into `existing` up to `count`, deduplicating
/// case-insensitively against what's already there.
fn top_up(existing: &mut Vec<String>, candidates: Vec<String>, count: usize) {
    let mut seen: std::collections::HashSet<String> = existing.iter().map(|q| q.to_ascii_lowercase()).collect();
    for candidate in candidates {
        if existing.len() >= count {
            break;
        }
        let key = candidate.to_ascii_lowercase();
        if key.is_empty() || !seen.insert(key) {
            continue;
        }
        existing.push(candidate);
    }
}

#[async_trait]
impl TaskExecutor for ResearchStage {
    async fn execute(&self, task: ResearchTask, cancel: CancelFlag) -> TaskOutcome {
        if cancel.load(std::sync::atomic::Ordering::Relaxed) {
            return TaskOutcome::Failed("cancelled before starting".into());
        }

        let known_urls = match self.store.get_existing_source_urls(task.session_id).await {
            Ok(urls) => urls,
            Err(e) => return TaskOutcome::Failed(format!("failed to read known sources: {e}")),
        };

        let queries = self.generate_queries(&task, self.config.search.queries_per_task).await;
        let raw_results = self
            .search_queries(&queries, self.config.search.results_per_query as usize)
            .await;

        let filtered: Vec<SearchResult> = raw_results
            .into_iter()
            .filter(|r| !known_urls.contains(&r.url))
            .filter(|r| r.score >= self.config.search.min_tavily_score)
            .filter(|r| self.passes_quality_gate(&r.url))
            .collect();

        let mut scored = self.extract_and_score(filtered).await;

        for (_, source) in &scored {
            if let Err(e) = self.ledger.record_source(task.id, source).await {
                warn!(error = %e, "failed to record source");
            }
        }
        let has_sources = !scored.is_empty();

        if has_sources && self.config.gap_analysis.enabled {
            let gap_queries = self.identify_gaps(&task, &scored).await;
            if !gap_queries.is_empty() {
                let gap_results = self
                    .search_queries(&gap_queries, self.config.gap_analysis.gap_fill_max_results as usize)
                    .await;
                let gap_filtered: Vec<SearchResult> = gap_results
                    .into_iter()
                    .filter(|r| !known_urls.contains(&r.url))
                    .filter(|r| !scored.iter().any(|(existing, _)| existing.url == r.url))
                    .filter(|r| r.score >= self.config.search.min_tavily_score)
                    .filter(|r| self.passes_quality_gate(&r.url))
                    .collect();
                let gap_scored = self.extract_and_score(gap_filtered).await;
                for (index, (result, source)) in gap_scored.into_iter().enumerate() {
                    if let Err(e) = self.ledger.record_gap_fill_source(task.id, &source, index as i64).await {
                        warn!(error = %e, "failed to record gap-fill source");
                        continue;
                    }
                    scored.push((result, source));
                }
            }
        }

        let (note_body, metadata) = self.synthesize_note(&task, &scored.iter().map(|(_, s)| s.clone()).collect::<Vec<_>>()).await;

        if let Err(e) = write_task_notes(&self.base_dir, &task.file_path, &note_body).await {
            return TaskOutcome::Failed(format!("failed to write task notes: {e}"));
        }

        let word_count = research_tools::count_words(&note_body) as i64;
        let citation_count = research_tools::count_citations(&note_body) as i64;

        let new_tasks = metadata
            .new_tasks
            .into_iter()
            .map(|nt| NewTask {
                section_id: task.section_id,
                parent_id: Some(task.id),
                topic: nt.topic.clone(),
                description: nt.description,
                file_path: format!("{}/{}.md", task.session_id, sanitize_filename(&nt.topic)),
                priority: task.priority,
                depth: task.depth + 1,
                is_gap_fill: false,
            })
            .collect();

        TaskOutcome::Completed {
            word_count,
            citation_count,
            new_tasks,
            glossary: metadata.glossary_terms,
        }
    }
}

pub(crate) fn domain_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}

pub(crate) fn truncate_content(content: &str, max_len: usize) -> String {
    if content.len() <= max_len {
        content.to_string()
    } else {
        content.chars().take(max_len).collect()
    }
}

fn sanitize_filename(topic: &str) -> String {
    topic
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}
