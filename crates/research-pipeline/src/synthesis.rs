//! Synthesis stage: turns each section's completed task notes into prose,
//! then distills an executive summary and conclusion from the finished
//! sections. Word/citation floors are advisory — a thin section still gets
//! compiled, just flagged, rather than blocking the whole report.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use research_providers::{ChatMessage, CompletionRequest, LlmClient};
use research_store::ResearchStore;
use research_tools::{count_citations, count_words, read_task_notes};
use research_types::{Result, Section};
use std::path::PathBuf;
use tracing::warn;

use crate::config::ResearchConfig;
use crate::prompts::PromptLibrary;

pub struct SynthesisStage {
    store: ResearchStore,
    llm: Arc<dyn LlmClient>,
    config: ResearchConfig,
    prompts: Arc<PromptLibrary>,
    base_dir: PathBuf,
}

impl SynthesisStage {
    pub fn new(
        store: ResearchStore,
        llm: Arc<dyn LlmClient>,
        config: ResearchConfig,
        prompts: Arc<PromptLibrary>,
        base_dir: PathBuf,
    ) -> Self {
        Self { store, llm, config, prompts, base_dir }
    }

    /// Synthesize every section of a session, giving each section its
    /// neighbors' descriptions as context so adjoining sections don't repeat
    /// each other's framing. Runs up to `synthesis_pool_size` concurrently.
    pub async fn synthesize_all(&self, session_id: i64) -> Result<()> {
        let sections = self.store.get_sections(session_id).await?;
        let pool_size = self.config.synthesis.synthesis_pool_size.max(1);

        let sections_for_iter = sections.clone();
        stream::iter(sections_for_iter.into_iter().enumerate())
            .map(|(index, section)| {
                let previous = sections.get(index.wrapping_sub(1)).filter(|_| index > 0).cloned();
                let next = sections.get(index + 1).cloned();
                self.synthesize_section(section, previous, next)
            })
            .buffer_unordered(pool_size)
            .for_each(|result| async move {
                if let Err(e) = result {
                    warn!(error = %e, "section synthesis failed");
                }
            })
            .await;

        Ok(())
    }

    async fn synthesize_section(&self, section: Section, previous: Option<Section>, next: Option<Section>) -> Result<()> {
        self.store.set_section_status(section.id, research_types::SectionStatus::Synthesizing).await?;

        let tasks = self.store.get_tasks_for_section(section.id).await?;
        let mut notes = String::new();
        for task in &tasks {
            if let Some(note) = read_task_notes(&self.base_dir, &task.file_path).await.unwrap_or(None) {
                notes.push_str(&format!("### {}\n{}\n\n", task.topic, note));
            }
        }

        let adjacency = describe_adjacency(previous.as_ref(), next.as_ref());
        let style_guidance = style_guidance(&self.config.synthesis.style);
        let prompt = format!(
            "Section: {}\n{}\n{}\n\nTask notes:\n{}\n\nWrite the section's prose in {} style, preserving all [N] citation markers from the notes exactly as given. Aim for {}-{} words and at least {} citations, though these are soft targets, not hard requirements.",
            section.title,
            section.description,
            adjacency,
            notes,
            style_guidance,
            self.config.synthesis.min_words_per_section,
            self.config.synthesis.max_words_per_section,
            self.config.synthesis.min_citations_per_section,
        );

        let request = CompletionRequest {
            model: self.config.llm.model_writer.clone(),
            messages: vec![
                ChatMessage::system(self.prompts.system("section_synthesis")),
                ChatMessage::user(prompt),
            ],
            temperature: self.config.llm.temperature_writer,
            max_tokens: self.config.llm.max_tokens_writer,
            json_mode: false,
            tools: None,
        };

        let content = match self.llm.complete(request).await {
            Ok(response) => response.content.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, section_id = section.id, "section synthesis LLM call failed, falling back to raw notes");
                notes
            }
        };

        let word_count = count_words(&content) as i64;
        let citation_count = count_citations(&content) as i64;
        self.store.mark_section_synthesized(section.id, &content, word_count, citation_count).await?;
        Ok(())
    }

    pub async fn synthesize_executive_summary_and_conclusion(&self, session_id: i64) -> Result<(String, String)> {
        let sections = self.store.get_sections(session_id).await?;
        if !self.config.synthesis.include_summary {
            return Ok((String::new(), String::new()));
        }

        let digest: String = sections
            .iter()
            .filter_map(|s| s.synthesized_content.as_deref())
            .map(|content| first_n_words(content, 500))
            .collect::<Vec<_>>()
            .join("\n\n");

        let summary_request = CompletionRequest {
            model: self.config.llm.model_editor.clone(),
            messages: vec![
                ChatMessage::system(self.prompts.system("executive_summary")),
                ChatMessage::user(format!("Summarize the following report sections in 150-250 words, no citations:\n\n{digest}")),
            ],
            temperature: self.config.llm.temperature_editor,
            max_tokens: self.config.llm.max_tokens_editor,
            json_mode: false,
            tools: None,
        };
        let summary = match self.llm.complete(summary_request).await {
            Ok(response) => response.content.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "executive summary synthesis failed");
                String::new()
            }
        };

        let conclusion_request = CompletionRequest {
            model: self.config.llm.model_editor.clone(),
            messages: vec![
                ChatMessage::system(self.prompts.system("conclusion")),
                ChatMessage::user(format!("Write a short conclusion (100-200 words, no citations) for a report covering:\n\n{digest}")),
            ],
            temperature: self.config.llm.temperature_editor,
            max_tokens: self.config.llm.max_tokens_editor,
            json_mode: false,
            tools: None,
        };
        let conclusion = match self.llm.complete(conclusion_request).await {
            Ok(response) => response.content.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "conclusion synthesis failed");
                String::new()
            }
        };

        Ok((summary, conclusion))
    }
}

fn describe_adjacency(previous: Option<&Section>, next: Option<&Section>) -> String {
    let mut out = String::new();
    if let Some(previous) = previous {
        out.push_str(&format!("Preceding section: {} - {}\n", previous.title, previous.description));
    }
    if let Some(next) = next {
        out.push_str(&format!("Following section: {} - {}\n", next.title, next.description));
    }
    out
}

fn style_guidance(style: &str) -> &'static str {
    match style {
        "confident" => "a confident, declarative",
        "cautious" => "a cautious, hedged",
        _ => "a balanced, evidence-led",
    }
}

fn first_n_words(text: &str, n: usize) -> String {
    text.split_whitespace().take(n).collect::<Vec<_>>().join(" ")
}
