//! Final compilation: sections become one report with globally renumbered
//! citations, written to disk as markdown (and HTML, when configured).
//! Compilation must never throw — a session that fails to compile cleanly
//! still gets an emergency report assembled from whatever survived.

use std::path::{Path, PathBuf};

use research_ledger::{CitationRemapper, SourceLedger};
use research_store::ResearchStore;
use research_tools::{render_html, render_markdown, ReportDraft};
use research_types::{Result, Session};
use tracing::warn;

use crate::config::ResearchConfig;

pub struct Compiler {
    store: ResearchStore,
    ledger: SourceLedger,
    config: ResearchConfig,
}

impl Compiler {
    pub fn new(store: ResearchStore, ledger: SourceLedger, config: ResearchConfig) -> Self {
        Self { store, ledger, config }
    }

    /// Compile a session's sections into a report and persist it to disk,
    /// recording the output paths on the session row.
    pub async fn compile(&self, session_id: i64) -> Result<PathBuf> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| research_types::ResearchError::Compile(format!("no such session {session_id}")))?;

        let sections = self.store.get_sections(session_id).await?;
        let mut remapper = CitationRemapper::new();
        let mut rendered_sections = Vec::new();

        for section in &sections {
            let content = section.synthesized_content.clone().unwrap_or_default();
            let local_sources = self.ledger.sources_for_section(section.id).await.unwrap_or_default();
            let remapped = remapper.remap_section(&content, &local_sources);
            rendered_sections.push((section.title.clone(), remapped));
        }

        let glossary = self.store.get_glossary(session_id).await.unwrap_or_default();
        let references: Vec<String> = remapper
            .ordered_sources
            .iter()
            .map(|s| format!("{} - {}", s.title, s.url))
            .collect();

        let draft = ReportDraft {
            title: session.refined_brief.clone().unwrap_or_else(|| session.query.clone()),
            executive_summary: session.executive_summary.clone(),
            sections: rendered_sections,
            conclusion: session.conclusion.clone(),
            glossary: glossary.into_iter().map(|g| (g.term, g.definition)).collect(),
            references,
        };

        self.write_report(&session, &draft).await
    }

    async fn write_report(&self, session: &Session, draft: &ReportDraft) -> Result<PathBuf> {
        let output_dir = Path::new(&self.config.output.directory);
        tokio::fs::create_dir_all(output_dir).await?;

        let slug = sanitize_slug(&draft.title);
        let markdown_path = output_dir.join(format!("{}_{}.md", session.id, slug));
        let markdown = render_markdown(draft);
        tokio::fs::write(&markdown_path, &markdown).await?;

        let mut html_path_str = None;
        if self.config.output.formats.iter().any(|f| f == "html") {
            let html_path = output_dir.join(format!("{}_{}.html", session.id, slug));
            let html = render_html(draft);
            tokio::fs::write(&html_path, html).await?;
            html_path_str = Some(html_path.to_string_lossy().to_string());
        }

        self.store
            .set_compiled_report(
                session.id,
                draft.executive_summary.as_deref(),
                draft.conclusion.as_deref(),
                Some(&markdown_path.to_string_lossy()),
                html_path_str.as_deref(),
            )
            .await?;

        Ok(markdown_path)
    }

    /// Compile falls back to this when the normal section-based path fails
    /// (e.g. sections never reached `complete`): concatenate whatever
    /// completed task notes exist, in task id order, skipping citation
    /// renumbering. A degraded report beats no report.
    pub async fn compile_task_based(&self, session_id: i64, base_dir: &Path) -> Result<PathBuf> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| research_types::ResearchError::Compile(format!("no such session {session_id}")))?;

        let tasks = self.store.get_tasks(session_id).await?;
        let mut sections = Vec::new();
        for task in tasks.iter().filter(|t| t.status == research_types::TaskStatus::Completed) {
            let note = research_tools::read_task_notes(base_dir, &task.file_path)
                .await
                .unwrap_or(None)
                .unwrap_or_default();
            if !note.is_empty() {
                sections.push((task.topic.clone(), note));
            }
        }

        let draft = ReportDraft {
            title: session.query.clone(),
            executive_summary: None,
            sections,
            conclusion: None,
            glossary: Vec::new(),
            references: Vec::new(),
        };

        self.write_report(&session, &draft).await
    }

    /// Never-fail variant used when the session is being torn down (e.g.
    /// mid-cancellation): try the normal compile, fall back to the
    /// task-based compile, and if even that fails, write a minimal
    /// placeholder report rather than leaving the session without output.
    pub async fn emergency_compile(&self, session_id: i64, base_dir: &Path) -> PathBuf {
        match self.compile(session_id).await {
            Ok(path) => return path,
            Err(e) => warn!(error = %e, session_id, "normal compile failed, falling back to task-based compile"),
        }
        match self.compile_task_based(session_id, base_dir).await {
            Ok(path) => return path,
            Err(e) => warn!(error = %e, session_id, "task-based compile failed, writing placeholder report"),
        }

        let output_dir = Path::new(&self.config.output.directory);
        let _ = tokio::fs::create_dir_all(output_dir).await;
        let path = output_dir.join(format!("{session_id}_incomplete.md"));
        let _ = tokio::fs::write(&path, "# Report unavailable\n\nThis session did not reach a compilable state.\n").await;
        path
    }
}

fn sanitize_slug(title: &str) -> String {
    let slug: String = title
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    let trimmed = slug.trim_matches('_');
    if trimmed.is_empty() {
        "report".to_string()
    } else {
        trimmed.chars().take(60).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_ledger::SourceLedger;
    use research_types::NewSource;

    async fn setup() -> (Compiler, ResearchStore, i64) {
        let store = ResearchStore::open_in_memory().await.unwrap();
        let ledger = SourceLedger::new(store.clone());
        let mut config = ResearchConfig::default();
        let dir = tempfile::tempdir().unwrap();
        config.output.directory = dir.path().to_string_lossy().to_string();
        std::mem::forget(dir);
        let session_id = store.create_session("test query").await.unwrap();
        let compiler = Compiler::new(store.clone(), ledger, config);
        (compiler, store, session_id)
    }

    #[tokio::test]
    async fn compiles_sections_with_remapped_citations() {
        let (compiler, store, session_id) = setup().await;
        let section_id = store.add_section(session_id, "Intro", "overview", 0, false).await.unwrap();
        let task_id = store
            .add_task(
                session_id,
                &research_types::NewTask {
                    section_id: Some(section_id),
                    parent_id: None,
                    topic: "t".into(),
                    description: "d".into(),
                    file_path: "t.md".into(),
                    priority: 0,
                    depth: 0,
                    is_gap_fill: false,
                },
            )
            .await
            .unwrap();
        let source_id = store
            .add_source(
                task_id,
                &NewSource {
                    url: "https://example.com".into(),
                    title: "Example".into(),
                    domain: "example.com".into(),
                    snippet: "s".into(),
                    full_content: None,
                    quality_score: 0.8,
                    is_academic: false,
                },
                1,
            )
            .await
            .unwrap();
        let _ = source_id;
        store.mark_section_synthesized(section_id, "claim [1]", 2, 1).await.unwrap();

        let path = compiler.compile(session_id).await.unwrap();
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(content.contains("claim [1]"));
        assert!(content.contains("example.com"));
    }
}
