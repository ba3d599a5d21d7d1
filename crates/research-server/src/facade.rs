//! The Service Facade: the one entry point a CLI or HTTP layer uses to
//! start, watch, cancel and collect the result of a research run. Exactly
//! one run is active at a time; a second `start_run` while one is in
//! flight returns `already_running` instead of queuing or rejecting.

use std::sync::Arc;

use chrono::Utc;
use research_pipeline::{config::list_presets, PhaseRunner, ResearchConfig};
use research_providers::{ExtractionClient, LlmClient, SearchClient};
use research_store::ResearchStore;
use research_types::{Result, SectionStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartRunRequest {
    pub query: Option<String>,
    pub mode: Option<String>,
    pub overrides: Option<Vec<(String, String)>>,
    pub refined_brief: Option<String>,
    pub refinement_qa: Option<String>,
    #[serde(default)]
    pub resume: bool,
    #[serde(default)]
    pub blocking: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartRunResponse {
    pub status: &'static str,
    pub run_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct Progress {
    pub completed: i64,
    pub total: i64,
    pub pct: f64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct Timing {
    pub started_at: Option<chrono::DateTime<Utc>>,
    pub ended_at: Option<chrono::DateTime<Utc>>,
    pub elapsed_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct Counts {
    pub sources: i64,
    pub words: i64,
    pub failed_tasks: i64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct Costs {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_calls: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunStatusResponse {
    pub run_id: i64,
    pub status: String,
    pub phase: String,
    pub running: bool,
    pub progress: Progress,
    pub timing: Timing,
    pub counts: Counts,
    pub costs: Costs,
    pub cancel_requested_at: Option<chrono::DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelResponse {
    pub status: &'static str,
    pub run_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventsPageResponse {
    pub session_id: i64,
    pub events: Vec<EventView>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventView {
    pub event_id: i64,
    pub ts: chrono::DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub task_id: Option<i64>,
    pub query_group: Option<String>,
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SectionSummary {
    pub title: String,
    pub position: i64,
    pub word_count: i64,
    pub citation_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub executive_summary: Option<String>,
    pub conclusion: Option<String>,
    pub sections: Vec<SectionSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Artifacts {
    pub markdown_path: Option<String>,
    pub html_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResultResponse {
    pub run_id: i64,
    pub status: String,
    pub artifacts: Artifacts,
    pub summary: RunSummary,
    pub sources: Vec<research_types::Source>,
}

struct ActiveRun {
    session_id: i64,
    handle: JoinHandle<()>,
}

#[derive(Clone)]
pub struct ServiceFacade {
    store: ResearchStore,
    base_config: ResearchConfig,
    llm: Arc<dyn LlmClient>,
    search: Arc<dyn SearchClient>,
    extraction: Arc<dyn ExtractionClient>,
    active: Arc<Mutex<Option<ActiveRun>>>,
}

impl ServiceFacade {
    pub fn new(
        store: ResearchStore,
        base_config: ResearchConfig,
        llm: Arc<dyn LlmClient>,
        search: Arc<dyn SearchClient>,
        extraction: Arc<dyn ExtractionClient>,
    ) -> Self {
        Self {
            store,
            base_config,
            llm,
            search,
            extraction,
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn start_run(&self, request: StartRunRequest) -> Result<StartRunResponse> {
        let mut active = self.active.lock().await;
        if let Some(current) = active.as_ref() {
            if !current.handle.is_finished() {
                return Ok(StartRunResponse {
                    status: "already_running",
                    run_id: Some(current.session_id),
                });
            }
        }

        let mut config = self.base_config.clone();
        if let Some(mode) = &request.mode {
            config.apply_preset(mode)?;
        }
        if let Some(overrides) = &request.overrides {
            for (key, value) in overrides {
                config.apply_override(key, value)?;
            }
        }

        let session_id = if request.resume {
            match self.store.get_most_recent_resumable_session().await? {
                Some(session) => session.id,
                None => self.store.create_session(request.query.as_deref().unwrap_or("")).await?,
            }
        } else {
            self.store.create_session(request.query.as_deref().unwrap_or("")).await?
        };

        if let Some(brief) = &request.refined_brief {
            self.store.set_refined_brief(session_id, brief, request.refinement_qa.as_deref()).await?;
        }

        let runner = PhaseRunner::new(
            self.store.clone(),
            self.llm.clone(),
            self.search.clone(),
            self.extraction.clone(),
            config,
        )?;

        if request.blocking {
            runner.resume(session_id).await?;
            return Ok(StartRunResponse { status: "started", run_id: Some(session_id) });
        }

        let handle = tokio::spawn(async move {
            if let Err(e) = runner.resume(session_id).await {
                error!(error = %e, session_id, "research run failed");
            } else {
                info!(session_id, "research run finished");
            }
        });
        *active = Some(ActiveRun { session_id, handle });

        Ok(StartRunResponse { status: "started", run_id: Some(session_id) })
    }

    async fn resolve_session_id(&self, requested: Option<i64>) -> Result<Option<i64>> {
        if let Some(id) = requested {
            return Ok(Some(id));
        }
        if let Some(active) = self.active.lock().await.as_ref() {
            return Ok(Some(active.session_id));
        }
        Ok(self.store.get_most_recent_session().await?.map(|s| s.id))
    }

    pub async fn get_run_status(&self, session_id: Option<i64>) -> Result<Option<RunStatusResponse>> {
        let Some(session_id) = self.resolve_session_id(session_id).await? else {
            return Ok(None);
        };
        let Some(session) = self.store.get_session(session_id).await? else {
            return Ok(None);
        };
        let stats = self.store.get_statistics(session_id).await?;
        let tokens = self.store.get_token_usage(session_id).await?;
        let running = self
            .active
            .lock()
            .await
            .as_ref()
            .map(|a| a.session_id == session_id && !a.handle.is_finished())
            .unwrap_or(false);

        let elapsed = session
            .ended_at
            .unwrap_or_else(Utc::now)
            .signed_duration_since(session.started_at)
            .num_milliseconds() as f64
            / 1000.0;

        let pct = if stats.total_tasks > 0 {
            stats.completed_tasks as f64 / stats.total_tasks as f64 * 100.0
        } else {
            0.0
        };

        Ok(Some(RunStatusResponse {
            run_id: session.id,
            status: session.status.as_str().to_string(),
            phase: session.phase.as_str().to_string(),
            running,
            progress: Progress {
                completed: stats.completed_tasks,
                total: stats.total_tasks,
                pct,
            },
            timing: Timing {
                started_at: Some(session.started_at),
                ended_at: session.ended_at,
                elapsed_seconds: elapsed,
            },
            counts: Counts {
                sources: stats.total_sources,
                words: stats.total_words,
                failed_tasks: stats.failed_tasks,
            },
            costs: Costs {
                prompt_tokens: tokens.prompt_tokens,
                completion_tokens: tokens.completion_tokens,
                total_calls: tokens.total_calls,
            },
            cancel_requested_at: session.cancel_requested_at,
        }))
    }

    pub async fn cancel_run(&self) -> Result<CancelResponse> {
        let active = self.active.lock().await;
        let Some(current) = active.as_ref() else {
            return Ok(CancelResponse { status: "not_running", run_id: None });
        };
        if current.handle.is_finished() {
            return Ok(CancelResponse { status: "not_running", run_id: None });
        }
        self.store.mark_cancel_requested(current.session_id).await?;
        Ok(CancelResponse { status: "cancelling", run_id: Some(current.session_id) })
    }

    pub async fn get_run_events_page(
        &self,
        session_id: Option<i64>,
        cursor: Option<String>,
        limit: i64,
    ) -> Result<Option<EventsPageResponse>> {
        let Some(session_id) = self.resolve_session_id(session_id).await? else {
            return Ok(None);
        };
        let cursor = cursor.and_then(|c| research_types::EventCursor::decode(&c));
        let (events, next_cursor) = self.store.events_after(session_id, cursor, limit).await?;
        Ok(Some(EventsPageResponse {
            session_id,
            events: events
                .into_iter()
                .map(|e| EventView {
                    event_id: e.id,
                    ts: e.created_at,
                    event_type: e.event_type,
                    task_id: e.task_id,
                    query_group: e.query_group,
                    payload: e.payload_json,
                })
                .collect(),
            next_cursor: next_cursor.map(|c| c.encode()),
        }))
    }

    pub async fn get_run_result(&self, session_id: Option<i64>) -> Result<Option<RunResultResponse>> {
        let Some(session_id) = self.resolve_session_id(session_id).await? else {
            return Ok(None);
        };
        let Some(session) = self.store.get_session(session_id).await? else {
            return Ok(None);
        };
        let sections = self.store.get_sections(session_id).await?;
        let sources = self.store.get_sources_for_session(session_id).await?;

        Ok(Some(RunResultResponse {
            run_id: session.id,
            status: session.status.as_str().to_string(),
            artifacts: Artifacts {
                markdown_path: session.report_markdown_path,
                html_path: session.report_html_path,
            },
            summary: RunSummary {
                executive_summary: session.executive_summary,
                conclusion: session.conclusion,
                sections: sections
                    .into_iter()
                    .filter(|s| s.status == SectionStatus::Complete)
                    .map(|s| SectionSummary {
                        title: s.title,
                        position: s.position,
                        word_count: s.word_count,
                        citation_count: s.citation_count,
                    })
                    .collect(),
            },
            sources,
        }))
    }

    pub fn list_presets(&self) -> Vec<&'static str> {
        list_presets()
    }
}
