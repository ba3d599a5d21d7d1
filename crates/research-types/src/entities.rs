use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    CompletedWithErrors,
    Partial,
    PartialWithErrors,
    Cancelled,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::CompletedWithErrors => "completed_with_errors",
            SessionStatus::Partial => "partial",
            SessionStatus::PartialWithErrors => "partial_with_errors",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "running" => Self::Running,
            "completed" => Self::Completed,
            "completed_with_errors" => Self::CompletedWithErrors,
            "partial" => Self::Partial,
            "partial_with_errors" => Self::PartialWithErrors,
            "cancelled" => Self::Cancelled,
            "failed" => Self::Failed,
            _ => return None,
        })
    }

    /// Terminal-status priority from the finalization contract: cancellation
    /// first, then pending+failed combinations, then the clean-completion case.
    pub fn finalize(pending: i64, failed: i64, cancelled: bool) -> Self {
        if cancelled {
            SessionStatus::Cancelled
        } else if pending > 0 && failed > 0 {
            SessionStatus::PartialWithErrors
        } else if pending > 0 {
            SessionStatus::Partial
        } else if failed > 0 {
            SessionStatus::CompletedWithErrors
        } else {
            SessionStatus::Completed
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    Planned,
    Researching,
    Synthesizing,
    Complete,
}

impl SectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SectionStatus::Planned => "planned",
            SectionStatus::Researching => "researching",
            SectionStatus::Synthesizing => "synthesizing",
            SectionStatus::Complete => "complete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "planned" => Self::Planned,
            "researching" => Self::Researching,
            "synthesizing" => Self::Synthesizing,
            "complete" => Self::Complete,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => Self::Pending,
            "in_progress" => Self::InProgress,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "skipped" => Self::Skipped,
            _ => return None,
        })
    }
}

/// The 7 phases of the state machine, in traversal order (`gap_analysis` may
/// cycle back into `researching` once).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    PrePlanning,
    OutlineDesign,
    TaskPlanning,
    Researching,
    GapAnalysis,
    Synthesizing,
    Compiling,
    Complete,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::PrePlanning => "pre_planning",
            Phase::OutlineDesign => "outline_design",
            Phase::TaskPlanning => "task_planning",
            Phase::Researching => "researching",
            Phase::GapAnalysis => "gap_analysis",
            Phase::Synthesizing => "synthesizing",
            Phase::Compiling => "compiling",
            Phase::Complete => "complete",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    pub query: String,
    pub refined_brief: Option<String>,
    pub refinement_qa: Option<String>,
    /// The rich source-analysis context built from pre-planning's search,
    /// scrape and per-page analysis pass. Feeds the outline designer; never
    /// shown to the user as the report title the way `refined_brief` is.
    pub pre_plan_context: Option<String>,
    pub status: SessionStatus,
    pub phase: Phase,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub cancel_requested_at: Option<DateTime<Utc>>,
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub total_words: i64,
    pub total_sources: i64,
    pub executive_summary: Option<String>,
    pub conclusion: Option<String>,
    pub report_markdown_path: Option<String>,
    pub report_html_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub id: i64,
    pub session_id: i64,
    pub title: String,
    pub description: String,
    pub position: i64,
    pub status: SectionStatus,
    pub synthesized_content: Option<String>,
    pub word_count: i64,
    pub citation_count: i64,
    pub is_gap_fill: bool,
    pub created_at: DateTime<Utc>,
    pub synthesized_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchTask {
    pub id: i64,
    pub session_id: i64,
    pub section_id: Option<i64>,
    pub parent_id: Option<i64>,
    pub topic: String,
    pub description: String,
    pub file_path: String,
    pub status: TaskStatus,
    pub priority: i64,
    pub depth: i64,
    pub word_count: i64,
    pub citation_count: i64,
    pub is_gap_fill: bool,
    pub retry_count: i64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub section_id: Option<i64>,
    pub parent_id: Option<i64>,
    pub topic: String,
    pub description: String,
    pub file_path: String,
    pub priority: i64,
    pub depth: i64,
    pub is_gap_fill: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub domain: String,
    pub snippet: String,
    pub full_content: Option<String>,
    pub quality_score: f64,
    pub is_academic: bool,
    pub accessed_at: DateTime<Utc>,
    /// Populated by the ledger when reading out sources scoped to a task/section.
    #[serde(default)]
    pub extracted_content: Option<String>,
    #[serde(default)]
    pub task_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSource {
    pub url: String,
    pub title: String,
    pub domain: String,
    pub snippet: String,
    pub full_content: Option<String>,
    pub quality_score: f64,
    pub is_academic: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlossaryTerm {
    pub id: i64,
    pub session_id: i64,
    pub term: String,
    pub definition: String,
    pub first_occurrence_task_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub id: i64,
    pub session_id: i64,
    pub task_id: Option<i64>,
    pub event_type: String,
    pub query_group: Option<String>,
    pub query_text: Option<String>,
    pub url: Option<String>,
    pub title: Option<String>,
    pub snippet: Option<String>,
    pub quality_score: Option<f64>,
    pub phase: Option<String>,
    pub severity: Option<String>,
    pub payload_json: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// Inputs for appending to the run-event log. `created_at` is stamped by the
/// store, not the caller, so events from concurrent tasks sort consistently
/// with insertion order even if wall clocks disagree slightly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewRunEvent {
    pub task_id: Option<i64>,
    pub event_type: String,
    pub query_group: Option<String>,
    pub query_text: Option<String>,
    pub url: Option<String>,
    pub title: Option<String>,
    pub snippet: Option<String>,
    pub quality_score: Option<f64>,
    pub phase: Option<String>,
    pub severity: Option<String>,
    pub payload_json: Option<Value>,
}

impl NewRunEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            ..Default::default()
        }
    }

    pub fn with_task(mut self, task_id: i64) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn with_phase(mut self, phase: &str) -> Self {
        self.phase = Some(phase.to_string());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload_json = Some(payload);
        self
    }
}

/// Opaque keyset cursor over `(created_at, id)`, base64-encoded for transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCursor {
    pub created_at_micros: i64,
    pub id: i64,
}

impl EventCursor {
    pub fn encode(&self) -> String {
        use base64::Engine;
        let raw = format!("{}:{}", self.created_at_micros, self.id);
        base64::engine::general_purpose::STANDARD.encode(raw)
    }

    /// Invalid cursors are treated as "from start" per the pagination contract.
    pub fn decode(s: &str) -> Option<Self> {
        use base64::Engine;
        let raw = base64::engine::general_purpose::STANDARD.decode(s).ok()?;
        let raw = String::from_utf8(raw).ok()?;
        let (a, b) = raw.split_once(':')?;
        Some(Self {
            created_at_micros: a.parse().ok()?,
            id: b.parse().ok()?,
        })
    }
}
