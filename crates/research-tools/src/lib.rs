//! Local, self-contained helpers the research pipeline needs that don't
//! belong to a model or HTTP provider: SSRF guarding, quality scoring,
//! report rendering and task-notes file I/O.

mod notes;
mod quality;
mod render;
mod ssrf;
mod wordcount;

pub use notes::{read_task_notes, write_task_notes};
pub use quality::{is_academic_domain, score_source, ScoreInputs};
pub use render::{render_html, render_markdown, render_pdf, ReportDraft};
pub use ssrf::{validate_url, UrlValidationError};
pub use wordcount::{count_citations, count_words};
