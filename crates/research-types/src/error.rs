use thiserror::Error;

/// Error categories from the error-handling design: fatal config/auth errors
/// never reach the scheduler, network/model errors are retried by their
/// callers before surfacing here, and `Other` is the escape hatch for
/// call sites that only need `?` propagation.
#[derive(Debug, Error)]
pub enum ResearchError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("failed to parse model output: {0}")]
    Parse(String),

    #[error("rejected URL: {0}")]
    Ssrf(String),

    #[error("task execution failed: {0}")]
    TaskExecution(String),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("compile error: {0}")]
    Compile(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ResearchError>;
