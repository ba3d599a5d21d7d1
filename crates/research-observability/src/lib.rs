//! Tracing setup for the engine and its CLI/service entry points.
//!
//! Logs always go to a rotating JSON file under `<root>/logs`. The console
//! sink differs by how the process is being run: a CLI invocation wants a
//! readable, human-facing line per event, while a long-running service
//! wants compact, greppable output with no ANSI. Both are registered as
//! ordinary `tracing_subscriber` layers selected once at startup, rather
//! than swapped at runtime through a shared mutable console handle.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Cli,
    Service,
}

impl RunMode {
    fn as_str(self) -> &'static str {
        match self {
            RunMode::Cli => "cli",
            RunMode::Service => "service",
        }
    }
}

pub struct LoggingHandle {
    _file_guard: WorkerGuard,
}

/// Initialize process-wide logging. Must be called once, before any other
/// tracing calls; the returned handle must be kept alive for the process's
/// lifetime or buffered log lines are lost on drop.
pub fn init_logging(mode: RunMode, logs_dir: &Path, level: &str) -> anyhow::Result<LoggingHandle> {
    fs::create_dir_all(logs_dir)?;
    cleanup_old_logs(logs_dir, 14)?;

    let file_appender = tracing_appender::rolling::Builder::new()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix("research-engine")
        .filename_suffix("jsonl")
        .build(logs_dir)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_current_span(false)
        .with_span_list(false);

    let console_layer = match mode {
        RunMode::Cli => tracing_subscriber::fmt::layer().pretty().with_ansi(true).boxed(),
        RunMode::Service => tracing_subscriber::fmt::layer().compact().with_ansi(false).boxed(),
    };

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .ok();

    tracing::info!(mode = mode.as_str(), logs_dir = %logs_dir.display(), "logging initialized");

    Ok(LoggingHandle { _file_guard: guard })
}

fn cleanup_old_logs(logs_dir: &Path, retention_days: i64) -> anyhow::Result<()> {
    let cutoff = Utc::now() - chrono::Duration::days(retention_days);
    let prefix = "research-engine.";

    let Ok(entries) = fs::read_dir(logs_dir) else {
        return Ok(());
    };
    for entry in entries {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with(prefix) || !name.ends_with(".jsonl") {
            continue;
        }
        let date_part = name.trim_start_matches(prefix).trim_end_matches(".jsonl");
        let Ok(date) = chrono::NaiveDate::parse_from_str(date_part, "%Y-%m-%d") else {
            continue;
        };
        let Some(midnight) = date.and_hms_opt(0, 0, 0) else {
            continue;
        };
        if chrono::DateTime::<Utc>::from_naive_utc_and_offset(midnight, Utc) < cutoff {
            let _ = fs::remove_file(path);
        }
    }
    Ok(())
}

pub fn canonical_logs_dir(output_dir: &Path) -> PathBuf {
    output_dir.join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_logs_dir_joins_logs_folder() {
        let root = PathBuf::from("/tmp/research");
        assert_eq!(canonical_logs_dir(&root), PathBuf::from("/tmp/research/logs"));
    }
}
