use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use research_observability::{canonical_logs_dir, init_logging, RunMode};
use research_pipeline::{Compiler, PhaseRunner, ResearchConfig};
use research_providers::{
    ExtractionClient, HttpExtractionClient, HttpLlmClient, HttpSearchClient, LlmClient, SearchClient,
};
use research_server::{serve, AppState, ServiceFacade};
use research_store::ResearchStore;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "research-engine")]
#[command(about = "Headless deep research agent")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start (or resume) a research run for a query.
    Research {
        query: String,
        #[arg(long)]
        resume: bool,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the status of the most recent session.
    Status {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Clear persisted state.
    Reset {
        #[arg(long)]
        force: bool,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Re-render the report for the most recent session.
    Export {
        #[arg(long, default_value = "all")]
        format: String,
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Validate configuration and provider credentials without running anything.
    Validate {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Smoke-test connectivity to the configured model provider.
    ModelSmoke {
        #[arg(long)]
        models: Option<String>,
        #[arg(long)]
        skip_tool_calling: bool,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Run the HTTP service facade.
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = run(cli).await;
    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> i32 {
    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            1
        }
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Command::Research { query, resume, config } => cmd_research(query, resume, config).await,
        Command::Status { config } => cmd_status(config).await,
        Command::Reset { force, config } => cmd_reset(force, config).await,
        Command::Export { format, output, config } => cmd_export(format, output, config).await,
        Command::Validate { config } => cmd_validate(config).await,
        Command::ModelSmoke { models, skip_tool_calling, config } => cmd_model_smoke(models, skip_tool_calling, config).await,
        Command::Serve { host, port, config } => cmd_serve(host, port, config).await,
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<ResearchConfig> {
    match path {
        Some(path) => Ok(ResearchConfig::load_file(&path)?),
        None => Ok(ResearchConfig::default()),
    }
}

fn init_logging_for(mode: RunMode, config: &ResearchConfig) {
    let logs_dir = canonical_logs_dir(std::path::Path::new(&config.output.directory));
    let _ = init_logging(mode, &logs_dir, &config.logging.level);
}

fn build_providers(config: &ResearchConfig) -> (Arc<dyn LlmClient>, Arc<dyn SearchClient>, Arc<dyn ExtractionClient>) {
    let llm_key = std::env::var("RESEARCH_LLM_API_KEY").unwrap_or_default();
    let search_key = std::env::var("RESEARCH_SEARCH_API_KEY").unwrap_or_default();
    let llm = Arc::new(HttpLlmClient::new(config.llm.base_url.clone(), llm_key));
    let search = Arc::new(HttpSearchClient::new(search_key.clone()));
    let extraction = Arc::new(HttpExtractionClient::new(search_key));
    (llm, search, extraction)
}

async fn open_store(config: &ResearchConfig) -> anyhow::Result<ResearchStore> {
    Ok(ResearchStore::open(std::path::Path::new(&config.database.path)).await?)
}

async fn cmd_research(query: String, resume: bool, config_path: Option<PathBuf>) -> anyhow::Result<i32> {
    let config = load_config(config_path)?;
    init_logging_for(RunMode::Cli, &config);
    let store = open_store(&config).await?;
    let (llm, search, extraction) = build_providers(&config);

    let runner = PhaseRunner::new(store.clone(), llm, search, extraction, config)?;

    let session_id = if resume {
        match store.get_most_recent_resumable_session().await? {
            Some(session) => session.id,
            None => store.create_session(&query).await?,
        }
    } else {
        store.create_session(&query).await?
    };

    let research = runner.resume(session_id);
    tokio::select! {
        result = research => {
            result.context("research run failed")?;
            info!(session_id, "research complete");
            Ok(0)
        }
        _ = tokio::signal::ctrl_c() => {
            // Soft cancellation: request it and let the in-flight loop
            // iteration notice and wind down, persisting what it has.
            store.mark_cancel_requested(session_id).await.ok();
            info!(session_id, "cancellation requested, progress saved");
            Ok(0)
        }
    }
}

async fn cmd_status(config_path: Option<PathBuf>) -> anyhow::Result<i32> {
    let config = load_config(config_path)?;
    let store = open_store(&config).await?;
    let Some(session) = store.get_most_recent_session().await? else {
        println!("no sessions yet");
        return Ok(0);
    };
    let stats = store.get_statistics(session.id).await?;
    println!(
        "session {} [{}] phase={} tasks={}/{} sources={} words={}",
        session.id,
        session.status.as_str(),
        session.phase.as_str(),
        stats.completed_tasks,
        stats.total_tasks,
        stats.total_sources,
        stats.total_words,
    );
    Ok(0)
}

async fn cmd_reset(force: bool, config_path: Option<PathBuf>) -> anyhow::Result<i32> {
    let config = load_config(config_path)?;
    if !force {
        eprintln!("refusing to reset without --force (this deletes {})", config.database.path);
        return Ok(1);
    }
    let db_path = PathBuf::from(&config.database.path);
    if db_path.exists() {
        tokio::fs::remove_file(&db_path).await?;
    }
    println!("reset complete");
    Ok(0)
}

async fn cmd_export(format: String, output: Option<PathBuf>, config_path: Option<PathBuf>) -> anyhow::Result<i32> {
    let mut config = load_config(config_path)?;
    if let Some(output) = output {
        config.output.directory = output.to_string_lossy().to_string();
    }
    config.output.formats = match format.as_str() {
        "all" => vec!["markdown".into(), "html".into()],
        "markdown" => vec!["markdown".into()],
        "html" => vec!["html".into()],
        "pdf" => {
            eprintln!("pdf export is not yet supported");
            return Ok(1);
        }
        other => {
            eprintln!("unknown export format {other:?}");
            return Ok(1);
        }
    };

    let store = open_store(&config).await?;
    let Some(session) = store.get_most_recent_session().await? else {
        eprintln!("no sessions to export");
        return Ok(1);
    };
    let ledger = research_ledger::SourceLedger::new(store.clone());
    let compiler = Compiler::new(store, ledger, config);
    let path = compiler.compile(session.id).await?;
    println!("exported {}", path.display());
    Ok(0)
}

async fn cmd_validate(config_path: Option<PathBuf>) -> anyhow::Result<i32> {
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("config error: {e}");
            return Ok(1);
        }
    };
    let mut ok = true;
    if std::env::var("RESEARCH_LLM_API_KEY").unwrap_or_default().is_empty() {
        eprintln!("RESEARCH_LLM_API_KEY is not set");
        ok = false;
    }
    if std::env::var("RESEARCH_SEARCH_API_KEY").unwrap_or_default().is_empty() {
        eprintln!("RESEARCH_SEARCH_API_KEY is not set");
        ok = false;
    }
    if let Err(e) = open_store(&config).await {
        eprintln!("database error: {e}");
        ok = false;
    }
    if ok {
        println!("configuration valid");
        Ok(0)
    } else {
        Ok(1)
    }
}

async fn cmd_model_smoke(models: Option<String>, skip_tool_calling: bool, config_path: Option<PathBuf>) -> anyhow::Result<i32> {
    let config = load_config(config_path)?;
    let (llm, _search, _extraction) = build_providers(&config);
    let models: Vec<String> = models
        .map(|m| m.split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_else(|| vec![config.llm.model_researcher.clone()]);

    let mut any_failed = false;
    for model in models {
        let request = research_providers::CompletionRequest {
            model: model.clone(),
            messages: vec![research_providers::ChatMessage::user("Reply with the single word: ok")],
            temperature: 0.0,
            max_tokens: 16,
            json_mode: false,
            tools: if skip_tool_calling { None } else { Some(Vec::new()) },
        };
        match llm.complete(request).await {
            Ok(_) => println!("{model}: ok"),
            Err(e) => {
                println!("{model}: failed ({e})");
                any_failed = true;
            }
        }
    }
    Ok(if any_failed { 1 } else { 0 })
}

async fn cmd_serve(host: String, port: u16, config_path: Option<PathBuf>) -> anyhow::Result<i32> {
    let config = load_config(config_path)?;
    init_logging_for(RunMode::Service, &config);
    let store = open_store(&config).await?;
    let (llm, search, extraction) = build_providers(&config);
    let facade = ServiceFacade::new(store, config, llm, search, extraction);
    let addr = format!("{host}:{port}").parse().context("invalid host/port")?;
    serve(addr, AppState { facade }).await?;
    Ok(0)
}
