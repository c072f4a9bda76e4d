//! The mneme backend server binary.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use mneme::api::{self, AppState};
use mneme::config::AppConfig;
use mneme::flashcards::SchedulerConfig;
use mneme::llm::LlmClient;
use mneme::storage::Database;

#[derive(Parser)]
#[command(name = "mneme-server", about = "Study stack backend server", version)]
struct Args {
    /// Path to a TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the bind address (host:port)
    #[arg(long)]
    bind: Option<String>,

    /// Override the SQLite database path
    #[arg(long)]
    db: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config =
        AppConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }

    let db_path = args.db.unwrap_or_else(|| config.database_path());
    let db = Database::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;

    if config.llm.api_key.is_none() {
        log::warn!("no LLM API key configured; generation endpoints will fail");
    }
    let llm = LlmClient::new(config.llm.clone()).context("failed to build LLM client")?;

    let state = AppState::new(db, llm, SchedulerConfig::default());
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    log::info!("listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        log::info!("shutting down");
    }
}
