mod anki_connect;
mod auth;
mod commits;
mod config;
mod db;
mod errors;
mod extract;
mod github;
mod jobs;
mod llm_client;
mod models;
mod review;
mod routes;
mod runs;
mod settings;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::anki_connect::AnkiConnectClient;
use crate::config::Config;
use crate::db::create_pool;
use crate::github::GithubClient;
use crate::jobs::store::PgJobStore;
use crate::jobs::worker::{supervise, JobDispatcher, JobWorker};
use crate::llm_client::LlmClient;
use crate::review::rewrite::LlmCardRewriter;
use crate::review::store::PgReviewStore;
use crate::routes::build_router;
use crate::runs::converter::Converter;
use crate::runs::registry::ProcessRegistry;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Renforce API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL (runs migrations)
    let db = create_pool(&config.database_url).await?;

    // Initialize LLM client; regeneration answers 503 without a key
    let llm = LlmClient::new(config.anthropic_api_key.clone(), config.llm_model.clone())?;
    info!(
        "LLM client initialized (model: {}, configured: {})",
        llm.model(),
        llm.is_configured()
    );

    let converter = Converter::new(&config.converter_bin);
    let processes = ProcessRegistry::new();

    // Background worker and its supervisor
    let (jobs, job_rx) = JobDispatcher::channel(config.job_queue_capacity);
    let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
    let worker = Arc::new(JobWorker::new(
        db.clone(),
        converter.clone(),
        processes.clone(),
        config.repos_root.clone(),
        config.package_dir.clone(),
        outcome_tx,
    ));
    tokio::spawn(worker.run(job_rx));
    tokio::spawn(supervise(outcome_rx, jobs.clone(), config.job_max_attempts));
    info!(
        max_attempts = config.job_max_attempts,
        converter = %config.converter_bin.display(),
        "Job worker spawned"
    );

    // Build app state
    let state = AppState {
        review_store: Arc::new(PgReviewStore::new(db.clone())),
        job_store: Arc::new(PgJobStore::new(db.clone())),
        rewriter: Arc::new(LlmCardRewriter::new(llm)),
        jobs,
        processes,
        converter,
        github: GithubClient::new(config.github_api_url.clone())?,
        anki: AnkiConnectClient::new()?,
        db,
        config: config.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins to the review UI's host

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
