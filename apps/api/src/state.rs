use std::sync::Arc;

use sqlx::PgPool;

use crate::anki_connect::AnkiConnectClient;
use crate::config::Config;
use crate::github::GithubClient;
use crate::jobs::store::JobStore;
use crate::jobs::worker::JobDispatcher;
use crate::review::rewrite::CardRewriter;
use crate::review::store::ReviewStore;
use crate::runs::converter::Converter;
use crate::runs::registry::ProcessRegistry;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    /// Card status and edit persistence. Default: PgReviewStore.
    pub review_store: Arc<dyn ReviewStore>,
    pub job_store: Arc<dyn JobStore>,
    /// Pluggable rewrite backend for regeneration. Default: LlmCardRewriter.
    pub rewriter: Arc<dyn CardRewriter>,
    pub jobs: JobDispatcher,
    /// Kill handles of running converter processes, keyed by run ID.
    pub processes: ProcessRegistry,
    pub converter: Converter,
    pub github: GithubClient,
    pub anki: AnkiConnectClient,
}
