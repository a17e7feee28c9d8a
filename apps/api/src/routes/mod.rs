pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;
use crate::{commits, github, jobs, review, runs, settings};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Card review
        .route(
            "/cards/:id",
            get(review::handlers::handle_get_card).patch(review::handlers::handle_patch_card),
        )
        .route("/cards/:id/add", post(review::handlers::handle_add_card))
        .route("/cards/:id/discard", post(review::handlers::handle_discard_card))
        .route("/cards/:id/recreate", post(review::handlers::handle_recreate_card))
        .route(
            "/cards/:id/regenerate",
            post(review::handlers::handle_regenerate_card),
        )
        // Jobs and runs
        .route("/jobs", post(jobs::handlers::handle_create_job))
        .route("/jobs/:id", get(jobs::handlers::handle_get_job))
        .route("/runs/:id", get(runs::handlers::handle_get_run))
        .route("/runs/:id/kill", post(runs::handlers::handle_kill_run))
        .route("/runs/:id/download", get(runs::handlers::handle_download_run))
        .route("/runs/:id/anki-sync", post(runs::handlers::handle_anki_sync))
        // Commits
        .route("/commits", get(commits::handlers::handle_list_commits))
        .route("/commits/status", post(commits::handlers::handle_commit_status))
        // GitHub
        .route(
            "/github/link",
            get(github::handlers::handle_list_links).post(github::handlers::handle_link_repo),
        )
        .route("/github/repos", get(github::handlers::handle_list_github_repos))
        // Settings
        .route("/anki/test", post(settings::handlers::handle_anki_test))
        .route(
            "/settings/dev-mode",
            get(settings::handlers::handle_get_dev_mode).post(settings::handlers::handle_set_dev_mode),
        )
        .route("/settings/sync", post(settings::handlers::handle_set_sync))
        .route(
            "/settings/import-yaml",
            get(settings::handlers::handle_get_imported).post(settings::handlers::handle_import_yaml),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    use super::*;
    use crate::anki_connect::AnkiConnectClient;
    use crate::config::Config;
    use crate::github::GithubClient;
    use crate::jobs::store::PgJobStore;
    use crate::jobs::worker::JobDispatcher;
    use crate::llm_client::LlmClient;
    use crate::review::rewrite::LlmCardRewriter;
    use crate::review::store::PgReviewStore;
    use crate::runs::converter::Converter;
    use crate::runs::registry::ProcessRegistry;

    /// State over a pool that never connects; only paths that stop before the
    /// database are exercised.
    fn test_state() -> AppState {
        let config = Config::for_tests();
        let db = PgPoolOptions::new()
            .connect_lazy(&config.database_url)
            .unwrap();
        let (jobs, _rx) = JobDispatcher::channel(1);
        AppState {
            review_store: Arc::new(PgReviewStore::new(db.clone())),
            job_store: Arc::new(PgJobStore::new(db.clone())),
            rewriter: Arc::new(LlmCardRewriter::new(
                LlmClient::new(None, config.llm_model.clone()).unwrap(),
            )),
            jobs,
            processes: ProcessRegistry::new(),
            converter: Converter::new(&config.converter_bin),
            github: GithubClient::new(config.github_api_url.clone()).unwrap(),
            anki: AnkiConnectClient::new().unwrap(),
            db,
            config,
        }
    }

    async fn send(request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = build_router(test_state()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or_default())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "renforce");
    }

    #[tokio::test]
    async fn test_missing_bearer_token_is_401() {
        let requests = [
            Request::post("/cards/6f1c1c2e-8d3a-4b59-9d7e-0a1b2c3d4e5f/add").body(Body::empty()),
            Request::get("/jobs/6f1c1c2e-8d3a-4b59-9d7e-0a1b2c3d4e5f").body(Body::empty()),
            Request::post("/runs/6f1c1c2e-8d3a-4b59-9d7e-0a1b2c3d4e5f/kill").body(Body::empty()),
            Request::get("/github/link").body(Body::empty()),
        ];
        for request in requests {
            let (status, body) = send(request.unwrap()).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(body["error"]["code"], "UNAUTHORIZED");
        }
    }

    #[tokio::test]
    async fn test_non_bearer_scheme_is_401() {
        let request = Request::get("/settings/dev-mode")
            .header("authorization", "Basic dXNlcjpwYXNz")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let (status, _) = send(Request::get("/nope").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
