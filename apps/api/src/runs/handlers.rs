//! Axum route handlers for processing runs and their exports.

use std::collections::BTreeSet;

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::card::CardSuggestionRow;
use crate::models::job::ProcessingRunRow;
use crate::runs::export::{anki_notes_for, build_accepted_package, read_prebuilt, PackageFile};
use crate::runs::store;
use crate::settings::store::get_settings;
use crate::state::AppState;

const APKG_CONTENT_TYPE: &str = "application/apkg";

#[derive(Debug, Serialize)]
pub struct RunDetailResponse {
    pub run: ProcessingRunRow,
    pub suggestions: Vec<CardSuggestionRow>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KillResponse {
    pub run: ProcessingRunRow,
    /// Whether a live converter process received the signal.
    pub signalled: bool,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DownloadSource {
    Package,
    #[default]
    Accepted,
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    #[serde(default)]
    pub source: DownloadSource,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnkiSyncResponse {
    pub added: usize,
    pub skipped: usize,
    pub decks: Vec<String>,
}

async fn owned_run(state: &AppState, user_id: Uuid, run_id: Uuid) -> Result<ProcessingRunRow, AppError> {
    store::get_run_owned(&state.db, user_id, run_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Run {run_id} not found")))
}

/// GET /runs/:id
pub async fn handle_get_run(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(run_id): Path<Uuid>,
) -> Result<Json<RunDetailResponse>, AppError> {
    let run = owned_run(&state, auth.user_id, run_id).await?;
    let suggestions = store::suggestions_for_run(&state.db, run.id).await?;
    Ok(Json(RunDetailResponse { run, suggestions }))
}

/// POST /runs/:id/kill
///
/// Best effort: the run is marked failed even when no process is registered.
pub async fn handle_kill_run(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(run_id): Path<Uuid>,
) -> Result<Json<KillResponse>, AppError> {
    owned_run(&state, auth.user_id, run_id).await?;

    let signalled = state.processes.kill(run_id);
    let run = store::mark_run_killed(&state.db, auth.user_id, run_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Run {run_id} not found")))?;

    info!(run_id = %run_id, signalled, "Run killed");
    Ok(Json(KillResponse { run, signalled }))
}

/// GET /runs/:id/download?source=package|accepted
pub async fn handle_download_run(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(run_id): Path<Uuid>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, AppError> {
    let run = owned_run(&state, auth.user_id, run_id).await?;
    let today = Utc::now().date_naive();

    let file = match query.source {
        DownloadSource::Package => read_prebuilt(run.id, run.apkg_path.as_deref(), today).await?,
        DownloadSource::Accepted => {
            let accepted = store::accepted_for_run(&state.db, auth.user_id, run.id).await?;
            build_accepted_package(&state.converter, run.id, &accepted, today).await?
        }
    };
    Ok(package_response(file))
}

fn package_response(file: PackageFile) -> Response {
    let disposition = format!("attachment; filename=\"{}\"", file.filename);
    (
        [
            (header::CONTENT_TYPE, APKG_CONTENT_TYPE.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        file.bytes,
    )
        .into_response()
}

/// POST /runs/:id/anki-sync
pub async fn handle_anki_sync(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(run_id): Path<Uuid>,
) -> Result<Json<AnkiSyncResponse>, AppError> {
    let run = owned_run(&state, auth.user_id, run_id).await?;
    let accepted = store::accepted_for_run(&state.db, auth.user_id, run.id).await?;
    let settings = get_settings(&state.db, auth.user_id).await?;

    let notes = anki_notes_for(run.id, &accepted, settings.as_ref())?;
    let url = settings
        .as_ref()
        .and_then(|s| s.anki_connect_url.clone())
        .unwrap_or_else(|| state.config.default_anki_connect_url.clone());

    let decks: BTreeSet<String> = notes.iter().map(|n| n.deck_name.clone()).collect();
    for deck in &decks {
        state.anki.create_deck(&url, deck).await?;
    }
    let ids = state.anki.add_notes(&url, &notes).await?;
    let added = ids.iter().filter(|id| id.is_some()).count();

    info!(run_id = %run_id, added, total = notes.len(), "Synced run to AnkiConnect");
    Ok(Json(AnkiSyncResponse {
        added,
        skipped: notes.len().saturating_sub(added),
        decks: decks.into_iter().collect(),
    }))
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use bytes::Bytes;

    use super::*;

    #[test]
    fn test_download_source_defaults_to_accepted() {
        let q: DownloadQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(q.source, DownloadSource::Accepted);
        let q: DownloadQuery = serde_json::from_str(r#"{"source":"package"}"#).unwrap();
        assert_eq!(q.source, DownloadSource::Package);
    }

    #[tokio::test]
    async fn test_package_response_headers() {
        let response = package_response(PackageFile {
            filename: "renforce-1a2b3c4d-20240309.apkg".into(),
            bytes: Bytes::from_static(b"PK"),
        });
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], APKG_CONTENT_TYPE);
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename=\"renforce-1a2b3c4d-20240309.apkg\""
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"PK");
    }
}
