//! Axum route handlers for per-user settings and the AnkiConnect check.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::{AppError, ValidationIssue};
use crate::extract::AppJson;
use crate::github::handlers::require_token;
use crate::github::store::get_link_owned;
use crate::models::settings::{SettingsRow, SyncTarget};
use crate::settings::notes_config::{parse_notes_config, NotesConfig};
use crate::settings::store;
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevModeBody {
    pub dev_mode: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SyncSettingsRequest {
    pub target: SyncTarget,
    pub anki_connect_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ImportYamlRequest {
    pub repo_id: Option<Uuid>,
    pub path: Option<String>,
    /// Inline YAML; when present nothing is fetched from GitHub.
    pub content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AnkiTestRequest {
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    pub settings: Option<SettingsRow>,
}

#[derive(Debug, Serialize)]
pub struct ImportYamlResponse {
    pub settings: SettingsRow,
    pub config: NotesConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnkiTestResponse {
    pub ok: bool,
    pub url: String,
    pub version: u32,
}

fn validate_http_url(field: &str, url: &str) -> Result<(), AppError> {
    let url = url.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(AppError::invalid_fields(
            "Invalid URL",
            vec![ValidationIssue::new(field, "must be an http:// or https:// URL")],
        ))
    }
}

/// GET /settings/dev-mode
pub async fn handle_get_dev_mode(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<DevModeBody>, AppError> {
    let settings = store::get_settings(&state.db, auth.user_id).await?;
    Ok(Json(DevModeBody {
        dev_mode: settings.is_some_and(|s| s.dev_mode),
    }))
}

/// POST /settings/dev-mode
pub async fn handle_set_dev_mode(
    State(state): State<AppState>,
    auth: AuthUser,
    AppJson(body): AppJson<DevModeBody>,
) -> Result<Json<DevModeBody>, AppError> {
    let settings = store::set_dev_mode(&state.db, auth.user_id, body.dev_mode).await?;
    Ok(Json(DevModeBody {
        dev_mode: settings.dev_mode,
    }))
}

/// POST /settings/sync
pub async fn handle_set_sync(
    State(state): State<AppState>,
    auth: AuthUser,
    AppJson(body): AppJson<SyncSettingsRequest>,
) -> Result<Json<SettingsResponse>, AppError> {
    let url = body
        .anki_connect_url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty());
    if let Some(url) = url {
        validate_http_url("ankiConnectUrl", url)?;
    }

    let settings = store::set_sync(&state.db, auth.user_id, body.target, url).await?;
    info!(user_id = %auth.user_id, target = body.target.as_str(), "Sync target updated");
    Ok(Json(SettingsResponse {
        settings: Some(settings),
    }))
}

/// GET /settings/import-yaml
pub async fn handle_get_imported(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<SettingsResponse>, AppError> {
    let settings = store::get_settings(&state.db, auth.user_id).await?;
    Ok(Json(SettingsResponse { settings }))
}

/// Where an import's YAML comes from.
#[derive(Debug, PartialEq)]
enum ImportPlan {
    /// Inline content, optionally recorded against one of the caller's repos.
    Inline {
        content: String,
        repo_id: Option<Uuid>,
    },
    Fetch {
        repo_id: Uuid,
    },
}

impl ImportPlan {
    fn from_request(content: Option<String>, repo_id: Option<Uuid>) -> Result<Self, AppError> {
        match (content, repo_id) {
            (Some(content), repo_id) => Ok(ImportPlan::Inline { content, repo_id }),
            (None, Some(repo_id)) => Ok(ImportPlan::Fetch { repo_id }),
            (None, None) => Err(AppError::invalid_fields(
                "Nothing to import",
                vec![ValidationIssue::new("repoId", "repoId or content is required")],
            )),
        }
    }

    /// The repo link that must belong to the caller before anything is stored.
    fn repo_id(&self) -> Option<Uuid> {
        match self {
            ImportPlan::Inline { repo_id, .. } => *repo_id,
            ImportPlan::Fetch { repo_id } => Some(*repo_id),
        }
    }
}

/// POST /settings/import-yaml
///
/// Parses inline `content`, or fetches the YAML file from a linked repo at its
/// default branch.
pub async fn handle_import_yaml(
    State(state): State<AppState>,
    auth: AuthUser,
    AppJson(body): AppJson<ImportYamlRequest>,
) -> Result<Json<ImportYamlResponse>, AppError> {
    let plan = ImportPlan::from_request(body.content, body.repo_id)?;
    let link = match plan.repo_id() {
        Some(repo_id) => Some(
            get_link_owned(&state.db, auth.user_id, repo_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Repository link {repo_id} not found")))?,
        ),
        None => None,
    };

    let (yaml, path) = match (plan, &link) {
        (ImportPlan::Inline { content, .. }, _) => (content, body.path),
        (ImportPlan::Fetch { .. }, Some(link)) => {
            let path = body
                .path
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| link.yaml_path.clone());
            let token = require_token(&state, auth.user_id).await?;
            let yaml = state
                .github
                .file_contents(&token, &link.owner, &link.repo, &path, &link.default_branch)
                .await?;
            (yaml, Some(path))
        }
        (ImportPlan::Fetch { repo_id }, None) => {
            return Err(AppError::NotFound(format!("Repository link {repo_id} not found")))
        }
    };
    let repo_id = link.map(|l| l.id);

    let config = parse_notes_config(&yaml)?;
    let settings = store::save_imported_config(
        &state.db,
        auth.user_id,
        &config.clone().into_sections(),
        repo_id,
        path.as_deref(),
    )
    .await?;

    info!(user_id = %auth.user_id, courses = config.courses.len(), "Notes config imported");
    Ok(Json(ImportYamlResponse { settings, config }))
}

/// POST /anki/test
///
/// Uses the URL from the body, else the user's saved URL, else the server default.
pub async fn handle_anki_test(
    State(state): State<AppState>,
    auth: AuthUser,
    body: Option<AppJson<AnkiTestRequest>>,
) -> Result<Json<AnkiTestResponse>, AppError> {
    let requested = body
        .and_then(|AppJson(b)| b.url)
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty());

    let url = match requested {
        Some(url) => {
            validate_http_url("url", &url)?;
            url
        }
        None => store::get_settings(&state.db, auth.user_id)
            .await?
            .and_then(|s| s.anki_connect_url)
            .unwrap_or_else(|| state.config.default_anki_connect_url.clone()),
    };

    let version = state.anki.version(&url).await?;
    Ok(Json(AnkiTestResponse {
        ok: true,
        url,
        version,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_validation() {
        assert!(validate_http_url("url", "http://127.0.0.1:8765").is_ok());
        assert!(validate_http_url("url", " https://anki.example.org ").is_ok());
        assert!(validate_http_url("url", "ftp://host").is_err());
        assert!(validate_http_url("url", "127.0.0.1:8765").is_err());
    }

    #[test]
    fn test_sync_request_parses_target() {
        let req: SyncSettingsRequest =
            serde_json::from_str(r#"{"target":"ankiconnect","ankiConnectUrl":"http://localhost:8765"}"#)
                .unwrap();
        assert_eq!(req.target, SyncTarget::Ankiconnect);
        assert!(serde_json::from_str::<SyncSettingsRequest>(r#"{"target":"dropbox"}"#).is_err());
    }

    #[test]
    fn test_inline_import_still_checks_repo_ownership() {
        let repo_id = Uuid::new_v4();
        let plan = ImportPlan::from_request(Some("courses: {}".into()), Some(repo_id)).unwrap();
        assert_eq!(plan.repo_id(), Some(repo_id));

        let inline_only = ImportPlan::from_request(Some("courses: {}".into()), None).unwrap();
        assert_eq!(inline_only.repo_id(), None);
        assert_eq!(
            ImportPlan::from_request(None, Some(repo_id)).unwrap(),
            ImportPlan::Fetch { repo_id }
        );
        assert!(matches!(
            ImportPlan::from_request(None, None),
            Err(AppError::Validation { .. })
        ));
    }
}
