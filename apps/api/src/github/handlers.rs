//! Axum route handlers for linking GitHub repositories.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::{AppError, ValidationIssue};
use crate::extract::AppJson;
use crate::github::client::GithubRepo;
use crate::github::store::{self, NewRepoLink};
use crate::github::GithubError;
use crate::models::repo::RepoLinkRow;
use crate::state::AppState;

pub const DEFAULT_YAML_PATH: &str = "commit.yml";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LinkRepoRequest {
    pub owner: String,
    pub repo: String,
    pub yaml_path: Option<String>,
    pub default_branch: Option<String>,
}

impl LinkRepoRequest {
    fn validate(&self) -> Result<(), AppError> {
        let mut issues = Vec::new();
        for (path, value) in [("owner", &self.owner), ("repo", &self.repo)] {
            if !is_repo_segment(value) {
                issues.push(ValidationIssue::new(
                    path,
                    "must be a GitHub name (letters, digits, '-', '_' or '.')",
                ));
            }
        }
        if let Some(yaml_path) = &self.yaml_path {
            let trimmed = yaml_path.trim();
            if trimmed.is_empty() || trimmed.starts_with('/') || trimmed.split('/').any(|p| p == "..") {
                issues.push(ValidationIssue::new(
                    "yamlPath",
                    "must be a relative path inside the repository",
                ));
            }
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(AppError::invalid_fields("Invalid repository link", issues))
        }
    }
}

fn is_repo_segment(value: &str) -> bool {
    !value.is_empty()
        && value != "."
        && value != ".."
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[derive(Debug, Serialize)]
pub struct LinkResponse {
    pub link: RepoLinkRow,
}

#[derive(Debug, Serialize)]
pub struct LinksResponse {
    pub links: Vec<RepoLinkRow>,
}

#[derive(Debug, Serialize)]
pub struct ReposResponse {
    pub repos: Vec<GithubRepo>,
}

pub async fn require_token(state: &AppState, user_id: Uuid) -> Result<String, AppError> {
    store::github_token(&state.db, user_id)
        .await?
        .ok_or_else(|| GithubError::TokenMissing.into())
}

/// POST /github/link
///
/// The default branch is looked up on GitHub when the body omits it.
pub async fn handle_link_repo(
    State(state): State<AppState>,
    auth: AuthUser,
    AppJson(body): AppJson<LinkRepoRequest>,
) -> Result<(StatusCode, Json<LinkResponse>), AppError> {
    body.validate()?;

    let default_branch = match body.default_branch.as_deref().map(str::trim) {
        Some(branch) if !branch.is_empty() => branch.to_string(),
        _ => {
            let token = require_token(&state, auth.user_id).await?;
            let repo = state.github.get_repo(&token, &body.owner, &body.repo).await?;
            repo.default_branch.unwrap_or_else(|| "main".to_string())
        }
    };
    let yaml_path = body
        .yaml_path
        .as_deref()
        .map(str::trim)
        .unwrap_or(DEFAULT_YAML_PATH);

    let link = store::upsert_link(
        &state.db,
        auth.user_id,
        &NewRepoLink {
            owner: &body.owner,
            repo: &body.repo,
            yaml_path,
            default_branch: &default_branch,
        },
    )
    .await?;

    info!(user_id = %auth.user_id, repo = %link.full_name(), "Repository linked");
    Ok((StatusCode::CREATED, Json(LinkResponse { link })))
}

/// GET /github/link
pub async fn handle_list_links(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<LinksResponse>, AppError> {
    let links = store::list_links(&state.db, auth.user_id).await?;
    Ok(Json(LinksResponse { links }))
}

/// GET /github/repos
pub async fn handle_list_github_repos(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<ReposResponse>, AppError> {
    let token = require_token(&state, auth.user_id).await?;
    let repos = state.github.list_repos(&token).await?;
    Ok(Json(ReposResponse { repos }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(owner: &str, repo: &str, yaml_path: Option<&str>) -> LinkRepoRequest {
        LinkRepoRequest {
            owner: owner.into(),
            repo: repo.into(),
            yaml_path: yaml_path.map(String::from),
            default_branch: None,
        }
    }

    #[test]
    fn test_valid_link_request() {
        assert!(request("ada", "analysis-notes", None).validate().is_ok());
        assert!(request("ada", "notes.v2", Some("config/commit.yml")).validate().is_ok());
    }

    #[test]
    fn test_rejects_path_like_names() {
        match request("..", "notes/x", None).validate() {
            Err(AppError::Validation { issues, .. }) => {
                let paths: Vec<&str> = issues.iter().map(|i| i.path.as_str()).collect();
                assert_eq!(paths, ["owner", "repo"]);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_escaping_yaml_path() {
        assert!(request("ada", "notes", Some("../secrets.yml")).validate().is_err());
        assert!(request("ada", "notes", Some("/etc/commit.yml")).validate().is_err());
    }
}
