//! Axum route handlers for browsing commits of a linked repository.

use std::collections::BTreeMap;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::commits::git::{recent_commits, CommitInfo};
use crate::errors::{AppError, ValidationIssue};
use crate::extract::AppJson;
use crate::github::store::get_link_owned;
use crate::jobs::selector::is_commit_id;
use crate::models::repo::RepoLinkRow;
use crate::runs::store::{latest_status_for_commits, CommitRunStatus};
use crate::state::AppState;

const DEFAULT_COMMIT_LIMIT: usize = 20;
const MAX_COMMIT_LIMIT: usize = 100;
const MAX_STATUS_BATCH: usize = 200;
const UNPROCESSED: &str = "unprocessed";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitsQuery {
    pub repo_id: Uuid,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct CommitsResponse {
    pub commits: Vec<CommitInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CommitStatusRequest {
    pub repo_id: Uuid,
    pub shas: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommitStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct CommitStatusResponse {
    pub statuses: BTreeMap<String, CommitStatus>,
}

fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_COMMIT_LIMIT).clamp(1, MAX_COMMIT_LIMIT)
}

async fn owned_link(state: &AppState, user_id: Uuid, repo_id: Uuid) -> Result<RepoLinkRow, AppError> {
    get_link_owned(&state.db, user_id, repo_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Repository link {repo_id} not found")))
}

/// Lowercased, deduplicated SHAs; every entry must look like a commit ID.
fn normalize_shas(shas: &[String]) -> Result<Vec<String>, AppError> {
    if shas.len() > MAX_STATUS_BATCH {
        return Err(AppError::invalid_fields(
            "Too many commits",
            vec![ValidationIssue::new(
                "shas",
                format!("at most {MAX_STATUS_BATCH} commits per request"),
            )],
        ));
    }
    let issues: Vec<ValidationIssue> = shas
        .iter()
        .enumerate()
        .filter(|(_, sha)| !is_commit_id(sha.trim()))
        .map(|(i, _)| ValidationIssue::new(format!("shas[{i}]"), "must be 7 to 40 hexadecimal characters"))
        .collect();
    if !issues.is_empty() {
        return Err(AppError::invalid_fields("Invalid commit IDs", issues));
    }

    let mut normalized: Vec<String> = shas.iter().map(|s| s.trim().to_ascii_lowercase()).collect();
    normalized.sort();
    normalized.dedup();
    Ok(normalized)
}

/// Every requested SHA gets an entry; commits without a run are `unprocessed`.
fn merge_statuses(shas: &[String], runs: Vec<CommitRunStatus>) -> BTreeMap<String, CommitStatus> {
    let mut statuses: BTreeMap<String, CommitStatus> = shas
        .iter()
        .map(|sha| {
            (
                sha.clone(),
                CommitStatus {
                    status: UNPROCESSED.to_string(),
                    run_id: None,
                },
            )
        })
        .collect();
    for run in runs {
        statuses.insert(
            run.commit_sha,
            CommitStatus {
                status: run.status,
                run_id: Some(run.run_id),
            },
        );
    }
    statuses
}

/// GET /commits?repoId&limit
pub async fn handle_list_commits(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<CommitsQuery>,
) -> Result<Json<CommitsResponse>, AppError> {
    let link = owned_link(&state, auth.user_id, query.repo_id).await?;
    let commits = recent_commits(
        &link.local_path(&state.config.repos_root),
        clamp_limit(query.limit),
    )
    .await?;
    Ok(Json(CommitsResponse { commits }))
}

/// POST /commits/status
pub async fn handle_commit_status(
    State(state): State<AppState>,
    auth: AuthUser,
    AppJson(body): AppJson<CommitStatusRequest>,
) -> Result<Json<CommitStatusResponse>, AppError> {
    let shas = normalize_shas(&body.shas)?;
    let link = owned_link(&state, auth.user_id, body.repo_id).await?;

    let runs = if shas.is_empty() {
        Vec::new()
    } else {
        latest_status_for_commits(&state.db, auth.user_id, link.id, &shas).await?
    };
    Ok(Json(CommitStatusResponse {
        statuses: merge_statuses(&shas, runs),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_clamped() {
        assert_eq!(clamp_limit(None), 20);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(500)), 100);
        assert_eq!(clamp_limit(Some(42)), 42);
    }

    #[test]
    fn test_normalize_shas() {
        let shas = normalize_shas(&["ABCDEF1".into(), "abcdef1 ".into(), "1234567".into()]).unwrap();
        assert_eq!(shas, ["1234567", "abcdef1"]);
        assert!(normalize_shas(&["xyz".into()]).is_err());
    }

    #[test]
    fn test_unprocessed_default() {
        let run_id = Uuid::new_v4();
        let statuses = merge_statuses(
            &["1234567".into(), "abcdef1".into()],
            vec![CommitRunStatus {
                commit_sha: "abcdef1".into(),
                run_id,
                status: "completed".into(),
            }],
        );
        assert_eq!(statuses["1234567"].status, "unprocessed");
        assert_eq!(statuses["1234567"].run_id, None);
        assert_eq!(statuses["abcdef1"].status, "completed");
        assert_eq!(statuses["abcdef1"].run_id, Some(run_id));
    }
}
