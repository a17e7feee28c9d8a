//! Job types and selectors. Selectors are normalized before they are stored so
//! equivalent requests compare equal in the dedup index.

use std::path::{Component, Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::commits::git::resolve_commit;
use crate::errors::{AppError, ValidationIssue};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Convert an explicit list of commits.
    ProcessCommits,
    /// Convert every commit in a date range, optionally limited to one course.
    ProcessRange,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::ProcessCommits => "process_commits",
            JobType::ProcessRange => "process_range",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "process_commits" => Some(JobType::ProcessCommits),
            "process_range" => Some(JobType::ProcessRange),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct JobSelector {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commit_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<NaiveDate>,
}

impl JobSelector {
    /// Canonical form: commit IDs trimmed, lowercased, sorted and deduplicated;
    /// blank course dropped.
    pub fn normalized(&self) -> Self {
        let mut commit_ids: Vec<String> = self
            .commit_ids
            .iter()
            .map(|c| c.trim().to_ascii_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        commit_ids.sort();
        commit_ids.dedup();

        Self {
            commit_ids,
            course: self
                .course
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(String::from),
            since: self.since,
            until: self.until,
        }
    }

    pub fn validate_for(&self, job_type: JobType) -> Result<(), AppError> {
        let mut issues = Vec::new();

        for (i, sha) in self.commit_ids.iter().enumerate() {
            if !is_commit_id(sha) {
                issues.push(ValidationIssue::new(
                    format!("selector.commitIds[{i}]"),
                    "must be 7 to 40 hexadecimal characters",
                ));
            }
        }

        match job_type {
            JobType::ProcessCommits => {
                if self.commit_ids.is_empty() {
                    issues.push(ValidationIssue::new(
                        "selector.commitIds",
                        "at least one commit is required",
                    ));
                }
            }
            JobType::ProcessRange => {
                if self.since.is_none() && self.until.is_none() && self.course.is_none() {
                    issues.push(ValidationIssue::new(
                        "selector",
                        "a course, since or until is required",
                    ));
                }
                if let (Some(since), Some(until)) = (self.since, self.until) {
                    if since > until {
                        issues.push(ValidationIssue::new(
                            "selector.since",
                            "must not be after until",
                        ));
                    }
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(AppError::invalid_fields("Invalid job selector", issues))
        }
    }

    /// Replaces each commit ID with the full SHA it names in `repo`, so short and
    /// full forms of one commit share a job and a commit status.
    pub async fn with_full_shas(self, repo: &Path) -> Result<Self, AppError> {
        let mut issues = Vec::new();
        let mut commit_ids = Vec::with_capacity(self.commit_ids.len());
        for (i, id) in self.commit_ids.iter().enumerate() {
            match resolve_commit(repo, id).await? {
                Some(sha) => commit_ids.push(sha),
                None => issues.push(ValidationIssue::new(
                    format!("selector.commitIds[{i}]"),
                    "does not name a commit in the local clone",
                )),
            }
        }
        if !issues.is_empty() {
            return Err(AppError::invalid_fields("Unknown commits", issues));
        }
        Ok(Self { commit_ids, ..self }.normalized())
    }
}

pub fn is_commit_id(sha: &str) -> bool {
    (7..=40).contains(&sha.len()) && sha.chars().all(|c| c.is_ascii_hexdigit())
}

/// Body of `POST /jobs`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub selector: JobSelector,
    #[serde(default)]
    pub force: bool,
    pub repo_path: String,
}

/// A repo path accepted for processing: inside the repos root, naming exactly
/// `{owner}/{repo}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRepoPath {
    pub owner: String,
    pub repo: String,
    pub path: PathBuf,
}

/// Resolves `repo_path` lexically against `repos_root`. Relative paths are taken
/// relative to the root; `..` components are rejected outright.
pub fn resolve_repo_path(repos_root: &Path, repo_path: &str) -> Result<ResolvedRepoPath, AppError> {
    let invalid = |message: &str| {
        AppError::invalid_fields(
            "Invalid repoPath",
            vec![ValidationIssue::new("repoPath", message)],
        )
    };

    let raw = Path::new(repo_path.trim());
    if raw.as_os_str().is_empty() {
        return Err(invalid("must not be empty"));
    }
    if raw.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(invalid("must not contain '..'"));
    }

    let full = if raw.is_absolute() {
        raw.to_path_buf()
    } else {
        repos_root.join(raw)
    };
    let relative = full
        .strip_prefix(repos_root)
        .map_err(|_| invalid("must be inside the configured repos root"))?;

    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    match parts.as_slice() {
        [owner, repo] => Ok(ResolvedRepoPath {
            owner: owner.clone(),
            repo: repo.clone(),
            path: repos_root.join(owner).join(repo),
        }),
        _ => Err(invalid("must point at {owner}/{repo} under the repos root")),
    }
}
