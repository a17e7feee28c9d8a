//! Reads commit history from local clones with the `git` CLI.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::Serialize;
use thiserror::Error;
use tokio::process::Command;

/// Unit separator between fields, record separator between commits.
const LOG_FORMAT: &str = "--format=%H%x1f%an%x1f%aI%x1f%s%x1e";

#[derive(Debug, Error)]
pub enum GitError {
    #[error("no local clone at {0}")]
    MissingClone(PathBuf),

    #[error("failed to run git: {0}")]
    Spawn(#[from] io::Error),

    #[error("git exited with an error: {stderr}")]
    Failed { stderr: String },

    #[error("unexpected git log output: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfo {
    pub sha: String,
    pub short_sha: String,
    pub author: String,
    pub authored_at: DateTime<FixedOffset>,
    pub subject: String,
}

/// The newest `limit` commits on the checked-out branch.
pub async fn recent_commits(repo: &Path, limit: usize) -> Result<Vec<CommitInfo>, GitError> {
    let max_count = format!("--max-count={limit}");
    let out = git_log(repo, &[max_count.as_str()], &[]).await?;
    parse_log(&out)
}

/// Commits in `[since, until]` (whole days), oldest first, optionally limited to
/// paths matching `pathspecs`.
pub async fn commits_in_range(
    repo: &Path,
    since: Option<NaiveDate>,
    until: Option<NaiveDate>,
    pathspecs: &[String],
) -> Result<Vec<CommitInfo>, GitError> {
    let mut args = vec!["--reverse".to_string()];
    if let Some(since) = since {
        args.push(format!("--since={} 00:00:00", since.format("%Y-%m-%d")));
    }
    if let Some(until) = until {
        args.push(format!("--until={} 23:59:59", until.format("%Y-%m-%d")));
    }
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let out = git_log(repo, &args, pathspecs).await?;
    parse_log(&out)
}

/// Full SHA of the commit `id` names (abbreviated or full), or `None` when the
/// clone has no such commit or the prefix is ambiguous.
pub async fn resolve_commit(repo: &Path, id: &str) -> Result<Option<String>, GitError> {
    let output = git_command(repo)?
        .args(["rev-parse", "--verify", "--quiet"])
        .arg(format!("{id}^{{commit}}"))
        .output()
        .await?;
    if !output.status.success() {
        return Ok(None);
    }
    let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Ok(Some(sha).filter(|s| !s.is_empty()))
}

fn git_command(repo: &Path) -> Result<Command, GitError> {
    if !repo.join(".git").exists() {
        return Err(GitError::MissingClone(repo.to_path_buf()));
    }
    let mut command = Command::new("git");
    command.arg("-C").arg(repo);
    Ok(command)
}

async fn git_log(repo: &Path, args: &[&str], pathspecs: &[String]) -> Result<String, GitError> {
    let mut command = git_command(repo)?;
    command.arg("log").arg(LOG_FORMAT).args(args);
    if !pathspecs.is_empty() {
        command.arg("--").args(pathspecs);
    }

    let output = command.output().await?;
    if !output.status.success() {
        return Err(GitError::Failed {
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

pub fn parse_log(raw: &str) -> Result<Vec<CommitInfo>, GitError> {
    raw.split('\x1e')
        .map(str::trim)
        .filter(|record| !record.is_empty())
        .map(parse_record)
        .collect()
}

fn parse_record(record: &str) -> Result<CommitInfo, GitError> {
    let fields: Vec<&str> = record.split('\x1f').collect();
    let [sha, author, date, subject] = fields.as_slice() else {
        return Err(GitError::Parse(record.to_string()));
    };
    let authored_at = DateTime::parse_from_rfc3339(date)
        .map_err(|_| GitError::Parse(format!("bad date {date:?}")))?;

    Ok(CommitInfo {
        sha: sha.to_string(),
        short_sha: sha.chars().take(7).collect(),
        author: author.to_string(),
        authored_at,
        subject: subject.to_string(),
    })
}

#[cfg(test)]
pub mod fixtures {
    use std::path::Path;

    use tokio::process::Command;

    fn git(dir: &Path, args: &[&str]) -> Command {
        let mut command = Command::new("git");
        command
            .arg("-C")
            .arg(dir)
            .args(["-c", "user.name=Ada", "-c", "user.email=ada@example.com"])
            .args(args);
        command
    }

    /// `git init` in `dir` plus one empty commit; returns the commit's full SHA.
    pub async fn init_repo_with_commit(dir: &Path) -> String {
        let init = git(dir, &["init", "--quiet"]).status().await.unwrap();
        assert!(init.success());
        let commit = git(dir, &["commit", "--quiet", "--allow-empty", "-m", "week 1"])
            .status()
            .await
            .unwrap();
        assert!(commit.success());
        let out = git(dir, &["rev-parse", "HEAD"]).output().await.unwrap();
        String::from_utf8(out.stdout).unwrap().trim().to_string()
    }
}
