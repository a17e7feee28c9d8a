//! Background job execution.
//!
//! Handlers hand new jobs to the `JobDispatcher`; the `JobWorker` waits on the
//! channel and spawns one task per job. Each task reports a `JobOutcome` on a
//! second channel, where `supervise` logs it and re-enqueues retryable failures
//! until the attempt budget is spent.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use sqlx::PgPool;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::commits::git::{commits_in_range, GitError};
use crate::errors::AppError;
use crate::jobs::selector::{JobSelector, JobType};
use crate::jobs::store::{finish_job, get_job, mark_job_running};
use crate::models::job::{JobRow, JobStatus, ProcessingRunRow};
use crate::models::settings::SettingsRow;
use crate::runs::converter::{Converter, SuggestArgs};
use crate::runs::registry::ProcessRegistry;
use crate::runs::store::{complete_run_with_suggestions, fail_run, insert_run};
use crate::settings::store::get_settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobRequest {
    pub job_id: Uuid,
    /// 1-based.
    pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed {
        job_id: Uuid,
        runs: usize,
    },
    Failed {
        job_id: Uuid,
        attempt: u32,
        error: String,
        /// False when converter runs were already recorded; retrying would
        /// duplicate them.
        retryable: bool,
    },
}

/// Sending half of the job queue.
#[derive(Clone)]
pub struct JobDispatcher {
    tx: mpsc::Sender<JobRequest>,
}

impl JobDispatcher {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<JobRequest>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub async fn dispatch(&self, job_id: Uuid) -> Result<(), AppError> {
        self.send(JobRequest {
            job_id,
            attempt: 1,
        })
        .await
    }

    async fn send(&self, request: JobRequest) -> Result<(), AppError> {
        self.tx
            .send(request)
            .await
            .map_err(|_| AppError::Internal(anyhow!("job worker is not running")))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct RunSummary {
    total: usize,
    completed: usize,
}

/// An infrastructure error that stopped a job, with how many runs it had
/// already recorded.
#[derive(Debug)]
struct JobFailure {
    error: anyhow::Error,
    runs_recorded: usize,
}

impl From<anyhow::Error> for JobFailure {
    fn from(error: anyhow::Error) -> Self {
        Self {
            error,
            runs_recorded: 0,
        }
    }
}

impl From<sqlx::Error> for JobFailure {
    fn from(error: sqlx::Error) -> Self {
        anyhow::Error::new(error).into()
    }
}

impl From<GitError> for JobFailure {
    fn from(error: GitError) -> Self {
        anyhow::Error::new(error).into()
    }
}

pub struct JobWorker {
    db: PgPool,
    converter: Converter,
    processes: ProcessRegistry,
    repos_root: PathBuf,
    package_dir: PathBuf,
    outcomes: mpsc::UnboundedSender<JobOutcome>,
}

impl JobWorker {
    pub fn new(
        db: PgPool,
        converter: Converter,
        processes: ProcessRegistry,
        repos_root: PathBuf,
        package_dir: PathBuf,
        outcomes: mpsc::UnboundedSender<JobOutcome>,
    ) -> Self {
        Self {
            db,
            converter,
            processes,
            repos_root,
            package_dir,
            outcomes,
        }
    }

    /// Runs for the life of the process. `supervise` holds a `JobDispatcher`
    /// for retries, so the queue stays open as long as the supervisor does.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<JobRequest>) {
        info!("Job worker started");

        while let Some(request) = rx.recv().await {
            debug!(job_id = %request.job_id, attempt = request.attempt, "Received job");
            let worker = Arc::clone(&self);
            tokio::spawn(async move {
                if let Some(outcome) = worker.execute(request).await {
                    // The supervisor outlives the worker; a send error only
                    // happens during shutdown.
                    let _ = worker.outcomes.send(outcome);
                }
            });
        }

        info!("Job worker shutting down (channel closed)");
    }

    async fn execute(&self, request: JobRequest) -> Option<JobOutcome> {
        let job_id = request.job_id;
        let job = match get_job(&self.db, job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(job_id = %job_id, "Job vanished before it ran");
                return None;
            }
            Err(e) => {
                return Some(JobOutcome::Failed {
                    job_id,
                    attempt: request.attempt,
                    error: e.to_string(),
                    retryable: true,
                })
            }
        };
        if job.status == JobStatus::Completed.as_str() {
            debug!(job_id = %job_id, "Job already completed, skipping");
            return None;
        }

        if let Err(e) = mark_job_running(&self.db, job_id, request.attempt).await {
            error!(job_id = %job_id, error = %e, "Failed to mark job running");
        }
        info!(job_id = %job_id, job_type = %job.job_type, attempt = request.attempt, "Executing job");

        let (status, message, outcome) = settle(job_id, request.attempt, self.process(&job).await);

        if let Err(e) = finish_job(&self.db, job_id, status, message.as_deref()).await {
            error!(job_id = %job_id, error = %e, "Failed to record job status");
        }
        Some(outcome)
    }

    async fn process(&self, job: &JobRow) -> Result<RunSummary, JobFailure> {
        let job_type = JobType::parse(&job.job_type)
            .ok_or_else(|| anyhow!("unknown job type {:?}", job.job_type))?;
        let selector: JobSelector =
            serde_json::from_value(job.selector.clone()).context("stored selector is invalid")?;
        let repo_path = PathBuf::from(&job.repo_path);
        if !repo_path.starts_with(&self.repos_root) {
            return Err(anyhow!("repo path {} is outside the repos root", job.repo_path).into());
        }

        let commits = match job_type {
            JobType::ProcessCommits => selector.commit_ids.clone(),
            JobType::ProcessRange => {
                let settings = get_settings(&self.db, job.user_id).await?;
                let pathspecs = selector
                    .course
                    .as_deref()
                    .map(|course| course_pathspecs(settings.as_ref(), course))
                    .unwrap_or_default();
                commits_in_range(&repo_path, selector.since, selector.until, &pathspecs)
                    .await?
                    .into_iter()
                    .map(|c| c.sha)
                    .collect()
            }
        };
        info!(job_id = %job.id, commits = commits.len(), "Resolved commits");

        let mut summary = RunSummary {
            total: commits.len(),
            completed: 0,
        };
        for (recorded, sha) in commits.iter().enumerate() {
            let run = insert_run(&self.db, job.user_id, job.repo_id, Some(job.id), sha)
                .await
                .map_err(|e| JobFailure {
                    error: e.into(),
                    runs_recorded: recorded,
                })?;
            match self
                .run_commit(job, &run, &repo_path, selector.course.as_deref())
                .await
            {
                Ok(true) => summary.completed += 1,
                Ok(false) => {}
                Err(e) => {
                    let message = format!("internal error: {e:#}");
                    if let Err(fail_err) = fail_run(&self.db, run.id, &message).await {
                        error!(run_id = %run.id, error = %fail_err, "Failed to record run failure");
                    }
                    return Err(JobFailure {
                        error: e,
                        runs_recorded: recorded + 1,
                    });
                }
            }
        }
        Ok(summary)
    }

    /// One converter run for an inserted run row. Returns whether the run
    /// completed; converter failures are recorded on the run, not returned.
    async fn run_commit(
        &self,
        job: &JobRow,
        run: &ProcessingRunRow,
        repo_path: &Path,
        course: Option<&str>,
    ) -> anyhow::Result<bool> {
        let sha = run.commit_sha.as_str();
        let output_dir = self.package_dir.join(run.id.to_string());
        if let Err(e) = tokio::fs::create_dir_all(&output_dir).await {
            fail_run(&self.db, run.id, &format!("cannot create output directory: {e}")).await?;
            return Ok(false);
        }

        let kill = self.processes.register(run.id);
        debug!(run_id = %run.id, active = self.processes.len(), "Converter registered");
        let args = SuggestArgs {
            repo_path,
            commit: sha,
            course,
            force: job.force,
            output_dir: &output_dir,
        };
        let result = self.converter.suggest(&args, kill).await;
        self.processes.remove(run.id);

        match result {
            Ok(output) => {
                let stored = complete_run_with_suggestions(
                    &self.db,
                    run,
                    &output.suggestions,
                    output.package_path.as_deref(),
                )
                .await?;
                if stored {
                    info!(run_id = %run.id, commit = sha, suggestions = output.suggestions.len(), "Run completed");
                } else {
                    warn!(run_id = %run.id, commit = sha, "Run ended before its output was stored");
                }
                Ok(stored)
            }
            Err(e) => {
                let message = e.run_message();
                fail_run(&self.db, run.id, &message).await?;
                warn!(run_id = %run.id, commit = sha, error = %message, "Run failed");
                Ok(false)
            }
        }
    }
}

/// Job status, stored message and outcome for a finished `process` call. Only
/// failures that recorded no run are retryable.
fn settle(
    job_id: Uuid,
    attempt: u32,
    result: Result<RunSummary, JobFailure>,
) -> (JobStatus, Option<String>, JobOutcome) {
    let (error, retryable) = match result {
        Ok(summary) if summary.completed == summary.total => {
            return (
                JobStatus::Completed,
                None,
                JobOutcome::Completed {
                    job_id,
                    runs: summary.total,
                },
            )
        }
        Ok(summary) => (
            format!(
                "{} of {} runs failed",
                summary.total - summary.completed,
                summary.total
            ),
            false,
        ),
        Err(failure) => (format!("{:#}", failure.error), failure.runs_recorded == 0),
    };
    (
        JobStatus::Failed,
        Some(error.clone()),
        JobOutcome::Failed {
            job_id,
            attempt,
            error,
            retryable,
        },
    )
}

/// Git pathspecs restricting a range job to a course's configured globs.
fn course_pathspecs(settings: Option<&SettingsRow>, course: &str) -> Vec<String> {
    settings
        .and_then(|s| s.courses.get(course))
        .and_then(|c| c.get("paths"))
        .and_then(|p| p.as_array())
        .map(|paths| {
            paths
                .iter()
                .filter_map(|p| p.as_str())
                .filter(|p| !p.trim().is_empty())
                .map(|p| format!(":(glob){p}"))
                .collect()
        })
        .unwrap_or_default()
}

/// The retry to enqueue for an outcome, if any.
fn next_attempt(outcome: &JobOutcome, max_attempts: u32) -> Option<JobRequest> {
    match outcome {
        JobOutcome::Failed {
            job_id,
            attempt,
            retryable: true,
            ..
        } if *attempt < max_attempts => Some(JobRequest {
            job_id: *job_id,
            attempt: attempt + 1,
        }),
        _ => None,
    }
}

/// Consumes job outcomes and re-enqueues retries. The worker owns the outcome
/// sender and this loop owns a dispatcher, so both loops live as long as the
/// runtime.
pub async fn supervise(
    mut outcomes: mpsc::UnboundedReceiver<JobOutcome>,
    dispatcher: JobDispatcher,
    max_attempts: u32,
) {
    while let Some(outcome) = outcomes.recv().await {
        match &outcome {
            JobOutcome::Completed { job_id, runs } => {
                info!(job_id = %job_id, runs, "Job completed");
            }
            JobOutcome::Failed {
                job_id,
                attempt,
                error,
                ..
            } => match next_attempt(&outcome, max_attempts) {
                Some(retry) => {
                    warn!(job_id = %job_id, attempt, error = %error, "Job failed, retrying");
                    if let Err(e) = dispatcher.send(retry).await {
                        error!(job_id = %job_id, error = %e, "Could not re-enqueue job");
                    }
                }
                None => error!(job_id = %job_id, attempt, error = %error, "Job failed"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use serde_json::json;

    use super::*;

    fn failed(job_id: Uuid, attempt: u32, retryable: bool) -> JobOutcome {
        JobOutcome::Failed {
            job_id,
            attempt,
            error: "git exited with an error".into(),
            retryable,
        }
    }

    #[test]
    fn test_next_attempt_respects_budget() {
        let job_id = Uuid::new_v4();
        assert_eq!(
            next_attempt(&failed(job_id, 1, true), 2),
            Some(JobRequest { job_id, attempt: 2 })
        );
        assert_eq!(next_attempt(&failed(job_id, 2, true), 2), None);
        assert_eq!(next_attempt(&failed(job_id, 1, false), 2), None);
        assert_eq!(
            next_attempt(&JobOutcome::Completed { job_id, runs: 3 }, 2),
            None
        );
    }

    #[tokio::test]
    async fn test_supervisor_requeues_retryable_failure() {
        let (dispatcher, mut jobs_rx) = JobDispatcher::channel(4);
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        let supervisor = tokio::spawn(supervise(outcomes_rx, dispatcher, 2));

        let job_id = Uuid::new_v4();
        outcomes_tx.send(failed(job_id, 1, true)).unwrap();
        let retry = tokio::time::timeout(Duration::from_secs(1), jobs_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(retry, JobRequest { job_id, attempt: 2 });

        outcomes_tx.send(failed(job_id, 2, true)).unwrap();
        drop(outcomes_tx);
        supervisor.await.unwrap();
        assert!(jobs_rx.try_recv().is_err());
    }

    fn infra_failure(runs_recorded: usize) -> Result<RunSummary, JobFailure> {
        Err(JobFailure {
            error: anyhow!("pool timed out"),
            runs_recorded,
        })
    }

    #[test]
    fn test_failure_before_any_run_is_retryable() {
        let job_id = Uuid::new_v4();
        let (status, message, outcome) = settle(job_id, 1, infra_failure(0));
        assert_eq!(status, JobStatus::Failed);
        assert_eq!(message.as_deref(), Some("pool timed out"));
        assert_eq!(outcome, failed_with(job_id, "pool timed out", true));
    }

    #[test]
    fn test_failure_after_recorded_runs_is_final() {
        let job_id = Uuid::new_v4();
        let (status, _, outcome) = settle(job_id, 1, infra_failure(2));
        assert_eq!(status, JobStatus::Failed);
        assert_eq!(outcome, failed_with(job_id, "pool timed out", false));
        assert_eq!(next_attempt(&outcome, 3), None);
    }

    #[test]
    fn test_settle_counts_failed_runs() {
        let job_id = Uuid::new_v4();
        let partial = Ok(RunSummary {
            total: 3,
            completed: 1,
        });
        let (_, message, outcome) = settle(job_id, 1, partial);
        assert_eq!(message.as_deref(), Some("2 of 3 runs failed"));
        assert_eq!(outcome, failed_with(job_id, "2 of 3 runs failed", false));

        let done = Ok(RunSummary {
            total: 2,
            completed: 2,
        });
        let (status, message, outcome) = settle(job_id, 1, done);
        assert_eq!(status, JobStatus::Completed);
        assert!(message.is_none());
        assert_eq!(outcome, JobOutcome::Completed { job_id, runs: 2 });
    }

    fn failed_with(job_id: Uuid, error: &str, retryable: bool) -> JobOutcome {
        JobOutcome::Failed {
            job_id,
            attempt: 1,
            error: error.to_string(),
            retryable,
        }
    }

    #[tokio::test]
    async fn test_dispatch_fails_when_worker_gone() {
        let (dispatcher, rx) = JobDispatcher::channel(1);
        drop(rx);
        assert!(dispatcher.dispatch(Uuid::new_v4()).await.is_err());
    }

    #[test]
    fn test_course_pathspecs() {
        let settings = SettingsRow {
            user_id: Uuid::new_v4(),
            courses: json!({ "math214": { "paths": ["math214/**/*.tex", ""], "deck": "Analysis" } }),
            llm: json!({}),
            parsing: json!({}),
            cards: json!({}),
            sync_target: "apkg".into(),
            anki_connect_url: None,
            dev_mode: false,
            yaml_repo_id: None,
            yaml_path: None,
            imported_at: None,
            updated_at: Utc::now(),
        };
        assert_eq!(
            course_pathspecs(Some(&settings), "math214"),
            [":(glob)math214/**/*.tex"]
        );
        assert!(course_pathspecs(Some(&settings), "cs101").is_empty());
        assert!(course_pathspecs(None, "math214").is_empty());
    }
}
