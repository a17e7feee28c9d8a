use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::AppError;
use crate::jobs::selector::JobType;
use crate::models::job::{JobRow, JobStatus};

/// A job about to be inserted. `selector` must already be normalized.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub user_id: Uuid,
    pub repo_id: Uuid,
    pub job_type: JobType,
    pub selector: Value,
    pub force: bool,
    pub repo_path: String,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Existing non-forced job with the same (user, repo, type, selector).
    async fn find_equivalent(&self, job: &NewJob) -> Result<Option<JobRow>, AppError>;

    /// Inserts the job; `None` when an equivalent non-forced job won a race.
    async fn insert(&self, job: &NewJob) -> Result<Option<JobRow>, AppError>;
}

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn find_equivalent(&self, job: &NewJob) -> Result<Option<JobRow>, AppError> {
        Ok(sqlx::query_as::<_, JobRow>(
            r#"
            SELECT * FROM jobs
            WHERE user_id = $1 AND repo_id = $2 AND job_type = $3 AND selector = $4
              AND force = false
            "#,
        )
        .bind(job.user_id)
        .bind(job.repo_id)
        .bind(job.job_type.as_str())
        .bind(&job.selector)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn insert(&self, job: &NewJob) -> Result<Option<JobRow>, AppError> {
        Ok(sqlx::query_as::<_, JobRow>(
            r#"
            INSERT INTO jobs (user_id, repo_id, job_type, selector, force, repo_path, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id, repo_id, job_type, selector) WHERE force = false DO NOTHING
            RETURNING *
            "#,
        )
        .bind(job.user_id)
        .bind(job.repo_id)
        .bind(job.job_type.as_str())
        .bind(&job.selector)
        .bind(job.force)
        .bind(&job.repo_path)
        .bind(JobStatus::Queued.as_str())
        .fetch_optional(&self.pool)
        .await?)
    }
}

pub async fn get_job_owned(
    pool: &PgPool,
    user_id: Uuid,
    job_id: Uuid,
) -> Result<Option<JobRow>, sqlx::Error> {
    sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = $1 AND user_id = $2")
        .bind(job_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

/// Worker-side lookup; the worker acts on behalf of whichever user queued the job.
pub async fn get_job(pool: &PgPool, job_id: Uuid) -> Result<Option<JobRow>, sqlx::Error> {
    sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = $1")
        .bind(job_id)
        .fetch_optional(pool)
        .await
}

pub async fn mark_job_running(pool: &PgPool, job_id: Uuid, attempt: u32) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE jobs
        SET status = $2, attempts = $3, error_message = NULL, updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .bind(JobStatus::Running.as_str())
    .bind(attempt as i32)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn finish_job(
    pool: &PgPool,
    job_id: Uuid,
    status: JobStatus,
    error_message: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE jobs SET status = $2, error_message = $3, updated_at = now() WHERE id = $1",
    )
    .bind(job_id)
    .bind(status.as_str())
    .bind(error_message)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
pub mod memory {
    use std::sync::Mutex;

    use chrono::Utc;

    use super::*;

    #[derive(Default)]
    pub struct MemoryJobStore {
        jobs: Mutex<Vec<JobRow>>,
    }

    impl MemoryJobStore {
        pub fn len(&self) -> usize {
            self.jobs.lock().unwrap().len()
        }
    }

    fn equivalent(row: &JobRow, job: &NewJob) -> bool {
        !row.force
            && row.user_id == job.user_id
            && row.repo_id == job.repo_id
            && row.job_type == job.job_type.as_str()
            && row.selector == job.selector
    }

    #[async_trait]
    impl JobStore for MemoryJobStore {
        async fn find_equivalent(&self, job: &NewJob) -> Result<Option<JobRow>, AppError> {
            Ok(self
                .jobs
                .lock()
                .unwrap()
                .iter()
                .find(|row| equivalent(row, job))
                .cloned())
        }

        async fn insert(&self, job: &NewJob) -> Result<Option<JobRow>, AppError> {
            let mut jobs = self.jobs.lock().unwrap();
            if !job.force && jobs.iter().any(|row| equivalent(row, job)) {
                return Ok(None);
            }
            let row = JobRow {
                id: Uuid::new_v4(),
                user_id: job.user_id,
                repo_id: job.repo_id,
                job_type: job.job_type.as_str().to_string(),
                selector: job.selector.clone(),
                force: job.force,
                repo_path: job.repo_path.clone(),
                status: JobStatus::Queued.as_str().to_string(),
                attempts: 0,
                error_message: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            jobs.push(row.clone());
            Ok(Some(row))
        }
    }
}
