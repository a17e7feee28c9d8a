//! Axum route handlers for processing jobs.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::extract::AppJson;
use crate::github::store::find_link;
use crate::jobs::selector::{resolve_repo_path, CreateJobRequest, JobType};
use crate::jobs::service::create_or_reuse_job;
use crate::jobs::store::{get_job_owned, NewJob};
use crate::models::job::{JobRow, ProcessingRunRow};
use crate::runs::store::runs_for_job;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobResponse {
    pub job_id: Uuid,
    pub status: String,
    pub reused: bool,
}

#[derive(Debug, Serialize)]
pub struct JobDetailResponse {
    pub job: JobRow,
    pub runs: Vec<ProcessingRunRow>,
}

/// POST /jobs
///
/// Returns as soon as the job is stored. Only newly created jobs are handed to
/// the worker; a reused job keeps whatever state it is in.
pub async fn handle_create_job(
    State(state): State<AppState>,
    auth: AuthUser,
    AppJson(body): AppJson<CreateJobRequest>,
) -> Result<(StatusCode, Json<CreateJobResponse>), AppError> {
    let selector = body.selector.normalized();
    selector.validate_for(body.job_type)?;

    let resolved = resolve_repo_path(&state.config.repos_root, &body.repo_path)?;
    let link = find_link(&state.db, auth.user_id, &resolved.owner, &resolved.repo)
        .await?
        .ok_or_else(|| {
            AppError::bad_request(
                "unknown_repo",
                format!("{}/{} is not linked to this account", resolved.owner, resolved.repo),
            )
        })?;
    let selector = match body.job_type {
        JobType::ProcessCommits => selector.with_full_shas(&resolved.path).await?,
        JobType::ProcessRange => selector,
    };

    let new_job = NewJob {
        user_id: auth.user_id,
        repo_id: link.id,
        job_type: body.job_type,
        selector: serde_json::to_value(&selector).map_err(|e| AppError::Internal(e.into()))?,
        force: body.force,
        repo_path: resolved.path.to_string_lossy().into_owned(),
    };
    let creation = create_or_reuse_job(state.job_store.as_ref(), &new_job).await?;

    if !creation.reused {
        state.jobs.dispatch(creation.job.id).await?;
        info!(job_id = %creation.job.id, user_id = %auth.user_id, "Job dispatched");
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateJobResponse {
            job_id: creation.job.id,
            status: creation.job.status,
            reused: creation.reused,
        }),
    ))
}

/// GET /jobs/:id
pub async fn handle_get_job(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobDetailResponse>, AppError> {
    let job = get_job_owned(&state.db, auth.user_id, job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job {job_id} not found")))?;
    let runs = runs_for_job(&state.db, job.id).await?;
    Ok(Json(JobDetailResponse { job, runs }))
}
