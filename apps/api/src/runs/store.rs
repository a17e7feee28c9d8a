use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::card::{CardStatus, CardSuggestionRow};
use crate::models::job::{ProcessingRunRow, RunStatus};
use crate::runs::converter::SuggestedCard;

/// Latest run status for one commit.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CommitRunStatus {
    pub commit_sha: String,
    pub run_id: Uuid,
    pub status: String,
}

pub async fn insert_run(
    pool: &PgPool,
    user_id: Uuid,
    repo_id: Uuid,
    job_id: Option<Uuid>,
    commit_sha: &str,
) -> Result<ProcessingRunRow, sqlx::Error> {
    sqlx::query_as::<_, ProcessingRunRow>(
        r#"
        INSERT INTO processing_runs (user_id, repo_id, job_id, commit_sha, status)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(repo_id)
    .bind(job_id)
    .bind(commit_sha)
    .bind(RunStatus::Running.as_str())
    .fetch_one(pool)
    .await
}

pub async fn get_run_owned(
    pool: &PgPool,
    user_id: Uuid,
    run_id: Uuid,
) -> Result<Option<ProcessingRunRow>, sqlx::Error> {
    sqlx::query_as::<_, ProcessingRunRow>(
        "SELECT * FROM processing_runs WHERE id = $1 AND user_id = $2",
    )
    .bind(run_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

pub async fn runs_for_job(pool: &PgPool, job_id: Uuid) -> Result<Vec<ProcessingRunRow>, sqlx::Error> {
    sqlx::query_as::<_, ProcessingRunRow>(
        "SELECT * FROM processing_runs WHERE job_id = $1 ORDER BY started_at ASC",
    )
    .bind(job_id)
    .fetch_all(pool)
    .await
}

/// Suggestions in source order.
pub async fn suggestions_for_run(
    pool: &PgPool,
    run_id: Uuid,
) -> Result<Vec<CardSuggestionRow>, sqlx::Error> {
    sqlx::query_as::<_, CardSuggestionRow>(
        r#"
        SELECT * FROM card_suggestions
        WHERE run_id = $1
        ORDER BY source_file ASC NULLS LAST, source_line_start ASC NULLS LAST, created_at ASC
        "#,
    )
    .bind(run_id)
    .fetch_all(pool)
    .await
}

pub async fn accepted_for_run(
    pool: &PgPool,
    user_id: Uuid,
    run_id: Uuid,
) -> Result<Vec<CardSuggestionRow>, sqlx::Error> {
    sqlx::query_as::<_, CardSuggestionRow>(
        r#"
        SELECT * FROM card_suggestions
        WHERE run_id = $1 AND user_id = $2 AND status = $3
        ORDER BY source_file ASC NULLS LAST, source_line_start ASC NULLS LAST, created_at ASC
        "#,
    )
    .bind(run_id)
    .bind(user_id)
    .bind(CardStatus::Accepted.as_str())
    .fetch_all(pool)
    .await
}

/// Marks the run completed and stores its suggestions as PENDING. Returns
/// `false` without writing anything when the run already left `running`, e.g.
/// because it was killed.
pub async fn complete_run_with_suggestions(
    pool: &PgPool,
    run: &ProcessingRunRow,
    suggestions: &[SuggestedCard],
    apkg_path: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let updated = sqlx::query(
        r#"
        UPDATE processing_runs
        SET status = $2, apkg_path = $3, ended_at = now()
        WHERE id = $1 AND status = $4
        "#,
    )
    .bind(run.id)
    .bind(RunStatus::Completed.as_str())
    .bind(apkg_path)
    .bind(RunStatus::Running.as_str())
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if updated == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    for card in suggestions {
        sqlx::query(
            r#"
            INSERT INTO card_suggestions
                (run_id, user_id, front, back, tags, card_type, course, environment,
                 source_file, source_line_start, source_line_end, status, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(run.id)
        .bind(run.user_id)
        .bind(&card.front)
        .bind(&card.back)
        .bind(&card.tags)
        .bind(&card.card_type)
        .bind(&card.course)
        .bind(&card.environment)
        .bind(&card.source_file)
        .bind(card.line_start)
        .bind(card.line_end)
        .bind(CardStatus::Pending.as_str())
        .bind(Value::Object(card.metadata.clone()))
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(true)
}

/// Fails a run that is still running. A run already ended keeps its status.
pub async fn fail_run(pool: &PgPool, run_id: Uuid, message: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE processing_runs
        SET status = $2, error_message = $3, ended_at = now()
        WHERE id = $1 AND status = $4
        "#,
    )
    .bind(run_id)
    .bind(RunStatus::Failed.as_str())
    .bind(message)
    .bind(RunStatus::Running.as_str())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Marks a run failed regardless of its current status.
pub async fn mark_run_killed(
    pool: &PgPool,
    user_id: Uuid,
    run_id: Uuid,
) -> Result<Option<ProcessingRunRow>, sqlx::Error> {
    sqlx::query_as::<_, ProcessingRunRow>(
        r#"
        UPDATE processing_runs
        SET status = $3, error_message = 'Killed by user', ended_at = now()
        WHERE id = $1 AND user_id = $2
        RETURNING *
        "#,
    )
    .bind(run_id)
    .bind(user_id)
    .bind(RunStatus::Failed.as_str())
    .fetch_optional(pool)
    .await
}

/// Most recent run per commit among `shas`.
pub async fn latest_status_for_commits(
    pool: &PgPool,
    user_id: Uuid,
    repo_id: Uuid,
    shas: &[String],
) -> Result<Vec<CommitRunStatus>, sqlx::Error> {
    sqlx::query_as::<_, CommitRunStatus>(
        r#"
        SELECT DISTINCT ON (commit_sha) commit_sha, id AS run_id, status
        FROM processing_runs
        WHERE user_id = $1 AND repo_id = $2 AND commit_sha = ANY($3)
        ORDER BY commit_sha, created_at DESC
        "#,
    )
    .bind(user_id)
    .bind(repo_id)
    .bind(shas)
    .fetch_all(pool)
    .await
}
