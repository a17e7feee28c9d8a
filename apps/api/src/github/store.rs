use sqlx::PgPool;
use uuid::Uuid;

use crate::models::repo::RepoLinkRow;
use crate::models::user::User;

pub struct NewRepoLink<'a> {
    pub owner: &'a str,
    pub repo: &'a str,
    pub yaml_path: &'a str,
    pub default_branch: &'a str,
}

/// Links a repo, or refreshes the YAML path and branch of an existing link.
pub async fn upsert_link(
    pool: &PgPool,
    user_id: Uuid,
    link: &NewRepoLink<'_>,
) -> Result<RepoLinkRow, sqlx::Error> {
    sqlx::query_as::<_, RepoLinkRow>(
        r#"
        INSERT INTO repo_links (user_id, provider, owner, repo, yaml_path, default_branch)
        VALUES ($1, 'github', $2, $3, $4, $5)
        ON CONFLICT (user_id, owner, repo)
        DO UPDATE SET yaml_path = EXCLUDED.yaml_path,
                      default_branch = EXCLUDED.default_branch,
                      updated_at = now()
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(link.owner)
    .bind(link.repo)
    .bind(link.yaml_path)
    .bind(link.default_branch)
    .fetch_one(pool)
    .await
}

pub async fn list_links(pool: &PgPool, user_id: Uuid) -> Result<Vec<RepoLinkRow>, sqlx::Error> {
    sqlx::query_as::<_, RepoLinkRow>(
        "SELECT * FROM repo_links WHERE user_id = $1 ORDER BY owner, repo",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

pub async fn get_link_owned(
    pool: &PgPool,
    user_id: Uuid,
    repo_id: Uuid,
) -> Result<Option<RepoLinkRow>, sqlx::Error> {
    sqlx::query_as::<_, RepoLinkRow>("SELECT * FROM repo_links WHERE id = $1 AND user_id = $2")
        .bind(repo_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

pub async fn find_link(
    pool: &PgPool,
    user_id: Uuid,
    owner: &str,
    repo: &str,
) -> Result<Option<RepoLinkRow>, sqlx::Error> {
    sqlx::query_as::<_, RepoLinkRow>(
        "SELECT * FROM repo_links WHERE user_id = $1 AND owner = $2 AND repo = $3",
    )
    .bind(user_id)
    .bind(owner)
    .bind(repo)
    .fetch_optional(pool)
    .await
}

pub async fn get_user(pool: &PgPool, user_id: Uuid) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

/// Token stored by the login flow, if any.
pub async fn github_token(pool: &PgPool, user_id: Uuid) -> Result<Option<String>, sqlx::Error> {
    let user = get_user(pool, user_id).await?;
    Ok(user
        .and_then(|u| u.github_token)
        .filter(|t| !t.trim().is_empty()))
}
