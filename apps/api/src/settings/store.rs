use sqlx::PgPool;
use uuid::Uuid;

use crate::models::settings::{SettingsRow, SyncTarget};
use crate::settings::notes_config::ConfigSections;

pub async fn get_settings(pool: &PgPool, user_id: Uuid) -> Result<Option<SettingsRow>, sqlx::Error> {
    sqlx::query_as::<_, SettingsRow>("SELECT * FROM settings WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

pub async fn set_dev_mode(pool: &PgPool, user_id: Uuid, enabled: bool) -> Result<SettingsRow, sqlx::Error> {
    sqlx::query_as::<_, SettingsRow>(
        r#"
        INSERT INTO settings (user_id, dev_mode) VALUES ($1, $2)
        ON CONFLICT (user_id) DO UPDATE SET dev_mode = EXCLUDED.dev_mode, updated_at = now()
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(enabled)
    .fetch_one(pool)
    .await
}

pub async fn set_sync(
    pool: &PgPool,
    user_id: Uuid,
    target: SyncTarget,
    anki_connect_url: Option<&str>,
) -> Result<SettingsRow, sqlx::Error> {
    sqlx::query_as::<_, SettingsRow>(
        r#"
        INSERT INTO settings (user_id, sync_target, anki_connect_url) VALUES ($1, $2, $3)
        ON CONFLICT (user_id) DO UPDATE
        SET sync_target = EXCLUDED.sync_target,
            anki_connect_url = EXCLUDED.anki_connect_url,
            updated_at = now()
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(target.as_str())
    .bind(anki_connect_url)
    .fetch_one(pool)
    .await
}

/// Replaces the imported config sections and records where they came from.
pub async fn save_imported_config(
    pool: &PgPool,
    user_id: Uuid,
    sections: &ConfigSections,
    yaml_repo_id: Option<Uuid>,
    yaml_path: Option<&str>,
) -> Result<SettingsRow, sqlx::Error> {
    sqlx::query_as::<_, SettingsRow>(
        r#"
        INSERT INTO settings (user_id, courses, llm, parsing, cards, yaml_repo_id, yaml_path, imported_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, now())
        ON CONFLICT (user_id) DO UPDATE
        SET courses = EXCLUDED.courses,
            llm = EXCLUDED.llm,
            parsing = EXCLUDED.parsing,
            cards = EXCLUDED.cards,
            yaml_repo_id = EXCLUDED.yaml_repo_id,
            yaml_path = EXCLUDED.yaml_path,
            imported_at = EXCLUDED.imported_at,
            updated_at = now()
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(&sections.courses)
    .bind(&sections.llm)
    .bind(&sections.parsing)
    .bind(&sections.cards)
    .bind(yaml_repo_id)
    .bind(yaml_path)
    .fetch_one(pool)
    .await
}
