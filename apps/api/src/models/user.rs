use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub github_login: Option<String>,
    /// Written by the OAuth flow; never serialized back to clients.
    #[serde(skip)]
    pub github_token: Option<String>,
    pub created_at: DateTime<Utc>,
}
