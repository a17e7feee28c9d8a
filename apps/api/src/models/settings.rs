use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// Where accepted cards are exported by default.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncTarget {
    Apkg,
    Ankiconnect,
}

impl SyncTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTarget::Apkg => "apkg",
            SyncTarget::Ankiconnect => "ankiconnect",
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SettingsRow {
    pub user_id: Uuid,
    pub courses: Value,
    pub llm: Value,
    pub parsing: Value,
    pub cards: Value,
    pub sync_target: String,
    pub anki_connect_url: Option<String>,
    pub dev_mode: bool,
    pub yaml_repo_id: Option<Uuid>,
    pub yaml_path: Option<String>,
    pub imported_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl SettingsRow {
    /// Deck configured for a course in the imported notes config.
    pub fn deck_for_course(&self, course: &str) -> Option<&str> {
        self.courses.get(course)?.get("deck")?.as_str()
    }
}
