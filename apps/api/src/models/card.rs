use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// Review lifecycle of a suggestion. PENDING is the only non-terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum CardStatus {
    Pending,
    Accepted,
    Discarded,
}

impl CardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardStatus::Pending => "PENDING",
            CardStatus::Accepted => "ACCEPTED",
            CardStatus::Discarded => "DISCARDED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, CardStatus::Pending)
    }

    /// Audit action recorded when a card enters this state.
    pub fn action(&self) -> Option<CardActionKind> {
        match self {
            CardStatus::Pending => None,
            CardStatus::Accepted => Some(CardActionKind::Add),
            CardStatus::Discarded => Some(CardActionKind::Discard),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CardActionKind {
    Add,
    Discard,
    Recreate,
}

impl CardActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardActionKind::Add => "add",
            CardActionKind::Discard => "discard",
            CardActionKind::Recreate => "recreate",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CardSuggestionRow {
    pub id: Uuid,
    pub run_id: Uuid,
    pub user_id: Uuid,
    pub front: String,
    pub back: String,
    pub front_edited: Option<String>,
    pub back_edited: Option<String>,
    pub is_edited: bool,
    pub tags: Vec<String>,
    pub card_type: String,
    pub course: Option<String>,
    pub environment: Option<String>,
    pub source_file: Option<String>,
    pub source_line_start: Option<i32>,
    pub source_line_end: Option<i32>,
    pub status: String,
    pub edit_count: i32,
    pub regen_count: i32,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CardSuggestionRow {
    /// Edited text when present, otherwise the converter's original.
    pub fn effective_front(&self) -> &str {
        self.front_edited.as_deref().unwrap_or(&self.front)
    }

    pub fn effective_back(&self) -> &str {
        self.back_edited.as_deref().unwrap_or(&self.back)
    }
}

#[derive(Debug, Clone, Serialize, FromRow, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CardActionRow {
    pub id: Uuid,
    pub suggestion_id: Uuid,
    pub user_id: Uuid,
    pub action: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
pub mod fixtures {
    use super::*;

    /// A PENDING basic card with no edits.
    pub fn pending_card(user_id: Uuid) -> CardSuggestionRow {
        CardSuggestionRow {
            id: Uuid::new_v4(),
            run_id: Uuid::new_v4(),
            user_id,
            front: "State the mean value theorem.".to_string(),
            back: "If f is continuous on [a,b] and differentiable on (a,b), some c has f'(c) = (f(b)-f(a))/(b-a).".to_string(),
            front_edited: None,
            back_edited: None,
            is_edited: false,
            tags: vec!["auto".to_string(), "from-tex".to_string()],
            card_type: "basic".to_string(),
            course: Some("math214".to_string()),
            environment: Some("theorem".to_string()),
            source_file: Some("math214/week3.tex".to_string()),
            source_line_start: Some(40),
            source_line_end: Some(52),
            status: CardStatus::Pending.as_str().to_string(),
            edit_count: 0,
            regen_count: 0,
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}
