//! Persistence seam for card review.
//!
//! `compare_and_set_status` is the only way a card changes status. It matches on
//! the expected current status, so two racing requests can never both win, and
//! it writes the audit row in the same transaction as the status change.

use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::card::{CardActionKind, CardActionRow, CardStatus, CardSuggestionRow};

/// Result of a compare-and-swap on a card's status.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Applied(CardSuggestionRow),
    /// The card exists but is no longer in the expected state.
    AlreadyUpdated { current: String },
    NotFound,
}

/// Text edits applied outside the status lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CardEdit {
    pub front: Option<String>,
    pub back: Option<String>,
    pub is_edited: bool,
}

impl CardEdit {
    pub fn has_text(&self) -> bool {
        self.front.is_some() || self.back.is_some()
    }
}

#[async_trait]
pub trait ReviewStore: Send + Sync {
    async fn find_owned(
        &self,
        user_id: Uuid,
        card_id: Uuid,
    ) -> Result<Option<CardSuggestionRow>, AppError>;

    async fn compare_and_set_status(
        &self,
        user_id: Uuid,
        card_id: Uuid,
        expected: CardStatus,
        next: CardStatus,
        action: CardActionKind,
    ) -> Result<TransitionOutcome, AppError>;

    async fn apply_edit(
        &self,
        user_id: Uuid,
        card_id: Uuid,
        edit: &CardEdit,
    ) -> Result<Option<CardSuggestionRow>, AppError>;

    /// Stores rewritten text as the edited variant and bumps the regen counter.
    async fn store_rewrite(
        &self,
        user_id: Uuid,
        card_id: Uuid,
        front: &str,
        back: &str,
    ) -> Result<Option<CardSuggestionRow>, AppError>;

    async fn record_action(
        &self,
        user_id: Uuid,
        card_id: Uuid,
        action: CardActionKind,
        payload: Value,
    ) -> Result<CardActionRow, AppError>;

    async fn actions_for(
        &self,
        user_id: Uuid,
        card_id: Uuid,
    ) -> Result<Vec<CardActionRow>, AppError>;
}

/// Snapshot written with every terminal transition.
pub fn transition_payload(card: &CardSuggestionRow, from: CardStatus) -> Value {
    json!({
        "from": from.as_str(),
        "to": card.status,
        "front": card.effective_front(),
        "back": card.effective_back(),
        "tags": card.tags,
        "cardType": card.card_type,
        "isEdited": card.is_edited,
    })
}

pub struct PgReviewStore {
    pool: PgPool,
}

impl PgReviewStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReviewStore for PgReviewStore {
    async fn find_owned(
        &self,
        user_id: Uuid,
        card_id: Uuid,
    ) -> Result<Option<CardSuggestionRow>, AppError> {
        Ok(sqlx::query_as::<_, CardSuggestionRow>(
            "SELECT * FROM card_suggestions WHERE id = $1 AND user_id = $2",
        )
        .bind(card_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn compare_and_set_status(
        &self,
        user_id: Uuid,
        card_id: Uuid,
        expected: CardStatus,
        next: CardStatus,
        action: CardActionKind,
    ) -> Result<TransitionOutcome, AppError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query_as::<_, CardSuggestionRow>(
            r#"
            UPDATE card_suggestions
            SET status = $4, updated_at = now()
            WHERE id = $1 AND user_id = $2 AND status = $3
            RETURNING *
            "#,
        )
        .bind(card_id)
        .bind(user_id)
        .bind(expected.as_str())
        .bind(next.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(card) = updated else {
            tx.rollback().await?;
            let current: Option<String> = sqlx::query_scalar(
                "SELECT status FROM card_suggestions WHERE id = $1 AND user_id = $2",
            )
            .bind(card_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
            return Ok(match current {
                Some(current) => TransitionOutcome::AlreadyUpdated { current },
                None => TransitionOutcome::NotFound,
            });
        };

        sqlx::query(
            "INSERT INTO card_actions (suggestion_id, user_id, action, payload) VALUES ($1, $2, $3, $4)",
        )
        .bind(card_id)
        .bind(user_id)
        .bind(action.as_str())
        .bind(transition_payload(&card, expected))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(TransitionOutcome::Applied(card))
    }

    async fn apply_edit(
        &self,
        user_id: Uuid,
        card_id: Uuid,
        edit: &CardEdit,
    ) -> Result<Option<CardSuggestionRow>, AppError> {
        Ok(sqlx::query_as::<_, CardSuggestionRow>(
            r#"
            UPDATE card_suggestions
            SET front_edited = COALESCE($3, front_edited),
                back_edited = COALESCE($4, back_edited),
                is_edited = $5,
                edit_count = edit_count + $6,
                updated_at = now()
            WHERE id = $1 AND user_id = $2
            RETURNING *
            "#,
        )
        .bind(card_id)
        .bind(user_id)
        .bind(edit.front.as_deref())
        .bind(edit.back.as_deref())
        .bind(edit.is_edited)
        .bind(i32::from(edit.has_text()))
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn store_rewrite(
        &self,
        user_id: Uuid,
        card_id: Uuid,
        front: &str,
        back: &str,
    ) -> Result<Option<CardSuggestionRow>, AppError> {
        Ok(sqlx::query_as::<_, CardSuggestionRow>(
            r#"
            UPDATE card_suggestions
            SET front_edited = $3,
                back_edited = $4,
                is_edited = true,
                regen_count = regen_count + 1,
                updated_at = now()
            WHERE id = $1 AND user_id = $2
            RETURNING *
            "#,
        )
        .bind(card_id)
        .bind(user_id)
        .bind(front)
        .bind(back)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn record_action(
        &self,
        user_id: Uuid,
        card_id: Uuid,
        action: CardActionKind,
        payload: Value,
    ) -> Result<CardActionRow, AppError> {
        Ok(sqlx::query_as::<_, CardActionRow>(
            r#"
            INSERT INTO card_actions (suggestion_id, user_id, action, payload)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(card_id)
        .bind(user_id)
        .bind(action.as_str())
        .bind(payload)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn actions_for(
        &self,
        user_id: Uuid,
        card_id: Uuid,
    ) -> Result<Vec<CardActionRow>, AppError> {
        Ok(sqlx::query_as::<_, CardActionRow>(
            "SELECT * FROM card_actions WHERE suggestion_id = $1 AND user_id = $2 ORDER BY created_at",
        )
        .bind(card_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }
}
