//! Card review operations: accept, discard, edit, regenerate, recreate.

use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::errors::{AppError, ValidationIssue};
use crate::models::card::{CardActionKind, CardActionRow, CardStatus, CardSuggestionRow};
use crate::review::rewrite::{CardRewriter, RewriteRequest};
use crate::review::store::{CardEdit, ReviewStore, TransitionOutcome};

/// Body of `PATCH /cards/:id`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CardPatch {
    pub status: Option<CardStatus>,
    pub front: Option<String>,
    pub back: Option<String>,
    pub is_edited: Option<bool>,
}

impl CardPatch {
    pub fn validate(&self) -> Result<(), AppError> {
        let mut issues = Vec::new();
        if self.status.is_none()
            && self.front.is_none()
            && self.back.is_none()
            && self.is_edited.is_none()
        {
            issues.push(ValidationIssue::new("", "at least one field is required"));
        }
        if self.status.is_some_and(|s| !s.is_terminal()) {
            issues.push(ValidationIssue::new(
                "status",
                "cards cannot be moved back to PENDING",
            ));
        }
        for (path, text) in [("front", &self.front), ("back", &self.back)] {
            if text.as_deref().is_some_and(|t| t.trim().is_empty()) {
                issues.push(ValidationIssue::new(path, "must not be empty"));
            }
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(AppError::invalid_fields("Invalid card update", issues))
        }
    }

    /// Text changes carried by the patch. Supplying text without an explicit
    /// `isEdited` marks the card as edited.
    pub fn edit(&self) -> Option<CardEdit> {
        let has_text = self.front.is_some() || self.back.is_some();
        if !has_text && self.is_edited.is_none() {
            return None;
        }
        Some(CardEdit {
            front: self.front.clone(),
            back: self.back.clone(),
            is_edited: self.is_edited.unwrap_or(has_text),
        })
    }
}

/// Moves a PENDING card to a terminal state. A card that already left PENDING
/// yields a conflict, never a second write.
pub async fn transition_card(
    store: &dyn ReviewStore,
    user_id: Uuid,
    card_id: Uuid,
    next: CardStatus,
) -> Result<CardSuggestionRow, AppError> {
    let Some(action) = next.action() else {
        return Err(AppError::validation("Target status must be ACCEPTED or DISCARDED"));
    };

    match store
        .compare_and_set_status(user_id, card_id, CardStatus::Pending, next, action)
        .await?
    {
        TransitionOutcome::Applied(card) => {
            info!(card_id = %card_id, status = next.as_str(), "Card reviewed");
            Ok(card)
        }
        TransitionOutcome::AlreadyUpdated { current } => Err(AppError::already_updated(
            format!("Card {card_id} was already moved to {current}"),
        )),
        TransitionOutcome::NotFound => Err(card_not_found(card_id)),
    }
}

/// Applies a status transition (if any) and then text edits (if any).
/// A conflicting transition aborts before any edit is written.
pub async fn patch_card(
    store: &dyn ReviewStore,
    user_id: Uuid,
    card_id: Uuid,
    patch: &CardPatch,
) -> Result<CardSuggestionRow, AppError> {
    patch.validate()?;

    let mut latest = None;
    if let Some(status) = patch.status {
        latest = Some(transition_card(store, user_id, card_id, status).await?);
    }
    if let Some(edit) = patch.edit() {
        latest = store.apply_edit(user_id, card_id, &edit).await?;
        if latest.is_none() {
            return Err(card_not_found(card_id));
        }
    }

    latest.ok_or_else(|| card_not_found(card_id))
}

/// Rewrites the card's effective text through the rewriter. Nothing is written
/// unless the rewriter succeeds.
pub async fn regenerate_card(
    store: &dyn ReviewStore,
    rewriter: &dyn CardRewriter,
    user_id: Uuid,
    card_id: Uuid,
) -> Result<CardSuggestionRow, AppError> {
    let card = store
        .find_owned(user_id, card_id)
        .await?
        .ok_or_else(|| card_not_found(card_id))?;

    let request = RewriteRequest::from_card(&card);
    let rewritten = rewriter.rewrite(&request).await?;

    if rewritten.front.trim().is_empty() || rewritten.back.trim().is_empty() {
        return Err(AppError::Upstream {
            status: axum::http::StatusCode::SERVICE_UNAVAILABLE,
            code: "llm_error",
            message: "The rewrite service returned an empty card".to_string(),
        });
    }

    let updated = store
        .store_rewrite(user_id, card_id, rewritten.front.trim(), rewritten.back.trim())
        .await?
        .ok_or_else(|| card_not_found(card_id))?;

    info!(card_id = %card_id, regen_count = updated.regen_count, "Card regenerated");
    Ok(updated)
}

/// Logs a recreate request. New suggestions are not produced yet.
pub async fn request_recreate(
    store: &dyn ReviewStore,
    user_id: Uuid,
    card_id: Uuid,
) -> Result<CardActionRow, AppError> {
    let card = store
        .find_owned(user_id, card_id)
        .await?
        .ok_or_else(|| card_not_found(card_id))?;

    let payload = json!({
        "front": card.front,
        "back": card.back,
        "sourceFile": card.source_file,
        "sourceLineStart": card.source_line_start,
        "sourceLineEnd": card.source_line_end,
    });

    store
        .record_action(user_id, card_id, CardActionKind::Recreate, payload)
        .await
}

fn card_not_found(card_id: Uuid) -> AppError {
    AppError::NotFound(format!("Card {card_id} not found"))
}
