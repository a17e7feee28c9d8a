//! Axum route handlers for card review.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::extract::AppJson;
use crate::models::card::{CardActionRow, CardStatus, CardSuggestionRow};
use crate::review::service::{
    patch_card, regenerate_card, request_recreate, transition_card, CardPatch,
};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CardResponse {
    pub card: CardSuggestionRow,
}

#[derive(Debug, Serialize)]
pub struct CardDetailResponse {
    pub card: CardSuggestionRow,
    pub actions: Vec<CardActionRow>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecreateResponse {
    pub ok: bool,
    pub implemented: bool,
    pub message: String,
    pub action_id: Uuid,
}

/// GET /cards/:id
pub async fn handle_get_card(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(card_id): Path<Uuid>,
) -> Result<Json<CardDetailResponse>, AppError> {
    let card = state
        .review_store
        .find_owned(auth.user_id, card_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Card {card_id} not found")))?;
    let actions = state.review_store.actions_for(auth.user_id, card_id).await?;
    Ok(Json(CardDetailResponse { card, actions }))
}

/// POST /cards/:id/add
pub async fn handle_add_card(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(card_id): Path<Uuid>,
) -> Result<Json<CardResponse>, AppError> {
    let card = transition_card(
        state.review_store.as_ref(),
        auth.user_id,
        card_id,
        CardStatus::Accepted,
    )
    .await?;
    Ok(Json(CardResponse { card }))
}

/// POST /cards/:id/discard
pub async fn handle_discard_card(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(card_id): Path<Uuid>,
) -> Result<Json<CardResponse>, AppError> {
    let card = transition_card(
        state.review_store.as_ref(),
        auth.user_id,
        card_id,
        CardStatus::Discarded,
    )
    .await?;
    Ok(Json(CardResponse { card }))
}

/// POST /cards/:id/recreate
///
/// Only records the request; recreating suggestions is not implemented yet and
/// the response says so.
pub async fn handle_recreate_card(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(card_id): Path<Uuid>,
) -> Result<Json<RecreateResponse>, AppError> {
    let action = request_recreate(state.review_store.as_ref(), auth.user_id, card_id).await?;
    Ok(Json(RecreateResponse {
        ok: true,
        implemented: false,
        message: "Recreate request recorded. Generating replacement cards is not available yet."
            .to_string(),
        action_id: action.id,
    }))
}

/// PATCH /cards/:id
pub async fn handle_patch_card(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(card_id): Path<Uuid>,
    AppJson(patch): AppJson<CardPatch>,
) -> Result<Json<CardResponse>, AppError> {
    let card = patch_card(state.review_store.as_ref(), auth.user_id, card_id, &patch).await?;
    Ok(Json(CardResponse { card }))
}

/// POST /cards/:id/regenerate
pub async fn handle_regenerate_card(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(card_id): Path<Uuid>,
) -> Result<Json<CardResponse>, AppError> {
    let card = regenerate_card(
        state.review_store.as_ref(),
        state.rewriter.as_ref(),
        auth.user_id,
        card_id,
    )
    .await?;
    Ok(Json(CardResponse { card }))
}
