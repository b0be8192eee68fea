//! Idempotent reaction toggling with a reaction-delta fanout.

use axum::{
    Extension, Json,
    extract::{Path, State},
};
use chrono::Utc;

use parley_types::api::{Claims, ReactionRequest, ReactionResponse};
use parley_types::events::GatewayEvent;

use crate::error::AppError;
use crate::{AppState, blocking, emoji, require_self};

pub async fn react_to_message(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ReactionRequest>,
) -> Result<Json<ReactionResponse>, AppError> {
    require_self(&claims, &username)?;

    if !emoji::is_valid_emoji(&req.emoji) {
        return Err(AppError::Validation("Invalid emoji".into()));
    }

    let message_id = req.message_id;
    let emoji_symbol = req.emoji.clone();
    let state_bg = state.clone();
    let now = Utc::now();
    let (added, conversation_id, recipients) = blocking(move || {
        let db = &state_bg.db;
        let me = db
            .user_by_username(&username)?
            .ok_or(AppError::NotFound("User"))?;
        let message = db
            .message_by_id(message_id)?
            .ok_or(AppError::NotFound("Message"))?;

        let added = db.toggle_reaction(message.id, me.id, &req.emoji, now)?;
        let recipients = db.active_member_usernames(message.conversation_id)?;
        Ok((added, message.conversation_id, recipients))
    })
    .await?;

    state
        .dispatcher
        .deliver(
            &recipients,
            &GatewayEvent::ReactionChanged {
                message_id,
                conversation_id,
                user: claims.username.clone(),
                reaction: emoji_symbol,
                removed: !added,
                time_posted: now,
            },
        )
        .await;

    Ok(Json(ReactionResponse { removed: !added }))
}
