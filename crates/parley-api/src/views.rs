//! Read-state tracker endpoints: the last-read marker and the explicit
//! read/unread flag.

use axum::{
    Extension, Json,
    extract::{Path, State},
};
use chrono::Utc;
use uuid::Uuid;

use parley_types::api::{Claims, MarkStatusRequest};

use crate::error::AppError;
use crate::{AppState, blocking, require_self};

/// Record that the user has read the conversation up to `message_id`.
pub async fn read_conversation(
    State(state): State<AppState>,
    Path((username, conversation_id, message_id)): Path<(String, Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<serde_json::Value>, AppError> {
    require_self(&claims, &username)?;

    blocking(move || {
        state
            .db
            .mark_read(claims.sub, conversation_id, message_id, Utc::now())?;
        Ok(())
    })
    .await?;

    Ok(Json(serde_json::json!({ "success": true })))
}

/// Flip the explicit read/unread flag without touching the last-read
/// pointer ("mark as unread").
pub async fn mark_chat_status(
    State(state): State<AppState>,
    Path((username, conversation_id)): Path<(String, Uuid)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<MarkStatusRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    require_self(&claims, &username)?;

    blocking(move || {
        state
            .db
            .set_read_flag(claims.sub, conversation_id, req.reading)?;
        Ok(())
    })
    .await?;

    Ok(Json(serde_json::json!({ "success": true })))
}
