//! Keyword search over a member's visible message window.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use uuid::Uuid;

use parley_types::api::{Claims, SearchQuery, SearchResponse};

use crate::error::AppError;
use crate::identity::message_views;
use crate::{AppState, blocking, require_self};

const SEARCH_LIMIT: u32 = 50;

/// Whitespace-split keywords, lowercased: each becomes an independent
/// case-insensitive substring filter and all must match.
pub fn split_keywords(raw: &str) -> Vec<String> {
    raw.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

pub async fn search_conversation(
    State(state): State<AppState>,
    Path((username, conversation_id)): Path<(String, Uuid)>,
    Query(query): Query<SearchQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<SearchResponse>, AppError> {
    require_self(&claims, &username)?;

    let keywords = split_keywords(&query.keywords);
    let response = blocking(move || {
        let db = &state.db;
        let membership = db
            .active_membership(conversation_id, claims.sub)?
            .ok_or(AppError::Forbidden)?;

        let hits =
            db.search_messages(conversation_id, membership.joined_on, &keywords, SEARCH_LIMIT)?;
        Ok(SearchResponse {
            messages: message_views(db, hits)?,
        })
    })
    .await?;

    Ok(Json(response))
}

pub async fn search_all_conversations(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(query): Query<SearchQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<SearchResponse>, AppError> {
    require_self(&claims, &username)?;

    let keywords = split_keywords(&query.keywords);
    let response = blocking(move || {
        let db = &state.db;
        let me = db
            .user_by_username(&username)?
            .ok_or(AppError::NotFound("User"))?;

        let hits = db.search_all_messages(me.id, &keywords)?;
        Ok(SearchResponse {
            messages: message_views(db, hits)?,
        })
    })
    .await?;

    Ok(Json(response))
}
