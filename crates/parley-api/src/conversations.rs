//! Conversation registry operations: creation with member-set
//! deduplication, lookup, DM resolution, listing, and edits.

use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use parley_db::Database;
use parley_db::conversations::{NewConversation, NewMember};
use parley_types::api::{
    Claims, ConversationPage, ConversationSummary, DirectMessageQuery, EditConversationRequest,
    PageQuery, StartConversationRequest, StartConversationResponse,
};
use parley_types::events::GatewayEvent;
use parley_types::models::{Conversation, MentionPolicy, UserProfile};

use crate::error::AppError;
use crate::identity::profile_map;
use crate::{AppState, blocking, require_self};

const MAX_MEMBERS: usize = 333;
const DEFAULT_CONVERSATION_PAGE: u32 = 33;

pub async fn start_conversation(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<StartConversationRequest>,
) -> Result<(StatusCode, Json<StartConversationResponse>), AppError> {
    require_self(&claims, &username)?;

    if req.members.is_empty() {
        return Err(AppError::Validation("Members array cannot be empty".into()));
    }

    let response = blocking(move || {
        let db = &state.db;
        let creator = db
            .user_by_username(&username)?
            .ok_or(AppError::NotFound("User"))?;

        // Dedupe requested handles (creator always included), cap the size.
        let mut handles: Vec<String> = req.members.clone();
        handles.push(username.clone());
        handles.sort();
        handles.dedup();
        handles.truncate(MAX_MEMBERS);

        // Unknown handles are dropped rather than rejected.
        let mut members = Vec::with_capacity(handles.len());
        for handle in &handles {
            if let Some(user) = db.user_by_username(handle)? {
                members.push(user);
            }
        }

        let dm = members.len() == 2;
        let collaborators: Vec<Uuid> = if dm {
            members.iter().map(|m| m.id).collect()
        } else {
            members
                .iter()
                .filter(|m| req.collaborators.contains(&m.username))
                .map(|m| m.id)
                .collect()
        };

        // Members whose policy demands approval enter the queue; the
        // creator and everyone else start active.
        let seed: Vec<NewMember> = members
            .iter()
            .map(|m| NewMember {
                id: m.id,
                queue: m.id != creator.id && m.mention_policy == MentionPolicy::Approval,
            })
            .collect();

        let conversation_id = Uuid::new_v4();
        let created = db.create_conversation(&NewConversation {
            id: conversation_id,
            name: &req.name,
            description: &req.description,
            creator: creator.id,
            collaborators: &collaborators,
            dm,
            members: &seed,
            now: Utc::now(),
        })?;
        if !created {
            return Err(AppError::Conflict("Conversation already exists".into()));
        }

        Ok(StartConversationResponse { conversation_id })
    })
    .await?;

    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ConversationSummary>, AppError> {
    let summary = blocking(move || {
        let conv = state
            .db
            .conversation_by_id(conversation_id)?
            .ok_or(AppError::NotFound("Conversation"))?;

        let is_active = state
            .db
            .active_membership(conversation_id, claims.sub)?
            .is_some();
        if !is_active {
            return Err(AppError::Forbidden);
        }

        summarize(&state.db, &conv, claims.sub)
    })
    .await?;

    Ok(Json(summary))
}

pub async fn find_direct_message(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(query): Query<DirectMessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Option<Uuid>>, AppError> {
    require_self(&claims, &username)?;

    let dm = blocking(move || {
        let db = &state.db;
        let me = db
            .user_by_username(&username)?
            .ok_or(AppError::NotFound("User"))?;
        let target = db
            .user_by_username(&query.target)?
            .ok_or(AppError::NotFound("User"))?;
        Ok(db.find_dm(me.id, target.id)?)
    })
    .await?;

    Ok(Json(dm))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(page): Query<PageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ConversationPage>, AppError> {
    require_self(&claims, &username)?;

    let (limit, offset) = page.window(DEFAULT_CONVERSATION_PAGE);
    let page_no = page.page.max(1);

    let response = blocking(move || {
        let db = &state.db;
        let me = db
            .user_by_username(&username)?
            .ok_or(AppError::NotFound("User"))?;

        let (conversations, total) = db.conversations_for_user(me.id, limit, offset)?;
        let summaries = conversations
            .iter()
            .map(|conv| summarize(db, conv, me.id))
            .collect::<Result<Vec<_>, AppError>>()?;

        Ok(ConversationPage {
            page: page_no,
            limit,
            total_count: total,
            has_more: offset + (summaries.len() as u32) < total,
            conversations: summaries,
        })
    })
    .await?;

    Ok(Json(response))
}

pub async fn edit_conversation(
    State(state): State<AppState>,
    Path((username, conversation_id)): Path<(String, Uuid)>,
    Extension(claims): Extension<Claims>,
    Json(patch): Json<EditConversationRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    require_self(&claims, &username)?;

    let state_bg = state.clone();
    let (updated, recipients) = blocking(move || {
        let db = &state_bg.db;
        let me = db
            .user_by_username(&username)?
            .ok_or(AppError::NotFound("User"))?;
        let conv = db
            .conversation_by_id(conversation_id)?
            .ok_or(AppError::NotFound("Conversation"))?;

        let is_creator = conv.creator == me.id;
        let is_collaborator = conv.collaborators.contains(&me.id);
        if !is_creator && !is_collaborator {
            return Err(AppError::PermissionDenied("No permission".into()));
        }

        db.patch_conversation(
            conversation_id,
            patch.name.as_deref(),
            patch.description.as_deref(),
            patch.cover.as_ref(),
            patch.background.as_ref(),
            Utc::now(),
        )?;

        let updated = db
            .conversation_by_id(conversation_id)?
            .ok_or(AppError::NotFound("Conversation"))?;
        let recipients = db.active_member_usernames(conversation_id)?;
        Ok((updated, recipients))
    })
    .await?;

    state
        .dispatcher
        .deliver(
            &recipients,
            &GatewayEvent::ConversationEdited {
                conversation_id: updated.id,
                name: updated.name.clone(),
                description: updated.description.clone(),
                last_time_modified: updated.last_time_modified,
            },
        )
        .await;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "success": true })),
    ))
}

/// Resolve a conversation into its client-facing summary for one viewer:
/// display identities, member lists, unread state, and the last-message
/// cache suppressed when it predates the viewer's join horizon.
pub(crate) fn summarize(
    db: &Database,
    conv: &Conversation,
    viewer: Uuid,
) -> Result<ConversationSummary, AppError> {
    let members = db.members_of(conv.id)?;
    let active: Vec<Uuid> = members
        .iter()
        .filter(|m| !m.queue)
        .map(|m| m.member)
        .collect();
    let pending: Vec<Uuid> = members
        .iter()
        .filter(|m| m.queue)
        .map(|m| m.member)
        .collect();

    let mut ids: Vec<Uuid> = active.clone();
    ids.extend(&pending);
    ids.extend(&conv.collaborators);
    ids.push(conv.creator);
    if let Some(last_user) = conv.last_message_user {
        ids.push(last_user);
    }
    let profiles = profile_map(db, &ids)?;

    let my_join: Option<DateTime<Utc>> = members
        .iter()
        .find(|m| m.member == viewer)
        .map(|m| m.joined_on);
    let show_last = my_join.map_or(true, |joined| conv.last_message_update >= joined);

    let unread = db.unread_count(viewer, conv.id)?;

    Ok(ConversationSummary {
        id: conv.id,
        name: conv.name.clone(),
        description: conv.description.clone(),
        creator: profiles.get(&conv.creator).cloned(),
        collaborators: resolve(&conv.collaborators, &profiles),
        dm: conv.dm,
        last_message: if show_last {
            conv.last_message.clone()
        } else {
            String::new()
        },
        last_message_user: if show_last {
            conv.last_message_user.and_then(|id| profiles.get(&id).cloned())
        } else {
            None
        },
        last_message_id: if show_last { conv.last_message_id } else { None },
        last_message_update: if show_last {
            conv.last_message_update
        } else {
            my_join.unwrap_or(conv.time_created)
        },
        members_count: conv.members_count,
        active_members: resolve(&active, &profiles),
        pending_members: resolve(&pending, &profiles),
        time_created: conv.time_created,
        last_time_modified: conv.last_time_modified,
        unread_count: unread,
        read: unread == 0,
    })
}

fn resolve(ids: &[Uuid], profiles: &HashMap<Uuid, UserProfile>) -> Vec<UserProfile> {
    ids.iter().filter_map(|id| profiles.get(id).cloned()).collect()
}
