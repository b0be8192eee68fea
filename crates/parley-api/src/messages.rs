//! Message store operations: posting (text, sticker, collaborator-produced
//! media), history pages, and tombstone deletion.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use uuid::Uuid;

use parley_db::Database;
use parley_types::api::{
    Claims, MediaManifestRequest, MessageAuthor, MessagePage, MessageView, NewMessageRequest,
    NewMessageResponse, PageQuery,
};
use parley_types::events::GatewayEvent;
use parley_types::models::{
    Attachment, Message, MessageKind, SYSTEM_SENDER, User,
};

use crate::error::AppError;
use crate::identity::message_views;
use crate::{AppState, blocking, media, require_self, sticker};

const DEFAULT_MESSAGE_PAGE: u32 = 12;

pub async fn create_message(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<NewMessageRequest>,
) -> Result<(StatusCode, Json<NewMessageResponse>), AppError> {
    require_self(&claims, &username)?;

    if req.kind == MessageKind::Text && req.content.trim().is_empty() {
        return Err(AppError::Validation("Empty message".into()));
    }

    if req.kind == MessageKind::Sticker {
        let url = match &req.attachment {
            Some(Attachment::Sticker { url, .. }) => url.clone(),
            _ => return Err(AppError::Validation("Sticker missing".into())),
        };
        sticker::validate_sticker(&state.http, &url)
            .await
            .map_err(|reason| AppError::Validation(format!("Invalid sticker - {}", reason)))?;
    }

    let state_bg = state.clone();
    let posted = blocking(move || {
        let sender = state_bg
            .db
            .user_by_username(&username)?
            .ok_or(AppError::NotFound("User"))?;
        post_internal(
            &state_bg.db,
            &sender,
            req.conversation_id,
            req.kind,
            req.content,
            req.attachment,
            req.mentions,
            req.reply_target,
        )
    })
    .await?;

    let id = posted.view.id;
    state
        .dispatcher
        .deliver(
            &posted.recipients,
            &GatewayEvent::NewMessage {
                message: posted.view,
            },
        )
        .await;

    Ok((StatusCode::CREATED, Json(NewMessageResponse { id })))
}

/// Entry point for the upload collaborator: it reports the final base URL
/// and variant manifest of a finished upload, which becomes a media
/// message through the same path as any other post.
pub async fn create_media_message(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<MediaManifestRequest>,
) -> Result<(StatusCode, Json<NewMessageResponse>), AppError> {
    require_self(&claims, &username)?;

    if req.files.is_empty() {
        return Err(AppError::Validation("No files uploaded".into()));
    }

    let attachment = media::media_attachment(&req.base_url, &req.files, req.sensitivity);

    let state_bg = state.clone();
    let posted = blocking(move || {
        let sender = state_bg
            .db
            .user_by_username(&username)?
            .ok_or(AppError::NotFound("User"))?;
        post_internal(
            &state_bg.db,
            &sender,
            req.conversation_id,
            MessageKind::Media,
            String::new(),
            Some(attachment),
            vec![],
            None,
        )
    })
    .await?;

    let id = posted.view.id;
    state
        .dispatcher
        .deliver(
            &posted.recipients,
            &GatewayEvent::NewMessage {
                message: posted.view,
            },
        )
        .await;

    Ok((StatusCode::CREATED, Json(NewMessageResponse { id })))
}

/// Delete an own message. The message is replaced by a system tombstone
/// carrying the original `time_posted`, so its slot in history survives.
pub async fn delete_message(
    State(state): State<AppState>,
    Path((username, message_id)): Path<(String, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<StatusCode, AppError> {
    require_self(&claims, &username)?;

    let state_bg = state.clone();
    let (tombstone_view, recipients) = blocking(move || {
        let db = &state_bg.db;
        let message = db
            .message_by_id(message_id)?
            .ok_or(AppError::NotFound("Message"))?;
        if message.sender != claims.sub {
            return Err(AppError::Forbidden);
        }

        let now = Utc::now();
        let tombstone = Message {
            id: Uuid::new_v4(),
            conversation_id: message.conversation_id,
            sender: SYSTEM_SENDER,
            content: format!("@{} deleted a message", username),
            kind: MessageKind::Text,
            attachment: Some(Attachment::Remover { message_id }),
            mentions: vec![],
            reply_to: None,
            last_reaction_time: None,
            time_posted: message.time_posted,
            time_modified: now,
            reports_count: 0,
        };
        db.replace_with_tombstone(message_id, &tombstone)?;

        let recipients = db.active_member_usernames(message.conversation_id)?;
        let view = system_view(&tombstone);
        Ok((view, recipients))
    })
    .await?;

    state
        .dispatcher
        .deliver(
            &recipients,
            &GatewayEvent::MessageDeleted {
                message: tombstone_view,
            },
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(page): Query<PageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MessagePage>, AppError> {
    let (limit, offset) = page.window(DEFAULT_MESSAGE_PAGE);
    let page_no = page.page.max(1);

    let response = blocking(move || {
        let db = &state.db;
        db.conversation_by_id(conversation_id)?
            .ok_or(AppError::NotFound("Conversation"))?;
        let membership = db
            .active_membership(conversation_id, claims.sub)?
            .ok_or(AppError::Forbidden)?;

        let (messages, total) =
            db.list_messages(conversation_id, membership.joined_on, limit, offset)?;
        let fetched = messages.len() as u32;
        let views = message_views(db, messages)?;

        Ok(MessagePage {
            page: page_no,
            limit,
            messages: views,
            has_more: offset + fetched < total,
        })
    })
    .await?;

    Ok(Json(response))
}

pub(crate) struct PostedMessage {
    pub view: MessageView,
    pub recipients: Vec<String>,
}

/// Shared posting path: membership gate, insert, last-message cache
/// refresh, and the rendered view handed to the dispatcher after commit.
#[allow(clippy::too_many_arguments)]
pub(crate) fn post_internal(
    db: &Database,
    sender: &User,
    conversation_id: Uuid,
    kind: MessageKind,
    content: String,
    attachment: Option<Attachment>,
    mentions: Vec<Uuid>,
    reply_to: Option<Uuid>,
) -> Result<PostedMessage, AppError> {
    db.conversation_by_id(conversation_id)?
        .ok_or(AppError::NotFound("Conversation"))?;
    // Pending members can't post; non-members can't tell the conversation
    // exists.
    if db.active_membership(conversation_id, sender.id)?.is_none() {
        return Err(AppError::NotFound("Conversation"));
    }

    let now = Utc::now();
    let message = Message {
        id: Uuid::new_v4(),
        conversation_id,
        sender: sender.id,
        content,
        kind,
        attachment,
        mentions,
        reply_to,
        last_reaction_time: None,
        time_posted: now,
        time_modified: now,
        reports_count: 0,
    };
    db.insert_message(&message)?;

    let cache_text = if !message.content.is_empty() {
        message.content.clone()
    } else if kind == MessageKind::Sticker {
        "[sticker]".to_string()
    } else {
        "[attachment]".to_string()
    };
    db.update_last_message(conversation_id, &cache_text, sender.id, message.id, now)?;

    let recipients = db.active_member_usernames(conversation_id)?;
    let view = MessageView {
        id: message.id,
        conversation_id,
        user: MessageAuthor {
            username: sender.username.clone(),
            avatar: sender.avatar_url.clone(),
        },
        content: message.content,
        kind,
        attachment: message.attachment,
        mentions: message.mentions,
        reply_to,
        reactions: vec![],
        time_posted: now,
        time_modified: now,
    };

    Ok(PostedMessage { view, recipients })
}

fn system_view(message: &Message) -> MessageView {
    MessageView {
        id: message.id,
        conversation_id: message.conversation_id,
        user: MessageAuthor {
            username: "system".to_string(),
            avatar: String::new(),
        },
        content: message.content.clone(),
        kind: message.kind,
        attachment: message.attachment.clone(),
        mentions: vec![],
        reply_to: None,
        reactions: vec![],
        time_posted: message.time_posted,
        time_modified: message.time_modified,
    }
}
