//! Membership ledger operations: admin-initiated adds and removals,
//! collaborator promotion, the invite approval/denial flow, and leaving.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Utc;
use tracing::error;
use uuid::Uuid;

use parley_db::members::{AddMemberOutcome, LeaveOutcome};
use parley_types::api::{ApprovalRequest, Claims};
use parley_types::events::GatewayEvent;

use crate::error::AppError;
use crate::{AppState, blocking, require_self};

pub async fn add_member(
    State(state): State<AppState>,
    Path((username, conversation_id, member)): Path<(String, Uuid, String)>,
    Extension(claims): Extension<Claims>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    require_self(&claims, &username)?;

    blocking(move || {
        let db = &state.db;
        let me = db
            .user_by_username(&username)?
            .ok_or(AppError::NotFound("User"))?;
        let new_user = db
            .user_by_username(&member)?
            .ok_or(AppError::NotFound("User"))?;
        let conv = db
            .conversation_by_id(conversation_id)?
            .ok_or(AppError::NotFound("Conversation"))?;

        let is_creator = conv.creator == me.id;
        let is_collaborator = conv.collaborators.contains(&me.id);
        if !is_creator && !is_collaborator {
            return Err(AppError::PermissionDenied("No permission".into()));
        }

        match db.add_member(conversation_id, new_user.id, me.id, Utc::now())? {
            AddMemberOutcome::Added => Ok(()),
            AddMemberOutcome::AlreadyMember => {
                Err(AppError::Conflict("Already a member".into()))
            }
        }
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "success": true })),
    ))
}

pub async fn remove_member(
    State(state): State<AppState>,
    Path((username, conversation_id, member)): Path<(String, Uuid, String)>,
    Extension(claims): Extension<Claims>,
) -> Result<StatusCode, AppError> {
    require_self(&claims, &username)?;

    blocking(move || {
        let db = &state.db;
        let me = db
            .user_by_username(&username)?
            .ok_or(AppError::NotFound("User"))?;
        let target = db
            .user_by_username(&member)?
            .ok_or(AppError::NotFound("User"))?;
        let conv = db
            .conversation_by_id(conversation_id)?
            .ok_or(AppError::NotFound("Conversation"))?;

        if conv.dm {
            return Err(AppError::Validation("Cannot remove from DM".into()));
        }

        let is_creator = conv.creator == me.id;
        let is_collaborator = conv.collaborators.contains(&me.id);
        let target_is_collaborator = conv.collaborators.contains(&target.id);

        // A collaborator may remove ordinary members; only the creator may
        // remove another collaborator.
        if !is_creator && (!is_collaborator || target_is_collaborator) {
            return Err(AppError::PermissionDenied("No permission".into()));
        }

        if !db.remove_member(conversation_id, target.id)? {
            return Err(AppError::NotFound("Member"));
        }
        Ok(())
    })
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn promote_collaborator(
    State(state): State<AppState>,
    Path((username, conversation_id, member)): Path<(String, Uuid, String)>,
    Extension(claims): Extension<Claims>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    require_self(&claims, &username)?;

    blocking(move || {
        let db = &state.db;
        let me = db
            .user_by_username(&username)?
            .ok_or(AppError::NotFound("User"))?;
        let target = db
            .user_by_username(&member)?
            .ok_or(AppError::NotFound("User"))?;
        let conv = db
            .conversation_by_id(conversation_id)?
            .ok_or(AppError::NotFound("Conversation"))?;

        if conv.creator != me.id {
            return Err(AppError::PermissionDenied(
                "Only creator can add admin".into(),
            ));
        }

        db.add_collaborator(conversation_id, target.id)?;
        Ok(())
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "success": true })),
    ))
}

pub async fn demote_collaborator(
    State(state): State<AppState>,
    Path((username, conversation_id, member)): Path<(String, Uuid, String)>,
    Extension(claims): Extension<Claims>,
) -> Result<StatusCode, AppError> {
    require_self(&claims, &username)?;

    blocking(move || {
        let db = &state.db;
        let me = db
            .user_by_username(&username)?
            .ok_or(AppError::NotFound("User"))?;
        let target = db
            .user_by_username(&member)?
            .ok_or(AppError::NotFound("User"))?;
        let conv = db
            .conversation_by_id(conversation_id)?
            .ok_or(AppError::NotFound("Conversation"))?;

        if conv.creator != me.id {
            return Err(AppError::PermissionDenied(
                "Only creator can remove admin".into(),
            ));
        }
        if target.id == conv.creator {
            return Err(AppError::Validation("Creator is always admin".into()));
        }

        db.remove_collaborator(conversation_id, target.id)?;
        Ok(())
    })
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Approve a pending invite issued by `notifier`. Stamps the approver's
/// visibility horizon and notifies the inviter's live connections.
pub async fn approve_membership(
    State(state): State<AppState>,
    Path((username, notifier)): Path<(String, String)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ApprovalRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    require_self(&claims, &username)?;

    let target = req.target;
    let state_bg = state.clone();
    let (member_name, inviter_name) = blocking(move || {
        let db = &state_bg.db;
        let me = db
            .user_by_username(&username)?
            .ok_or(AppError::NotFound("User"))?;
        let inviter = db
            .user_by_username(&notifier)?
            .ok_or(AppError::NotFound("User"))?;

        if !db.approve_membership(target, me.id, inviter.id, Utc::now())? {
            return Err(AppError::NotFound("Request"));
        }
        Ok((me.username, inviter.username))
    })
    .await?;

    state
        .dispatcher
        .deliver_to_user(
            &inviter_name,
            &GatewayEvent::MembershipApproved {
                conversation_id: target,
                member: member_name,
                inviter: inviter_name.clone(),
            },
        )
        .await;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "success": true })),
    ))
}

/// Deny a pending invite. A denied DM has no remaining purpose and
/// cascades away entirely.
pub async fn deny_membership(
    State(state): State<AppState>,
    Path((username, notifier)): Path<(String, String)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ApprovalRequest>,
) -> Result<StatusCode, AppError> {
    require_self(&claims, &username)?;

    blocking(move || {
        let db = &state.db;
        let me = db
            .user_by_username(&username)?
            .ok_or(AppError::NotFound("User"))?;
        let inviter = db
            .user_by_username(&notifier)?
            .ok_or(AppError::NotFound("User"))?;

        if !db.deny_membership(req.target, me.id, inviter.id)? {
            return Err(AppError::NotFound("Request"));
        }

        if let Some(conv) = db.conversation_by_id(req.target)? {
            if conv.dm {
                // Best-effort: the denial itself is already committed.
                if let Err(e) = db.delete_conversation_cascade(req.target) {
                    error!("cascade after denied DM {} failed: {:#}", req.target, e);
                }
            }
        }
        Ok(())
    })
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn leave_conversation(
    State(state): State<AppState>,
    Path((username, conversation_id)): Path<(String, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<StatusCode, AppError> {
    require_self(&claims, &username)?;

    blocking(move || {
        let db = &state.db;
        let me = db
            .user_by_username(&username)?
            .ok_or(AppError::NotFound("User"))?;
        db.conversation_by_id(conversation_id)?
            .ok_or(AppError::NotFound("Conversation"))?;

        match db.leave_conversation(conversation_id, me.id)? {
            LeaveOutcome::NotMember => Err(AppError::NotFound("Member")),
            LeaveOutcome::Left => Ok(()),
            LeaveOutcome::Empty => {
                // Best-effort: the leave itself is already committed.
                if let Err(e) = db.delete_conversation_cascade(conversation_id) {
                    error!(
                        "cascade after last leave of {} failed: {:#}",
                        conversation_id, e
                    );
                }
                Ok(())
            }
        }
    })
    .await?;

    Ok(StatusCode::NO_CONTENT)
}
