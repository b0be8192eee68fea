//! Display-identity resolution: maps ids back to public profiles and
//! renders messages with senders and reaction user sets resolved.

use std::collections::HashMap;

use uuid::Uuid;

use parley_db::Database;
use parley_types::api::{MessageAuthor, MessageView, ReactionGroup};
use parley_types::models::{Message, UserProfile};

use crate::error::AppError;

/// Batch-resolve ids to profiles. Duplicates are collapsed; unknown ids
/// are simply absent from the map.
pub fn profile_map(db: &Database, ids: &[Uuid]) -> Result<HashMap<Uuid, UserProfile>, AppError> {
    let mut unique: Vec<Uuid> = ids.to_vec();
    unique.sort();
    unique.dedup();
    Ok(db.profiles_by_ids(&unique)?)
}

/// Render a batch of messages for output: senders become display authors
/// (the reserved system sender renders as "system") and reaction user ids
/// become handles.
pub fn message_views(db: &Database, messages: Vec<Message>) -> Result<Vec<MessageView>, AppError> {
    let message_ids: Vec<Uuid> = messages.iter().map(|m| m.id).collect();
    let reaction_rows = db.reactions_for_messages(&message_ids)?;

    // message id -> emoji -> reacting user ids
    let mut reaction_map: HashMap<String, Vec<(String, Uuid)>> = HashMap::new();
    let mut reactor_ids: Vec<Uuid> = Vec::new();
    for row in &reaction_rows {
        if let Ok(uid) = row.user_id.parse::<Uuid>() {
            reactor_ids.push(uid);
            reaction_map
                .entry(row.message_id.clone())
                .or_default()
                .push((row.emoji.clone(), uid));
        }
    }

    let mut ids: Vec<Uuid> = messages.iter().map(|m| m.sender).collect();
    ids.extend(reactor_ids);
    let profiles = profile_map(db, &ids)?;

    Ok(messages
        .into_iter()
        .map(|message| {
            let reactions = group_reactions(
                reaction_map.get(&message.id.to_string()).map(Vec::as_slice),
                &profiles,
            );
            render_message(message, &profiles, reactions)
        })
        .collect())
}

fn render_message(
    message: Message,
    profiles: &HashMap<Uuid, UserProfile>,
    reactions: Vec<ReactionGroup>,
) -> MessageView {
    let user = match profiles.get(&message.sender) {
        Some(profile) => MessageAuthor {
            username: profile.username.clone(),
            avatar: profile.avatar.clone(),
        },
        None => MessageAuthor {
            username: "system".to_string(),
            avatar: String::new(),
        },
    };

    MessageView {
        id: message.id,
        conversation_id: message.conversation_id,
        user,
        content: message.content,
        kind: message.kind,
        attachment: message.attachment,
        mentions: message.mentions,
        reply_to: message.reply_to,
        reactions,
        time_posted: message.time_posted,
        time_modified: message.time_modified,
    }
}

fn group_reactions(
    rows: Option<&[(String, Uuid)]>,
    profiles: &HashMap<Uuid, UserProfile>,
) -> Vec<ReactionGroup> {
    let Some(rows) = rows else {
        return vec![];
    };

    let mut grouped: Vec<ReactionGroup> = Vec::new();
    for (emoji, uid) in rows {
        let Some(profile) = profiles.get(uid) else {
            continue;
        };
        match grouped.iter_mut().find(|g| g.reaction == *emoji) {
            Some(group) => group.users.push(profile.username.clone()),
            None => grouped.push(ReactionGroup {
                reaction: emoji.clone(),
                users: vec![profile.username.clone()],
            }),
        }
    }
    grouped
}
