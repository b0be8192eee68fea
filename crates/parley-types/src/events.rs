use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::MessageView;

/// Events pushed to live connections over the WebSocket gateway.
///
/// Delivery is best-effort, at-most-once per open connection: users with no
/// live connection at dispatch time miss the event entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms the connection is authenticated and registered.
    #[serde(rename = "ready")]
    Ready { user_id: Uuid, username: String },

    /// A message was posted to a conversation the recipient belongs to.
    #[serde(rename = "newMessage")]
    NewMessage { message: MessageView },

    /// A message was deleted; `message` is the system-authored tombstone
    /// occupying the deleted message's position in history.
    #[serde(rename = "messageDeleted")]
    MessageDeleted { message: MessageView },

    /// A reaction was toggled on a message.
    #[serde(rename = "reactionChanged")]
    ReactionChanged {
        message_id: Uuid,
        conversation_id: Uuid,
        user: String,
        reaction: String,
        removed: bool,
        time_posted: DateTime<Utc>,
    },

    /// Conversation metadata (name, description, cover, background) changed.
    #[serde(rename = "conversationEdited")]
    ConversationEdited {
        conversation_id: Uuid,
        name: String,
        description: String,
        last_time_modified: DateTime<Utc>,
    },

    /// A pending invite the recipient issued was approved.
    #[serde(rename = "membershipApproved")]
    MembershipApproved {
        conversation_id: Uuid,
        member: String,
        inviter: String,
    },
}

impl GatewayEvent {
    /// Wire name of the event, as used in the outbound event contract.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::NewMessage { .. } => "newMessage",
            Self::MessageDeleted { .. } => "messageDeleted",
            Self::ReactionChanged { .. } => "reactionChanged",
            Self::ConversationEdited { .. } => "conversationEdited",
            Self::MembershipApproved { .. } => "membershipApproved",
        }
    }
}
