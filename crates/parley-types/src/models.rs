use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sender id used for server-authored messages (deletion tombstones).
/// The nil UUID is reserved and can never collide with a real user.
pub const SYSTEM_SENDER: Uuid = Uuid::nil();

/// Who may pull a user into a conversation without going through the
/// approval queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MentionPolicy {
    Everyone,
    Approval,
    Nobody,
}

impl Default for MentionPolicy {
    fn default() -> Self {
        Self::Everyone
    }
}

/// Identity-store record. The conversation core only ever reads these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub avatar_url: String,
    #[serde(default)]
    pub blocked: Vec<Uuid>,
    #[serde(default)]
    pub mention_policy: MentionPolicy,
    pub created_at: DateTime<Utc>,
}

/// Minimal public identity used wherever an id is resolved for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    pub avatar: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Media,
    Sticker,
    Gif,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Neutral,
    Sensitive,
    Unsafe,
}

impl Default for Sensitivity {
    fn default() -> Self {
        Self::Neutral
    }
}

/// One resolution slot of a media attachment. Multi-image messages carry a
/// list of URLs per resolution, everything else a single URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResolutionUrls {
    One(String),
    Many(Vec<String>),
}

/// Per-resolution URL map produced by the media collaborator,
/// e.g. `{"360p": "...", "720p": "..."}`.
pub type UrlMap = BTreeMap<String, ResolutionUrls>;

/// Message attachment, one variant per concrete shape the store accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Attachment {
    Image {
        url: UrlMap,
        #[serde(default)]
        sensitivity: Sensitivity,
    },
    Video {
        url: UrlMap,
        #[serde(default)]
        sensitivity: Sensitivity,
    },
    Gif {
        url: String,
        #[serde(default)]
        sensitivity: Sensitivity,
    },
    Sticker {
        url: String,
        #[serde(default)]
        sensitivity: Sensitivity,
    },
    /// Tombstone reference to a deleted message.
    Remover { message_id: Uuid },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub creator: Uuid,
    pub collaborators: Vec<Uuid>,
    pub members_hash: String,
    pub members_count: u32,
    pub dm: bool,
    pub last_message: String,
    pub last_message_user: Option<Uuid>,
    pub last_message_id: Option<Uuid>,
    pub last_message_update: DateTime<Utc>,
    pub cover: UrlMap,
    pub background: UrlMap,
    pub time_created: DateTime<Utc>,
    pub last_time_modified: DateTime<Utc>,
    pub reports_count: u32,
}

/// Per-(conversation, member) state. `queue` = true means the invite is
/// still pending approval. `joined_on` is the message-visibility horizon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub conversation_id: Uuid,
    pub member: Uuid,
    pub inviter: Uuid,
    pub queue: bool,
    pub invited_on: DateTime<Utc>,
    pub joined_on: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender: Uuid,
    pub content: String,
    pub kind: MessageKind,
    pub attachment: Option<Attachment>,
    pub mentions: Vec<Uuid>,
    pub reply_to: Option<Uuid>,
    pub last_reaction_time: Option<DateTime<Utc>>,
    pub time_posted: DateTime<Utc>,
    pub time_modified: DateTime<Utc>,
    pub reports_count: u32,
}

impl Message {
    pub fn is_system(&self) -> bool {
        self.sender == SYSTEM_SENDER
    }
}
