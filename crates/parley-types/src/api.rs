use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Attachment, MessageKind, Sensitivity, UrlMap, UserProfile};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the WebSocket gateway.
/// Tokens are minted by the upstream identity service with the same secret;
/// this layer only verifies them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Pagination --

/// Page/limit query string. Each listing applies its own default limit.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    pub limit: Option<u32>,
}

impl PageQuery {
    /// Offset/limit pair, with page numbers starting at 1.
    pub fn window(&self, default_limit: u32) -> (u32, u32) {
        let limit = self.limit.unwrap_or(default_limit).min(200);
        let page = self.page.max(1);
        (limit, (page - 1) * limit)
    }
}

fn default_page() -> u32 {
    1
}

// -- Conversations --

#[derive(Debug, Deserialize)]
pub struct StartConversationRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub members: Vec<String>,
    #[serde(default)]
    pub collaborators: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartConversationResponse {
    pub conversation_id: Uuid,
}

/// Patch applied by `edit_conversation`. Cover and background URL maps are
/// produced by the media collaborator; the core stores them verbatim.
#[derive(Debug, Default, Deserialize)]
pub struct EditConversationRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub cover: Option<UrlMap>,
    pub background: Option<UrlMap>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub creator: Option<UserProfile>,
    pub collaborators: Vec<UserProfile>,
    pub dm: bool,
    pub last_message: String,
    pub last_message_user: Option<UserProfile>,
    pub last_message_id: Option<Uuid>,
    pub last_message_update: DateTime<Utc>,
    pub members_count: u32,
    pub active_members: Vec<UserProfile>,
    pub pending_members: Vec<UserProfile>,
    pub time_created: DateTime<Utc>,
    pub last_time_modified: DateTime<Utc>,
    pub unread_count: u32,
    pub read: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationPage {
    pub page: u32,
    pub limit: u32,
    pub total_count: u32,
    pub conversations: Vec<ConversationSummary>,
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
pub struct DirectMessageQuery {
    pub target: String,
}

// -- Membership --

/// Body of the approve/deny endpoints: the conversation the pending
/// invite belongs to.
#[derive(Debug, Deserialize)]
pub struct ApprovalRequest {
    pub target: Uuid,
}

// -- Messages --

#[derive(Debug, Deserialize)]
pub struct NewMessageRequest {
    pub conversation_id: Uuid,
    #[serde(default)]
    pub content: String,
    #[serde(default = "default_kind")]
    pub kind: MessageKind,
    #[serde(default)]
    pub attachment: Option<Attachment>,
    #[serde(default)]
    pub mentions: Vec<Uuid>,
    #[serde(default)]
    pub reply_target: Option<Uuid>,
}

fn default_kind() -> MessageKind {
    MessageKind::Text
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NewMessageResponse {
    pub id: Uuid,
}

/// One produced variant file reported by the upload collaborator.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaFile {
    pub field: String,
    pub filename: String,
}

/// Manifest handed over by the media collaborator once async processing of
/// an upload has finished. `base_url` is the final CDN prefix.
#[derive(Debug, Deserialize)]
pub struct MediaManifestRequest {
    pub conversation_id: Uuid,
    pub base_url: String,
    pub files: Vec<MediaFile>,
    #[serde(default)]
    pub sensitivity: Sensitivity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageAuthor {
    pub username: String,
    pub avatar: String,
}

/// Reaction symbol with its reacting users resolved to handles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionGroup {
    pub reaction: String,
    pub users: Vec<String>,
}

/// A message as rendered to clients: sender and reaction user ids resolved
/// to display identities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub user: MessageAuthor,
    pub content: String,
    pub kind: MessageKind,
    pub attachment: Option<Attachment>,
    pub mentions: Vec<Uuid>,
    pub reply_to: Option<Uuid>,
    pub reactions: Vec<ReactionGroup>,
    pub time_posted: DateTime<Utc>,
    pub time_modified: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessagePage {
    pub page: u32,
    pub limit: u32,
    pub messages: Vec<MessageView>,
    pub has_more: bool,
}

// -- Reactions --

#[derive(Debug, Deserialize)]
pub struct ReactionRequest {
    pub message_id: Uuid,
    pub emoji: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReactionResponse {
    pub removed: bool,
}

// -- Read state --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkStatusRequest {
    pub reading: bool,
}

// -- Search --

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub keywords: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub messages: Vec<MessageView>,
}
