//! Database row types and their conversions into the shared domain models.
//! Rows keep the raw TEXT columns; conversion parses timestamps, UUIDs and
//! JSON columns in one place.

use anyhow::{Context, Result};
use uuid::Uuid;

use parley_types::models::{
    Attachment, Conversation, MentionPolicy, Membership, Message, MessageKind, User,
};

use crate::parse_ts;

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub avatar_url: String,
    pub blocked: String,
    pub mention_policy: String,
    pub created_at: String,
}

pub struct ConversationRow {
    pub id: String,
    pub name: String,
    pub description: String,
    pub creator: String,
    pub collaborators: String,
    pub members_hash: String,
    pub members_count: u32,
    pub dm: bool,
    pub last_message: String,
    pub last_message_user: Option<String>,
    pub last_message_id: Option<String>,
    pub last_message_update: String,
    pub cover: String,
    pub background: String,
    pub time_created: String,
    pub last_time_modified: String,
    pub reports_count: u32,
}

pub struct MemberRow {
    pub conversation_id: String,
    pub member: String,
    pub inviter: String,
    pub queue: bool,
    pub invited_on: String,
    pub joined_on: String,
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender: String,
    pub content: String,
    pub kind: String,
    pub attachment: Option<String>,
    pub mentions: String,
    pub reply_to: Option<String>,
    pub last_reaction_time: Option<String>,
    pub time_posted: String,
    pub time_modified: String,
    pub reports_count: u32,
}

pub struct ReactionRow {
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
}

pub struct ViewRow {
    pub user_id: String,
    pub conversation_id: String,
    pub last_message_read: Option<String>,
    pub last_time_read: Option<String>,
    pub read: bool,
}

pub fn kind_to_str(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::Text => "text",
        MessageKind::Media => "media",
        MessageKind::Sticker => "sticker",
        MessageKind::Gif => "gif",
    }
}

pub fn kind_from_str(s: &str) -> Result<MessageKind> {
    match s {
        "text" => Ok(MessageKind::Text),
        "media" => Ok(MessageKind::Media),
        "sticker" => Ok(MessageKind::Sticker),
        "gif" => Ok(MessageKind::Gif),
        other => anyhow::bail!("unknown message kind: {}", other),
    }
}

pub fn policy_to_str(policy: MentionPolicy) -> &'static str {
    match policy {
        MentionPolicy::Everyone => "everyone",
        MentionPolicy::Approval => "approval",
        MentionPolicy::Nobody => "nobody",
    }
}

pub fn policy_from_str(s: &str) -> Result<MentionPolicy> {
    match s {
        "everyone" => Ok(MentionPolicy::Everyone),
        "approval" => Ok(MentionPolicy::Approval),
        "nobody" => Ok(MentionPolicy::Nobody),
        other => anyhow::bail!("unknown mention policy: {}", other),
    }
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    s.parse::<Uuid>().with_context(|| format!("corrupt uuid '{}'", s))
}

impl UserRow {
    pub fn into_user(self) -> Result<User> {
        Ok(User {
            id: parse_uuid(&self.id)?,
            username: self.username,
            avatar_url: self.avatar_url,
            blocked: serde_json::from_str(&self.blocked)?,
            mention_policy: policy_from_str(&self.mention_policy)?,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

impl ConversationRow {
    pub fn into_conversation(self) -> Result<Conversation> {
        Ok(Conversation {
            id: parse_uuid(&self.id)?,
            name: self.name,
            description: self.description,
            creator: parse_uuid(&self.creator)?,
            collaborators: serde_json::from_str(&self.collaborators)?,
            members_hash: self.members_hash,
            members_count: self.members_count,
            dm: self.dm,
            last_message: self.last_message,
            last_message_user: self.last_message_user.as_deref().map(parse_uuid).transpose()?,
            last_message_id: self.last_message_id.as_deref().map(parse_uuid).transpose()?,
            last_message_update: parse_ts(&self.last_message_update)?,
            cover: serde_json::from_str(&self.cover)?,
            background: serde_json::from_str(&self.background)?,
            time_created: parse_ts(&self.time_created)?,
            last_time_modified: parse_ts(&self.last_time_modified)?,
            reports_count: self.reports_count,
        })
    }
}

impl MemberRow {
    pub fn into_membership(self) -> Result<Membership> {
        Ok(Membership {
            conversation_id: parse_uuid(&self.conversation_id)?,
            member: parse_uuid(&self.member)?,
            inviter: parse_uuid(&self.inviter)?,
            queue: self.queue,
            invited_on: parse_ts(&self.invited_on)?,
            joined_on: parse_ts(&self.joined_on)?,
        })
    }
}

impl MessageRow {
    pub fn into_message(self) -> Result<Message> {
        let attachment: Option<Attachment> = self
            .attachment
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        let last_reaction_time = self.last_time_reaction()?;
        Ok(Message {
            id: parse_uuid(&self.id)?,
            conversation_id: parse_uuid(&self.conversation_id)?,
            sender: parse_uuid(&self.sender)?,
            content: self.content,
            kind: kind_from_str(&self.kind)?,
            attachment,
            mentions: serde_json::from_str(&self.mentions)?,
            reply_to: self.reply_to.as_deref().map(parse_uuid).transpose()?,
            last_reaction_time,
            time_posted: parse_ts(&self.time_posted)?,
            time_modified: parse_ts(&self.time_modified)?,
            reports_count: self.reports_count,
        })
    }

    fn last_time_reaction(&self) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
        self.last_reaction_time.as_deref().map(parse_ts).transpose()
    }
}
