//! Conversation registry: creation with duplicate detection, lookups,
//! metadata patches, the last-message cache, and the deletion cascade.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use parley_types::models::{Conversation, UrlMap};

use crate::hash::members_hash;
use crate::models::ConversationRow;
use crate::{Database, OptionalExt, fmt_ts};

/// A member to seed at conversation creation. `queue = true` parks the
/// member in the approval queue instead of activating them immediately.
pub struct NewMember {
    pub id: Uuid,
    pub queue: bool,
}

pub struct NewConversation<'a> {
    pub id: Uuid,
    pub name: &'a str,
    pub description: &'a str,
    pub creator: Uuid,
    pub collaborators: &'a [Uuid],
    pub dm: bool,
    pub members: &'a [NewMember],
    pub now: DateTime<Utc>,
}

impl Database {
    /// Create a conversation plus its seed membership records in one
    /// transaction. Returns `false` when a conversation with the same
    /// member-set hash already exists (nothing is written).
    pub fn create_conversation(&self, new: &NewConversation<'_>) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let member_ids: Vec<Uuid> = new.members.iter().map(|m| m.id).collect();
            let hash = members_hash(&member_ids);

            let duplicate = tx
                .query_row(
                    "SELECT 1 FROM conversations WHERE members_hash = ?1",
                    [&hash],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if duplicate {
                return Ok(false);
            }

            let now = fmt_ts(new.now);
            let active_count = new.members.iter().filter(|m| !m.queue).count() as u32;

            tx.execute(
                "INSERT INTO conversations
                   (id, name, description, creator, collaborators, members_hash,
                    members_count, dm, last_message, last_message_user,
                    last_message_update, time_created, last_time_modified)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, '', ?4, ?9, ?9, ?9)",
                rusqlite::params![
                    new.id.to_string(),
                    new.name,
                    new.description,
                    new.creator.to_string(),
                    serde_json::to_string(new.collaborators)?,
                    hash,
                    active_count,
                    new.dm,
                    now,
                ],
            )?;

            for member in new.members {
                tx.execute(
                    "INSERT INTO conversation_members
                       (conversation_id, member, inviter, queue, invited_on, joined_on)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                    rusqlite::params![
                        new.id.to_string(),
                        member.id.to_string(),
                        new.creator.to_string(),
                        member.queue,
                        now,
                    ],
                )?;
            }

            tx.commit()?;
            Ok(true)
        })
    }

    pub fn conversation_by_id(&self, id: Uuid) -> Result<Option<Conversation>> {
        self.with_conn(|conn| query_conversation(conn, id))
    }

    /// The DM conversation both users belong to, if one exists.
    pub fn find_dm(&self, a: Uuid, b: Uuid) -> Result<Option<Uuid>> {
        self.with_conn(|conn| {
            let id: Option<String> = conn
                .query_row(
                    "SELECT c.id FROM conversations c
                     JOIN conversation_members m1
                       ON m1.conversation_id = c.id AND m1.member = ?1
                     JOIN conversation_members m2
                       ON m2.conversation_id = c.id AND m2.member = ?2
                     WHERE c.dm = 1
                     LIMIT 1",
                    [a.to_string(), b.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(id.map(|s| s.parse()).transpose()?)
        })
    }

    /// Conversations the user actively belongs to, most recent activity
    /// first. Returns the requested page and the total count.
    pub fn conversations_for_user(
        &self,
        user: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<Conversation>, u32)> {
        self.with_conn(|conn| {
            let total: u32 = conn.query_row(
                "SELECT COUNT(*) FROM conversation_members WHERE member = ?1 AND queue = 0",
                [user.to_string()],
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM conversations c
                 JOIN conversation_members m
                   ON m.conversation_id = c.id
                 WHERE m.member = ?1 AND m.queue = 0
                 ORDER BY c.last_message_update DESC
                 LIMIT ?2 OFFSET ?3",
                CONVERSATION_COLUMNS
            ))?;

            let rows = stmt
                .query_map(
                    rusqlite::params![user.to_string(), limit, offset],
                    conversation_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let conversations = rows
                .into_iter()
                .map(ConversationRow::into_conversation)
                .collect::<Result<Vec<_>>>()?;
            Ok((conversations, total))
        })
    }

    /// Apply an edit patch. Only provided fields change; `last_time_modified`
    /// is always stamped. Returns false when the conversation is missing.
    pub fn patch_conversation(
        &self,
        id: Uuid,
        name: Option<&str>,
        description: Option<&str>,
        cover: Option<&UrlMap>,
        background: Option<&UrlMap>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let cover_json = cover.map(serde_json::to_string).transpose()?;
            let background_json = background.map(serde_json::to_string).transpose()?;
            let changed = conn.execute(
                "UPDATE conversations SET
                    name = COALESCE(?2, name),
                    description = COALESCE(?3, description),
                    cover = COALESCE(?4, cover),
                    background = COALESCE(?5, background),
                    last_time_modified = ?6
                 WHERE id = ?1",
                rusqlite::params![
                    id.to_string(),
                    name,
                    description,
                    cover_json,
                    background_json,
                    fmt_ts(now),
                ],
            )?;
            Ok(changed > 0)
        })
    }

    /// Refresh the denormalized last-message cache used for list rendering.
    pub fn update_last_message(
        &self,
        conversation: Uuid,
        text: &str,
        sender: Uuid,
        message_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE conversations SET
                    last_message = ?2,
                    last_message_user = ?3,
                    last_message_id = ?4,
                    last_message_update = ?5
                 WHERE id = ?1",
                rusqlite::params![
                    conversation.to_string(),
                    text,
                    sender.to_string(),
                    message_id.to_string(),
                    fmt_ts(at),
                ],
            )?;
            Ok(())
        })
    }

    /// Remove a conversation and everything hanging off it: messages (and
    /// their reactions via the FK cascade), membership records, read-state
    /// rows, then the conversation itself. One transaction.
    pub fn delete_conversation_cascade(&self, id: Uuid) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let id = id.to_string();
            tx.execute("DELETE FROM messages WHERE conversation_id = ?1", [&id])?;
            tx.execute(
                "DELETE FROM conversation_members WHERE conversation_id = ?1",
                [&id],
            )?;
            tx.execute("DELETE FROM chat_views WHERE conversation_id = ?1", [&id])?;
            tx.execute("DELETE FROM conversations WHERE id = ?1", [&id])?;
            tx.commit()?;
            Ok(())
        })
    }
}

pub(crate) const CONVERSATION_COLUMNS: &str =
    "c.id, c.name, c.description, c.creator, c.collaborators, c.members_hash,
     c.members_count, c.dm, c.last_message, c.last_message_user, c.last_message_id,
     c.last_message_update, c.cover, c.background, c.time_created,
     c.last_time_modified, c.reports_count";

pub(crate) fn conversation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        creator: row.get(3)?,
        collaborators: row.get(4)?,
        members_hash: row.get(5)?,
        members_count: row.get(6)?,
        dm: row.get(7)?,
        last_message: row.get(8)?,
        last_message_user: row.get(9)?,
        last_message_id: row.get(10)?,
        last_message_update: row.get(11)?,
        cover: row.get(12)?,
        background: row.get(13)?,
        time_created: row.get(14)?,
        last_time_modified: row.get(15)?,
        reports_count: row.get(16)?,
    })
}

fn query_conversation(conn: &Connection, id: Uuid) -> Result<Option<Conversation>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM conversations c WHERE c.id = ?1",
        CONVERSATION_COLUMNS
    ))?;

    let row = stmt
        .query_row([id.to_string()], conversation_row)
        .optional()?;

    row.map(ConversationRow::into_conversation).transpose()
}
