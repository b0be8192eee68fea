//! Message store: immutable documents, reaction toggling, tombstone
//! replacement, history pages and keyword search.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use parley_types::models::{Message, SYSTEM_SENDER};

use crate::models::{MessageRow, ReactionRow, kind_to_str};
use crate::{Database, OptionalExt, fmt_ts};

impl Database {
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.with_conn(|conn| insert_message(conn, message))
    }

    pub fn message_by_id(&self, id: Uuid) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS),
                    [id.to_string()],
                    message_row,
                )
                .optional()?;
            row.map(MessageRow::into_message).transpose()
        })
    }

    /// One history page for a member whose visibility horizon is
    /// `joined_on`: messages at or after the horizon, newest first.
    pub fn list_messages(
        &self,
        conversation: Uuid,
        joined_on: DateTime<Utc>,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<Message>, u32)> {
        self.with_conn(|conn| {
            let horizon = fmt_ts(joined_on);

            let total: u32 = conn.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE conversation_id = ?1 AND time_posted >= ?2",
                [conversation.to_string(), horizon.clone()],
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM messages
                 WHERE conversation_id = ?1 AND time_posted >= ?2
                 ORDER BY time_posted DESC, id DESC
                 LIMIT ?3 OFFSET ?4",
                MESSAGE_COLUMNS
            ))?;
            let rows = stmt
                .query_map(
                    rusqlite::params![conversation.to_string(), horizon, limit, offset],
                    message_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let messages = rows
                .into_iter()
                .map(MessageRow::into_message)
                .collect::<Result<Vec<_>>>()?;
            Ok((messages, total))
        })
    }

    /// Delete a message and insert its system-authored tombstone with the
    /// identical `time_posted`, preserving its position in history. The
    /// message's reactions go with it (FK cascade). One transaction.
    pub fn replace_with_tombstone(&self, deleted: Uuid, tombstone: &Message) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM messages WHERE id = ?1", [deleted.to_string()])?;
            insert_message(&tx, tombstone)?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Toggle a user's reaction on a message. Returns true when the
    /// reaction was added, false when an existing one was removed. The
    /// unique (message, user, emoji) row makes both directions idempotent
    /// under concurrent toggles.
    pub fn toggle_reaction(
        &self,
        message_id: Uuid,
        user: Uuid,
        emoji: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let existing: Option<String> = tx
                .query_row(
                    "SELECT id FROM reactions
                     WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                    rusqlite::params![message_id.to_string(), user.to_string(), emoji],
                    |row| row.get(0),
                )
                .optional()?;

            let added = match existing {
                Some(id) => {
                    tx.execute("DELETE FROM reactions WHERE id = ?1", [&id])?;
                    false
                }
                None => {
                    tx.execute(
                        "INSERT INTO reactions (id, message_id, user_id, emoji, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        rusqlite::params![
                            Uuid::new_v4().to_string(),
                            message_id.to_string(),
                            user.to_string(),
                            emoji,
                            fmt_ts(now),
                        ],
                    )?;
                    tx.execute(
                        "UPDATE messages SET last_reaction_time = ?2 WHERE id = ?1",
                        rusqlite::params![message_id.to_string(), fmt_ts(now)],
                    )?;
                    true
                }
            };

            tx.commit()?;
            Ok(added)
        })
    }

    /// Batch-fetch reactions for a set of message ids.
    pub fn reactions_for_messages(&self, message_ids: &[Uuid]) -> Result<Vec<ReactionRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let rendered: Vec<String> = message_ids.iter().map(Uuid::to_string).collect();
            let placeholders: Vec<String> =
                (1..=rendered.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT message_id, user_id, emoji FROM reactions WHERE message_id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = rendered
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(ReactionRow {
                        message_id: row.get(0)?,
                        user_id: row.get(1)?,
                        emoji: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Keyword search within one conversation. Keywords are conjunctive
    /// case-insensitive substring filters; system messages are excluded and
    /// the member's visibility horizon applies, same as listing.
    pub fn search_messages(
        &self,
        conversation: Uuid,
        joined_on: DateTime<Utc>,
        keywords: &[String],
        limit: u32,
    ) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let mut sql = format!(
                "SELECT {} FROM messages
                 WHERE conversation_id = ?1 AND sender != ?2 AND time_posted >= ?3",
                MESSAGE_COLUMNS
            );
            let mut params: Vec<String> = vec![
                conversation.to_string(),
                SYSTEM_SENDER.to_string(),
                fmt_ts(joined_on),
            ];
            for keyword in keywords {
                params.push(keyword.clone());
                sql.push_str(&format!(
                    " AND instr(lower(content), ?{}) > 0",
                    params.len()
                ));
            }
            sql.push_str(&format!(
                " ORDER BY time_posted DESC LIMIT ?{}",
                params.len() + 1
            ));

            let mut stmt = conn.prepare(&sql)?;
            let mut bound: Vec<&dyn rusqlite::types::ToSql> = params
                .iter()
                .map(|p| p as &dyn rusqlite::types::ToSql)
                .collect();
            bound.push(&limit);

            let rows = stmt
                .query_map(bound.as_slice(), message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(MessageRow::into_message).collect()
        })
    }

    /// Keyword search across every conversation the user actively belongs
    /// to, each conversation's own `joined_on` horizon applied.
    pub fn search_all_messages(&self, user: Uuid, keywords: &[String]) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let mut sql = format!(
                "SELECT {} FROM messages
                 JOIN conversation_members cm
                   ON cm.conversation_id = messages.conversation_id
                  AND cm.member = ?1 AND cm.queue = 0
                 WHERE sender != ?2 AND time_posted >= cm.joined_on",
                MESSAGE_COLUMNS
            );
            let mut params: Vec<String> = vec![user.to_string(), SYSTEM_SENDER.to_string()];
            for keyword in keywords {
                params.push(keyword.clone());
                sql.push_str(&format!(
                    " AND instr(lower(content), ?{}) > 0",
                    params.len()
                ));
            }
            sql.push_str(" ORDER BY time_posted DESC");

            let mut stmt = conn.prepare(&sql)?;
            let bound: Vec<&dyn rusqlite::types::ToSql> = params
                .iter()
                .map(|p| p as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(bound.as_slice(), message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(MessageRow::into_message).collect()
        })
    }
}

const MESSAGE_COLUMNS: &str =
    "messages.id, messages.conversation_id, messages.sender, messages.content,
     messages.kind, messages.attachment, messages.mentions, messages.reply_to,
     messages.last_reaction_time, messages.time_posted, messages.time_modified,
     messages.reports_count";

fn insert_message(conn: &Connection, message: &Message) -> Result<()> {
    let attachment = message
        .attachment
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    conn.execute(
        "INSERT INTO messages
           (id, conversation_id, sender, content, kind, attachment, mentions,
            reply_to, last_reaction_time, time_posted, time_modified, reports_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        rusqlite::params![
            message.id.to_string(),
            message.conversation_id.to_string(),
            message.sender.to_string(),
            message.content,
            kind_to_str(message.kind),
            attachment,
            serde_json::to_string(&message.mentions)?,
            message.reply_to.map(|id| id.to_string()),
            message.last_reaction_time.map(fmt_ts),
            fmt_ts(message.time_posted),
            fmt_ts(message.time_modified),
            message.reports_count,
        ],
    )?;
    Ok(())
}

fn message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender: row.get(2)?,
        content: row.get(3)?,
        kind: row.get(4)?,
        attachment: row.get(5)?,
        mentions: row.get(6)?,
        reply_to: row.get(7)?,
        last_reaction_time: row.get(8)?,
        time_posted: row.get(9)?,
        time_modified: row.get(10)?,
        reports_count: row.get(11)?,
    })
}
