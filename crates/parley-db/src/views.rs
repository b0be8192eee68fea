//! Read-state tracker: per-(user, conversation) last-read marker and the
//! unread-count derivation.

use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::ViewRow;
use crate::{Database, OptionalExt, fmt_ts, now_ts};

impl Database {
    /// Record that the user has read up to `message_id`: stamps the marker,
    /// the read time, and flips the flag to read.
    pub fn mark_read(
        &self,
        user: Uuid,
        conversation: Uuid,
        message_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chat_views
                   (user_id, conversation_id, last_message_read, last_time_read, read, time_posted)
                 VALUES (?1, ?2, ?3, ?4, 1, ?4)
                 ON CONFLICT(user_id, conversation_id) DO UPDATE SET
                    last_message_read = excluded.last_message_read,
                    last_time_read = excluded.last_time_read,
                    read = 1",
                rusqlite::params![
                    user.to_string(),
                    conversation.to_string(),
                    message_id.to_string(),
                    fmt_ts(now),
                ],
            )?;
            Ok(())
        })
    }

    /// Set the explicit read/unread flag without touching the last-read
    /// pointer ("mark as unread").
    pub fn set_read_flag(&self, user: Uuid, conversation: Uuid, reading: bool) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chat_views
                   (user_id, conversation_id, read, time_posted)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id, conversation_id) DO UPDATE SET
                    read = excluded.read",
                rusqlite::params![
                    user.to_string(),
                    conversation.to_string(),
                    reading,
                    now_ts(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn view(&self, user: Uuid, conversation: Uuid) -> Result<Option<ViewRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT user_id, conversation_id, last_message_read, last_time_read, read
                     FROM chat_views
                     WHERE user_id = ?1 AND conversation_id = ?2",
                    [user.to_string(), conversation.to_string()],
                    |row| {
                        Ok(ViewRow {
                            user_id: row.get(0)?,
                            conversation_id: row.get(1)?,
                            last_message_read: row.get(2)?,
                            last_time_read: row.get(3)?,
                            read: row.get(4)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Messages posted by someone else after the user's last read time.
    /// Zero when the user has never recorded a read.
    pub fn unread_count(&self, user: Uuid, conversation: Uuid) -> Result<u32> {
        let last_time_read = match self.view(user, conversation)? {
            Some(ViewRow {
                last_time_read: Some(t),
                ..
            }) => t,
            _ => return Ok(0),
        };

        self.with_conn(|conn| {
            let count: u32 = conn.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE conversation_id = ?1 AND sender != ?2 AND time_posted > ?3",
                [conversation.to_string(), user.to_string(), last_time_read],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }
}
