//! Membership ledger: the per-(conversation, member) state machine and the
//! hash/count recompute that must ride in the same transaction as every
//! membership mutation.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use parley_types::models::Membership;

use crate::hash::members_hash;
use crate::models::MemberRow;
use crate::{Database, OptionalExt, fmt_ts};

#[derive(Debug, PartialEq, Eq)]
pub enum AddMemberOutcome {
    Added,
    /// An active or pending record already exists for this member.
    AlreadyMember,
}

#[derive(Debug, PartialEq, Eq)]
pub enum LeaveOutcome {
    NotMember,
    Left,
    /// The leaver was the last member; the caller owns the cascade.
    Empty,
}

impl Database {
    pub fn members_of(&self, conversation: Uuid) -> Result<Vec<Membership>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT conversation_id, member, inviter, queue, invited_on, joined_on
                 FROM conversation_members WHERE conversation_id = ?1",
            )?;
            let rows = stmt
                .query_map([conversation.to_string()], member_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(MemberRow::into_membership).collect()
        })
    }

    pub fn membership(&self, conversation: Uuid, member: Uuid) -> Result<Option<Membership>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT conversation_id, member, inviter, queue, invited_on, joined_on
                     FROM conversation_members
                     WHERE conversation_id = ?1 AND member = ?2",
                    [conversation.to_string(), member.to_string()],
                    member_row,
                )
                .optional()?;
            row.map(MemberRow::into_membership).transpose()
        })
    }

    /// The member's record only if the invite has been approved.
    pub fn active_membership(
        &self,
        conversation: Uuid,
        member: Uuid,
    ) -> Result<Option<Membership>> {
        Ok(self
            .membership(conversation, member)?
            .filter(|m| !m.queue))
    }

    /// Handles of every active member, for fanout targeting.
    pub fn active_member_usernames(&self, conversation: Uuid) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.username FROM conversation_members m
                 JOIN users u ON u.id = m.member
                 WHERE m.conversation_id = ?1 AND m.queue = 0",
            )?;
            let rows = stmt
                .query_map([conversation.to_string()], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Admin-initiated add: inserts an Active record directly (no approval
    /// queue) and recomputes the membership digest, one transaction.
    pub fn add_member(
        &self,
        conversation: Uuid,
        member: Uuid,
        inviter: Uuid,
        now: DateTime<Utc>,
    ) -> Result<AddMemberOutcome> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let exists = tx
                .query_row(
                    "SELECT 1 FROM conversation_members
                     WHERE conversation_id = ?1 AND member = ?2",
                    [conversation.to_string(), member.to_string()],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if exists {
                return Ok(AddMemberOutcome::AlreadyMember);
            }

            tx.execute(
                "INSERT INTO conversation_members
                   (conversation_id, member, inviter, queue, invited_on, joined_on)
                 VALUES (?1, ?2, ?3, 0, ?4, ?4)",
                rusqlite::params![
                    conversation.to_string(),
                    member.to_string(),
                    inviter.to_string(),
                    fmt_ts(now),
                ],
            )?;

            recompute_members(&tx, conversation)?;
            tx.commit()?;
            Ok(AddMemberOutcome::Added)
        })
    }

    /// Delete a member's record, strip them from collaborators, recompute.
    /// Returns false when no record existed.
    pub fn remove_member(&self, conversation: Uuid, target: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let removed = tx.execute(
                "DELETE FROM conversation_members
                 WHERE conversation_id = ?1 AND member = ?2",
                [conversation.to_string(), target.to_string()],
            )?;
            if removed == 0 {
                return Ok(false);
            }

            strip_collaborator(&tx, conversation, target)?;
            recompute_members(&tx, conversation)?;
            tx.commit()?;
            Ok(true)
        })
    }

    /// Flip the matching pending record to Active, stamping `joined_on` —
    /// the member's message-visibility horizon — to now. Returns false when
    /// no pending record matches the (member, inviter) pair.
    pub fn approve_membership(
        &self,
        conversation: Uuid,
        member: Uuid,
        inviter: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let changed = tx.execute(
                "UPDATE conversation_members SET queue = 0, joined_on = ?4
                 WHERE conversation_id = ?1 AND member = ?2 AND inviter = ?3 AND queue = 1",
                rusqlite::params![
                    conversation.to_string(),
                    member.to_string(),
                    inviter.to_string(),
                    fmt_ts(now),
                ],
            )?;
            if changed == 0 {
                return Ok(false);
            }

            recompute_members(&tx, conversation)?;
            tx.commit()?;
            Ok(true)
        })
    }

    /// Delete the matching pending record. Returns false when none matches.
    /// A later re-invite creates a fresh pending record.
    pub fn deny_membership(&self, conversation: Uuid, member: Uuid, inviter: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let removed = tx.execute(
                "DELETE FROM conversation_members
                 WHERE conversation_id = ?1 AND member = ?2 AND inviter = ?3 AND queue = 1",
                [
                    conversation.to_string(),
                    member.to_string(),
                    inviter.to_string(),
                ],
            )?;
            if removed == 0 {
                return Ok(false);
            }

            recompute_members(&tx, conversation)?;
            tx.commit()?;
            Ok(true)
        })
    }

    /// Remove the member's own record. When that empties the conversation
    /// the caller runs the deletion cascade; a cascade failure must not
    /// undo the committed leave.
    pub fn leave_conversation(&self, conversation: Uuid, member: Uuid) -> Result<LeaveOutcome> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let removed = tx.execute(
                "DELETE FROM conversation_members
                 WHERE conversation_id = ?1 AND member = ?2",
                [conversation.to_string(), member.to_string()],
            )?;
            if removed == 0 {
                return Ok(LeaveOutcome::NotMember);
            }

            let remaining: u32 = tx.query_row(
                "SELECT COUNT(*) FROM conversation_members WHERE conversation_id = ?1",
                [conversation.to_string()],
                |row| row.get(0),
            )?;

            if remaining == 0 {
                tx.commit()?;
                return Ok(LeaveOutcome::Empty);
            }

            strip_collaborator(&tx, conversation, member)?;
            recompute_members(&tx, conversation)?;
            tx.commit()?;
            Ok(LeaveOutcome::Left)
        })
    }

    /// Creator-only: grant admin rights. Adding an existing collaborator is
    /// a no-op.
    pub fn add_collaborator(&self, conversation: Uuid, user: Uuid) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut collaborators = read_collaborators(&tx, conversation)?;
            if !collaborators.contains(&user) {
                collaborators.push(user);
                write_collaborators(&tx, conversation, &collaborators)?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn remove_collaborator(&self, conversation: Uuid, user: Uuid) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            strip_collaborator(&tx, conversation, user)?;
            tx.commit()?;
            Ok(())
        })
    }
}

/// Recompute `members_hash`/`members_count` from the *post-mutation* active
/// set. Must run inside the mutation's transaction; recomputing from a
/// pre-mutation snapshot drifts under concurrent adds/removes.
pub(crate) fn recompute_members(conn: &Connection, conversation: Uuid) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT member FROM conversation_members
         WHERE conversation_id = ?1 AND queue = 0",
    )?;
    let ids = stmt
        .query_map([conversation.to_string()], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?
        .into_iter()
        .map(|s| s.parse::<Uuid>())
        .collect::<std::result::Result<Vec<_>, _>>()?;

    conn.execute(
        "UPDATE conversations SET members_hash = ?2, members_count = ?3 WHERE id = ?1",
        rusqlite::params![conversation.to_string(), members_hash(&ids), ids.len() as u32],
    )?;
    Ok(())
}

fn read_collaborators(conn: &Connection, conversation: Uuid) -> Result<Vec<Uuid>> {
    let raw: String = conn.query_row(
        "SELECT collaborators FROM conversations WHERE id = ?1",
        [conversation.to_string()],
        |row| row.get(0),
    )?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_collaborators(conn: &Connection, conversation: Uuid, collaborators: &[Uuid]) -> Result<()> {
    conn.execute(
        "UPDATE conversations SET collaborators = ?2 WHERE id = ?1",
        rusqlite::params![
            conversation.to_string(),
            serde_json::to_string(collaborators)?
        ],
    )?;
    Ok(())
}

fn strip_collaborator(conn: &Connection, conversation: Uuid, user: Uuid) -> Result<()> {
    let collaborators = read_collaborators(conn, conversation)?;
    if collaborators.contains(&user) {
        let remaining: Vec<Uuid> = collaborators.into_iter().filter(|c| *c != user).collect();
        write_collaborators(conn, conversation, &remaining)?;
    }
    Ok(())
}

fn member_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemberRow> {
    Ok(MemberRow {
        conversation_id: row.get(0)?,
        member: row.get(1)?,
        inviter: row.get(2)?,
        queue: row.get(3)?,
        invited_on: row.get(4)?,
        joined_on: row.get(5)?,
    })
}
