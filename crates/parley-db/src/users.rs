//! Identity-store lookups. The conversation core treats users as external,
//! read-only records; `upsert_user` exists for the identity-sync path and
//! the test suites.

use std::collections::HashMap;

use anyhow::Result;
use rusqlite::Connection;
use uuid::Uuid;

use parley_types::models::{User, UserProfile};

use crate::models::{UserRow, policy_to_str};
use crate::{Database, OptionalExt, fmt_ts};

impl Database {
    pub fn upsert_user(&self, user: &User) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, avatar_url, blocked, mention_policy, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    username = excluded.username,
                    avatar_url = excluded.avatar_url,
                    blocked = excluded.blocked,
                    mention_policy = excluded.mention_policy",
                rusqlite::params![
                    user.id.to_string(),
                    user.username,
                    user.avatar_url,
                    serde_json::to_string(&user.blocked)?,
                    policy_to_str(user.mention_policy),
                    fmt_ts(user.created_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.with_conn(|conn| {
            query_user(conn, "WHERE username = ?1", username)
        })
    }

    pub fn user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        self.with_conn(|conn| query_user(conn, "WHERE id = ?1", &id.to_string()))
    }

    /// Batch resolution of ids to public profiles. Unknown ids are simply
    /// absent from the returned map.
    pub fn profiles_by_ids(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, UserProfile>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        self.with_conn(|conn| {
            let rendered: Vec<String> = ids.iter().map(Uuid::to_string).collect();
            let placeholders: Vec<String> =
                (1..=rendered.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT id, username, avatar_url FROM users WHERE id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = rendered
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut map = HashMap::with_capacity(rows.len());
            for (id, username, avatar) in rows {
                let id: Uuid = id.parse()?;
                map.insert(id, UserProfile { id, username, avatar });
            }
            Ok(map)
        })
    }
}

fn query_user(conn: &Connection, filter: &str, param: &str) -> Result<Option<User>> {
    let sql = format!(
        "SELECT id, username, avatar_url, blocked, mention_policy, created_at FROM users {}",
        filter
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([param], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                avatar_url: row.get(2)?,
                blocked: row.get(3)?,
                mention_policy: row.get(4)?,
                created_at: row.get(5)?,
            })
        })
        .optional()?;

    row.map(UserRow::into_user).transpose()
}
