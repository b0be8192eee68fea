use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              TEXT PRIMARY KEY,
            username        TEXT NOT NULL UNIQUE,
            avatar_url      TEXT NOT NULL DEFAULT '',
            blocked         TEXT NOT NULL DEFAULT '[]',
            mention_policy  TEXT NOT NULL DEFAULT 'everyone',
            created_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS conversations (
            id                  TEXT PRIMARY KEY,
            name                TEXT NOT NULL DEFAULT '',
            description         TEXT NOT NULL DEFAULT '',
            creator             TEXT NOT NULL,
            collaborators       TEXT NOT NULL DEFAULT '[]',
            members_hash        TEXT NOT NULL,
            members_count       INTEGER NOT NULL DEFAULT 0,
            dm                  INTEGER NOT NULL DEFAULT 0,
            last_message        TEXT NOT NULL DEFAULT '',
            last_message_user   TEXT,
            last_message_id     TEXT,
            last_message_update TEXT NOT NULL,
            cover               TEXT NOT NULL DEFAULT '{}',
            background          TEXT NOT NULL DEFAULT '{}',
            time_created        TEXT NOT NULL,
            last_time_modified  TEXT NOT NULL,
            reports_count       INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_hash
            ON conversations(members_hash);
        CREATE INDEX IF NOT EXISTS idx_conversations_activity
            ON conversations(last_message_update);

        CREATE TABLE IF NOT EXISTS conversation_members (
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            member          TEXT NOT NULL,
            inviter         TEXT NOT NULL,
            queue           INTEGER NOT NULL DEFAULT 0,
            invited_on      TEXT NOT NULL,
            joined_on       TEXT NOT NULL,
            UNIQUE(conversation_id, member)
        );

        CREATE INDEX IF NOT EXISTS idx_members_member
            ON conversation_members(member, queue);

        CREATE TABLE IF NOT EXISTS messages (
            id                 TEXT PRIMARY KEY,
            conversation_id    TEXT NOT NULL,
            sender             TEXT NOT NULL,
            content            TEXT NOT NULL DEFAULT '',
            kind               TEXT NOT NULL DEFAULT 'text',
            attachment         TEXT,
            mentions           TEXT NOT NULL DEFAULT '[]',
            reply_to           TEXT,
            last_reaction_time TEXT,
            time_posted        TEXT NOT NULL,
            time_modified      TEXT NOT NULL,
            reports_count      INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, time_posted);

        CREATE TABLE IF NOT EXISTS reactions (
            id          TEXT PRIMARY KEY,
            message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL,
            emoji       TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            UNIQUE(message_id, user_id, emoji)
        );

        CREATE INDEX IF NOT EXISTS idx_reactions_message
            ON reactions(message_id);

        CREATE TABLE IF NOT EXISTS chat_views (
            user_id           TEXT NOT NULL,
            conversation_id   TEXT NOT NULL,
            last_message_read TEXT,
            last_time_read    TEXT,
            read              INTEGER NOT NULL DEFAULT 1,
            time_posted       TEXT NOT NULL,
            UNIQUE(user_id, conversation_id)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
