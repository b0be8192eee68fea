//! Presence directory: user handle -> set of live connection handles.
//!
//! Entries are TTL-bounded and ephemeral; they exist only while connections
//! are open and vanish on idle expiry or when the last connection closes.
//! The directory is an injected service owned by the process lifecycle,
//! never a module-level global.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, mpsc};
use tokio::time::Instant;
use uuid::Uuid;

/// Idle TTL for a user's whole presence entry. Heartbeats renew it;
/// a user whose connections all go silent ages out in bulk.
pub const PRESENCE_TTL: Duration = Duration::from_secs(4 * 60 * 60);

struct UserEntry {
    connections: HashMap<Uuid, mpsc::UnboundedSender<String>>,
    expires_at: Instant,
}

#[derive(Clone)]
pub struct PresenceDirectory {
    inner: Arc<RwLock<HashMap<String, UserEntry>>>,
}

impl Default for PresenceDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceDirectory {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a new live connection for a user. Returns the connection
    /// handle and the receiving end the connection task drains.
    pub async fn register(&self, username: &str) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut map = self.inner.write().await;
        let entry = map.entry(username.to_string()).or_insert_with(|| UserEntry {
            connections: HashMap::new(),
            expires_at: Instant::now() + PRESENCE_TTL,
        });
        entry.connections.insert(conn_id, tx);
        entry.expires_at = Instant::now() + PRESENCE_TTL;

        (conn_id, rx)
    }

    /// Remove one connection. The user's entry disappears with its last
    /// connection. Runs synchronously on connection close.
    pub async fn unregister(&self, username: &str, conn_id: Uuid) {
        let mut map = self.inner.write().await;
        if let Some(entry) = map.get_mut(username) {
            entry.connections.remove(&conn_id);
            if entry.connections.is_empty() {
                map.remove(username);
            }
        }
    }

    /// Renew the user's idle TTL. Independent of individual connection
    /// activity: any one connection's heartbeat keeps the whole entry live.
    pub async fn heartbeat(&self, username: &str) {
        let mut map = self.inner.write().await;
        if let Some(entry) = map.get_mut(username) {
            entry.expires_at = Instant::now() + PRESENCE_TTL;
        }
    }

    /// Live connection senders for a user. Expired entries are dropped on
    /// access, as are senders whose receiving task has already gone.
    pub async fn live_connections(
        &self,
        username: &str,
    ) -> Vec<(Uuid, mpsc::UnboundedSender<String>)> {
        let mut map = self.inner.write().await;
        let Some(entry) = map.get_mut(username) else {
            return vec![];
        };

        if entry.expires_at <= Instant::now() {
            map.remove(username);
            return vec![];
        }

        entry.connections.retain(|_, tx| !tx.is_closed());
        if entry.connections.is_empty() {
            map.remove(username);
            return vec![];
        }

        entry
            .connections
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect()
    }

    /// Number of users with at least one registered connection.
    pub async fn online_users(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Drop every entry. Called when the process drains on shutdown.
    pub async fn drain(&self) {
        self.inner.write().await.clear();
    }
}
