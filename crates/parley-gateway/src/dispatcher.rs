//! Fanout dispatcher: pushes committed mutations to the live connections of
//! affected users. Best-effort, at-most-once per open connection; a user
//! with no live connection at dispatch time simply misses the event.

use tracing::{error, trace};

use parley_types::events::GatewayEvent;

use crate::presence::PresenceDirectory;

#[derive(Clone)]
pub struct Dispatcher {
    presence: PresenceDirectory,
}

impl Dispatcher {
    pub fn new(presence: PresenceDirectory) -> Self {
        Self { presence }
    }

    pub fn presence(&self) -> &PresenceDirectory {
        &self.presence
    }

    /// Push `event` to every live connection of every named user.
    ///
    /// Callers invoke this only after the causing mutation has committed,
    /// which keeps delivery within one conversation in commit order.
    /// Connections that closed since registration are skipped silently;
    /// per-user delivery is independent, so one dead connection never
    /// blocks the rest. Failures never propagate to the mutating caller.
    pub async fn deliver(&self, usernames: &[String], event: &GatewayEvent) {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                error!("failed to serialize {} event: {}", event.name(), e);
                return;
            }
        };

        for username in usernames {
            for (conn_id, tx) in self.presence.live_connections(username).await {
                if tx.send(payload.clone()).is_err() {
                    trace!(
                        "skipping closed connection {} of {} for {}",
                        conn_id,
                        username,
                        event.name()
                    );
                }
            }
        }
    }

    /// Targeted variant for single-recipient events.
    pub async fn deliver_to_user(&self, username: &str, event: &GatewayEvent) {
        self.deliver(std::slice::from_ref(&username.to_string()), event)
            .await;
    }
}
