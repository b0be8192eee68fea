//! WebSocket connection lifecycle: authenticate once at open, register
//! with the presence directory, forward fanned-out events, heartbeat, and
//! unregister synchronously on close.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_types::api::Claims;
use parley_types::events::GatewayEvent;

use crate::presence::PresenceDirectory;

/// Server sends a Ping every 15 seconds; two consecutive missed Pongs
/// (~30s) drop the connection.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How often an open connection renews the user's presence TTL.
const PRESENCE_RENEW_INTERVAL: Duration = Duration::from_secs(30);

/// Validate the credential presented at connection open. Returns the
/// resolved identity, or `None` for an invalid/expired token or a token
/// without a username claim — callers reject the upgrade outright, there
/// is no retry at this layer.
pub fn verify_token(token: &str, jwt_secret: &str) -> Option<(Uuid, String)> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .ok()?;

    if token_data.claims.username.is_empty() {
        return None;
    }
    Some((token_data.claims.sub, token_data.claims.username))
}

/// Drive a connection that already passed `verify_token` at the upgrade.
pub async fn handle_connection(
    socket: WebSocket,
    presence: PresenceDirectory,
    user_id: Uuid,
    username: String,
) {
    let (mut sender, mut receiver) = socket.split();

    info!("{} ({}) connected to gateway", username, user_id);

    let ready = GatewayEvent::Ready {
        user_id,
        username: username.clone(),
    };
    let ready_text = match serde_json::to_string(&ready) {
        Ok(text) => text,
        Err(e) => {
            warn!("failed to serialize ready event: {}", e);
            return;
        }
    };
    if sender.send(Message::Text(ready_text.into())).await.is_err() {
        return;
    }

    let (conn_id, mut event_rx) = presence.register(&username).await;

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward fanned-out events to the client, interleaved with the ping
    // heartbeat and the presence TTL renewal.
    let presence_send = presence.clone();
    let username_send = username.clone();
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut renew = tokio::time::interval(PRESENCE_RENEW_INTERVAL);
        renew.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = event_rx.recv() => {
                    let payload = match result {
                        Some(payload) => payload,
                        None => break,
                    };
                    if sender.send(Message::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!(
                                "Heartbeat timeout (missed {} pongs), dropping connection",
                                missed_heartbeats
                            );
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
                _ = renew.tick() => {
                    presence_send.heartbeat(&username_send).await;
                }
            }
        }
    });

    // The inbound direction only carries liveness traffic; all mutations
    // arrive over the REST surface.
    let username_recv = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                Message::Text(text) => {
                    debug!(
                        "{} sent unexpected text frame: {}",
                        username_recv,
                        &text[..text.len().min(120)]
                    );
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Remove the connection before returning so no later event can be
    // attributed to it.
    presence.unregister(&username, conn_id).await;
    info!("{} ({}) disconnected from gateway", username, user_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn token_for(username: &str, exp_offset_secs: i64) -> String {
        let claims = Claims {
            sub: Uuid::new_v4(),
            username: username.to_string(),
            exp: (chrono::Utc::now().timestamp() + exp_offset_secs) as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap()
    }

    #[test]
    fn valid_token_resolves_identity() {
        let token = token_for("alice", 3600);
        let (_, username) = verify_token(&token, "test-secret").unwrap();
        assert_eq!(username, "alice");
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = token_for("alice", -3600);
        assert!(verify_token(&token, "test-secret").is_none());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = token_for("alice", 3600);
        assert!(verify_token(&token, "other-secret").is_none());
    }

    #[test]
    fn missing_identity_claim_is_rejected() {
        let token = token_for("", 3600);
        assert!(verify_token(&token, "test-secret").is_none());
    }
}
