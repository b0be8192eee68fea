//! Scenario tests driving the operation handlers directly: conversation
//! dedup, the invite approval flow with its visibility horizon, reaction
//! toggling with fanout, tombstone deletion, and cascade on last leave.

use std::sync::Arc;

use axum::{Extension, Json, extract::Path, extract::Query, extract::State};
use uuid::Uuid;

use parley_api::error::AppError;
use parley_api::{AppState, AppStateInner, conversations, members, messages, reactions, views};
use parley_db::Database;
use parley_gateway::dispatcher::Dispatcher;
use parley_gateway::presence::PresenceDirectory;
use parley_types::api::{
    ApprovalRequest, Claims, NewMessageRequest, PageQuery, ReactionRequest,
    StartConversationRequest,
};
use parley_types::events::GatewayEvent;
use parley_types::models::{Attachment, MentionPolicy, MessageKind, Sensitivity, User};

fn test_state() -> (AppState, PresenceDirectory) {
    let db = Database::open_in_memory().unwrap();
    let presence = PresenceDirectory::new();
    let dispatcher = Dispatcher::new(presence.clone());
    let state = Arc::new(AppStateInner {
        db,
        dispatcher,
        jwt_secret: "test-secret".to_string(),
        http: reqwest::Client::new(),
    });
    (state, presence)
}

fn seed_user(state: &AppState, username: &str, policy: MentionPolicy) -> (Uuid, Claims) {
    let id = Uuid::new_v4();
    state
        .db
        .upsert_user(&User {
            id,
            username: username.to_string(),
            avatar_url: format!("https://cdn.example/{username}_360p.webp"),
            blocked: vec![],
            mention_policy: policy,
            created_at: chrono::Utc::now(),
        })
        .unwrap();
    let claims = Claims {
        sub: id,
        username: username.to_string(),
        exp: usize::MAX,
    };
    (id, claims)
}

async fn start(
    state: &AppState,
    claims: &Claims,
    members: &[&str],
    collaborators: &[&str],
) -> Result<Uuid, AppError> {
    let (_, Json(resp)) = conversations::start_conversation(
        State(state.clone()),
        Path(claims.username.clone()),
        Extension(claims.clone()),
        Json(StartConversationRequest {
            name: "".to_string(),
            description: "".to_string(),
            members: members.iter().map(|m| m.to_string()).collect(),
            collaborators: collaborators.iter().map(|c| c.to_string()).collect(),
        }),
    )
    .await?;
    Ok(resp.conversation_id)
}

async fn post_text(
    state: &AppState,
    claims: &Claims,
    conversation_id: Uuid,
    content: &str,
) -> Result<Uuid, AppError> {
    let (_, Json(resp)) = messages::create_message(
        State(state.clone()),
        Path(claims.username.clone()),
        Extension(claims.clone()),
        Json(NewMessageRequest {
            conversation_id,
            content: content.to_string(),
            kind: MessageKind::Text,
            attachment: None,
            mentions: vec![],
            reply_target: None,
        }),
    )
    .await?;
    Ok(resp.id)
}

fn next_event(rx: &mut tokio::sync::mpsc::UnboundedReceiver<String>) -> GatewayEvent {
    let payload = rx.try_recv().expect("expected a delivered event");
    serde_json::from_str(&payload).unwrap()
}

fn default_page() -> Query<PageQuery> {
    Query(PageQuery {
        page: 1,
        limit: None,
    })
}

#[tokio::test]
async fn duplicate_dm_is_a_conflict() {
    let (state, _presence) = test_state();
    let (_, alice) = seed_user(&state, "alice", MentionPolicy::Everyone);
    seed_user(&state, "bob", MentionPolicy::Everyone);

    let conv = start(&state, &alice, &["bob"], &[]).await.unwrap();
    let stored = state.db.conversation_by_id(conv).unwrap().unwrap();
    assert!(stored.dm);
    assert_eq!(stored.members_count, 2);
    // DM collaborators are forced to be both members.
    assert_eq!(stored.collaborators.len(), 2);

    let err = start(&state, &alice, &["bob"], &[]).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn actor_target_mismatch_is_forbidden() {
    let (state, _presence) = test_state();
    let (_, alice) = seed_user(&state, "alice", MentionPolicy::Everyone);
    seed_user(&state, "bob", MentionPolicy::Everyone);

    let err = conversations::start_conversation(
        State(state.clone()),
        Path("bob".to_string()),
        Extension(alice),
        Json(StartConversationRequest {
            name: String::new(),
            description: String::new(),
            members: vec!["bob".to_string()],
            collaborators: vec![],
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));
}

#[tokio::test]
async fn approval_activates_membership_and_notifies_the_inviter() {
    let (state, presence) = test_state();
    let (_, alice) = seed_user(&state, "alice", MentionPolicy::Everyone);
    let (bob_id, bob) = seed_user(&state, "bob", MentionPolicy::Approval);

    let conv = start(&state, &alice, &["bob"], &[]).await.unwrap();

    // Bob's approval policy parked him in the queue.
    let membership = state.db.membership(conv, bob_id).unwrap().unwrap();
    assert!(membership.queue);

    // Pending members cannot post.
    let err = post_text(&state, &bob, conv, "am I in yet?").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    // Alice posts while Bob is still pending.
    post_text(&state, &alice, conv, "posted before approval")
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    let (_conn, mut alice_rx) = presence.register("alice").await;
    members::approve_membership(
        State(state.clone()),
        Path(("bob".to_string(), "alice".to_string())),
        Extension(bob.clone()),
        Json(ApprovalRequest { target: conv }),
    )
    .await
    .unwrap();

    let membership = state.db.active_membership(conv, bob_id).unwrap().unwrap();
    assert!(!membership.queue);

    match next_event(&mut alice_rx) {
        GatewayEvent::MembershipApproved {
            conversation_id,
            member,
            inviter,
        } => {
            assert_eq!(conversation_id, conv);
            assert_eq!(member, "bob");
            assert_eq!(inviter, "alice");
        }
        other => panic!("expected membershipApproved, got {}", other.name()),
    }

    // Bob's page excludes everything posted before his horizon.
    let Json(page) = messages::list_messages(
        State(state.clone()),
        Path(conv),
        default_page(),
        Extension(bob.clone()),
    )
    .await
    .unwrap();
    assert!(page.messages.is_empty());

    post_text(&state, &alice, conv, "posted after approval")
        .await
        .unwrap();
    let Json(page) = messages::list_messages(
        State(state.clone()),
        Path(conv),
        default_page(),
        Extension(bob),
    )
    .await
    .unwrap();
    assert_eq!(page.messages.len(), 1);
    assert_eq!(page.messages[0].content, "posted after approval");
    assert_eq!(page.messages[0].user.username, "alice");

    // A second approval for the same invite finds nothing.
    let err = members::approve_membership(
        State(state.clone()),
        Path(("bob".to_string(), "alice".to_string())),
        Extension(Claims {
            sub: bob_id,
            username: "bob".to_string(),
            exp: usize::MAX,
        }),
        Json(ApprovalRequest { target: conv }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn denied_dm_invite_cascades_the_whole_conversation() {
    let (state, _presence) = test_state();
    let (_, alice) = seed_user(&state, "alice", MentionPolicy::Everyone);
    let (bob_id, bob) = seed_user(&state, "bob", MentionPolicy::Approval);

    let conv = start(&state, &alice, &["bob"], &[]).await.unwrap();
    post_text(&state, &alice, conv, "hello?").await.unwrap();

    members::deny_membership(
        State(state.clone()),
        Path(("bob".to_string(), "alice".to_string())),
        Extension(bob),
        Json(ApprovalRequest { target: conv }),
    )
    .await
    .unwrap();

    assert!(state.db.conversation_by_id(conv).unwrap().is_none());
    assert!(state.db.members_of(conv).unwrap().is_empty());
    assert!(state.db.membership(conv, bob_id).unwrap().is_none());
    let (msgs, total) = state
        .db
        .list_messages(conv, chrono::DateTime::UNIX_EPOCH, 50, 0)
        .unwrap();
    assert!(msgs.is_empty());
    assert_eq!(total, 0);
}

#[tokio::test]
async fn double_reaction_toggles_back_and_emits_both_deltas() {
    let (state, presence) = test_state();
    let (_, alice) = seed_user(&state, "alice", MentionPolicy::Everyone);
    let (_, bob) = seed_user(&state, "bob", MentionPolicy::Everyone);

    let conv = start(&state, &alice, &["bob"], &[]).await.unwrap();
    let message_id = post_text(&state, &alice, conv, "react to me").await.unwrap();

    let (_conn, mut alice_rx) = presence.register("alice").await;

    let react = |removed_expected: bool| {
        let state = state.clone();
        let bob = bob.clone();
        async move {
            let Json(resp) = reactions::react_to_message(
                State(state),
                Path("bob".to_string()),
                Extension(bob),
                Json(ReactionRequest {
                    message_id,
                    emoji: "👍".to_string(),
                }),
            )
            .await
            .unwrap();
            assert_eq!(resp.removed, removed_expected);
        }
    };

    react(false).await;
    react(true).await;

    // Final state: no reaction entry survives the toggle pair.
    assert!(state.db.reactions_for_messages(&[message_id]).unwrap().is_empty());

    // Two deltas, the second flagged as removal.
    match next_event(&mut alice_rx) {
        GatewayEvent::ReactionChanged { removed, user, .. } => {
            assert!(!removed);
            assert_eq!(user, "bob");
        }
        other => panic!("expected reactionChanged, got {}", other.name()),
    }
    match next_event(&mut alice_rx) {
        GatewayEvent::ReactionChanged { removed, reaction, .. } => {
            assert!(removed);
            assert_eq!(reaction, "👍");
        }
        other => panic!("expected reactionChanged, got {}", other.name()),
    }

    // Malformed symbols never reach the store.
    let err = reactions::react_to_message(
        State(state.clone()),
        Path("bob".to_string()),
        Extension(bob),
        Json(ReactionRequest {
            message_id,
            emoji: "not-an-emoji".to_string(),
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn only_the_sender_may_delete_and_a_tombstone_takes_the_slot() {
    let (state, presence) = test_state();
    let (_, alice) = seed_user(&state, "alice", MentionPolicy::Everyone);
    let (_, bob) = seed_user(&state, "bob", MentionPolicy::Everyone);

    let conv = start(&state, &alice, &["bob"], &[]).await.unwrap();
    let message_id = post_text(&state, &alice, conv, "regrettable").await.unwrap();
    let original = state.db.message_by_id(message_id).unwrap().unwrap();

    // Not the owner.
    let err = messages::delete_message(
        State(state.clone()),
        Path(("bob".to_string(), message_id)),
        Extension(bob.clone()),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    let (_conn, mut bob_rx) = presence.register("bob").await;
    messages::delete_message(
        State(state.clone()),
        Path(("alice".to_string(), message_id)),
        Extension(alice),
    )
    .await
    .unwrap();

    assert!(state.db.message_by_id(message_id).unwrap().is_none());

    let tombstone = match next_event(&mut bob_rx) {
        GatewayEvent::MessageDeleted { message } => message,
        other => panic!("expected messageDeleted, got {}", other.name()),
    };
    assert_eq!(tombstone.user.username, "system");
    assert_eq!(tombstone.time_posted, original.time_posted);
    assert!(matches!(
        tombstone.attachment,
        Some(Attachment::Remover { message_id: m }) if m == message_id
    ));

    // The tombstone occupies the original slot in Bob's history.
    let Json(page) = messages::list_messages(
        State(state.clone()),
        Path(conv),
        default_page(),
        Extension(bob),
    )
    .await
    .unwrap();
    assert_eq!(page.messages.len(), 1);
    assert_eq!(page.messages[0].content, "@alice deleted a message");
}

#[tokio::test]
async fn last_leave_cascades_the_conversation_away() {
    let (state, _presence) = test_state();
    let (_, alice) = seed_user(&state, "alice", MentionPolicy::Everyone);
    let (_, bob) = seed_user(&state, "bob", MentionPolicy::Everyone);
    let (_, carol) = seed_user(&state, "carol", MentionPolicy::Everyone);

    let conv = start(&state, &alice, &["bob", "carol"], &[]).await.unwrap();
    post_text(&state, &alice, conv, "short-lived").await.unwrap();

    for claims in [&alice, &bob, &carol] {
        members::leave_conversation(
            State(state.clone()),
            Path((claims.username.clone(), conv)),
            Extension(claims.clone()),
        )
        .await
        .unwrap();
    }

    let err = conversations::get_conversation(
        State(state.clone()),
        Path(conv),
        Extension(Claims {
            sub: Uuid::new_v4(),
            username: "alice".to_string(),
            exp: usize::MAX,
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn posting_fans_out_to_live_connections_with_resolved_identity() {
    let (state, presence) = test_state();
    let (_, alice) = seed_user(&state, "alice", MentionPolicy::Everyone);
    seed_user(&state, "bob", MentionPolicy::Everyone);

    let conv = start(&state, &alice, &["bob"], &[]).await.unwrap();

    let (_b1, mut bob_rx1) = presence.register("bob").await;
    let (_b2, mut bob_rx2) = presence.register("bob").await;

    post_text(&state, &alice, conv, "hi both screens").await.unwrap();

    for rx in [&mut bob_rx1, &mut bob_rx2] {
        match next_event(rx) {
            GatewayEvent::NewMessage { message } => {
                assert_eq!(message.content, "hi both screens");
                assert_eq!(message.user.username, "alice");
                assert!(!message.user.avatar.is_empty());
            }
            other => panic!("expected newMessage, got {}", other.name()),
        }
    }
}

#[tokio::test]
async fn invalid_message_payloads_are_rejected() {
    let (state, _presence) = test_state();
    let (_, alice) = seed_user(&state, "alice", MentionPolicy::Everyone);
    seed_user(&state, "bob", MentionPolicy::Everyone);
    let conv = start(&state, &alice, &["bob"], &[]).await.unwrap();

    // Empty trimmed text
    let err = post_text(&state, &alice, conv, "   ").await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    // Sticker without attachment
    let err = messages::create_message(
        State(state.clone()),
        Path("alice".to_string()),
        Extension(alice.clone()),
        Json(NewMessageRequest {
            conversation_id: conv,
            content: String::new(),
            kind: MessageKind::Sticker,
            attachment: None,
            mentions: vec![],
            reply_target: None,
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    // Sticker from a non-allow-listed host is rejected before any
    // network round trip.
    let err = messages::create_message(
        State(state.clone()),
        Path("alice".to_string()),
        Extension(alice),
        Json(NewMessageRequest {
            conversation_id: conv,
            content: String::new(),
            kind: MessageKind::Sticker,
            attachment: Some(Attachment::Sticker {
                url: "https://example.com/sneaky.gif".to_string(),
                sensitivity: Sensitivity::Neutral,
            }),
            mentions: vec![],
            reply_target: None,
        }),
    )
    .await
    .unwrap_err();
    match err {
        AppError::Validation(msg) => assert!(msg.contains("domain not allowed")),
        other => panic!("expected validation error, got {:?}", other),
    }
}

#[tokio::test]
async fn unread_state_in_conversation_summary() {
    let (state, _presence) = test_state();
    let (_, alice) = seed_user(&state, "alice", MentionPolicy::Everyone);
    let (_, bob) = seed_user(&state, "bob", MentionPolicy::Everyone);
    let conv = start(&state, &alice, &["bob"], &[]).await.unwrap();

    let first = post_text(&state, &alice, conv, "one").await.unwrap();
    views::read_conversation(
        State(state.clone()),
        Path(("bob".to_string(), conv, first)),
        Extension(bob.clone()),
    )
    .await
    .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    post_text(&state, &alice, conv, "two").await.unwrap();
    post_text(&state, &alice, conv, "three").await.unwrap();

    let Json(summary) = conversations::get_conversation(
        State(state.clone()),
        Path(conv),
        Extension(bob.clone()),
    )
    .await
    .unwrap();
    assert_eq!(summary.unread_count, 2);
    assert!(!summary.read);
    assert_eq!(summary.active_members.len(), 2);
    assert_eq!(summary.last_message, "three");
}
