//! End-to-end coverage of the persistence layer: conversation dedup,
//! the membership state machine, reaction toggling, tombstones, read
//! state and the visibility horizon.

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use parley_db::Database;
use parley_db::conversations::{NewConversation, NewMember};
use parley_db::members::{AddMemberOutcome, LeaveOutcome};
use parley_types::models::{
    MentionPolicy, Message, MessageKind, SYSTEM_SENDER, User,
};

fn ts(hour: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, hour, min, 0).unwrap()
}

fn seed_user(db: &Database, username: &str) -> Uuid {
    let id = Uuid::new_v4();
    db.upsert_user(&User {
        id,
        username: username.to_string(),
        avatar_url: format!("https://cdn.example/{username}_360p.webp"),
        blocked: vec![],
        mention_policy: MentionPolicy::Everyone,
        created_at: ts(0, 0),
    })
    .unwrap();
    id
}

fn seed_conversation(db: &Database, creator: Uuid, others: &[Uuid], dm: bool) -> Uuid {
    let id = Uuid::new_v4();
    let mut members: Vec<NewMember> = vec![NewMember {
        id: creator,
        queue: false,
    }];
    members.extend(others.iter().map(|m| NewMember {
        id: *m,
        queue: false,
    }));
    let created = db
        .create_conversation(&NewConversation {
            id,
            name: "room",
            description: "",
            creator,
            collaborators: &[creator],
            dm,
            members: &members,
            now: ts(1, 0),
        })
        .unwrap();
    assert!(created);
    id
}

fn text_message(conversation: Uuid, sender: Uuid, content: &str, at: DateTime<Utc>) -> Message {
    Message {
        id: Uuid::new_v4(),
        conversation_id: conversation,
        sender,
        content: content.to_string(),
        kind: MessageKind::Text,
        attachment: None,
        mentions: vec![],
        reply_to: None,
        last_reaction_time: None,
        time_posted: at,
        time_modified: at,
        reports_count: 0,
    }
}

#[test]
fn duplicate_member_set_is_rejected() {
    let db = Database::open_in_memory().unwrap();
    let a = seed_user(&db, "alice");
    let b = seed_user(&db, "bob");

    seed_conversation(&db, a, &[b], true);

    let second = db
        .create_conversation(&NewConversation {
            id: Uuid::new_v4(),
            name: "",
            description: "",
            creator: a,
            collaborators: &[a, b],
            dm: true,
            members: &[
                NewMember { id: a, queue: false },
                NewMember { id: b, queue: false },
            ],
            now: ts(2, 0),
        })
        .unwrap();
    assert!(!second, "same active member set must be rejected");
}

#[test]
fn add_member_recomputes_hash_and_count() {
    let db = Database::open_in_memory().unwrap();
    let a = seed_user(&db, "alice");
    let b = seed_user(&db, "bob");
    let c = seed_user(&db, "carol");
    let conv = seed_conversation(&db, a, &[b], false);

    let before = db.conversation_by_id(conv).unwrap().unwrap();
    assert_eq!(before.members_count, 2);

    let outcome = db.add_member(conv, c, a, ts(2, 0)).unwrap();
    assert_eq!(outcome, AddMemberOutcome::Added);

    let after = db.conversation_by_id(conv).unwrap().unwrap();
    assert_eq!(after.members_count, 3);
    assert_ne!(before.members_hash, after.members_hash);
    assert_eq!(
        after.members_hash,
        parley_db::hash::members_hash(&[a, b, c])
    );

    // A second add of the same user, active or pending, is a conflict.
    assert_eq!(
        db.add_member(conv, c, a, ts(2, 1)).unwrap(),
        AddMemberOutcome::AlreadyMember
    );
}

#[test]
fn approval_flips_pending_and_stamps_horizon() {
    let db = Database::open_in_memory().unwrap();
    let a = seed_user(&db, "alice");
    let b = seed_user(&db, "bob");
    let conv = Uuid::new_v4();
    db.create_conversation(&NewConversation {
        id: conv,
        name: "",
        description: "",
        creator: a,
        collaborators: &[],
        dm: false,
        members: &[
            NewMember { id: a, queue: false },
            NewMember { id: b, queue: true },
        ],
        now: ts(1, 0),
    })
    .unwrap();

    // Message posted while B is still pending.
    db.insert_message(&text_message(conv, a, "before approval", ts(1, 30)))
        .unwrap();

    // Wrong inviter: no matching pending record.
    assert!(!db.approve_membership(conv, b, b, ts(2, 0)).unwrap());

    assert!(db.approve_membership(conv, b, a, ts(2, 0)).unwrap());
    let membership = db.active_membership(conv, b).unwrap().unwrap();
    assert!(!membership.queue);
    assert_eq!(membership.joined_on, ts(2, 0));

    // Approval happens exactly once per invite.
    assert!(!db.approve_membership(conv, b, a, ts(2, 1)).unwrap());

    // The pre-approval message is below B's horizon.
    let (page, total) = db.list_messages(conv, membership.joined_on, 50, 0).unwrap();
    assert_eq!(total, 0);
    assert!(page.is_empty());

    db.insert_message(&text_message(conv, a, "after approval", ts(2, 30)))
        .unwrap();
    let (page, _) = db.list_messages(conv, membership.joined_on, 50, 0).unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].content, "after approval");
}

#[test]
fn denied_invite_leaves_a_clean_slate_for_reinvite() {
    let db = Database::open_in_memory().unwrap();
    let a = seed_user(&db, "alice");
    let b = seed_user(&db, "bob");
    let conv = Uuid::new_v4();
    db.create_conversation(&NewConversation {
        id: conv,
        name: "",
        description: "",
        creator: a,
        collaborators: &[],
        dm: false,
        members: &[
            NewMember { id: a, queue: false },
            NewMember { id: b, queue: true },
        ],
        now: ts(1, 0),
    })
    .unwrap();

    assert!(db.deny_membership(conv, b, a).unwrap());
    assert!(db.membership(conv, b).unwrap().is_none());
    // Denying again finds nothing.
    assert!(!db.deny_membership(conv, b, a).unwrap());

    // A re-invite after denial is a fresh record, not a revival.
    assert_eq!(
        db.add_member(conv, b, a, ts(3, 0)).unwrap(),
        AddMemberOutcome::Added
    );
    assert_eq!(
        db.active_membership(conv, b).unwrap().unwrap().joined_on,
        ts(3, 0)
    );
}

#[test]
fn last_leaver_empties_then_cascade_removes_everything() {
    let db = Database::open_in_memory().unwrap();
    let a = seed_user(&db, "alice");
    let b = seed_user(&db, "bob");
    let conv = seed_conversation(&db, a, &[b], false);

    db.insert_message(&text_message(conv, a, "hello", ts(1, 30)))
        .unwrap();
    db.mark_read(b, conv, Uuid::new_v4(), ts(1, 40)).unwrap();

    assert_eq!(db.leave_conversation(conv, a).unwrap(), LeaveOutcome::Left);
    // Leaving stripped A from the collaborator set.
    let remaining = db.conversation_by_id(conv).unwrap().unwrap();
    assert!(remaining.collaborators.is_empty());
    assert_eq!(remaining.members_count, 1);

    assert_eq!(db.leave_conversation(conv, b).unwrap(), LeaveOutcome::Empty);
    db.delete_conversation_cascade(conv).unwrap();

    assert!(db.conversation_by_id(conv).unwrap().is_none());
    assert!(db.members_of(conv).unwrap().is_empty());
    let (messages, total) = db.list_messages(conv, ts(0, 0), 50, 0).unwrap();
    assert!(messages.is_empty());
    assert_eq!(total, 0);
    assert!(db.view(b, conv).unwrap().is_none());
}

#[test]
fn reaction_toggle_is_idempotent_per_pair_of_calls() {
    let db = Database::open_in_memory().unwrap();
    let a = seed_user(&db, "alice");
    let b = seed_user(&db, "bob");
    let conv = seed_conversation(&db, a, &[b], true);

    let msg = text_message(conv, a, "react to me", ts(1, 30));
    db.insert_message(&msg).unwrap();

    assert!(db.toggle_reaction(msg.id, b, "👍", ts(2, 0)).unwrap());
    let reactions = db.reactions_for_messages(&[msg.id]).unwrap();
    assert_eq!(reactions.len(), 1);
    assert_eq!(reactions[0].emoji, "👍");

    // Second toggle removes; no empty reaction entry lingers.
    assert!(!db.toggle_reaction(msg.id, b, "👍", ts(2, 1)).unwrap());
    assert!(db.reactions_for_messages(&[msg.id]).unwrap().is_empty());

    // The add stamped last_reaction_time on the message.
    let stored = db.message_by_id(msg.id).unwrap().unwrap();
    assert_eq!(stored.last_reaction_time, Some(ts(2, 0)));
}

#[test]
fn tombstone_keeps_the_deleted_message_position() {
    let db = Database::open_in_memory().unwrap();
    let a = seed_user(&db, "alice");
    let b = seed_user(&db, "bob");
    let conv = seed_conversation(&db, a, &[b], true);

    let original = text_message(conv, a, "oops", ts(1, 30));
    db.insert_message(&original).unwrap();
    db.toggle_reaction(original.id, b, "😅", ts(1, 45)).unwrap();

    let mut tombstone = text_message(conv, SYSTEM_SENDER, "@alice deleted a message", ts(2, 0));
    tombstone.time_posted = original.time_posted;
    tombstone.attachment = Some(parley_types::models::Attachment::Remover {
        message_id: original.id,
    });
    db.replace_with_tombstone(original.id, &tombstone).unwrap();

    assert!(db.message_by_id(original.id).unwrap().is_none());
    let stored = db.message_by_id(tombstone.id).unwrap().unwrap();
    assert_eq!(stored.time_posted, original.time_posted);
    assert!(stored.is_system());

    // Reactions on the deleted message are gone with it.
    assert!(db.reactions_for_messages(&[original.id]).unwrap().is_empty());
}

#[test]
fn unread_count_derivation_and_reset() {
    let db = Database::open_in_memory().unwrap();
    let a = seed_user(&db, "alice");
    let b = seed_user(&db, "bob");
    let conv = seed_conversation(&db, a, &[b], true);

    // No read-state record yet: unread is defined as zero.
    assert_eq!(db.unread_count(b, conv).unwrap(), 0);

    let m1 = text_message(conv, a, "one", ts(2, 0));
    db.insert_message(&m1).unwrap();
    db.mark_read(b, conv, m1.id, ts(2, 5)).unwrap();
    assert_eq!(db.unread_count(b, conv).unwrap(), 0);

    db.insert_message(&text_message(conv, a, "two", ts(2, 10)))
        .unwrap();
    db.insert_message(&text_message(conv, a, "three", ts(2, 20)))
        .unwrap();
    // B's own messages never count as unread for B.
    db.insert_message(&text_message(conv, b, "mine", ts(2, 30)))
        .unwrap();
    assert_eq!(db.unread_count(b, conv).unwrap(), 2);

    let m4 = text_message(conv, a, "four", ts(2, 40));
    db.insert_message(&m4).unwrap();
    assert_eq!(db.unread_count(b, conv).unwrap(), 3);

    db.mark_read(b, conv, m4.id, ts(2, 45)).unwrap();
    assert_eq!(db.unread_count(b, conv).unwrap(), 0);

    // The explicit flag flips independently of the timestamp.
    db.set_read_flag(b, conv, false).unwrap();
    let view = db.view(b, conv).unwrap().unwrap();
    assert!(!view.read);
    assert!(view.last_time_read.is_some());
    assert_eq!(db.unread_count(b, conv).unwrap(), 0);
}

#[test]
fn search_is_conjunctive_and_respects_the_horizon() {
    let db = Database::open_in_memory().unwrap();
    let a = seed_user(&db, "alice");
    let b = seed_user(&db, "bob");
    let conv = seed_conversation(&db, a, &[b], false);

    db.insert_message(&text_message(conv, a, "Deploy the new build", ts(2, 0)))
        .unwrap();
    db.insert_message(&text_message(conv, a, "deploy postponed until friday", ts(2, 10)))
        .unwrap();
    db.insert_message(&text_message(conv, SYSTEM_SENDER, "deploy deploy deploy", ts(2, 20)))
        .unwrap();

    // Both keywords must match, any order, case-insensitive.
    let keywords = vec!["deploy".to_string(), "friday".to_string()];
    let hits = db.search_messages(conv, ts(0, 0), &keywords, 50).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].content, "deploy postponed until friday");

    // Single keyword: system messages stay excluded.
    let keywords = vec!["deploy".to_string()];
    let hits = db.search_messages(conv, ts(0, 0), &keywords, 50).unwrap();
    assert_eq!(hits.len(), 2);

    // Horizon cuts off earlier matches.
    let hits = db.search_messages(conv, ts(2, 5), &keywords, 50).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].content, "deploy postponed until friday");
}

#[test]
fn cross_conversation_search_only_covers_active_memberships() {
    let db = Database::open_in_memory().unwrap();
    let a = seed_user(&db, "alice");
    let b = seed_user(&db, "bob");
    let c = seed_user(&db, "carol");

    let shared = seed_conversation(&db, a, &[b], false);
    let foreign = seed_conversation(&db, a, &[c], false);
    db.insert_message(&text_message(shared, a, "quarterly report ready", ts(2, 0)))
        .unwrap();
    db.insert_message(&text_message(foreign, a, "quarterly numbers are private", ts(2, 0)))
        .unwrap();

    let hits = db
        .search_all_messages(b, &["quarterly".to_string()])
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].conversation_id, shared);
}

#[test]
fn dm_lookup_finds_the_shared_conversation() {
    let db = Database::open_in_memory().unwrap();
    let a = seed_user(&db, "alice");
    let b = seed_user(&db, "bob");
    let c = seed_user(&db, "carol");

    let dm = seed_conversation(&db, a, &[b], true);
    seed_conversation(&db, a, &[b, c], false);

    assert_eq!(db.find_dm(a, b).unwrap(), Some(dm));
    assert_eq!(db.find_dm(b, a).unwrap(), Some(dm));
    assert_eq!(db.find_dm(a, c).unwrap(), None);
}
