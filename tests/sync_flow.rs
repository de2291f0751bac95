//! End-to-end flows through the engine: bulk load, live changes and
//! optimistic local actions against in-memory capabilities.

mod common;

use common::*;
use potluck_sync::{
    CacheEvent, Contribution, Conversation, CounterKey, EntityId, EventParticipant, EventSnapshot,
    Message, Notification, Outcome, Rsvp, Scope, SyncConfig, SyncEngine, SyncError, Timestamp,
    UserId, WatchFilter,
};
use std::sync::Arc;

fn engine(feed: &Arc<FakeFeed>, backend: &Arc<FakeBackend>) -> SyncEngine {
    SyncEngine::new(
        SyncConfig::default(),
        feed.clone(),
        backend.clone(),
        FakeAuth::signed_in(VIEWER),
    )
}

fn conversation_ids(engine: &SyncEngine) -> Vec<String> {
    engine
        .entities::<Conversation>(&Scope::Viewer)
        .iter()
        .map(|c| c.id.to_string())
        .collect()
}

fn unread(engine: &SyncEngine, conversation: &str) -> u32 {
    engine.counter(&CounterKey::ConversationUnread(EntityId::from(conversation)))
}

// --- Handoff ---

#[tokio::test]
async fn test_insert_during_bulk_load_is_kept() {
    init_tracing();
    let feed = FakeFeed::new();
    let backend = FakeBackend::new();
    backend.with(|state| {
        state.friendships = vec![friend("f1", "ann"), friend("f2", "bob"), friend("f3", "cat")];
        state.conversations = vec![summary("A", "ann", 0), summary("B", "bob", 2)];
    });
    let gate = backend.gate_conversations();
    let engine = engine(&feed, &backend);

    let live = async {
        gate.entered.notified().await;
        let mut c = conversation("C", "cat");
        c.created_at = Timestamp(50);
        feed.change("conversations:me", insert(&c));
        settle().await;
        gate.release.notify_one();
    };
    let (started, _) = tokio::join!(engine.start(), live);
    started.unwrap();

    // Redelivery after the subscription is steady.
    feed.change("conversations:me", insert(&conversation("A", "ann")));
    settle().await;

    let mut ids = conversation_ids(&engine);
    ids.sort();
    assert_eq!(ids, vec!["A", "B", "C"]);
    assert_eq!(unread(&engine, "B"), 2);
    assert_eq!(engine.total_unread_messages(), 2);
}

#[tokio::test]
async fn test_failed_load_leaves_store_unchanged() {
    let feed = FakeFeed::new();
    let backend = FakeBackend::new();
    backend.with(|state| state.notifications = vec![notification("n1", 1)]);
    let engine = engine(&feed, &backend);
    engine.start().await.unwrap();
    assert_eq!(engine.counter(&CounterKey::UnreadNotifications), 1);

    backend.with(|state| {
        state.notifications.push(notification("n2", 2));
        state.failing.insert("notifications");
    });
    let result = engine.loader().load_notifications().await;

    assert!(matches!(result, Err(SyncError::Load { .. })));
    assert_eq!(engine.entities::<Notification>(&Scope::Viewer).len(), 1);
    assert_eq!(engine.counter(&CounterKey::UnreadNotifications), 1);
    assert_eq!(engine.store().read(|state| state.loads_in_flight()), 0);
}

#[tokio::test]
async fn test_conversations_wait_for_friendships() {
    let feed = FakeFeed::new();
    let backend = FakeBackend::new();
    backend.with(|state| {
        state.friendships = vec![friend("f1", "ann")];
        state.conversations = vec![summary("A", "ann", 1), summary("X", "stranger", 4)];
        state.failing.insert("friendships");
    });
    let engine = engine(&feed, &backend);

    assert!(engine.start().await.is_err());
    assert!(conversation_ids(&engine).is_empty());

    backend.with(|state| {
        state.failing.clear();
    });
    engine.loader().load_conversations().await.unwrap();
    assert_eq!(conversation_ids(&engine), vec!["A"]);
    assert_eq!(engine.total_unread_messages(), 1);
}

#[tokio::test]
async fn test_load_finishing_after_logout_is_discarded() {
    let feed = FakeFeed::new();
    let backend = FakeBackend::new();
    backend.with(|state| {
        state.friendships = vec![friend("f1", "ann")];
        state.conversations = vec![summary("A", "ann", 3)];
    });
    let gate = backend.gate_conversations();
    let engine = engine(&feed, &backend);

    let teardown = async {
        gate.entered.notified().await;
        engine.logout();
        gate.release.notify_one();
    };
    let (started, _) = tokio::join!(engine.start(), teardown);

    assert!(matches!(started, Err(SyncError::ScopeInactive(_))));
    assert!(conversation_ids(&engine).is_empty());
    assert_eq!(engine.total_unread_messages(), 0);
    assert!(engine.store().read(|state| state.viewer().is_none()));
    assert_eq!(engine.store().read(|state| state.loads_in_flight()), 0);
}

#[tokio::test]
async fn test_messages_load_after_close_is_discarded() {
    let feed = FakeFeed::new();
    let backend = FakeBackend::new();
    backend.with(|state| {
        state.friendships = vec![friend("f1", "ann")];
        state.conversations = vec![summary("A", "ann", 1)];
        state
            .messages
            .insert(EntityId::from("A"), vec![message("m1", "A", "ann", 10)]);
    });
    let engine = engine(&feed, &backend);
    engine.start().await.unwrap();

    let conversation = EntityId::from("A");
    let gate = backend.gate("messages");
    let close = async {
        gate.entered.notified().await;
        engine.close_conversation(&conversation);
        gate.release.notify_one();
    };
    let (opened, _) = tokio::join!(engine.open_conversation(&conversation), close);

    assert!(matches!(opened, Err(SyncError::ScopeInactive(_))));
    assert!(engine
        .entities::<Message>(&Scope::Conversation(conversation.clone()))
        .is_empty());
    assert!(!feed.is_attached("messages:A"));
    assert!(backend.with(|state| state.conversations_read.is_empty()));
}

// --- Messages ---

#[tokio::test]
async fn test_own_message_echo_is_confirmation() {
    let feed = FakeFeed::new();
    let backend = FakeBackend::new();
    backend.with(|state| {
        state.friendships = vec![friend("f1", "ann")];
        state.conversations = vec![summary("A", "ann", 1)];
    });
    let engine = engine(&feed, &backend);
    engine.start().await.unwrap();

    let sent = message("m1", "A", VIEWER, 100);
    assert_eq!(engine.apply_local_insert(sent.clone()), Outcome::Inserted);
    feed.change("conversations:me", insert(&sent));
    settle().await;

    let scope = Scope::Conversation(EntityId::from("A"));
    assert_eq!(engine.entities::<Message>(&scope).len(), 1);
    assert_eq!(unread(&engine, "A"), 1);
    assert!(engine.store().read(|state| state.pending().is_empty()));
}

#[tokio::test]
async fn test_message_for_unknown_conversation_fetches_parent() {
    let feed = FakeFeed::new();
    let backend = FakeBackend::new();
    backend.with(|state| {
        state.friendships = vec![friend("f1", "ann")];
        state.profiles.insert(UserId::from("ann"), profile("ann", "Ann"));
    });
    let engine = engine(&feed, &backend);
    engine.start().await.unwrap();

    // Created after the bulk load; the server count includes the message.
    backend.with(|state| state.conversations = vec![summary("A", "ann", 1)]);
    feed.change("conversations:me", insert(&message("m1", "A", "ann", 100)));
    settle().await;

    assert_eq!(conversation_ids(&engine), vec!["A"]);
    assert_eq!(unread(&engine, "A"), 1);
    let messages = engine.entities::<Message>(&Scope::Conversation(EntityId::from("A")));
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].sender.as_ref().map(|p| p.display_name.as_str()), Some("Ann"));
    let cached = engine.store().get::<Conversation>(&EntityId::from("A")).unwrap();
    assert_eq!(cached.last_message_at, Some(Timestamp(100)));
}

#[tokio::test]
async fn test_message_dropped_when_parent_unavailable() {
    let feed = FakeFeed::new();
    let backend = FakeBackend::new();
    let engine = engine(&feed, &backend);
    engine.start().await.unwrap();

    backend.with(|state| state.fail_point_reads = true);
    feed.change("conversations:me", insert(&message("m1", "A", "ann", 100)));
    settle().await;

    assert!(conversation_ids(&engine).is_empty());
    assert!(engine.entities::<Message>(&Scope::Conversation(EntityId::from("A"))).is_empty());
    assert_eq!(engine.total_unread_messages(), 0);

    // The channel keeps working.
    feed.change("notifications:me", insert(&notification("n1", 5)));
    settle().await;
    assert_eq!(engine.counter(&CounterKey::UnreadNotifications), 1);
}

#[tokio::test]
async fn test_conversation_update_before_insert_is_upserted() {
    let feed = FakeFeed::new();
    let backend = FakeBackend::new();
    backend.with(|state| state.friendships = vec![friend("f1", "ann")]);
    let engine = engine(&feed, &backend);
    engine.start().await.unwrap();

    backend.with(|state| state.conversations = vec![summary("C", "ann", 3)]);
    let mut renamed = conversation("C", "ann");
    renamed.title = Some("Potluck planning".to_string());
    renamed.updated_at = Timestamp(20);
    feed.change("conversations:me", update(&renamed));
    settle().await;

    let cached = engine.store().get::<Conversation>(&EntityId::from("C")).unwrap();
    assert_eq!(cached.title.as_deref(), Some("Potluck planning"));
    assert_eq!(unread(&engine, "C"), 3);
}

#[tokio::test]
async fn test_open_conversation_marks_read() {
    let feed = FakeFeed::new();
    let backend = FakeBackend::new();
    backend.with(|state| {
        state.friendships = vec![friend("f1", "ann")];
        state.conversations = vec![summary("A", "ann", 2)];
        state.messages.insert(
            EntityId::from("A"),
            vec![message("m1", "A", "ann", 10), message("m2", "A", "ann", 11)],
        );
    });
    let engine = engine(&feed, &backend);
    engine.start().await.unwrap();
    assert_eq!(engine.total_unread_messages(), 2);

    let conversation = EntityId::from("A");
    engine.open_conversation(&conversation).await.unwrap();
    settle().await;

    assert_eq!(engine.total_unread_messages(), 0);
    let scope = Scope::Conversation(conversation.clone());
    let messages = engine.entities::<Message>(&scope);
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|m| m.read_at.is_some()));
    assert!(feed.is_attached("messages:A"));

    // Live message while the conversation is on screen.
    feed.change("messages:A", insert(&message("m3", "A", "ann", 12)));
    settle().await;
    assert_eq!(unread(&engine, "A"), 0);
    assert_eq!(backend.with(|state| state.conversations_read.len()), 2);

    engine.close_conversation(&conversation);
    assert!(!feed.is_attached("messages:A"));
    feed.change("conversations:me", insert(&message("m4", "A", "ann", 13)));
    settle().await;
    assert_eq!(unread(&engine, "A"), 1);
}

#[tokio::test]
async fn test_server_edit_after_open_is_not_stale() {
    let feed = FakeFeed::new();
    let backend = FakeBackend::new();
    backend.with(|state| {
        state.friendships = vec![friend("f1", "ann")];
        state.conversations = vec![summary("A", "ann", 1)];
        state
            .messages
            .insert(EntityId::from("A"), vec![message("m1", "A", "ann", 10)]);
    });
    let engine = engine(&feed, &backend);
    engine.start().await.unwrap();
    engine.open_conversation(&EntityId::from("A")).await.unwrap();

    // Server clock two seconds behind ours.
    let earlier = Timestamp(Timestamp::now().0 - 2_000);
    let mut edit = message("m1", "A", "ann", 10);
    edit.content = "bring forks".to_string();
    edit.updated_at = Some(earlier);
    edit.read_at = Some(earlier);
    feed.change("messages:A", update(&edit));
    settle().await;

    let cached = engine.store().get::<Message>(&EntityId::from("m1")).unwrap();
    assert_eq!(cached.content, "bring forks");
    assert_eq!(unread(&engine, "A"), 0);
}

#[tokio::test]
async fn test_message_delete_on_other_conversation_channel_ignored() {
    let feed = FakeFeed::new();
    let backend = FakeBackend::new();
    backend.with(|state| {
        state.friendships = vec![friend("f1", "ann"), friend("f2", "bob")];
        state.conversations = vec![summary("A", "ann", 0), summary("B", "bob", 0)];
        state.messages.insert(EntityId::from("A"), vec![message("m1", "A", "ann", 10)]);
    });
    let engine = engine(&feed, &backend);
    engine.start().await.unwrap();
    engine.open_conversation(&EntityId::from("A")).await.unwrap();
    engine.open_conversation(&EntityId::from("B")).await.unwrap();
    settle().await;

    // A is no longer on screen; its channel is closed and B's cannot delete A's rows.
    assert!(!feed.is_attached("messages:A"));
    feed.change("messages:B", delete::<Message>("m1"));
    settle().await;

    let messages = engine.entities::<Message>(&Scope::Conversation(EntityId::from("A")));
    assert_eq!(messages.len(), 1);
}

#[tokio::test]
async fn test_background_message_delete_updates_unread() {
    let feed = FakeFeed::new();
    let backend = FakeBackend::new();
    backend.with(|state| {
        state.friendships = vec![friend("f1", "ann")];
        state.conversations = vec![summary("A", "ann", 0)];
    });
    let engine = engine(&feed, &backend);
    engine.start().await.unwrap();

    feed.change("conversations:me", insert(&message("m1", "A", "ann", 10)));
    feed.change("conversations:me", insert(&message("m2", "A", "ann", 11)));
    settle().await;
    assert_eq!(unread(&engine, "A"), 2);

    feed.change("conversations:me", delete::<Message>("m1"));
    settle().await;

    assert_eq!(unread(&engine, "A"), 1);
    let messages = engine.entities::<Message>(&Scope::Conversation(EntityId::from("A")));
    assert_eq!(messages.len(), 1);
}

// --- Notifications ---

#[tokio::test]
async fn test_notification_badge_and_mark_all_read() {
    let feed = FakeFeed::new();
    let backend = FakeBackend::new();
    backend.with(|state| state.notifications = (0..3).map(|i| notification(&format!("n{}", i), i)).collect());
    let engine = engine(&feed, &backend);
    engine.start().await.unwrap();
    let watcher = engine.watch(WatchFilter::counters());
    assert_eq!(engine.counter(&CounterKey::UnreadNotifications), 3);

    feed.change("notifications:me", insert(&notification("n9", 100)));
    feed.change("notifications:me", insert(&notification("n9", 100)));
    settle().await;
    assert_eq!(engine.counter(&CounterKey::UnreadNotifications), 4);

    engine.mark_notifications_read().await.unwrap();
    assert_eq!(engine.counter(&CounterKey::UnreadNotifications), 0);
    assert_eq!(backend.with(|state| state.notifications_read), 1);

    // The server's echo of one read update.
    let mut echo = notification("n0", 0);
    echo.read = true;
    echo.updated_at = Some(Timestamp(200));
    feed.change("notifications:me", update(&echo));
    settle().await;
    assert_eq!(engine.counter(&CounterKey::UnreadNotifications), 0);

    let newest = engine.entities::<Notification>(&Scope::Viewer);
    assert_eq!(newest[0].id.as_str(), "n9");
    assert!(watcher
        .drain()
        .iter()
        .any(|event| matches!(event, CacheEvent::Counter { value: 0, .. })));
}

// --- Events ---

#[tokio::test]
async fn test_event_contribution_echo_and_scoped_delete() {
    let feed = FakeFeed::new();
    let backend = FakeBackend::new();
    let event = EntityId::from("e1");
    backend.with(|state| {
        state.profiles.insert(UserId::from("guest"), profile("guest", "Guest"));
        state.events.insert(
            event.clone(),
            EventSnapshot {
                participants: vec![EventParticipant {
                    id: EntityId::from("p1"),
                    event_id: event.clone(),
                    user_id: UserId::from("guest"),
                    rsvp: Rsvp::Invited,
                    joined_at: Timestamp(1),
                    updated_at: None,
                    profile: None,
                }],
                ..Default::default()
            },
        );
    });
    let engine = engine(&feed, &backend);
    engine.start().await.unwrap();
    assert_eq!(engine.open_event(&event).await.unwrap(), 1);
    settle().await;

    let dish = Contribution {
        id: EntityId::from("k1"),
        event_id: event.clone(),
        contributor_id: UserId::from(VIEWER),
        item: "lasagna".to_string(),
        quantity: 1,
        created_at: Timestamp(10),
        updated_at: None,
    };
    assert_eq!(engine.apply_local_insert(dish.clone()), Outcome::Inserted);
    feed.change("event:e1", insert(&dish));
    settle().await;

    let scope = Scope::Event(event.clone());
    assert_eq!(engine.entities::<Contribution>(&scope).len(), 1);
    assert!(engine.store().read(|state| state.pending().is_empty()));

    // RSVP update from the guest is enriched from the profile cache.
    let going = EventParticipant {
        id: EntityId::from("p1"),
        event_id: event.clone(),
        user_id: UserId::from("guest"),
        rsvp: Rsvp::Going,
        joined_at: Timestamp(1),
        updated_at: Some(Timestamp(5)),
        profile: None,
    };
    feed.change("event:e1", update(&going));
    settle().await;
    let participants = engine.entities::<EventParticipant>(&scope);
    assert_eq!(participants[0].rsvp, Rsvp::Going);
    assert_eq!(participants[0].profile.as_ref().map(|p| p.display_name.as_str()), Some("Guest"));

    engine.close_event(&event);
    assert!(!feed.is_attached("event:e1"));
    assert_eq!(engine.entities::<Contribution>(&scope).len(), 1);
}

// --- Logout ---

#[tokio::test]
async fn test_logout_clears_cache_and_channels() {
    let feed = FakeFeed::new();
    let backend = FakeBackend::new();
    backend.with(|state| state.notifications = vec![notification("n1", 1)]);
    let engine = engine(&feed, &backend);
    engine.start().await.unwrap();

    engine.logout();

    assert!(engine.entities::<Notification>(&Scope::Viewer).is_empty());
    assert_eq!(engine.counter(&CounterKey::UnreadNotifications), 0);
    assert!(engine.channels().active_channels().is_empty());
    assert!(!feed.change("notifications:me", insert(&notification("n2", 2))));
}
