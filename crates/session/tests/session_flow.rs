//! End-to-end session flows through the hub, without a real socket:
//! join and leave propagation, relay ordering, sender exclusion,
//! cross-process convergence, and the durable log round trip.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

use parley_config::{DatabaseConfig, DurableLogConfig};
use parley_database::{initialize_database, MessageRepository};
use parley_session::backplane::{run_subscriber, Backplane, LocalBackplane};
use parley_session::durable_log::{run_memory_consumer, LogProducer};
use parley_session::{
    AdmittedConnection, MemberProfile, RoomFrame, RoomRegistry, ServerEvent, SessionConnection,
    SessionHub,
};

fn admitted(room: &str, member_id: &str, name: &str) -> AdmittedConnection {
    AdmittedConnection {
        room_id: room.to_string(),
        room_title: "standup".to_string(),
        member: MemberProfile {
            id: member_id.to_string(),
            name: name.to_string(),
        },
        admitted_at: chrono::Utc::now().to_rfc3339(),
    }
}

fn hub_on(backplane: &LocalBackplane) -> Arc<SessionHub> {
    let (producer, _receiver) = LogProducer::memory();
    Arc::new(SessionHub::new(
        RoomRegistry::default(),
        Backplane::Local(backplane.clone()),
        producer,
    ))
}

/// Connect and consume the connection's own `userJoined` frame, so
/// tests only see what happens afterwards.
async fn connect_member(
    hub: &SessionHub,
    room: &str,
    member_id: &str,
    name: &str,
) -> (SessionConnection, broadcast::Receiver<RoomFrame>) {
    let (connection, mut frames) = hub.connect(&admitted(room, member_id, name)).await;
    match next_frame(&mut frames).await.event {
        ServerEvent::UserJoined { new_member, .. } => assert_eq!(new_member.id, member_id),
        other => panic!("expected own join frame, got {other:?}"),
    }
    (connection, frames)
}

async fn next_frame(frames: &mut broadcast::Receiver<RoomFrame>) -> RoomFrame {
    timeout(Duration::from_secs(1), frames.recv())
        .await
        .expect("timed out waiting for room frame")
        .expect("room channel closed")
}

async fn wait_for_online(hub: &SessionHub, room: &str, expected: &[&str]) {
    for _ in 0..200 {
        let (online, _) = hub.registry().snapshot(room).await;
        if online.iter().map(String::as_str).eq(expected.iter().copied()) {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    let (online, _) = hub.registry().snapshot(room).await;
    panic!("online set never converged, last seen {online:?}");
}

async fn wait_for_stored(store: &MessageRepository, room: &str, count: usize) {
    for _ in 0..200 {
        if store.list_by_room(room, 50).await.unwrap().len() == count {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("store never reached {count} messages");
}

#[tokio::test]
async fn message_is_relayed_to_peers_but_not_echoed_to_the_sender() {
    let backplane = LocalBackplane::new();
    let hub = hub_on(&backplane);

    let (alice, _alice_frames) = connect_member(&hub, "room-1", "alice", "Alice").await;
    let (_bob, mut bob_frames) = connect_member(&hub, "room-1", "bob", "Bob").await;

    let sent = hub
        .send_message(&alice, "hello".to_string(), None)
        .await
        .unwrap();

    let frame = next_frame(&mut bob_frames).await;
    assert_eq!(frame.exclude, Some(alice.id));
    match frame.event {
        ServerEvent::Message(message) => {
            assert_eq!(message.public_id, sent.public_id);
            assert_eq!(message.sender, "alice");
            assert_eq!(message.body, "hello");
            assert!(!message.has_attachment);
        }
        other => panic!("expected message frame, got {other:?}"),
    }
}

#[tokio::test]
async fn messages_from_one_sender_arrive_in_send_order() {
    let backplane = LocalBackplane::new();
    let hub = hub_on(&backplane);

    let (alice, _alice_frames) = connect_member(&hub, "room-1", "alice", "Alice").await;
    let (_bob, mut bob_frames) = connect_member(&hub, "room-1", "bob", "Bob").await;

    for n in 0..5 {
        hub.send_message(&alice, format!("message {n}"), None)
            .await
            .unwrap();
    }

    for n in 0..5 {
        let frame = next_frame(&mut bob_frames).await;
        match frame.event {
            ServerEvent::Message(message) => {
                assert_eq!(message.body, format!("message {n}"));
            }
            other => panic!("expected message frame, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn disconnect_emits_user_left_and_typing_reset_in_order() {
    let backplane = LocalBackplane::new();
    let hub = hub_on(&backplane);

    let (alice, _alice_frames) = connect_member(&hub, "room-1", "alice", "Alice").await;
    let (_bob, mut bob_frames) = connect_member(&hub, "room-1", "bob", "Bob").await;

    hub.set_typing(&alice, true).await;
    match next_frame(&mut bob_frames).await.event {
        ServerEvent::Typing {
            member_id,
            is_typing,
            typing_member_ids,
        } => {
            assert_eq!(member_id, "alice");
            assert!(is_typing);
            assert_eq!(typing_member_ids, vec!["alice".to_string()]);
        }
        other => panic!("expected typing frame, got {other:?}"),
    }

    hub.disconnect(&alice).await;

    match next_frame(&mut bob_frames).await.event {
        ServerEvent::UserLeft {
            online_member_ids,
            member_id,
        } => {
            assert_eq!(member_id, "alice");
            assert_eq!(online_member_ids, vec!["bob".to_string()]);
        }
        other => panic!("expected userLeft frame, got {other:?}"),
    }

    match next_frame(&mut bob_frames).await.event {
        ServerEvent::Typing {
            member_id,
            is_typing,
            typing_member_ids,
        } => {
            assert_eq!(member_id, "alice");
            assert!(!is_typing);
            assert!(typing_member_ids.is_empty());
        }
        other => panic!("expected typing reset frame, got {other:?}"),
    }
}

#[tokio::test]
async fn second_connection_keeps_member_online_until_the_last_one_leaves() {
    let backplane = LocalBackplane::new();
    let hub = hub_on(&backplane);

    let (first, _frames_a) = hub.connect(&admitted("room-1", "alice", "Alice")).await;
    let (second, _frames_b) = hub.connect(&admitted("room-1", "alice", "Alice")).await;

    hub.disconnect(&first).await;
    let (online, _) = hub.registry().snapshot("room-1").await;
    assert_eq!(online, vec!["alice".to_string()]);

    hub.disconnect(&second).await;
    let (online, _) = hub.registry().snapshot("room-1").await;
    assert!(online.is_empty());
}

#[tokio::test]
async fn hubs_on_a_shared_backplane_converge_on_presence_and_messages() {
    let backplane = LocalBackplane::new();
    let hub_a = hub_on(&backplane);
    let hub_b = hub_on(&backplane);

    tokio::spawn(run_subscriber(
        Backplane::Local(backplane.clone()),
        hub_a.clone(),
    ));
    tokio::spawn(run_subscriber(
        Backplane::Local(backplane.clone()),
        hub_b.clone(),
    ));
    sleep(Duration::from_millis(20)).await;

    let (_bob, mut bob_frames) = connect_member(&hub_b, "room-1", "bob", "Bob").await;
    let (alice, _alice_frames) = connect_member(&hub_a, "room-1", "alice", "Alice").await;

    wait_for_online(&hub_b, "room-1", &["alice", "bob"]).await;

    match next_frame(&mut bob_frames).await.event {
        ServerEvent::UserJoined { new_member, .. } => assert_eq!(new_member.id, "alice"),
        other => panic!("expected userJoined frame, got {other:?}"),
    }

    hub_a
        .send_message(&alice, "over the wire".to_string(), None)
        .await
        .unwrap();

    match next_frame(&mut bob_frames).await.event {
        ServerEvent::Message(message) => {
            assert_eq!(message.sender, "alice");
            assert_eq!(message.body, "over the wire");
        }
        other => panic!("expected message frame, got {other:?}"),
    }

    hub_a.disconnect(&alice).await;
    wait_for_online(&hub_b, "room-1", &["bob"]).await;
}

#[tokio::test]
async fn relayed_messages_reach_the_durable_store() {
    let pool = initialize_database(&DatabaseConfig {
        url: "sqlite://:memory:".to_string(),
        max_connections: 1,
    })
    .await
    .unwrap();
    let store = MessageRepository::new(pool);

    let (producer, receiver) = LogProducer::memory();
    tokio::spawn(run_memory_consumer(
        receiver,
        store.clone(),
        DurableLogConfig {
            topic: "test:messages".to_string(),
            run_consumer: true,
            store_retry_attempts: 2,
            store_retry_backoff_ms: 1,
        },
    ));

    let hub = Arc::new(SessionHub::new(
        RoomRegistry::default(),
        Backplane::Local(LocalBackplane::new()),
        producer,
    ));

    let (alice, _frames) = hub.connect(&admitted("room-1", "alice", "Alice")).await;
    hub.send_message(&alice, "first".to_string(), None)
        .await
        .unwrap();
    hub.send_message(&alice, "second".to_string(), None)
        .await
        .unwrap();

    wait_for_stored(&store, "room-1", 2).await;

    let stored = store.list_by_room("room-1", 50).await.unwrap();
    assert_eq!(stored[0].body, "first");
    assert_eq!(stored[1].body, "second");
}
