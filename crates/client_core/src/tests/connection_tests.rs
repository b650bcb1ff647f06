use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use shared::{
    domain::{BranchId, ConversationId},
    protocol::{ChatRef, ErrorNotice, EventKind},
};

use super::*;
use crate::test_support::{connection_settings, settle, ScriptedConnector};

fn manager() -> (Arc<ConnectionManager>, Arc<ScriptedConnector>, crate::test_support::SocketQueue) {
    let (connector, sockets) = ScriptedConnector::new();
    let manager = Arc::new(ConnectionManager::new(
        connection_settings(),
        connector.clone() as Arc<dyn Connector>,
    ));
    (manager, connector, sockets)
}

fn branch(id: &str) -> Room {
    Room::Branch(BranchId::from(id))
}

fn chat(id: &str) -> Room {
    Room::Conversation(ConversationId::from(id))
}

#[tokio::test]
async fn connect_resolves_after_handshake_and_is_idempotent() {
    let (manager, connector, mut sockets) = manager();
    let connecting = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.connect(Credential::new("jwt-1")).await })
    };

    let socket = sockets.next().await;
    assert_eq!(socket.credential.expose(), "jwt-1");
    assert_eq!(manager.state(), ConnectionState::Connecting);
    socket.accept();

    connecting
        .await
        .expect("join connect task")
        .expect("handshake confirmed");
    assert!(manager.is_connected());

    manager
        .connect(Credential::new("jwt-1"))
        .await
        .expect("second connect is a no-op");
    assert_eq!(connector.opened(), 1);
    assert!(sockets.try_next().is_none());
}

#[tokio::test]
async fn connect_times_out_without_handshake() {
    let (connector, mut sockets) = ScriptedConnector::new();
    let mut settings = connection_settings();
    settings.handshake_timeout = Duration::from_millis(50);
    let manager = ConnectionManager::new(settings, connector as Arc<dyn Connector>);

    let result = manager.connect(Credential::new("jwt")).await;
    assert!(matches!(result, Err(ConnectionError::HandshakeTimeout(_))));
    let _silent = sockets.next().await;
    manager.disconnect().await;
}

#[tokio::test]
async fn offline_joins_flush_exactly_once_on_connect() {
    let (manager, _connector, mut sockets) = manager();
    manager.join_room(branch("b1"));
    manager.join_room(branch("b1"));
    manager.join_room(chat("c1"));
    manager.leave_room(chat("c1"));

    let connecting = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.connect(Credential::new("jwt")).await })
    };
    let mut socket = sockets.next().await;
    socket.accept();
    connecting.await.expect("join").expect("connected");
    settle().await;

    assert_eq!(
        socket.sent(),
        vec![ClientEvent::JoinBranch(BranchId::from("b1"))]
    );

    manager.join_room(branch("b1"));
    settle().await;
    assert!(socket.sent().is_empty(), "already joined on this connection");
}

#[tokio::test]
async fn failed_attempts_do_not_consume_queued_joins() {
    let (manager, _connector, mut sockets) = manager();
    manager.join_room(chat("c9"));

    let connecting = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.connect(Credential::new("jwt")).await })
    };
    let rejected = sockets.next().await;
    rejected.push(&ServerEvent::ConnectError(ErrorNotice {
        message: "Authentication error".to_string(),
    }));

    let mut socket = sockets.next().await;
    socket.accept();
    connecting.await.expect("join").expect("connected on retry");
    settle().await;

    assert_eq!(
        socket.sent(),
        vec![ClientEvent::JoinChat(ConversationId::from("c9"))]
    );
}

#[tokio::test]
async fn reconnection_drops_memberships_and_announces_connected() {
    let (manager, _connector, mut sockets) = manager();
    let handshakes = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&handshakes);
    let _sub = manager.bus().subscribe(EventFilter::Kind(EventKind::Connected), move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    let connecting = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.connect(Credential::new("jwt")).await })
    };
    let mut first = sockets.next().await;
    first.accept();
    connecting.await.expect("join").expect("connected");
    manager.join_room(chat("c1"));
    settle().await;
    assert_eq!(first.sent(), vec![ClientEvent::JoinChat(ConversationId::from("c1"))]);

    first.fail("connection reset");
    let mut second = sockets.next().await;
    assert!(!manager.is_connected());
    second.accept();
    settle().await;

    assert!(manager.is_connected());
    assert_eq!(handshakes.load(Ordering::SeqCst), 2);
    assert!(second.sent().is_empty(), "no automatic rejoin");

    manager.join_room(chat("c1"));
    settle().await;
    assert_eq!(second.sent(), vec![ClientEvent::JoinChat(ConversationId::from("c1"))]);
}

#[tokio::test]
async fn send_requires_connection_and_leave_requires_membership() {
    let (manager, _connector, mut sockets) = manager();
    let typing = ClientEvent::Typing(ChatRef::new(ConversationId::from("c1")));
    assert!(matches!(
        manager.send(typing.clone()),
        Err(ConnectionError::NotConnected)
    ));

    let connecting = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.connect(Credential::new("jwt")).await })
    };
    let mut socket = sockets.next().await;
    socket.accept();
    connecting.await.expect("join").expect("connected");

    manager.leave_room(chat("c1"));
    manager.send(typing.clone()).expect("send while connected");
    assert_eq!(socket.next_event().await, typing);
    settle().await;
    assert!(socket.sent().is_empty());
}

#[tokio::test]
async fn inbound_frames_reach_room_subscribers() {
    let (manager, _connector, mut sockets) = manager();
    let closed = Arc::new(AtomicUsize::new(0));
    let hits = Arc::clone(&closed);
    let _sub = manager.subscribe(
        EventFilter::Room(chat("c1")),
        Arc::new(move |event: &ServerEvent| {
            if event.kind() == EventKind::ChatClosed {
                hits.fetch_add(1, Ordering::SeqCst);
            }
        }),
    );

    let connecting = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.connect(Credential::new("jwt")).await })
    };
    let socket = sockets.next().await;
    socket.accept();
    connecting.await.expect("join").expect("connected");

    socket.push(&ServerEvent::ChatClosed(ChatRef::new(ConversationId::from("c1"))));
    socket.push(&ServerEvent::ChatClosed(ChatRef::new(ConversationId::from("c2"))));
    settle().await;
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn disconnect_stops_driver_and_allows_fresh_connect() {
    let (manager, connector, mut sockets) = manager();
    let connecting = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.connect(Credential::new("jwt")).await })
    };
    let first = sockets.next().await;
    first.accept();
    connecting.await.expect("join").expect("connected");

    manager.disconnect().await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    let connecting = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.connect(Credential::new("jwt-2")).await })
    };
    let second = sockets.next().await;
    assert_eq!(second.credential.expose(), "jwt-2");
    second.accept();
    connecting.await.expect("join").expect("connected again");
    assert_eq!(connector.opened(), 2);
}
