//! Integration tests for the full connection lifecycle.

use std::time::Duration;

use clappylock_link::bluetooth::{
    ConnectionEvent, ConnectionManager, ConnectionState, MemoryTransport, PeerIdentity,
    ADVISORY_CONNECTION_LOST,
};
use clappylock_link::command::Command;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc::{self, UnboundedReceiver};

const TIMEOUT: Duration = Duration::from_secs(2);
const PHONE: &str = "AA:BB:CC:DD:EE:FF";
const LOCK: &str = "11:22:33:44:55:66";

fn setup() -> (
    ConnectionManager<MemoryTransport>,
    UnboundedReceiver<ConnectionEvent>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let manager = ConnectionManager::new(MemoryTransport::new(), tx).unwrap();
    (manager, rx)
}

async fn next_event(rx: &mut UnboundedReceiver<ConnectionEvent>) -> ConnectionEvent {
    tokio::time::timeout(TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn expect_quiet(rx: &mut UnboundedReceiver<ConnectionEvent>) {
    tokio::time::sleep(Duration::from_millis(50)).await;
    if let Ok(event) = rx.try_recv() {
        panic!("unexpected event: {:?}", event);
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

fn state(state: ConnectionState) -> ConnectionEvent {
    ConnectionEvent::StateChanged(state)
}

fn assert_consistent(manager: &ConnectionManager<MemoryTransport>) {
    let state = manager.current_state();
    let roles = manager.active_roles();
    assert_eq!(state == ConnectionState::Connected, roles.session);
    assert_eq!(state == ConnectionState::Connected, manager.connected_peer().is_some());
    if state == ConnectionState::Idle {
        assert!(!roles.listening && !roles.dialing);
    }
}

/// Start listening and accept an inbound connection from the phone.
async fn connect_inbound(
    manager: &ConnectionManager<MemoryTransport>,
    rx: &mut UnboundedReceiver<ConnectionEvent>,
) -> tokio::io::DuplexStream {
    manager.start();
    assert_eq!(next_event(rx).await, state(ConnectionState::Listening));
    wait_until(|| manager.transport().open_listeners() == 1).await;

    let remote = manager
        .transport()
        .inbound(PeerIdentity::new(PHONE, "Phone"))
        .unwrap();

    assert_eq!(next_event(rx).await, state(ConnectionState::Connected));
    assert_eq!(
        next_event(rx).await,
        ConnectionEvent::PeerIdentified {
            name: "Phone".into(),
            address: PHONE.into(),
        }
    );
    remote
}

#[tokio::test]
async fn test_accept_send_and_lose_connection() {
    let (manager, mut rx) = setup();
    let mut remote = connect_inbound(&manager, &mut rx).await;
    wait_until(|| manager.transport().open_listeners() == 0).await;

    assert!(manager.send(Command::Engage));
    assert_eq!(next_event(&mut rx).await, ConnectionEvent::DataSent(vec![0x61]));

    let mut buf = [0u8; 1];
    remote.read_exact(&mut buf).await.unwrap();
    assert_eq!(buf, [0x61]);

    // Peer drops the link.
    drop(remote);

    assert_eq!(
        next_event(&mut rx).await,
        ConnectionEvent::Advisory(ADVISORY_CONNECTION_LOST.into())
    );
    assert_eq!(next_event(&mut rx).await, state(ConnectionState::Listening));

    wait_until(|| manager.transport().open_listeners() == 1).await;
    assert_eq!(manager.transport().listen_calls(), 2);
    assert_consistent(&manager);
    expect_quiet(&mut rx).await;
}

#[tokio::test]
async fn test_received_chunks_are_forwarded() {
    let (manager, mut rx) = setup();
    let mut remote = connect_inbound(&manager, &mut rx).await;

    remote.write_all(b"b").await.unwrap();
    assert_eq!(
        next_event(&mut rx).await,
        ConnectionEvent::DataReceived(b"b".to_vec())
    );

    remote.write_all(b"hello").await.unwrap();
    let mut received = Vec::new();
    while received.len() < 5 {
        match next_event(&mut rx).await {
            ConnectionEvent::DataReceived(chunk) => received.extend(chunk),
            other => panic!("unexpected event: {:?}", other),
        }
    }
    assert_eq!(received, b"hello");
}

#[tokio::test]
async fn test_frames_sent_in_submission_order() {
    let (manager, mut rx) = setup();
    let mut remote = connect_inbound(&manager, &mut rx).await;

    for frame in [b"one".to_vec(), b"two".to_vec(), b"three".to_vec()] {
        assert!(manager.send(frame));
    }

    for expected in [&b"one"[..], b"two", b"three"] {
        assert_eq!(
            next_event(&mut rx).await,
            ConnectionEvent::DataSent(expected.to_vec())
        );
    }

    let mut buf = vec![0u8; 11];
    remote.read_exact(&mut buf).await.unwrap();
    assert_eq!(buf, b"onetwothree");
}

#[tokio::test]
async fn test_dial_connects_to_peer() {
    let (manager, mut rx) = setup();
    manager.transport().add_peer(LOCK, "Lock");

    manager.dial(LOCK);

    assert_eq!(next_event(&mut rx).await, state(ConnectionState::Dialing));
    assert_eq!(next_event(&mut rx).await, state(ConnectionState::Connected));
    assert_eq!(
        next_event(&mut rx).await,
        ConnectionEvent::PeerIdentified {
            name: "Lock".into(),
            address: LOCK.into(),
        }
    );
    assert!(!manager.active_roles().dialing);

    let (peer, mut remote) = manager.transport().take_dialed().unwrap();
    assert_eq!(peer.address, LOCK);

    remote.write_all(b"a").await.unwrap();
    assert_eq!(
        next_event(&mut rx).await,
        ConnectionEvent::DataReceived(b"a".to_vec())
    );
    assert_consistent(&manager);
}

#[tokio::test]
async fn test_inbound_accept_wins_over_pending_dial() {
    let (manager, mut rx) = setup();
    manager.transport().add_hanging_peer(LOCK);

    manager.start();
    wait_until(|| manager.transport().open_listeners() == 1).await;
    manager.dial(LOCK);
    wait_until(|| manager.transport().pending_dials() == 1).await;

    assert_eq!(next_event(&mut rx).await, state(ConnectionState::Listening));
    assert_eq!(next_event(&mut rx).await, state(ConnectionState::Dialing));

    let _remote = manager
        .transport()
        .inbound(PeerIdentity::new(PHONE, "Phone"))
        .unwrap();

    assert_eq!(next_event(&mut rx).await, state(ConnectionState::Connected));
    assert!(matches!(
        next_event(&mut rx).await,
        ConnectionEvent::PeerIdentified { .. }
    ));

    // The superseded dial is cancelled without reporting a failure.
    wait_until(|| manager.transport().pending_dials() == 0).await;
    wait_until(|| manager.transport().open_listeners() == 0).await;
    expect_quiet(&mut rx).await;
    assert_consistent(&manager);
}

#[tokio::test]
async fn test_stop_while_connected_silences_session() {
    let (manager, mut rx) = setup();
    let mut remote = connect_inbound(&manager, &mut rx).await;

    manager.stop();
    assert_eq!(next_event(&mut rx).await, state(ConnectionState::Idle));
    assert!(!manager.send(vec![0x61]));

    // Our end is closed.
    let mut buf = [0u8; 8];
    let read = tokio::time::timeout(TIMEOUT, remote.read(&mut buf))
        .await
        .expect("socket not closed");
    assert!(matches!(read, Ok(0) | Err(_)));
    let _ = remote.write_all(b"late").await;

    expect_quiet(&mut rx).await;
    assert_eq!(manager.current_state(), ConnectionState::Idle);
    assert_eq!(manager.transport().open_listeners(), 0);
    assert_consistent(&manager);
}

#[tokio::test]
async fn test_dial_while_connected_drops_session_quietly() {
    let (manager, mut rx) = setup();
    let mut remote = connect_inbound(&manager, &mut rx).await;
    manager.transport().add_hanging_peer(LOCK);

    manager.dial(LOCK);
    assert_eq!(next_event(&mut rx).await, state(ConnectionState::Dialing));

    let mut buf = [0u8; 8];
    let read = tokio::time::timeout(TIMEOUT, remote.read(&mut buf))
        .await
        .expect("socket not closed");
    assert!(matches!(read, Ok(0) | Err(_)));

    // Superseded session does not report a loss.
    expect_quiet(&mut rx).await;
    assert!(!manager.active_roles().session);
    assert_consistent(&manager);
}

#[tokio::test]
async fn test_accept_failure_keeps_state_and_rearms() {
    let (manager, mut rx) = setup();
    manager.start();
    assert_eq!(next_event(&mut rx).await, state(ConnectionState::Listening));
    wait_until(|| manager.transport().open_listeners() == 1).await;

    manager.transport().drop_listener();

    match next_event(&mut rx).await {
        ConnectionEvent::Advisory(message) => assert!(message.starts_with("Accept failed")),
        other => panic!("unexpected event: {:?}", other),
    }
    wait_until(|| manager.transport().open_listeners() == 0).await;
    expect_quiet(&mut rx).await;
    assert_eq!(manager.current_state(), ConnectionState::Listening);
    assert!(!manager.active_roles().listening);
    assert_consistent(&manager);

    manager.start();
    wait_until(|| manager.transport().open_listeners() == 1).await;
    assert_eq!(manager.transport().listen_calls(), 2);
    expect_quiet(&mut rx).await;

    let _remote = manager
        .transport()
        .inbound(PeerIdentity::new(PHONE, "Phone"))
        .unwrap();
    assert_eq!(next_event(&mut rx).await, state(ConnectionState::Connected));
}

#[tokio::test]
async fn test_write_failure_keeps_session() {
    let (manager, mut rx) = setup();
    let _remote = connect_inbound(&manager, &mut rx).await;

    manager.transport().fail_writes(true);
    assert!(manager.send(Command::Engage));

    match next_event(&mut rx).await {
        ConnectionEvent::Advisory(message) => assert!(message.starts_with("Unable to send data")),
        other => panic!("unexpected event: {:?}", other),
    }
    expect_quiet(&mut rx).await;
    assert_eq!(manager.current_state(), ConnectionState::Connected);
    assert!(manager.active_roles().session);
    assert_consistent(&manager);

    manager.transport().fail_writes(false);
    assert!(manager.send(Command::Release));
    assert_eq!(next_event(&mut rx).await, ConnectionEvent::DataSent(vec![0x62]));
}

#[tokio::test]
async fn test_invariants_hold_across_operations() {
    let (manager, _rx) = setup();
    let transport = manager.transport().clone();
    transport.add_peer(LOCK, "Lock");
    transport.add_hanging_peer("22:22:22:22:22:22");

    manager.start();
    assert_consistent(&manager);
    manager.dial("22:22:22:22:22:22");
    assert_consistent(&manager);
    manager.start();
    assert_consistent(&manager);
    manager.dial(LOCK);
    wait_until(|| manager.current_state() == ConnectionState::Connected).await;
    assert_consistent(&manager);
    manager.start();
    assert_consistent(&manager);
    manager.stop();
    assert_consistent(&manager);
    manager.stop();
    assert_consistent(&manager);

    wait_until(|| transport.open_listeners() == 0 && transport.pending_dials() == 0).await;

    manager.start();
    wait_until(|| transport.open_listeners() == 1).await;
    manager.start();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(transport.open_listeners(), 1);
    assert_consistent(&manager);
}
