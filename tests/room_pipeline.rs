//! End-to-end room pipeline tests
//!
//! These drive the async path a real connection takes: registry
//! placement, welcome delivery, input queueing and snapshot broadcast,
//! without a websocket in the loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use arena_server::config::Config;
use arena_server::game::room::JoinError;
use arena_server::game::RoomRegistry;
use arena_server::ws::protocol::{server_msg, InputRecord, SNAPSHOT_HEADER_LEN};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

fn test_config(max_players_per_room: usize, max_rooms: usize) -> Config {
    Config {
        server_addr: "127.0.0.1:0".parse().unwrap(),
        log_level: "info".to_string(),
        tick_rate: 60,
        max_players_per_room,
        max_rooms,
        max_lag_compensation_ms: 400.0,
        map_seed: 7,
        database_url: None,
    }
}

fn registry(max_players_per_room: usize, max_rooms: usize) -> Arc<RoomRegistry> {
    Arc::new(RoomRegistry::new(Arc::new(test_config(
        max_players_per_room,
        max_rooms,
    ))))
}

async fn recv_frame(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Vec<u8> {
    timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("channel closed")
}

/// Wait for a snapshot satisfying `predicate`, skipping everything else
async fn recv_snapshot_where(
    rx: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    predicate: impl Fn(&[u8]) -> bool,
) -> Vec<u8> {
    loop {
        let frame = recv_frame(rx).await;
        if frame[0] == server_msg::SNAPSHOT && predicate(&frame) {
            return frame;
        }
    }
}

fn acked_seq(snapshot: &[u8]) -> u32 {
    u32::from_le_bytes(snapshot[15..19].try_into().unwrap())
}

fn forward_input(seq: u32) -> InputRecord {
    InputRecord {
        seq,
        flags: 1, // forward
        weapon: 0,
        yaw: 0.0,
        pitch: 0.0,
        timestamp: 0.0,
    }
}

#[tokio::test]
async fn welcome_then_acked_snapshots() {
    let registry = registry(16, 10);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let (handle, player_id) = registry.place("alice", tx).await.unwrap();
    assert_eq!(player_id, 1);

    let welcome = recv_frame(&mut rx).await;
    assert_eq!(welcome[0], server_msg::WELCOME);
    assert_eq!(u16::from_le_bytes(welcome[1..3].try_into().unwrap()), 1);
    assert_eq!(welcome[3], 60); // tick rate
    assert_eq!(u32::from_le_bytes(welcome[4..8].try_into().unwrap()), 7); // map seed

    handle.queue_input(player_id, forward_input(1)).await;
    handle.queue_input(player_id, forward_input(2)).await;

    let snapshot = recv_snapshot_where(&mut rx, |frame| acked_seq(frame) == 2).await;
    assert!(snapshot.len() >= SNAPSHOT_HEADER_LEN);
    assert_eq!(snapshot[13], 1); // one player in the world
}

#[tokio::test]
async fn connections_fill_the_same_room() {
    let registry = registry(16, 10);
    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    let (tx_b, _rx_b) = mpsc::unbounded_channel();

    let (room_a, id_a) = registry.place("alice", tx_a).await.unwrap();
    let (room_b, id_b) = registry.place("bob", tx_b).await.unwrap();

    assert_eq!(room_a.id, room_b.id);
    assert_ne!(id_a, id_b);
    assert_eq!(registry.room_count(), 1);

    // Alice's stream eventually reflects both players
    let snapshot = recv_snapshot_where(&mut rx_a, |frame| frame[13] == 2).await;
    assert_eq!(snapshot[13], 2);
}

#[tokio::test]
async fn full_rooms_overflow_until_server_capacity() {
    let registry = registry(1, 2);

    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    let (room_a, _) = registry.place("alice", tx_a).await.unwrap();
    // Wait for admission so the room's player count is visible
    let _ = recv_frame(&mut rx_a).await;

    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    let (room_b, _) = registry.place("bob", tx_b).await.unwrap();
    let _ = recv_frame(&mut rx_b).await;

    assert_ne!(room_a.id, room_b.id);
    assert_eq!(registry.room_count(), 2);

    let (tx_c, _rx_c) = mpsc::unbounded_channel();
    let rejected = registry.place("carol", tx_c).await;
    assert!(matches!(rejected, Err(JoinError::ServerFull)));
}

#[tokio::test]
async fn leave_reports_tally_and_retires_the_room() {
    let registry = registry(16, 10);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let (handle, player_id) = registry.place("alice", tx).await.unwrap();
    let _ = recv_frame(&mut rx).await;

    let tally = handle.leave(player_id).await.expect("player should exist");
    assert_eq!(tally.kills, 0);
    assert_eq!(tally.deaths, 0);

    // The room loop stops once its last player is gone
    for _ in 0..100 {
        if registry.room_count() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("room was not retired after last player left");
}
