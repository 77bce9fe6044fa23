// End-to-end integration tests for the relay pipeline.
//
// Each test starts a real relay server, connects real SessionClient
// instances (via TestGameClient), and verifies the full path:
// local movement → EVENT/SNAPSHOT → relay → other clients' dispatch queues →
// their TestWorld state.
//
// These tests exercise the same code paths as a live host application
// (SessionClient and the relay from laba_relay); the only test-specific code
// is the in-memory world and the synchronous polling wrappers in
// TestGameClient.

use std::net::SocketAddr;
use std::thread;
use std::time::Duration;

use laba_protocol::{PlayerId, Vec3};
use laba_relay::{ClientConfig, RelayConfig, RelayHandle, start_relay};
use multiplayer_tests::{TestGameClient, poll_all_until};

fn start_test_relay(config: RelayConfig) -> (RelayHandle, SocketAddr) {
    start_relay(RelayConfig {
        bind_addr: "127.0.0.1".parse().unwrap(),
        port: 0,
        ..config
    })
    .unwrap()
}

/// Start a relay, connect two clients one after the other so their ids are
/// deterministic, and wait until each sees the other.
fn start_test_session() -> (RelayHandle, SocketAddr, TestGameClient, TestGameClient) {
    let (handle, addr) = start_test_relay(RelayConfig::default());

    let mut host = TestGameClient::connect(addr);
    assert_eq!(host.poll_until_assigned(), PlayerId(1));
    let mut joiner = TestGameClient::connect(addr);
    assert_eq!(joiner.poll_until_assigned(), PlayerId(2));

    poll_all_until(&mut [&mut host, &mut joiner], "mutual discovery", |c| {
        c[0].remote(PlayerId(2)).is_some() && c[1].remote(PlayerId(1)).is_some()
    });

    (handle, addr, host, joiner)
}

// ---------------------------------------------------------------------------
// Test scenarios
// ---------------------------------------------------------------------------

#[test]
fn two_clients_discover_each_other() {
    let (handle, _addr, host, joiner) = start_test_session();

    assert_eq!(host.world.local_id, PlayerId(1));
    assert_eq!(joiner.world.local_id, PlayerId(2));
    // Nobody sees a ghost of themselves.
    assert!(host.remote(PlayerId(1)).is_none());
    assert!(joiner.remote(PlayerId(2)).is_none());
    assert_eq!(host.world.remotes.len(), 1);
    assert_eq!(joiner.world.remotes.len(), 1);

    host.close();
    joiner.close();
    handle.stop();
}

#[test]
fn movement_propagates_to_other_client() {
    let (handle, _addr, mut host, mut joiner) = start_test_session();

    host.step(Vec3::new(1.0, 0.0, 0.0));
    host.step(Vec3::new(0.0, 2.0, 0.0));
    poll_all_until(&mut [&mut host, &mut joiner], "host movement", |c| {
        c[1].remote(PlayerId(1)) == Some(Vec3::new(1.0, 2.0, 0.0))
    });

    joiner.step(Vec3::new(-4.0, 0.0, 0.5));
    poll_all_until(&mut [&mut host, &mut joiner], "joiner movement", |c| {
        c[0].remote(PlayerId(2)) == Some(Vec3::new(-4.0, 0.0, 0.5))
    });

    // Each remote was spawned exactly once despite many updates.
    assert_eq!(host.world.spawn_counts[&PlayerId(2)], 1);
    assert_eq!(joiner.world.spawn_counts[&PlayerId(1)], 1);

    host.close();
    joiner.close();
    handle.stop();
}

#[test]
fn departure_removes_participant() {
    let (handle, _addr, mut host, joiner) = start_test_session();

    joiner.close();
    host.poll_until("joiner removal", |world| {
        !world.remotes.contains_key(&PlayerId(2))
    });
    assert!(host.world.remotes.is_empty());

    host.close();
    handle.stop();
}

#[test]
fn late_joiner_receives_current_positions() {
    let (handle, addr, mut host, mut joiner) = start_test_session();

    host.step(Vec3::new(5.0, 0.0, 0.0));
    poll_all_until(&mut [&mut host, &mut joiner], "host movement", |c| {
        c[1].remote(PlayerId(1)) == Some(Vec3::new(5.0, 0.0, 0.0))
    });

    // The late joiner learns positions from its handshake keyframe.
    let mut late = TestGameClient::connect(addr);
    assert_eq!(late.poll_until_assigned(), PlayerId(3));
    late.poll_until("keyframe", |world| {
        world.remotes.get(&PlayerId(1)) == Some(&Vec3::new(5.0, 0.0, 0.0))
            && world.remotes.contains_key(&PlayerId(2))
    });
    assert!(late.remote(PlayerId(3)).is_none());

    late.close();
    host.close();
    joiner.close();
    handle.stop();
}

#[test]
fn idle_client_expires() {
    let (handle, addr) = start_test_relay(RelayConfig {
        peer_timeout_ms: Some(300),
        poll_interval_ms: 20,
        ..RelayConfig::default()
    });
    let mut host = TestGameClient::connect(addr);
    host.poll_until_assigned();
    let mut quiet = TestGameClient::connect(addr);
    quiet.poll_until_assigned();
    host.poll_until("quiet client discovery", |world| {
        world.remotes.contains_key(&PlayerId(2))
    });

    // `quiet` stops ticking, so it stops reporting; the host keeps going.
    host.poll_until("quiet client expiry", |world| {
        !world.remotes.contains_key(&PlayerId(2))
    });
    assert_eq!(handle.peer_count(), 1);

    quiet.close();
    host.close();
    handle.stop();
}

#[test]
fn checksummed_session_end_to_end() {
    let (handle, addr) = start_test_relay(RelayConfig {
        checksums: true,
        ..RelayConfig::default()
    });
    let config = ClientConfig {
        checksums: true,
        ..ClientConfig::for_server(addr)
    };
    let mut host = TestGameClient::connect_with(config.clone());
    host.poll_until_assigned();
    let mut joiner = TestGameClient::connect_with(config);
    joiner.poll_until_assigned();

    host.step(Vec3::new(0.5, 0.5, 0.5));
    poll_all_until(&mut [&mut host, &mut joiner], "checksummed movement", |c| {
        c[1].remote(PlayerId(1)) == Some(Vec3::new(0.5, 0.5, 0.5))
    });

    host.close();
    joiner.close();
    handle.stop();
}

#[test]
fn relay_stop_leaves_clients_stale_but_alive() {
    let (handle, _addr, mut host, mut joiner) = start_test_session();
    handle.stop();
    thread::sleep(Duration::from_millis(50));

    // Sends go nowhere; ticking must neither panic nor change remote state.
    host.step(Vec3::new(1.0, 0.0, 0.0));
    for _ in 0..5 {
        host.tick();
        joiner.tick();
        thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(joiner.remote(PlayerId(1)), Some(Vec3::ZERO));

    host.close();
    joiner.close();
}
