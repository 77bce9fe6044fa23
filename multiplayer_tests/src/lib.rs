// Test-only game client for multiplayer integration tests.
//
// Wraps the real `SessionClient` (from `laba_relay::client`) and an in-memory
// `TestWorld` implementing `Simulation` to provide a synchronous,
// test-friendly API for exercising the full pipeline:
// client → relay → other clients → dispatch queue → simulation state.
//
// The only test-specific code here is the world itself (a map of participant
// positions) and the blocking polling wrappers around `SessionClient::pump`.
// All networking and dispatch go through the same code paths a real host
// application uses.
//
// See also: `tests/full_pipeline.rs` for the integration test scenarios.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use laba_protocol::{PlayerId, Vec3};
use laba_relay::{ClientConfig, SessionClient, SimQueue, Simulation};

/// Default timeout for blocking poll operations.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep duration between poll attempts.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// In-memory simulation: the local participant plus every remote one.
#[derive(Debug, Default)]
pub struct TestWorld {
    pub local_id: PlayerId,
    pub local_position: Vec3,
    pub remotes: BTreeMap<PlayerId, Vec3>,
    /// How many times each id was spawned, to catch duplicate creation.
    pub spawn_counts: BTreeMap<PlayerId, u32>,
}

impl Simulation for TestWorld {
    fn add_participant(&mut self, id: PlayerId) {
        self.remotes.insert(id, Vec3::ZERO);
        *self.spawn_counts.entry(id).or_default() += 1;
    }

    fn remove_participant(&mut self, id: PlayerId) {
        self.remotes.remove(&id);
    }

    fn set_participant_position(&mut self, id: PlayerId, position: Vec3) {
        if let Some(slot) = self.remotes.get_mut(&id) {
            *slot = position;
        }
    }

    fn apply_participant_delta(&mut self, id: PlayerId, delta: Vec3) {
        if let Some(slot) = self.remotes.get_mut(&id) {
            *slot += delta;
        }
    }

    fn local_position(&self) -> Vec3 {
        self.local_position
    }

    fn rebind_local_id(&mut self, new_id: PlayerId) {
        self.local_id = new_id;
    }
}

/// A test game client wrapping a real SessionClient and a TestWorld.
pub struct TestGameClient {
    client: SessionClient,
    pub world: TestWorld,
}

impl TestGameClient {
    /// Join the relay at `addr` with default client settings.
    pub fn connect(addr: SocketAddr) -> Self {
        Self::connect_with(ClientConfig::for_server(addr))
    }

    pub fn connect_with(config: ClientConfig) -> Self {
        let world = TestWorld {
            local_position: config.spawn_position,
            ..TestWorld::default()
        };
        let client = SessionClient::connect(config, Arc::new(SimQueue::new()))
            .expect("TestGameClient::connect failed");
        Self { client, world }
    }

    /// One simulation tick: apply network actions, report movement.
    pub fn tick(&mut self) -> usize {
        self.client.pump(&mut self.world)
    }

    /// Move the local participant; the next due tick reports it.
    pub fn step(&mut self, delta: Vec3) {
        self.world.local_position += delta;
    }

    pub fn local_id(&self) -> PlayerId {
        self.client.local_id()
    }

    pub fn remote(&self, id: PlayerId) -> Option<Vec3> {
        self.world.remotes.get(&id).copied()
    }

    /// Blocking tick loop until the relay's ID_SET has been applied to the
    /// world. Returns the assigned id.
    pub fn poll_until_assigned(&mut self) -> PlayerId {
        self.poll_until("ID_SET", |world| world.local_id.is_assigned());
        self.world.local_id
    }

    /// Blocking tick loop until `done` holds for this client's world.
    pub fn poll_until(&mut self, what: &str, mut done: impl FnMut(&TestWorld) -> bool) {
        let start = Instant::now();
        loop {
            self.tick();
            if done(&self.world) {
                return;
            }
            assert!(start.elapsed() < POLL_TIMEOUT, "timed out waiting for {what}");
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Say goodbye and stop the client.
    pub fn close(self) {
        self.client.close();
    }
}

/// Tick every client in turn until `done` holds across all of them.
pub fn poll_all_until(
    clients: &mut [&mut TestGameClient],
    what: &str,
    mut done: impl FnMut(&[&mut TestGameClient]) -> bool,
) {
    let start = Instant::now();
    loop {
        for client in clients.iter_mut() {
            client.tick();
        }
        if done(&*clients) {
            return;
        }
        assert!(start.elapsed() < POLL_TIMEOUT, "timed out waiting for {what}");
        thread::sleep(POLL_INTERVAL);
    }
}
