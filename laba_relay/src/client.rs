// UDP session client for joining a relay.
//
// Provides a non-blocking interface for the simulation thread. Architecture:
// - `connect()` binds an ephemeral UDP socket, connects it to the relay
//   address, spawns the receive thread, then sends `CONNECT(establish)`. It
//   does not wait for the reply: `ID_SET` and `KEYFRAME` are applied whenever
//   they arrive. Until then the local participant is `PlayerId::UNASSIGNED`.
// - The receive thread decodes datagrams and turns them into `Simulation`
//   calls queued on the shared `SimQueue`. It never touches the simulation.
// - The simulation thread calls `pump()` (or `drain` + `update` separately)
//   once per tick: queued actions run, then the movement cadence may send an
//   `EVENT` delta and, less often, a `SNAPSHOT` of the absolute position.
//
// The receive thread keeps a roster of remote ids it has asked the
// simulation to create, so "create if unseen" yields exactly one
// `add_participant` per id. Records naming the local id are never turned
// into remote participants; if one slipped in before `ID_SET` (datagrams can
// reorder), the `ID_SET` removes it before rebinding.
//
// Send failures are logged, not retried. The movement baseline advances
// regardless; the periodic `SNAPSHOT` and the relay's keyframes reconcile
// whatever a lost delta leaves behind.

use std::collections::BTreeSet;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use laba_protocol::{
    ConnectAction, DecodeError, MAX_FRAME_LEN, Packet, Payload, PlayerId, Vec3, decode, encode,
};
use tracing::{debug, error, info, trace, warn};

use crate::config::ClientConfig;
use crate::error::SessionError;
use crate::net::{is_timeout, now_ms, wake_receiver};
use crate::simulation::{SimQueue, Simulation};

/// Fixed-cadence movement reporting, independent of frame rate.
///
/// Each due tick yields the delta from the last reported position and makes
/// the current position the new baseline.
#[derive(Clone, Debug)]
pub struct MovementReporter {
    send_interval: Duration,
    snapshot_interval: Option<Duration>,
    baseline: Vec3,
    last_delta: Option<Instant>,
    last_snapshot: Option<Instant>,
}

impl MovementReporter {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            send_interval: config.send_interval(),
            snapshot_interval: config.snapshot_interval(),
            baseline: config.spawn_position,
            last_delta: None,
            last_snapshot: None,
        }
    }

    /// The delta to report at `now`, if a report is due.
    pub fn take_delta(&mut self, now: Instant, position: Vec3) -> Option<Vec3> {
        if let Some(last) = self.last_delta {
            if now.saturating_duration_since(last) < self.send_interval {
                return None;
            }
        }
        self.last_delta = Some(now);
        let delta = position - self.baseline;
        self.baseline = position;
        Some(delta)
    }

    /// Whether an absolute-position report is due at `now`.
    pub fn take_snapshot(&mut self, now: Instant) -> bool {
        let Some(interval) = self.snapshot_interval else {
            return false;
        };
        if let Some(last) = self.last_snapshot {
            if now.saturating_duration_since(last) < interval {
                return false;
            }
        }
        self.last_snapshot = Some(now);
        true
    }

    /// Account for a delta reported outside the cadence.
    pub fn advance(&mut self, delta: Vec3) {
        self.baseline += delta;
    }

    pub fn baseline(&self) -> Vec3 {
        self.baseline
    }
}

/// A joined relay session.
pub struct SessionClient {
    socket: UdpSocket,
    checksums: bool,
    queue: Arc<SimQueue>,
    local_id: Arc<AtomicU32>,
    running: Arc<AtomicBool>,
    reader_thread: Option<JoinHandle<()>>,
    reporter: MovementReporter,
    next_seq: u32,
}

impl SessionClient {
    /// Open a session with the relay at `config.server_addr`. Inbound state
    /// changes are queued on `queue` for the simulation thread to drain.
    pub fn connect(config: ClientConfig, queue: Arc<SimQueue>) -> Result<Self, SessionError> {
        config.validate()?;
        let bind_addr = match config.server_addr {
            SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        };
        let socket = UdpSocket::bind(bind_addr)?;
        socket.connect(config.server_addr)?;
        socket.set_read_timeout(Some(config.poll_interval()))?;
        let reader_socket = socket.try_clone()?;

        let local_id = Arc::new(AtomicU32::new(PlayerId::UNASSIGNED.0));
        let running = Arc::new(AtomicBool::new(true));
        let reader_thread = {
            let roster = Roster::new(Arc::clone(&local_id), Arc::clone(&queue));
            let running = Arc::clone(&running);
            let checksums = config.checksums;
            thread::Builder::new()
                .name("laba-client-recv".into())
                .spawn(move || receive_loop(reader_socket, checksums, &running, roster))?
        };

        let mut client = Self {
            socket,
            checksums: config.checksums,
            queue,
            local_id,
            running,
            reader_thread: Some(reader_thread),
            reporter: MovementReporter::new(&config),
            next_seq: 0,
        };
        info!(server = %config.server_addr, local = ?client.socket.local_addr().ok(), "joining relay");
        client.send_payload(&Payload::Connect(ConnectAction::Establish))?;
        Ok(client)
    }

    /// Report a positional change since the last report. The cadence
    /// baseline moves with it, so the next due tick does not repeat it.
    pub fn send_movement_delta(&mut self, delta: Vec3) -> Result<(), SessionError> {
        self.reporter.advance(delta);
        self.send_payload(&Payload::Event(delta))
    }

    /// Report the local participant's absolute position.
    pub fn send_snapshot(&mut self, position: Vec3) -> Result<(), SessionError> {
        self.send_payload(&Payload::Snapshot(position))
    }

    /// Send whatever movement reports are due at `now`.
    pub fn update(&mut self, now: Instant, position: Vec3) {
        if let Some(delta) = self.reporter.take_delta(now, position) {
            if let Err(err) = self.send_payload(&Payload::Event(delta)) {
                debug!(error = %err, "movement delta not sent");
            }
        }
        if self.reporter.take_snapshot(now) {
            if let Err(err) = self.send_snapshot(position) {
                debug!(error = %err, "snapshot not sent");
            }
        }
    }

    /// One simulation tick: apply queued network actions to `sim`, then
    /// report movement. Returns the number of actions applied.
    pub fn pump<S: Simulation + 'static>(&mut self, sim: &mut S) -> usize {
        let applied = self.queue.drain(sim);
        let position = sim.local_position();
        self.update(Instant::now(), position);
        applied
    }

    /// Relay-assigned id, or `PlayerId::UNASSIGNED` before `ID_SET`.
    pub fn local_id(&self) -> PlayerId {
        PlayerId(self.local_id.load(Ordering::SeqCst))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SessionError> {
        Ok(self.socket.local_addr()?)
    }

    /// Say goodbye to the relay, stop the receive thread and wait for it.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(reader_thread) = self.reader_thread.take() else {
            return;
        };
        if let Err(err) = self.send_payload(&Payload::Connect(ConnectAction::Terminate)) {
            debug!(error = %err, "terminate not sent");
        }
        self.running.store(false, Ordering::SeqCst);
        wake_receiver(&self.socket);
        if reader_thread.join().is_err() {
            error!("client receive thread panicked");
        }
        info!(player_id = %self.local_id(), "session closed");
    }

    fn send_payload(&mut self, payload: &Payload) -> Result<(), SessionError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        let packet = Packet::with_payload(payload, self.local_id(), seq, now_ms());
        let frame = encode(&packet, self.checksums)?;
        self.socket.send(&frame)?;
        trace!(msg_type = ?packet.msg_type, seq, "sent");
        Ok(())
    }
}

impl Drop for SessionClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Receive thread: decode datagrams until `running` is cleared.
fn receive_loop(socket: UdpSocket, checksums: bool, running: &AtomicBool, mut roster: Roster) {
    let mut buf = vec![0u8; MAX_FRAME_LEN];
    while running.load(Ordering::SeqCst) {
        let len = match socket.recv(&mut buf) {
            Ok(len) => len,
            Err(ref e) if is_timeout(e) => continue,
            Err(e) => {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                error!(error = %e, "client receive failed");
                continue;
            }
        };
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let packet = match decode(&buf[..len], checksums) {
            Ok(packet) => packet,
            Err(DecodeError::Framing(err)) => {
                debug!(error = %err, "dropping malformed datagram");
                continue;
            }
            Err(DecodeError::Protocol(err)) => {
                warn!(error = %err, "dropping datagram");
                continue;
            }
        };
        match packet.payload() {
            Ok(payload) => roster.dispatch(packet.sender(), payload),
            Err(err) => warn!(msg_type = ?packet.msg_type, error = %err, "dropping datagram"),
        }
    }
    debug!("client receive loop exited");
}

/// Receive-side bookkeeping: which remote participants exist, and which id
/// is ours. Turns inbound payloads into queued simulation calls.
struct Roster {
    local_id: Arc<AtomicU32>,
    queue: Arc<SimQueue>,
    remotes: BTreeSet<PlayerId>,
}

impl Roster {
    fn new(local_id: Arc<AtomicU32>, queue: Arc<SimQueue>) -> Self {
        Self {
            local_id,
            queue,
            remotes: BTreeSet::new(),
        }
    }

    fn local(&self) -> PlayerId {
        PlayerId(self.local_id.load(Ordering::SeqCst))
    }

    fn dispatch(&mut self, sender: PlayerId, payload: Payload) {
        match payload {
            Payload::IdSet(id) => self.assign_local(id),
            Payload::Keyframe(records) => {
                trace!(records = records.len(), "keyframe");
                for record in records {
                    self.upsert(record.id, record.position);
                }
            }
            Payload::Snapshot(position) => self.upsert(sender, position),
            Payload::Event(delta) => {
                if self.ensure_remote(sender) {
                    self.queue
                        .enqueue(move |sim| sim.apply_participant_delta(sender, delta));
                }
            }
            Payload::Connect(ConnectAction::Terminate) => {
                if self.remotes.remove(&sender) {
                    info!(player_id = %sender, "participant left");
                    self.queue.enqueue(move |sim| sim.remove_participant(sender));
                }
            }
            Payload::Connect(ConnectAction::Establish) | Payload::Ack(_) => {
                trace!(player_id = %sender, "ignoring");
            }
        }
    }

    fn assign_local(&mut self, id: PlayerId) {
        if !id.is_assigned() {
            warn!("relay assigned the reserved id");
            return;
        }
        let previous = PlayerId(self.local_id.swap(id.0, Ordering::SeqCst));
        if previous == id {
            return;
        }
        if self.remotes.remove(&id) {
            debug!(player_id = %id, "removing ghost of the local participant");
            self.queue.enqueue(move |sim| sim.remove_participant(id));
        }
        info!(player_id = %id, "assigned participant id");
        self.queue.enqueue(move |sim| sim.rebind_local_id(id));
    }

    fn upsert(&mut self, id: PlayerId, position: Vec3) {
        if self.ensure_remote(id) {
            self.queue
                .enqueue(move |sim| sim.set_participant_position(id, position));
        }
    }

    /// Make sure `id` exists as a remote participant. False if `id` is not
    /// a remote participant at all.
    fn ensure_remote(&mut self, id: PlayerId) -> bool {
        if !id.is_assigned() || id == self.local() {
            return false;
        }
        if self.remotes.insert(id) {
            debug!(player_id = %id, "participant joined");
            self.queue.enqueue(move |sim| sim.add_participant(id));
        }
        true
    }
}
