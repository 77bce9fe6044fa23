// UDP relay server and its control loop.
//
// Architecture: one socket, one thread, receive-then-dispatch.
//
// - **Relay thread** (`RelayServer::run`): blocks in `recv_from` on the
//   well-known port, decodes each datagram, routes it by message type and
//   acts on it before receiving the next one. It is the only code that
//   touches the `PeerRegistry`, so the registry needs no lock.
// - **Maintenance** rides on the same loop. The socket's read timeout
//   (`poll_interval_ms`) guarantees the loop wakes up regularly even when no
//   traffic arrives; after every wakeup it expires idle peers and, if
//   configured, broadcasts a periodic keyframe.
//
// Routing:
// - `CONNECT(establish)` from a new endpoint registers it and answers the
//   sender alone with `ID_SET(id)` followed by `KEYFRAME(all peers)`. From a
//   known endpoint it only refreshes liveness; nothing is re-sent.
// - `CONNECT(terminate)` removes the peer and broadcasts a terminate stamped
//   with the departing id to everyone left. Timeouts do the same.
// - `EVENT` / `SNAPSHOT` from a registered endpoint update its last known
//   position, get the sender's id stamped into the header, and go to every
//   other peer. Never back to the sender.
// - Everything else is logged and dropped.
//
// Per-datagram failures never end the loop. A send failure to one broadcast
// target is logged and delivery continues to the rest.
//
// Shutdown: `RelayHandle::stop` clears `keep_running`, wakes the blocked
// receive (see `net::wake_receiver`) and joins the thread.

use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Instant;

use laba_protocol::{
    ConnectAction, DecodeError, MAX_FRAME_LEN, Packet, Payload, PlayerId, Vec3, decode, encode,
};
use tracing::{debug, error, info, trace, warn};

use crate::config::RelayConfig;
use crate::error::SessionError;
use crate::net::{is_timeout, now_ms, send_packet, wake_receiver};
use crate::registry::{PeerRegistry, Registration};

/// Handle returned by `start_relay` to control the running server.
pub struct RelayHandle {
    keep_running: Arc<AtomicBool>,
    peer_count: Arc<AtomicUsize>,
    socket: UdpSocket,
    thread: Option<thread::JoinHandle<()>>,
}

impl RelayHandle {
    /// Signal the relay to stop and wait for it to shut down.
    pub fn stop(mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        wake_receiver(&self.socket);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("relay thread panicked");
            }
        }
        info!("relay stopped");
    }

    /// Number of registered peers as of the last registry change.
    pub fn peer_count(&self) -> usize {
        self.peer_count.load(Ordering::SeqCst)
    }
}

/// Start the relay server on a background thread. Returns a handle for
/// stopping it and the actual bound address (useful when port 0 is used
/// to let the OS pick a free port).
pub fn start_relay(config: RelayConfig) -> Result<(RelayHandle, SocketAddr), SessionError> {
    config.validate()?;
    let socket = UdpSocket::bind(config.socket_addr())?;
    socket.set_read_timeout(Some(config.poll_interval()))?;
    let addr = socket.local_addr()?;
    let wake_socket = socket.try_clone()?;

    let server = RelayServer::new(socket, config);
    let peer_count = Arc::clone(&server.peer_count);
    let keep_running = Arc::new(AtomicBool::new(true));
    let keep_running_clone = Arc::clone(&keep_running);

    let thread = thread::Builder::new()
        .name("laba-relay".into())
        .spawn(move || server.run(&keep_running_clone))?;

    info!(%addr, "relay listening");
    Ok((
        RelayHandle {
            keep_running,
            peer_count,
            socket: wake_socket,
            thread: Some(thread),
        },
        addr,
    ))
}

/// What a movement packet says about its sender's position.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Movement {
    Absolute(Vec3),
    Delta(Vec3),
}

/// Relay state: the socket, the registry, and loop bookkeeping.
pub struct RelayServer {
    socket: UdpSocket,
    config: RelayConfig,
    registry: PeerRegistry,
    /// Sequence counter for packets the relay originates.
    next_seq: u32,
    last_keyframe: Instant,
    peer_count: Arc<AtomicUsize>,
}

impl RelayServer {
    pub fn new(socket: UdpSocket, config: RelayConfig) -> Self {
        let registry = PeerRegistry::new(config.max_peers, config.spawn_position);
        Self {
            socket,
            config,
            registry,
            next_seq: 0,
            last_keyframe: Instant::now(),
            peer_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Receive and dispatch until `keep_running` is cleared.
    pub fn run(mut self, keep_running: &AtomicBool) {
        let mut buf = vec![0u8; MAX_FRAME_LEN];
        while keep_running.load(Ordering::SeqCst) {
            match self.socket.recv_from(&mut buf) {
                Ok((len, from)) => {
                    if !keep_running.load(Ordering::SeqCst) {
                        break;
                    }
                    self.handle_datagram(&buf[..len], from, Instant::now());
                }
                Err(ref e) if is_timeout(e) => {}
                Err(e) => {
                    if !keep_running.load(Ordering::SeqCst) {
                        break;
                    }
                    // e.g. ICMP port-unreachable surfacing on some platforms.
                    error!(error = %e, "relay receive failed");
                }
            }
            self.maintain(Instant::now());
        }
        debug!(peers = self.registry.len(), "relay loop exited");
    }

    /// Decode one datagram and act on it.
    pub fn handle_datagram(&mut self, data: &[u8], from: SocketAddr, now: Instant) {
        let packet = match decode(data, self.config.checksums) {
            Ok(packet) => packet,
            Err(DecodeError::Framing(err)) => {
                debug!(peer = %from, error = %err, "dropping malformed datagram");
                return;
            }
            Err(DecodeError::Protocol(err)) => {
                warn!(peer = %from, error = %err, "dropping datagram");
                return;
            }
        };
        let payload = match packet.payload() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(peer = %from, msg_type = ?packet.msg_type, error = %err, "dropping datagram");
                return;
            }
        };

        match payload {
            Payload::Connect(action) => self.handle_connect(from, action, now),
            Payload::Event(delta) => self.relay_movement(from, packet, Movement::Delta(delta), now),
            Payload::Snapshot(position) => {
                self.relay_movement(from, packet, Movement::Absolute(position), now);
            }
            Payload::Ack(_) => {
                self.registry.touch(from, now);
                trace!(peer = %from, "ack");
            }
            Payload::Keyframe(_) | Payload::IdSet(_) => {
                debug!(peer = %from, msg_type = ?packet.msg_type, "dropping relay-only message from client");
            }
        }
    }

    /// Establish or terminate the session for `from`.
    pub fn handle_connect(&mut self, from: SocketAddr, action: ConnectAction, now: Instant) {
        match action {
            ConnectAction::Establish => match self.registry.register_or_get(from, now) {
                Registration::New(id) => {
                    info!(peer = %from, player_id = %id, peers = self.registry.len(), "peer registered");
                    self.publish_peer_count();
                    self.send_to(from, &Payload::IdSet(id));
                    let records = self.registry.snapshot_all();
                    self.send_to(from, &Payload::Keyframe(records));
                }
                Registration::Existing(id) => {
                    debug!(peer = %from, player_id = %id, "repeat handshake");
                }
                Registration::Full => {
                    warn!(peer = %from, max_peers = self.config.max_peers, "registry full, ignoring handshake");
                }
            },
            ConnectAction::Terminate => match self.registry.remove(from) {
                Some(peer) => {
                    info!(peer = %from, player_id = %peer.player_id, peers = self.registry.len(), "peer left");
                    self.publish_peer_count();
                    self.announce_departure(peer.player_id);
                }
                None => debug!(peer = %from, "terminate from unknown endpoint"),
            },
        }
    }

    /// Record the sender's movement and forward the packet to everyone else.
    pub fn relay_movement(&mut self, from: SocketAddr, mut packet: Packet, movement: Movement, now: Instant) {
        let Some(sender) = self.registry.touch(from, now) else {
            debug!(peer = %from, msg_type = ?packet.msg_type, "movement from unregistered endpoint");
            return;
        };
        match movement {
            Movement::Absolute(position) => self.registry.set_position(from, position),
            Movement::Delta(delta) => self.registry.apply_delta(from, delta),
        }

        packet.set_sender(sender);
        packet.server_timestamp_ms = now_ms();
        trace!(player_id = %sender, msg_type = ?packet.msg_type, seq = packet.seq_num, "relaying");
        self.broadcast(&packet, Some(from));
    }

    /// Remove peers silent for longer than the configured timeout.
    pub fn expire_idle_peers(&mut self, now: Instant) {
        let Some(timeout) = self.config.peer_timeout() else {
            return;
        };
        let expired = self.registry.expire_idle(now, timeout);
        if expired.is_empty() {
            return;
        }
        self.publish_peer_count();
        for peer in expired {
            info!(peer = %peer.endpoint, player_id = %peer.player_id, "peer timed out");
            self.announce_departure(peer.player_id);
        }
    }

    /// Send every peer the full set of last known positions.
    pub fn broadcast_keyframe(&mut self) {
        if self.registry.is_empty() {
            return;
        }
        let records = self.registry.snapshot_all();
        let packet = self.originate(&Payload::Keyframe(records), PlayerId::UNASSIGNED);
        debug!(peers = self.registry.len(), "periodic keyframe");
        self.broadcast(&packet, None);
    }

    fn maintain(&mut self, now: Instant) {
        self.expire_idle_peers(now);
        let Some(interval) = self.config.keyframe_interval() else {
            return;
        };
        if now.saturating_duration_since(self.last_keyframe) >= interval {
            self.last_keyframe = now;
            self.broadcast_keyframe();
        }
    }

    fn announce_departure(&mut self, id: PlayerId) {
        let packet = self.originate(&Payload::Connect(ConnectAction::Terminate), id);
        self.broadcast(&packet, None);
    }

    /// Build a packet the relay itself sends. `sender` is whoever it speaks for.
    fn originate(&mut self, payload: &Payload, sender: PlayerId) -> Packet {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        Packet::with_payload(payload, sender, seq, now_ms())
    }

    fn send_to(&mut self, target: SocketAddr, payload: &Payload) {
        let packet = self.originate(payload, PlayerId::UNASSIGNED);
        if let Err(err) = send_packet(&self.socket, &packet, self.config.checksums, target) {
            warn!(peer = %target, msg_type = ?packet.msg_type, error = %err, "send failed");
        }
    }

    /// Deliver `packet` to every registered peer except `excluding`.
    fn broadcast(&self, packet: &Packet, excluding: Option<SocketAddr>) {
        let frame = match encode(packet, self.config.checksums) {
            Ok(frame) => frame,
            Err(err) => {
                error!(msg_type = ?packet.msg_type, error = %err, "cannot encode broadcast");
                return;
            }
        };
        for target in self.registry.broadcast_targets(excluding) {
            if let Err(err) = self.socket.send_to(&frame, target) {
                warn!(peer = %target, error = %err, "broadcast send failed");
            }
        }
    }

    fn publish_peer_count(&self) {
        self.peer_count.store(self.registry.len(), Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use laba_protocol::{KeyframeRecord, MessageType};

    use super::*;

    fn server(config: RelayConfig) -> RelayServer {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        RelayServer::new(socket, config)
    }

    fn peer() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
        socket
    }

    fn frame(payload: Payload) -> Vec<u8> {
        encode(&Packet::with_payload(&payload, PlayerId::UNASSIGNED, 0, 0), false).unwrap()
    }

    fn recv(socket: &UdpSocket) -> (Packet, Payload) {
        let mut buf = vec![0u8; MAX_FRAME_LEN];
        let len = socket.recv(&mut buf).expect("expected a datagram");
        let packet = decode(&buf[..len], false).unwrap();
        let payload = packet.payload().unwrap();
        (packet, payload)
    }

    fn assert_silent(socket: &UdpSocket) {
        socket.set_read_timeout(Some(Duration::from_millis(100))).unwrap();
        let mut buf = [0u8; 64];
        assert!(socket.recv(&mut buf).is_err(), "unexpected datagram");
        socket.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
    }

    fn establish(server: &mut RelayServer, socket: &UdpSocket) -> PlayerId {
        let addr = socket.local_addr().unwrap();
        server.handle_datagram(&frame(Payload::Connect(ConnectAction::Establish)), addr, Instant::now());
        let (_, payload) = recv(socket);
        let Payload::IdSet(id) = payload else {
            panic!("expected ID_SET, got {payload:?}");
        };
        let (_, keyframe) = recv(socket);
        assert!(matches!(keyframe, Payload::Keyframe(_)));
        id
    }

    #[test]
    fn handshake_replies_id_then_keyframe() {
        let mut relay = server(RelayConfig {
            spawn_position: Vec3::new(3.0, 3.0, 1.0),
            ..RelayConfig::default()
        });
        let a = peer();
        let addr = a.local_addr().unwrap();
        relay.handle_datagram(&frame(Payload::Connect(ConnectAction::Establish)), addr, Instant::now());

        let (packet, payload) = recv(&a);
        assert_eq!(packet.msg_type, MessageType::IdSet);
        assert_eq!(payload, Payload::IdSet(PlayerId(1)));

        let (_, payload) = recv(&a);
        assert_eq!(
            payload,
            Payload::Keyframe(vec![KeyframeRecord {
                id: PlayerId(1),
                position: Vec3::new(3.0, 3.0, 1.0),
            }])
        );
        assert_eq!(relay.peer_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn duplicate_handshake_sends_nothing() {
        let mut relay = server(RelayConfig::default());
        let a = peer();
        assert_eq!(establish(&mut relay, &a), PlayerId(1));

        relay.handle_datagram(
            &frame(Payload::Connect(ConnectAction::Establish)),
            a.local_addr().unwrap(),
            Instant::now(),
        );
        assert_silent(&a);
        assert_eq!(relay.registry.len(), 1);
    }

    #[test]
    fn event_relayed_to_others_with_sender_id() {
        let mut relay = server(RelayConfig::default());
        let a = peer();
        let b = peer();
        let c = peer();
        let id_a = establish(&mut relay, &a);
        establish(&mut relay, &b);
        establish(&mut relay, &c);

        let packet = Packet::with_payload(&Payload::Event(Vec3::new(1.0, 0.0, 0.0)), PlayerId(99), 17, 0);
        let bytes = encode(&packet, false).unwrap();
        relay.handle_datagram(&bytes, a.local_addr().unwrap(), Instant::now());

        for other in [&b, &c] {
            let (got, payload) = recv(other);
            assert_eq!(got.sender(), id_a, "relay must overwrite the claimed sender");
            assert_eq!(got.seq_num, 17);
            assert!(got.server_timestamp_ms > 0);
            assert_eq!(payload, Payload::Event(Vec3::new(1.0, 0.0, 0.0)));
        }
        assert_silent(&a);
    }

    #[test]
    fn failed_broadcast_target_does_not_block_others() {
        let mut relay = server(RelayConfig::default());
        let a = peer();
        let id_a = establish(&mut relay, &a);

        // An IPv6 endpoint on an IPv4 socket: every send to it fails.
        let unreachable: SocketAddr = "[::1]:9".parse().unwrap();
        relay.handle_datagram(&frame(Payload::Connect(ConnectAction::Establish)), unreachable, Instant::now());
        assert_eq!(relay.registry.len(), 2);

        let b = peer();
        establish(&mut relay, &b);

        relay.handle_datagram(
            &frame(Payload::Event(Vec3::new(1.0, 0.0, 0.0))),
            a.local_addr().unwrap(),
            Instant::now(),
        );
        let (packet, payload) = recv(&b);
        assert_eq!(packet.sender(), id_a);
        assert_eq!(payload, Payload::Event(Vec3::new(1.0, 0.0, 0.0)));
    }

    #[test]
    fn movement_updates_last_known_position() {
        let mut relay = server(RelayConfig::default());
        let a = peer();
        let b = peer();
        establish(&mut relay, &a);
        establish(&mut relay, &b);
        let addr_a = a.local_addr().unwrap();
        let now = Instant::now();

        relay.handle_datagram(&frame(Payload::Snapshot(Vec3::new(10.0, 0.0, 0.0))), addr_a, now);
        relay.handle_datagram(&frame(Payload::Event(Vec3::new(0.0, 2.0, 0.0))), addr_a, now);

        let record = relay.registry.snapshot_all()[0];
        assert_eq!(record.id, PlayerId(1));
        assert_eq!(record.position, Vec3::new(10.0, 2.0, 0.0));
    }

    #[test]
    fn unregistered_movement_dropped() {
        let mut relay = server(RelayConfig::default());
        let a = peer();
        let stranger = peer();
        establish(&mut relay, &a);

        relay.handle_datagram(
            &frame(Payload::Event(Vec3::new(1.0, 1.0, 1.0))),
            stranger.local_addr().unwrap(),
            Instant::now(),
        );
        assert_silent(&a);
        assert_eq!(relay.registry.len(), 1);
    }

    #[test]
    fn terminate_broadcasts_departure() {
        let mut relay = server(RelayConfig::default());
        let a = peer();
        let b = peer();
        establish(&mut relay, &a);
        let id_b = establish(&mut relay, &b);

        relay.handle_datagram(
            &frame(Payload::Connect(ConnectAction::Terminate)),
            b.local_addr().unwrap(),
            Instant::now(),
        );

        let (packet, payload) = recv(&a);
        assert_eq!(payload, Payload::Connect(ConnectAction::Terminate));
        assert_eq!(packet.sender(), id_b);
        assert_silent(&b);
        assert_eq!(relay.registry.len(), 1);
        assert_eq!(relay.peer_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn full_registry_ignores_new_endpoint() {
        let mut relay = server(RelayConfig {
            max_peers: 1,
            ..RelayConfig::default()
        });
        let a = peer();
        let b = peer();
        establish(&mut relay, &a);

        relay.handle_datagram(
            &frame(Payload::Connect(ConnectAction::Establish)),
            b.local_addr().unwrap(),
            Instant::now(),
        );
        assert_silent(&b);
        assert_eq!(relay.registry.len(), 1);
    }

    #[test]
    fn garbage_and_client_only_messages_ignored() {
        let mut relay = server(RelayConfig::default());
        let a = peer();
        establish(&mut relay, &a);
        let addr = a.local_addr().unwrap();
        let now = Instant::now();

        relay.handle_datagram(b"hello world", addr, now);
        relay.handle_datagram(&[], addr, now);
        relay.handle_datagram(&frame(Payload::IdSet(PlayerId(7))), addr, now);
        relay.handle_datagram(&frame(Payload::Keyframe(vec![])), addr, now);
        let mut unknown = frame(Payload::Ack(vec![]));
        unknown[5] = 77;
        relay.handle_datagram(&unknown, addr, now);

        assert_silent(&a);
        assert_eq!(relay.registry.len(), 1);
    }

    #[test]
    fn idle_peers_expire_with_notice() {
        let mut relay = server(RelayConfig {
            peer_timeout_ms: Some(1_000),
            ..RelayConfig::default()
        });
        let a = peer();
        let b = peer();
        establish(&mut relay, &a);
        let id_b = establish(&mut relay, &b);

        let later = Instant::now() + Duration::from_secs(2);
        relay.handle_datagram(&frame(Payload::Ack(vec![])), a.local_addr().unwrap(), later);
        relay.expire_idle_peers(later);

        let (packet, payload) = recv(&a);
        assert_eq!(payload, Payload::Connect(ConnectAction::Terminate));
        assert_eq!(packet.sender(), id_b);
        assert_eq!(relay.registry.len(), 1);
    }

    #[test]
    fn no_timeout_keeps_silent_peers() {
        let mut relay = server(RelayConfig {
            peer_timeout_ms: None,
            ..RelayConfig::default()
        });
        let a = peer();
        establish(&mut relay, &a);
        relay.expire_idle_peers(Instant::now() + Duration::from_secs(3600));
        assert_eq!(relay.registry.len(), 1);
    }

    #[test]
    fn keyframe_broadcast_reaches_everyone() {
        let mut relay = server(RelayConfig::default());
        let a = peer();
        let b = peer();
        establish(&mut relay, &a);
        establish(&mut relay, &b);

        relay.broadcast_keyframe();
        for socket in [&a, &b] {
            let (_, payload) = recv(socket);
            let Payload::Keyframe(records) = payload else {
                panic!("expected keyframe");
            };
            assert_eq!(records.len(), 2);
        }
    }

    #[test]
    fn checksummed_relay_rejects_plain_frames() {
        let mut relay = server(RelayConfig {
            checksums: true,
            ..RelayConfig::default()
        });
        let a = peer();
        relay.handle_datagram(
            &frame(Payload::Connect(ConnectAction::Establish)),
            a.local_addr().unwrap(),
            Instant::now(),
        );
        assert_silent(&a);
        assert!(relay.registry.is_empty());
    }

    #[test]
    fn start_and_stop() {
        let config = RelayConfig {
            bind_addr: "127.0.0.1".parse().unwrap(),
            port: 0,
            ..RelayConfig::default()
        };
        let (handle, addr) = start_relay(config).unwrap();
        assert_ne!(addr.port(), 0);

        let a = peer();
        a.send_to(&frame(Payload::Connect(ConnectAction::Establish)), addr).unwrap();
        let (_, payload) = recv(&a);
        assert_eq!(payload, Payload::IdSet(PlayerId(1)));
        assert_eq!(handle.peer_count(), 1);

        let start = Instant::now();
        handle.stop();
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn invalid_config_refused() {
        let config = RelayConfig {
            max_peers: 0,
            ..RelayConfig::default()
        };
        assert!(matches!(start_relay(config), Err(SessionError::Config(_))));
    }
}
