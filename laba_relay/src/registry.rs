// Peer registry for the relay server.
//
// `PeerRegistry` maps UDP endpoints to relay-assigned participant ids and
// remembers each peer's last known position and when it was last heard from.
// It is the single source of truth for "who is in the session".
//
// All mutation happens from the relay server's single receive/dispatch loop,
// so there is no internal locking. Lookup-and-insert in `register_or_get` is
// one `&mut self` call, which makes a duplicate establish handshake from the
// same endpoint resolve to the existing id.
//
// Ids come from a counter starting at 1 and are never reused, even after a
// peer is removed. Id 0 is reserved for "not yet assigned".
//
// Positions are tracked so a keyframe can be built without asking any
// simulation: `SNAPSHOT` overwrites, `EVENT` accumulates.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use laba_protocol::{KeyframeRecord, PlayerId, Vec3};

/// One registered participant.
#[derive(Clone, Debug, PartialEq)]
pub struct PeerSession {
    pub endpoint: SocketAddr,
    pub player_id: PlayerId,
    pub position: Vec3,
    pub last_seen: Instant,
}

/// Outcome of an establish handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Registration {
    /// Freshly registered with a new id.
    New(PlayerId),
    /// The endpoint was already registered under this id.
    Existing(PlayerId),
    /// Unseen endpoint, but the registry is at capacity.
    Full,
}

pub struct PeerRegistry {
    peers: BTreeMap<PlayerId, PeerSession>,
    by_endpoint: HashMap<SocketAddr, PlayerId>,
    next_player_id: u32,
    max_peers: usize,
    spawn_position: Vec3,
}

impl PeerRegistry {
    pub fn new(max_peers: usize, spawn_position: Vec3) -> Self {
        Self {
            peers: BTreeMap::new(),
            by_endpoint: HashMap::new(),
            next_player_id: PlayerId::FIRST.0,
            max_peers,
            spawn_position,
        }
    }

    /// Register `endpoint`, or return the id it already has. Idempotent per
    /// endpoint: a repeat call never allocates a second id.
    pub fn register_or_get(&mut self, endpoint: SocketAddr, now: Instant) -> Registration {
        if let Some(&id) = self.by_endpoint.get(&endpoint) {
            if let Some(peer) = self.peers.get_mut(&id) {
                peer.last_seen = now;
            }
            return Registration::Existing(id);
        }
        if self.peers.len() >= self.max_peers {
            return Registration::Full;
        }

        let id = PlayerId(self.next_player_id);
        self.next_player_id += 1;
        self.by_endpoint.insert(endpoint, id);
        self.peers.insert(
            id,
            PeerSession {
                endpoint,
                player_id: id,
                position: self.spawn_position,
                last_seen: now,
            },
        );
        Registration::New(id)
    }

    /// Forget `endpoint`. Returns the removed session, if any.
    pub fn remove(&mut self, endpoint: SocketAddr) -> Option<PeerSession> {
        let id = self.by_endpoint.remove(&endpoint)?;
        self.peers.remove(&id)
    }

    /// Id registered for `endpoint`, if any.
    pub fn player_id(&self, endpoint: SocketAddr) -> Option<PlayerId> {
        self.by_endpoint.get(&endpoint).copied()
    }

    /// Refresh the liveness timestamp. Returns the peer's id if registered.
    pub fn touch(&mut self, endpoint: SocketAddr, now: Instant) -> Option<PlayerId> {
        let id = self.player_id(endpoint)?;
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.last_seen = now;
        }
        Some(id)
    }

    pub fn set_position(&mut self, endpoint: SocketAddr, position: Vec3) {
        if let Some(peer) = self.peer_mut(endpoint) {
            peer.position = position;
        }
    }

    pub fn apply_delta(&mut self, endpoint: SocketAddr, delta: Vec3) {
        if let Some(peer) = self.peer_mut(endpoint) {
            peer.position += delta;
        }
    }

    /// Every peer's id and last known position, ordered by id.
    pub fn snapshot_all(&self) -> Vec<KeyframeRecord> {
        self.peers
            .values()
            .map(|peer| KeyframeRecord {
                id: peer.player_id,
                position: peer.position,
            })
            .collect()
    }

    /// Endpoints to deliver a relayed packet to. Never includes `excluding`.
    pub fn broadcast_targets(&self, excluding: Option<SocketAddr>) -> Vec<SocketAddr> {
        self.peers
            .values()
            .map(|peer| peer.endpoint)
            .filter(|endpoint| Some(*endpoint) != excluding)
            .collect()
    }

    /// Remove and return every peer not heard from within `timeout`.
    pub fn expire_idle(&mut self, now: Instant, timeout: Duration) -> Vec<PeerSession> {
        let stale: Vec<SocketAddr> = self
            .peers
            .values()
            .filter(|peer| now.saturating_duration_since(peer.last_seen) > timeout)
            .map(|peer| peer.endpoint)
            .collect();
        stale
            .into_iter()
            .filter_map(|endpoint| self.remove(endpoint))
            .collect()
    }

    pub fn get(&self, id: PlayerId) -> Option<&PeerSession> {
        self.peers.get(&id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    fn peer_mut(&mut self, endpoint: SocketAddr) -> Option<&mut PeerSession> {
        let id = self.by_endpoint.get(&endpoint)?;
        self.peers.get_mut(id)
    }
}
