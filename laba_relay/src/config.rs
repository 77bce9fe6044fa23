// Configuration for the relay server and the session client.
//
// Both structs are plain data with `Default` values matching the protocol's
// conventions (well-known port 5555, 20 Hz movement reports). They derive
// serde so the `relay` binary can load them from a JSON file before applying
// command-line overrides; library callers usually build them in code.
//
// Durations are stored as integer milliseconds so the JSON stays readable;
// accessor methods convert to `Duration`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use laba_protocol::{MAX_KEYFRAME_RECORDS, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Well-known relay port.
pub const DEFAULT_PORT: u16 = 5555;

/// Recommended movement report rate.
pub const DEFAULT_SEND_RATE_HZ: f32 = 20.0;

/// Relay server settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub bind_addr: IpAddr,
    pub port: u16,
    /// Append and verify a CRC-32 on every frame. Clients must agree.
    pub checksums: bool,
    /// Registration limit. Never more than one keyframe can describe.
    pub max_peers: usize,
    /// Remove peers silent for this long. `None` keeps them until they
    /// say goodbye.
    pub peer_timeout_ms: Option<u64>,
    /// Broadcast a keyframe to everyone on this cadence.
    pub keyframe_interval_ms: Option<u64>,
    /// Last-known position of a peer that has not reported one yet.
    pub spawn_position: Vec3,
    /// Receive timeout; bounds shutdown latency and the maintenance cadence.
    pub poll_interval_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            checksums: false,
            max_peers: 64,
            peer_timeout_ms: Some(10_000),
            keyframe_interval_ms: None,
            spawn_position: Vec3::ZERO,
            poll_interval_ms: 50,
        }
    }
}

impl RelayConfig {
    /// Load from a JSON file. Missing keys take their default values.
    pub fn from_json_file(path: &Path) -> Result<Self, SessionError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.max_peers == 0 {
            return Err(SessionError::Config("max_peers must be at least 1".into()));
        }
        if self.max_peers > MAX_KEYFRAME_RECORDS {
            return Err(SessionError::Config(format!(
                "max_peers {} exceeds the {MAX_KEYFRAME_RECORDS} records one keyframe can carry",
                self.max_peers
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(SessionError::Config("poll_interval_ms must be non-zero".into()));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    pub fn peer_timeout(&self) -> Option<Duration> {
        self.peer_timeout_ms.map(Duration::from_millis)
    }

    pub fn keyframe_interval(&self) -> Option<Duration> {
        self.keyframe_interval_ms.map(Duration::from_millis)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Session client settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_addr: SocketAddr,
    /// Must match the relay's setting.
    pub checksums: bool,
    /// Movement deltas per second, independent of frame rate.
    pub send_rate_hz: f32,
    /// Absolute-position reports on a slower cadence. `None` sends deltas only.
    pub snapshot_interval_ms: Option<u64>,
    /// Baseline for the first movement delta.
    pub spawn_position: Vec3,
    /// Receive timeout for the reader thread.
    pub poll_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PORT),
            checksums: false,
            send_rate_hz: DEFAULT_SEND_RATE_HZ,
            snapshot_interval_ms: Some(1_000),
            spawn_position: Vec3::ZERO,
            poll_interval_ms: 50,
        }
    }
}

impl ClientConfig {
    /// Defaults aimed at a specific relay.
    pub fn for_server(server_addr: SocketAddr) -> Self {
        Self {
            server_addr,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if !(self.send_rate_hz.is_finite() && self.send_rate_hz > 0.0) {
            return Err(SessionError::Config(format!(
                "send_rate_hz must be positive, got {}",
                self.send_rate_hz
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(SessionError::Config("poll_interval_ms must be non-zero".into()));
        }
        Ok(())
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.send_rate_hz))
    }

    pub fn snapshot_interval(&self) -> Option<Duration> {
        self.snapshot_interval_ms.map(Duration::from_millis)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
