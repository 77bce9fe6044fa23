// Errors surfaced by the relay and session-client library APIs.
//
// Per-datagram problems (framing errors, protocol violations) are logged and
// dropped inside the receive loops and never reach these types. What does
// reach callers is setup and send failure: binding or connecting a socket, a
// payload that cannot be framed, or an unusable configuration.

use laba_protocol::ProtocolViolation;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    /// Socket-level failure (bind, connect, send).
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
    /// An outbound packet could not be framed.
    #[error("cannot encode packet: {0}")]
    Protocol(#[from] ProtocolViolation),
    /// Configuration is missing or inconsistent.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Configuration file could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    /// The session was already closed.
    #[error("session is closed")]
    Closed,
}
