// Error taxonomy for decoding datagrams.
//
// Two classes, both non-fatal to the receiving loop:
// - `FramingError`: the bytes are not a well-formed LABA frame (wrong tag,
//   wrong version, too short, checksum mismatch).
// - `ProtocolViolation`: the frame is well-formed but its contents make no
//   sense for the protocol (unknown message type, payload size inconsistent
//   with the message type).
//
// `DecodeError` unifies the two for callers that decode a whole packet and
// its payload in one step. Receivers log and drop; nothing is retried.

use thiserror::Error;

use crate::message::MessageType;

/// The datagram is not a valid LABA frame.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("bad protocol tag {found:02x?}")]
    BadMagic { found: [u8; 4] },
    #[error("protocol version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u8, found: u8 },
    #[error("truncated frame: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
    #[error("payload checksum mismatch: frame says {expected:#010x}, payload hashes to {computed:#010x}")]
    ChecksumFailed { expected: u32, computed: u32 },
}

/// The frame parsed, but its contents break the protocol's rules.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),
    #[error("{msg_type:?} payload must be {expected} bytes, got {found}")]
    PayloadLength {
        msg_type: MessageType,
        expected: usize,
        found: usize,
    },
    #[error("keyframe payload of {0} bytes is not a whole number of 16-byte records")]
    KeyframeLength(usize),
    #[error("payload of {0} bytes exceeds the 65535-byte frame limit")]
    PayloadTooLarge(usize),
    #[error("unknown connect action {0}")]
    UnknownConnectAction(u8),
}

/// Anything that can go wrong turning bytes into a typed packet.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),
}
