// Packet and message-type definitions.
//
// `Packet` is the decoded form of one datagram: the fixed header fields plus
// the raw payload bytes. It is produced fresh for every send and consumed
// once on receive. The typed interpretation of the payload lives in
// `payload.rs`; the byte layout lives in `codec.rs`.
//
// The `snapshot_id` header field doubles as the sender-id slot: whenever the
// relay forwards a packet on behalf of a participant (EVENT, SNAPSHOT, a
// termination notice) it writes that participant's id there. Receivers read it
// through `Packet::sender()`. Packets a client sends carry its own id (or 0
// before `ID_SET`); the relay overwrites it with the id it has on record.

use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, ProtocolViolation};
use crate::payload::Payload;
use crate::types::PlayerId;

/// Closed set of message types. Discriminants are the wire values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Absolute position of the sender (authoritative).
    Snapshot = 0,
    /// Positional delta since the sender's last report.
    Event = 1,
    /// Reserved; carried on the wire but unused by the relay logic.
    Ack = 2,
    /// Handshake: establish (1) or terminate (0).
    Connect = 3,
    /// Batched absolute positions of every known participant.
    Keyframe = 4,
    /// Relay-assigned id for the receiving client.
    IdSet = 5,
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolViolation;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => MessageType::Snapshot,
            1 => MessageType::Event,
            2 => MessageType::Ack,
            3 => MessageType::Connect,
            4 => MessageType::Keyframe,
            5 => MessageType::IdSet,
            other => return Err(ProtocolViolation::UnknownMessageType(other)),
        })
    }
}

impl From<MessageType> for u8 {
    fn from(value: MessageType) -> u8 {
        value as u8
    }
}

/// One decoded datagram.
#[derive(Clone, Debug, PartialEq)]
pub struct Packet {
    pub msg_type: MessageType,
    /// Sender-id slot; see the module comment.
    pub snapshot_id: u32,
    /// Per-sender monotonic counter. Diagnostic only.
    pub seq_num: u32,
    /// Milliseconds since the Unix epoch, stamped by whoever built the packet.
    pub server_timestamp_ms: i64,
    pub payload: Vec<u8>,
    /// CRC-32 of the payload, present only when the frame carried one.
    pub checksum: Option<u32>,
}

impl Packet {
    /// Build a packet whose type and payload bytes come from a typed payload.
    pub fn with_payload(
        payload: &Payload,
        sender: PlayerId,
        seq_num: u32,
        server_timestamp_ms: i64,
    ) -> Self {
        Self {
            msg_type: payload.message_type(),
            snapshot_id: sender.0,
            seq_num,
            server_timestamp_ms,
            payload: payload.encode(),
            checksum: None,
        }
    }

    /// Interpret the payload bytes according to `msg_type`.
    pub fn payload(&self) -> Result<Payload, DecodeError> {
        Ok(Payload::decode(self.msg_type, &self.payload)?)
    }

    /// The participant this packet speaks for.
    pub fn sender(&self) -> PlayerId {
        PlayerId(self.snapshot_id)
    }

    pub fn set_sender(&mut self, id: PlayerId) {
        self.snapshot_id = id.0;
    }
}
