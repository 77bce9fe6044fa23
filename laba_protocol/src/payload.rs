// Typed payload sub-encodings, one per message type.
//
// All payloads are fixed-width little-endian binary:
// - `SNAPSHOT` / `EVENT`: 12 bytes, three `f32`s (absolute position or delta).
// - `CONNECT`:            1 byte, `1` = establish, `0` = terminate.
// - `ID_SET`:             4 bytes, the assigned id as `u32`.
// - `KEYFRAME`:           N * 16 bytes, records of `{id: u32, x, y, z: f32}`.
// - `ACK`:                opaque, reserved.
//
// Decoding checks the exact size for each type; a mismatch is a
// `ProtocolViolation`, never a panic.

use crate::error::ProtocolViolation;
use crate::message::MessageType;
use crate::types::{PlayerId, Vec3};

/// Size of one keyframe record on the wire.
pub const KEYFRAME_RECORD_LEN: usize = 16;

/// Most keyframe records that fit in one frame's 16-bit payload length.
pub const MAX_KEYFRAME_RECORDS: usize = u16::MAX as usize / KEYFRAME_RECORD_LEN;

const VEC3_LEN: usize = 12;

/// Handshake direction carried by a `CONNECT` packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectAction {
    Terminate,
    Establish,
}

impl ConnectAction {
    fn to_byte(self) -> u8 {
        match self {
            ConnectAction::Terminate => 0,
            ConnectAction::Establish => 1,
        }
    }

    fn from_byte(byte: u8) -> Result<Self, ProtocolViolation> {
        match byte {
            0 => Ok(ConnectAction::Terminate),
            1 => Ok(ConnectAction::Establish),
            other => Err(ProtocolViolation::UnknownConnectAction(other)),
        }
    }
}

/// One participant's absolute position inside a keyframe.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KeyframeRecord {
    pub id: PlayerId,
    pub position: Vec3,
}

/// A payload interpreted according to its packet's message type.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Snapshot(Vec3),
    Event(Vec3),
    Ack(Vec<u8>),
    Connect(ConnectAction),
    Keyframe(Vec<KeyframeRecord>),
    IdSet(PlayerId),
}

impl Payload {
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::Snapshot(_) => MessageType::Snapshot,
            Payload::Event(_) => MessageType::Event,
            Payload::Ack(_) => MessageType::Ack,
            Payload::Connect(_) => MessageType::Connect,
            Payload::Keyframe(_) => MessageType::Keyframe,
            Payload::IdSet(_) => MessageType::IdSet,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Payload::Snapshot(v) | Payload::Event(v) => v.to_le_bytes().to_vec(),
            Payload::Ack(bytes) => bytes.clone(),
            Payload::Connect(action) => vec![action.to_byte()],
            Payload::IdSet(id) => id.0.to_le_bytes().to_vec(),
            Payload::Keyframe(records) => {
                let mut out = Vec::with_capacity(records.len() * KEYFRAME_RECORD_LEN);
                for record in records {
                    out.extend_from_slice(&record.id.0.to_le_bytes());
                    out.extend_from_slice(&record.position.to_le_bytes());
                }
                out
            }
        }
    }

    pub fn decode(msg_type: MessageType, bytes: &[u8]) -> Result<Self, ProtocolViolation> {
        match msg_type {
            MessageType::Snapshot => Ok(Payload::Snapshot(decode_vec3(msg_type, bytes)?)),
            MessageType::Event => Ok(Payload::Event(decode_vec3(msg_type, bytes)?)),
            MessageType::Ack => Ok(Payload::Ack(bytes.to_vec())),
            MessageType::Connect => {
                let [byte] = exact::<1>(msg_type, bytes)?;
                Ok(Payload::Connect(ConnectAction::from_byte(byte)?))
            }
            MessageType::IdSet => {
                let raw = exact::<4>(msg_type, bytes)?;
                Ok(Payload::IdSet(PlayerId(u32::from_le_bytes(raw))))
            }
            MessageType::Keyframe => {
                if bytes.len() % KEYFRAME_RECORD_LEN != 0 {
                    return Err(ProtocolViolation::KeyframeLength(bytes.len()));
                }
                let records = bytes
                    .chunks_exact(KEYFRAME_RECORD_LEN)
                    .map(|chunk| {
                        let mut id = [0u8; 4];
                        id.copy_from_slice(&chunk[0..4]);
                        let mut pos = [0u8; VEC3_LEN];
                        pos.copy_from_slice(&chunk[4..16]);
                        KeyframeRecord {
                            id: PlayerId(u32::from_le_bytes(id)),
                            position: Vec3::from_le_bytes(pos),
                        }
                    })
                    .collect();
                Ok(Payload::Keyframe(records))
            }
        }
    }
}

fn decode_vec3(msg_type: MessageType, bytes: &[u8]) -> Result<Vec3, ProtocolViolation> {
    Ok(Vec3::from_le_bytes(exact::<VEC3_LEN>(msg_type, bytes)?))
}

/// Copy `bytes` into a fixed array, or report the size mismatch.
fn exact<const N: usize>(msg_type: MessageType, bytes: &[u8]) -> Result<[u8; N], ProtocolViolation> {
    bytes
        .try_into()
        .map_err(|_| ProtocolViolation::PayloadLength {
            msg_type,
            expected: N,
            found: bytes.len(),
        })
}
