// laba_protocol: binary wire protocol for the LABA position relay.
//
// This crate defines the datagram format exchanged between session clients and
// the relay server over UDP. It is shared by both sides and does no I/O: every
// function here turns bytes into values or values into bytes.
//
// Module overview:
// - `types.rs`:    `PlayerId` (relay-assigned, 0 = unassigned) and `Vec3`.
// - `message.rs`:  `MessageType` (closed enum, wire discriminants) and `Packet`
//                  (decoded header fields + raw payload).
// - `payload.rs`:  Typed payload sub-encodings (`Payload`, `ConnectAction`,
//                  `KeyframeRecord`) with exact-size validation.
// - `codec.rs`:    The fixed 24-byte header frame, optional trailing CRC-32,
//                  `encode` / `decode`.
// - `error.rs`:    `FramingError`, `ProtocolViolation`, `DecodeError`.
//
// Design decisions:
// - **Little-endian throughout.** Header fields, floats and ids alike.
// - **No retransmission or ordering.** `seq_num` is diagnostic only; loss is
//   absorbed by the next delta or keyframe, never by this layer.
// - **Sender id in the header.** The relay writes the originating
//   participant's id into the `snapshot_id` slot instead of touching the
//   payload, so payloads stay fixed-width.

pub mod codec;
pub mod error;
pub mod message;
pub mod payload;
pub mod types;

pub use codec::{
    CHECKSUM_LEN, HEADER_LEN, MAX_FRAME_LEN, MAX_PAYLOAD_LEN, PROTOCOL_ID, PROTOCOL_VERSION,
    crc32, decode, encode,
};
pub use error::{DecodeError, FramingError, ProtocolViolation};
pub use message::{MessageType, Packet};
pub use payload::{ConnectAction, KEYFRAME_RECORD_LEN, KeyframeRecord, MAX_KEYFRAME_RECORDS, Payload};
pub use types::{PlayerId, Vec3};
