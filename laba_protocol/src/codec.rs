// Fixed binary frame for one datagram.
//
// Layout (all numeric fields little-endian):
//
//   offset  size  field
//   0       4     protocol tag "LABA" (ASCII, no terminator)
//   4       1     version
//   5       1     message type
//   6       4     snapshot id (sender-id slot)
//   10      4     sequence number
//   14      8     timestamp, ms since Unix epoch
//   22      2     payload length N
//   24      N     payload
//   24+N    4     CRC-32 of the payload (only when checksums are enabled)
//
// Whether a trailing checksum is present is not self-describing: both ends
// must be configured the same way. Bytes after the declared frame are ignored
// so later versions can append fields without breaking older receivers.
//
// `decode` validates framing before content: tag, version, lengths and
// checksum are checked first (`FramingError`), then the message type
// (`ProtocolViolation`). It never panics on arbitrary input.

use crate::error::{DecodeError, FramingError, ProtocolViolation};
use crate::message::{MessageType, Packet};

/// ASCII protocol tag at the start of every frame.
pub const PROTOCOL_ID: [u8; 4] = *b"LABA";

/// Wire format version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Bytes before the payload.
pub const HEADER_LEN: usize = 24;

/// Size of the optional trailing checksum.
pub const CHECKSUM_LEN: usize = 4;

/// Largest payload the 16-bit length field can declare.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Largest possible frame; a receive buffer of this size never truncates.
pub const MAX_FRAME_LEN: usize = HEADER_LEN + MAX_PAYLOAD_LEN + CHECKSUM_LEN;

/// Standard reflected CRC-32 (poly 0xEDB88320, init 0xFFFFFFFF, final xor).
pub fn crc32(payload: &[u8]) -> u32 {
    crc32fast::hash(payload)
}

/// Serialize a packet. The checksum, when requested, is always recomputed
/// from the payload; `packet.checksum` is ignored.
pub fn encode(packet: &Packet, include_checksum: bool) -> Result<Vec<u8>, ProtocolViolation> {
    let len = packet.payload.len();
    let declared_len = u16::try_from(len).map_err(|_| ProtocolViolation::PayloadTooLarge(len))?;

    let mut frame = Vec::with_capacity(HEADER_LEN + len + CHECKSUM_LEN);
    frame.extend_from_slice(&PROTOCOL_ID);
    frame.push(PROTOCOL_VERSION);
    frame.push(u8::from(packet.msg_type));
    frame.extend_from_slice(&packet.snapshot_id.to_le_bytes());
    frame.extend_from_slice(&packet.seq_num.to_le_bytes());
    frame.extend_from_slice(&packet.server_timestamp_ms.to_le_bytes());
    frame.extend_from_slice(&declared_len.to_le_bytes());
    frame.extend_from_slice(&packet.payload);

    if include_checksum {
        frame.extend_from_slice(&crc32(&packet.payload).to_le_bytes());
    }
    Ok(frame)
}

/// Parse one frame. With `expect_checksum`, a trailing CRC-32 must be present
/// and must match the payload.
pub fn decode(data: &[u8], expect_checksum: bool) -> Result<Packet, DecodeError> {
    let available = data.len();
    let truncated = |needed: usize| FramingError::Truncated { needed, available };

    let tag: [u8; 4] = read_array(data, 0).ok_or_else(|| truncated(HEADER_LEN))?;
    if tag != PROTOCOL_ID {
        return Err(FramingError::BadMagic { found: tag }.into());
    }

    let version = *data.get(4).ok_or_else(|| truncated(HEADER_LEN))?;
    if version != PROTOCOL_VERSION {
        return Err(FramingError::VersionMismatch {
            expected: PROTOCOL_VERSION,
            found: version,
        }
        .into());
    }

    if available < HEADER_LEN {
        return Err(truncated(HEADER_LEN).into());
    }

    let type_byte = data[5];
    let snapshot_id = u32::from_le_bytes(read_array(data, 6).ok_or_else(|| truncated(HEADER_LEN))?);
    let seq_num = u32::from_le_bytes(read_array(data, 10).ok_or_else(|| truncated(HEADER_LEN))?);
    let server_timestamp_ms =
        i64::from_le_bytes(read_array(data, 14).ok_or_else(|| truncated(HEADER_LEN))?);
    let payload_len =
        usize::from(u16::from_le_bytes(read_array(data, 22).ok_or_else(|| truncated(HEADER_LEN))?));

    let payload_end = HEADER_LEN + payload_len;
    let frame_end = if expect_checksum {
        payload_end + CHECKSUM_LEN
    } else {
        payload_end
    };
    if available < frame_end {
        return Err(truncated(frame_end).into());
    }
    let payload = data[HEADER_LEN..payload_end].to_vec();

    let checksum = if expect_checksum {
        let expected =
            u32::from_le_bytes(read_array(data, payload_end).ok_or_else(|| truncated(frame_end))?);
        let computed = crc32(&payload);
        if expected != computed {
            return Err(FramingError::ChecksumFailed { expected, computed }.into());
        }
        Some(expected)
    } else {
        None
    };

    let msg_type = MessageType::try_from(type_byte)?;

    Ok(Packet {
        msg_type,
        snapshot_id,
        seq_num,
        server_timestamp_ms,
        payload,
        checksum,
    })
}

fn read_array<const N: usize>(data: &[u8], offset: usize) -> Option<[u8; N]> {
    data.get(offset..offset + N)?.try_into().ok()
}
