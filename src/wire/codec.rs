use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{self, Write};

use crate::error::WireError;
use crate::wire::constants::{
    CHECKSUM_RANGE, COMMAND_RANGE, HEADER_LEN, LENGTH_RANGE, MAGIC_RANGE,
};
use crate::wire::decode::decode_body;
use crate::wire::message::{hash256, Command, Payload};

/// Serializes a complete message frame: header plus payload body.
///
/// The frame layout is:
///
/// ```text
/// +------------+--------------+---------------+------------+
/// | magic (4)  | command (12) | length (4 LE) | checksum(4)|
/// +------------+--------------+---------------+------------+
/// | payload (variable)                                ...  |
/// +----------------------------------------------------------
/// ```
///
/// The checksum is the first 4 bytes of `SHA256(SHA256(payload))`;
/// for an empty payload that is the well-known `5D F6 E0 E2`.
///
/// This is the only place the network magic is applied to outbound
/// bytes.
pub fn encode_message(magic: u32, payload: &Payload) -> io::Result<Vec<u8>> {
    let body = payload.body()?;

    let mut msg = Vec::with_capacity(HEADER_LEN + body.len());

    msg.write_u32::<LittleEndian>(magic)?;
    msg.write_all(&payload.command().as_bytes())?;
    msg.write_u32::<LittleEndian>(body.len() as u32)?;

    let checksum = hash256(&body);
    msg.write_all(&checksum[..4])?;

    msg.write_all(&body)?;

    Ok(msg)
}

/// Decodes every complete frame in `data`, in order.
///
/// The walk is resilient to stream noise:
///
/// - A position without the network magic is resynchronized by
///   scanning forward one byte at a time to the next magic
///   occurrence, discarding no more prefix than necessary.
/// - A command field with no NUL terminator, or a checksum that does
///   not match the payload, skips just the 4 magic bytes and resumes
///   the scan, in case the match was a payload byte coincidence.
/// - Unrecognized commands are skipped whole.
/// - A payload that fails its own decoder is logged and skipped;
///   per-message corruption does not kill the stream.
///
/// A frame whose declared length runs past the end of the buffer
/// fails the whole call with [`WireError::PayloadLengthMismatch`].
/// Frames split across socket reads are therefore dropped rather
/// than replayed; see the crate docs for the trade-off.
pub fn decode_stream(data: &[u8], magic: u32) -> Result<Vec<Payload>, WireError> {
    if data.len() < HEADER_LEN {
        return Err(WireError::TruncatedHeader);
    }

    let magic_bytes = magic.to_le_bytes();
    let total = data.len();
    let mut offset = 0;
    let mut decoded = Vec::new();

    while offset < total {
        let frame = &data[offset..];

        if frame.len() < MAGIC_RANGE.end || frame[MAGIC_RANGE] != magic_bytes {
            match next_magic(data, offset + 1, &magic_bytes) {
                Some(position) => {
                    offset = position;
                    continue;
                }
                None => break,
            }
        }

        if frame.len() < HEADER_LEN {
            return Err(WireError::PayloadLengthMismatch);
        }

        // The command must be NUL terminated within its 12 bytes.
        let command_field: &[u8; 12] = frame[COMMAND_RANGE].try_into().expect("range is 12 bytes");
        if !command_field.contains(&0) {
            offset += MAGIC_RANGE.end;
            continue;
        }

        let length =
            u32::from_le_bytes(frame[LENGTH_RANGE].try_into().expect("range is 4 bytes")) as usize;
        if HEADER_LEN + length > frame.len() {
            return Err(WireError::PayloadLengthMismatch);
        }

        let body = &frame[HEADER_LEN..HEADER_LEN + length];
        let checksum = hash256(body);
        if frame[CHECKSUM_RANGE] != checksum[..4] {
            offset += MAGIC_RANGE.end;
            continue;
        }

        let command = Command::from(command_field);
        if command != Command::Unknown {
            match decode_body(command, body) {
                Ok(payload) => decoded.push(payload),
                Err(err) => {
                    tracing::warn!(?command, %err, "skipping undecodable payload");
                }
            }
        }

        offset += HEADER_LEN + length;
    }

    Ok(decoded)
}

/// Position of the next magic occurrence at or after `from`.
fn next_magic(data: &[u8], from: usize, magic: &[u8; 4]) -> Option<usize> {
    if from >= data.len() {
        return None;
    }

    data[from..]
        .windows(magic.len())
        .position(|window| window == magic)
        .map(|position| from + position)
}
