use byteorder::{BigEndian, LittleEndian, WriteBytesExt};
use std::io::{self, Write};

use crate::wire::constants::INV_ENTRY_LEN;
use crate::wire::message::{InvEntry, NetworkAddress, Payload, VersionMessage};

impl Payload {
    /// Serializes the payload body, without the message header.
    ///
    /// Layouts are defined by the Bitcoin P2P reference:
    /// https://developer.bitcoin.org/reference/p2p_networking.html
    ///
    /// A nonce-less ping serializes to an empty body, mirroring the
    /// zero-length pings of pre-BIP31 peers.
    pub fn body(&self) -> io::Result<Vec<u8>> {
        match self {
            Payload::Version(msg) => version_body(msg),
            Payload::Verack => Ok(vec![]),
            Payload::Ping(None) => Ok(vec![]),
            Payload::Ping(Some(nonce)) => nonce_body(*nonce),
            Payload::Pong(nonce) => nonce_body(*nonce),
            Payload::Inv(entries) => inv_body(entries),
            Payload::GetData(entries) => inv_body(entries),
            Payload::Tx(tx) => Ok(tx.raw().to_vec()),
        }
    }
}

/// Builds a `version` message body.
///
/// The payload layout is:
///
/// ```text
/// int32    version
/// uint64   services
/// int64    timestamp
/// net_addr addr_recv
/// net_addr addr_from
/// uint64   nonce
/// var_str  user_agent
/// int32    start_height
/// ```
///
/// The optional BIP37 relay flag is never emitted.
fn version_body(msg: &VersionMessage) -> io::Result<Vec<u8>> {
    let mut payload = vec![];

    payload.write_i32::<LittleEndian>(msg.version)?;
    payload.write_u64::<LittleEndian>(msg.services.bits())?;
    payload.write_i64::<LittleEndian>(msg.timestamp)?;

    write_net_addr(&msg.addr_recv, &mut payload)?;
    write_net_addr(&msg.addr_from, &mut payload)?;

    payload.write_u64::<LittleEndian>(msg.nonce)?;

    write_varint(msg.user_agent.len() as u64, &mut payload);
    payload.extend_from_slice(msg.user_agent.as_bytes());

    payload.write_i32::<LittleEndian>(msg.start_height)?;

    Ok(payload)
}

/// Address records serialize services and port big-endian; everything
/// else on the wire is little-endian.
fn write_net_addr(addr: &NetworkAddress, out: &mut Vec<u8>) -> io::Result<()> {
    out.write_u64::<BigEndian>(addr.services)?;
    out.write_all(&addr.ip)?;
    out.write_u16::<BigEndian>(addr.port)?;
    Ok(())
}

fn nonce_body(nonce: u64) -> io::Result<Vec<u8>> {
    let mut payload = Vec::with_capacity(8);
    payload.write_u64::<LittleEndian>(nonce)?;
    Ok(payload)
}

/// Shared body of `inv` and `getdata`: varint count, then 36 bytes
/// per entry (little-endian type tag and the 32-byte hash).
fn inv_body(entries: &[InvEntry]) -> io::Result<Vec<u8>> {
    let mut payload =
        Vec::with_capacity(varint_len(entries.len() as u64) + entries.len() * INV_ENTRY_LEN);

    write_varint(entries.len() as u64, &mut payload);

    for entry in entries {
        payload.extend_from_slice(&entry.inv_type.to_le_bytes());
        payload.extend_from_slice(&entry.hash);
    }

    Ok(payload)
}

/// Writes a Bitcoin `CompactSize` (varint) to output.
///
/// This matches the wire encoding used by inventory counts, vector
/// lengths, and many transaction/block fields.
///
/// Reference:
/// https://developer.bitcoin.org/reference/transactions.html#compactsize-unsigned-integers
pub fn write_varint(value: u64, out: &mut Vec<u8>) {
    match value {
        0..=0xFC => out.push(value as u8),
        0xFD..=0xFFFF => {
            out.push(0xFD);
            out.extend(&(value as u16).to_le_bytes());
        }
        0x1_0000..=0xFFFF_FFFF => {
            out.push(0xFE);
            out.extend(&(value as u32).to_le_bytes());
        }
        _ => {
            out.push(0xFF);
            out.extend(&value.to_le_bytes());
        }
    }
}

/// Encoded width of a `CompactSize` for `value`.
pub fn varint_len(value: u64) -> usize {
    match value {
        0..=0xFC => 1,
        0xFD..=0xFFFF => 3,
        0x1_0000..=0xFFFF_FFFF => 5,
        _ => 9,
    }
}
