use crate::error::WireError;
use crate::wire::constants::{INV_ENTRY_LEN, INV_MAX, VERSION_MIN_LEN};
use crate::wire::message::{
    Command, InvEntry, InvType, NetworkAddress, Payload, Services, TxPayload, VersionMessage,
};

/// Implemented by types that can be decoded from a raw message payload.
pub trait Decode: Sized {
    fn decode(payload: &[u8]) -> Result<Self, WireError>;
}

/// Decodes the payload body for a known command.
///
/// The caller (the stream decoder) has already validated the frame
/// header and checksum; errors here concern only the payload bytes and
/// are swallowed at the framing layer.
pub fn decode_body(command: Command, payload: &[u8]) -> Result<Payload, WireError> {
    match command {
        Command::Version => Ok(Payload::Version(VersionMessage::decode(payload)?)),
        Command::Verack => Ok(Payload::Verack),
        Command::Ping => Ok(Payload::Ping(decode_ping(payload)?)),
        Command::Pong => Ok(Payload::Pong(decode_pong(payload)?)),
        Command::Inv => Ok(Payload::Inv(decode_inv_vector(payload, "inv")?)),
        Command::GetData => Ok(Payload::GetData(decode_inv_vector(payload, "getdata")?)),
        Command::Tx => Ok(Payload::Tx(TxPayload::new(payload.to_vec()))),
        Command::Unknown => Err(WireError::PayloadDecode("unknown")),
    }
}

impl Decode for VersionMessage {
    fn decode(payload: &[u8]) -> Result<Self, WireError> {
        if payload.len() < VERSION_MIN_LEN {
            return Err(WireError::PayloadDecode("version"));
        }

        let mut c = 0;

        let version = read_i32(payload, &mut c, "version")?;
        let services = Services::from(read_u64(payload, &mut c, "version")?);
        let timestamp = read_i64(payload, &mut c, "version")?;
        let addr_recv = decode_net_addr(payload, &mut c)?;
        let addr_from = decode_net_addr(payload, &mut c)?;
        let nonce = read_u64(payload, &mut c, "version")?;

        let ua_len = read_varint(payload, &mut c)? as usize;
        let ua_end = c
            .checked_add(ua_len)
            .ok_or(WireError::PayloadDecode("version: user_agent"))?;
        let user_agent = std::str::from_utf8(
            payload
                .get(c..ua_end)
                .ok_or(WireError::PayloadDecode("version: user_agent"))?,
        )
        .map_err(|_| WireError::PayloadDecode("version: user_agent"))?
        .to_string();
        c = ua_end;

        let start_height = read_i32(payload, &mut c, "version: start_height")?;

        // A trailing BIP37 relay byte may follow; it is ignored.

        Ok(VersionMessage {
            version,
            services,
            timestamp,
            addr_recv,
            addr_from,
            nonce,
            user_agent,
            start_height,
        })
    }
}

/// A `ping` payload is either empty (old peers) or exactly one
/// 8-byte nonce (BIP31).
fn decode_ping(payload: &[u8]) -> Result<Option<u64>, WireError> {
    match payload.len() {
        0 => Ok(None),
        8 => Ok(Some(u64::from_le_bytes(payload.try_into().unwrap()))),
        _ => Err(WireError::PayloadDecode("ping")),
    }
}

/// A `pong` payload always carries the echoed 8-byte nonce.
fn decode_pong(payload: &[u8]) -> Result<u64, WireError> {
    let bytes: [u8; 8] = payload
        .try_into()
        .map_err(|_| WireError::PayloadDecode("pong"))?;
    Ok(u64::from_le_bytes(bytes))
}

/// Decodes the shared body of `inv` and `getdata`: a varint count
/// followed by exactly `count` entries of 36 bytes.
///
/// Only the four base inventory types are accepted from a peer; the
/// witness values are reserved for our own outbound requests.
fn decode_inv_vector(payload: &[u8], ctx: &'static str) -> Result<Vec<InvEntry>, WireError> {
    let mut c = 0;
    let count = read_varint(payload, &mut c)?;

    if count > INV_MAX {
        return Err(WireError::InvalidInvCount);
    }

    let count = count as usize;
    if payload.len() != c + count * INV_ENTRY_LEN {
        return Err(WireError::PayloadDecode(ctx));
    }

    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let inv_type = match read_u32(payload, &mut c, ctx)? {
            0 => InvType::Error,
            1 => InvType::Tx,
            2 => InvType::Block,
            3 => InvType::FilteredBlock,
            _ => return Err(WireError::InvalidInvType),
        };
        let hash = slice32(payload, &mut c, ctx)?;
        entries.push(InvEntry { inv_type, hash });
    }

    Ok(entries)
}

fn decode_net_addr(p: &[u8], c: &mut usize) -> Result<NetworkAddress, WireError> {
    // services and port are big-endian inside an address record.
    let services = read_u64_be(p, c, "net_addr")?;
    let ip = slice16(p, c, "net_addr")?;
    let port = u16::from_be_bytes(slice2(p, c, "net_addr")?);

    Ok(NetworkAddress { services, ip, port })
}

/// Reads a Bitcoin CompactSize (varint) at the cursor.
///
/// One byte below 0xFD encodes itself; 0xFD, 0xFE and 0xFF prefix a
/// little-endian u16, u32 and u64 respectively.
/// https://developer.bitcoin.org/reference/transactions.html#compactsize-unsigned-integers
pub fn read_varint(p: &[u8], c: &mut usize) -> Result<u64, WireError> {
    let first = *p.get(*c).ok_or(WireError::InvalidVarint)?;
    *c += 1;
    match first {
        0xFD => {
            let v = u16::from_le_bytes(slice2(p, c, "varint").map_err(|_| WireError::InvalidVarint)?);
            Ok(v as u64)
        }
        0xFE => {
            let v = u32::from_le_bytes(slice4(p, c, "varint").map_err(|_| WireError::InvalidVarint)?);
            Ok(v as u64)
        }
        0xFF => {
            let v = u64::from_le_bytes(slice8(p, c, "varint").map_err(|_| WireError::InvalidVarint)?);
            Ok(v)
        }
        n => Ok(n as u64),
    }
}

// --- cursor helpers ---------------------------------------------------------

fn read_i32(p: &[u8], c: &mut usize, ctx: &'static str) -> Result<i32, WireError> {
    Ok(i32::from_le_bytes(slice4(p, c, ctx)?))
}

fn read_i64(p: &[u8], c: &mut usize, ctx: &'static str) -> Result<i64, WireError> {
    Ok(i64::from_le_bytes(slice8(p, c, ctx)?))
}

fn read_u32(p: &[u8], c: &mut usize, ctx: &'static str) -> Result<u32, WireError> {
    Ok(u32::from_le_bytes(slice4(p, c, ctx)?))
}

fn read_u64(p: &[u8], c: &mut usize, ctx: &'static str) -> Result<u64, WireError> {
    Ok(u64::from_le_bytes(slice8(p, c, ctx)?))
}

fn read_u64_be(p: &[u8], c: &mut usize, ctx: &'static str) -> Result<u64, WireError> {
    Ok(u64::from_be_bytes(slice8(p, c, ctx)?))
}

fn slice2(p: &[u8], c: &mut usize, ctx: &'static str) -> Result<[u8; 2], WireError> {
    let b = p
        .get(*c..*c + 2)
        .ok_or(WireError::PayloadDecode(ctx))?
        .try_into()
        .unwrap();
    *c += 2;
    Ok(b)
}

fn slice4(p: &[u8], c: &mut usize, ctx: &'static str) -> Result<[u8; 4], WireError> {
    let b = p
        .get(*c..*c + 4)
        .ok_or(WireError::PayloadDecode(ctx))?
        .try_into()
        .unwrap();
    *c += 4;
    Ok(b)
}

fn slice8(p: &[u8], c: &mut usize, ctx: &'static str) -> Result<[u8; 8], WireError> {
    let b = p
        .get(*c..*c + 8)
        .ok_or(WireError::PayloadDecode(ctx))?
        .try_into()
        .unwrap();
    *c += 8;
    Ok(b)
}

fn slice16(p: &[u8], c: &mut usize, ctx: &'static str) -> Result<[u8; 16], WireError> {
    let b = p
        .get(*c..*c + 16)
        .ok_or(WireError::PayloadDecode(ctx))?
        .try_into()
        .unwrap();
    *c += 16;
    Ok(b)
}

fn slice32(p: &[u8], c: &mut usize, ctx: &'static str) -> Result<[u8; 32], WireError> {
    let b = p
        .get(*c..*c + 32)
        .ok_or(WireError::PayloadDecode(ctx))?
        .try_into()
        .unwrap();
    *c += 32;
    Ok(b)
}

// --- tests ------------------------------------------------------------------
