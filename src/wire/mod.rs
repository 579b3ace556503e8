//! Bitcoin P2P wire protocol primitives.
//!
//! This module implements the seven messages this client speaks
//! (`version`, `verack`, `ping`, `pong`, `inv`, `getdata`, `tx`):
//!
//! - Framing and parsing of the 24-byte message header, with
//!   resynchronization on magic or checksum mismatch
//! - Strongly typed payload variants with per-variant decoders
//! - CompactSize (varint) and network address records
//!
//! Protocol reference:
//! https://developer.bitcoin.org/reference/p2p_networking.html
pub mod codec;

pub mod decode;
pub mod message;
pub mod payload;

pub mod constants;

pub use codec::{decode_stream, encode_message};
pub use message::{
    hash256, Command, InvEntry, InvType, NetworkAddress, Payload, Services, TxPayload,
    VersionMessage,
};
