use sha2::{Digest, Sha256};
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::net::{IpAddr, SocketAddr};

/// Computes the double SHA256 of `data`.
///
/// This "hash256" construction is part of the original Bitcoin design
/// and is used throughout the protocol for:
///
/// - Message checksums (first 4 bytes of the digest)
/// - Transaction identifiers (txid)
/// - Block identifiers
///
/// Reference:
/// https://developer.bitcoin.org/reference/block_chain.html#block-hashes
pub fn hash256(data: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(Sha256::digest(data));

    let mut result = [0u8; 32];
    result.copy_from_slice(&digest);
    result
}

/// The wire commands this client speaks.
///
/// Anything else a peer sends maps to [`Command::Unknown`] and is
/// skipped by the stream decoder.
///
/// See:
/// https://developer.bitcoin.org/reference/p2p_networking.html
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Version,
    Verack,
    Inv,
    Ping,
    Pong,
    GetData,
    Tx,

    Unknown,
}

impl From<&[u8; 12]> for Command {
    fn from(bytes: &[u8; 12]) -> Self {
        let cmd = std::str::from_utf8(bytes)
            .unwrap_or("")
            .trim_matches(char::from(0));

        match cmd {
            "version" => Command::Version,
            "verack" => Command::Verack,
            "inv" => Command::Inv,
            "ping" => Command::Ping,
            "pong" => Command::Pong,
            "getdata" => Command::GetData,
            "tx" => Command::Tx,
            _ => Command::Unknown,
        }
    }
}

impl Command {
    /// Returns the 12-byte command field as defined by the Bitcoin P2P
    /// protocol. The command string is ASCII and padded with zero bytes.
    pub fn as_bytes(&self) -> [u8; 12] {
        let name: &[u8] = match self {
            Command::Version => b"version",
            Command::Verack => b"verack",
            Command::Inv => b"inv",
            Command::Ping => b"ping",
            Command::Pong => b"pong",
            Command::GetData => b"getdata",
            Command::Tx => b"tx",
            Command::Unknown => b"",
        };

        let mut padded = [0u8; 12];
        padded[..name.len()].copy_from_slice(name);
        padded
    }
}

/// Service flags as defined by the Bitcoin P2P protocol.
///
/// This is a bitfield (`u64`) transmitted in the `version` message.
/// Each bit represents a capability supported by the node.
///
/// Official reference:
/// https://developer.bitcoin.org/reference/p2p_networking.html#version
///
/// The flags are forward-compatible: unknown bits must be preserved.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Services(u64);

impl Services {
    /// Creates a new `Services` from raw bits.
    pub const fn new(bits: u64) -> Self {
        Self(bits)
    }

    /// Returns the raw bitfield value.
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Returns true if all bits in `other` are set.
    pub const fn contains(self, other: Services) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Returns true if no bits are set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// 0x00: not a full node; may only relay its own transactions.
    pub const NONE: Services = Services(0x00);

    /// 0x01: NODE_NETWORK, a full node that can be asked for full blocks.
    pub const NODE_NETWORK: Services = Services(0x01);

    /// 0x08: NODE_WITNESS, can provide blocks and transactions
    /// including witness data. Defined in BIP144.
    pub const NODE_WITNESS: Services = Services(0x08);

    pub fn names(self) -> Vec<&'static str> {
        let mut names = Vec::new();

        if self.is_empty() {
            names.push("NONE");
            return names;
        }

        if self.contains(Self::NODE_NETWORK) {
            names.push("NODE_NETWORK");
        }
        if self.contains(Self::NODE_WITNESS) {
            names.push("NODE_WITNESS");
        }

        names
    }
}

impl From<u64> for Services {
    fn from(value: u64) -> Self {
        Services::new(value)
    }
}

impl Debug for Services {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        if self.is_empty() {
            return write!(f, "Services(NONE)");
        }

        let names = self.names().join(" | ");

        write!(f, "Services({}) [0x{:016x}]", names, self.bits())
    }
}

/// A network address record as embedded in a `version` payload
/// (26 bytes, no timestamp prefix).
///
/// The IP field is always 16 bytes; IPv4 addresses use the standard
/// `::ffff:a.b.c.d` mapping. The `services` and `port` fields are
/// big-endian on the wire.
///
/// https://developer.bitcoin.org/reference/p2p_networking.html#version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkAddress {
    pub services: u64,
    pub ip: [u8; 16],
    pub port: u16,
}

impl NetworkAddress {
    /// An all-zero record, used when the local endpoint is unknown.
    pub const UNSPECIFIED: NetworkAddress = NetworkAddress {
        services: 0,
        ip: [0u8; 16],
        port: 0,
    };

    /// Builds a record from a socket address, mapping IPv4 into the
    /// 16-byte field as `::ffff:a.b.c.d`.
    pub fn from_socket_addr(services: u64, addr: SocketAddr) -> Self {
        let ip = match addr.ip() {
            IpAddr::V4(v4) => v4.to_ipv6_mapped(),
            IpAddr::V6(v6) => v6,
        };

        NetworkAddress {
            services,
            ip: ip.octets(),
            port: addr.port(),
        }
    }
}

/// A decoded `version` payload.
///
/// The trailing BIP37 relay flag is tolerated on decode but carried
/// nowhere; this client neither sets nor honors it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMessage {
    pub version: i32,
    pub services: Services,
    pub timestamp: i64,
    pub addr_recv: NetworkAddress,
    pub addr_from: NetworkAddress,
    pub nonce: u64,
    pub user_agent: String,
    pub start_height: i32,
}

/// Inventory object types used in `inv` and `getdata` messages.
///
/// Serialized as little-endian 32-bit unsigned integers.
/// https://developer.bitcoin.org/reference/p2p_networking.html#data-messages
///
/// Peers are only ever accepted announcing the four base types; the
/// witness variants (BIP144) exist so *we* can request witness
/// serialization in outbound `getdata`. `Terminate` never appears on
/// the wire: it is the sentinel delivered to block-inv subscribers
/// when the client shuts down.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvType {
    /// Error / undefined type.
    Error = 0,

    /// Transaction (legacy txid-based).
    Tx = 1,

    /// Full block.
    Block = 2,

    /// Filtered block (BIP37).
    FilteredBlock = 3,

    /// Witness transaction (BIP144).
    WitnessTx = 0x4000_0001,

    /// Witness block (BIP144).
    WitnessBlock = 0x4000_0002,

    /// Local shutdown sentinel, not a wire value.
    Terminate = 0xFFFF_FFFF,
}

impl InvType {
    /// Serialize the inventory type to little-endian bytes for wire usage.
    pub fn to_le_bytes(self) -> [u8; 4] {
        (self as u32).to_le_bytes()
    }

    /// True for the transaction types accepted by `get_tx`.
    pub fn is_tx(self) -> bool {
        matches!(self, InvType::Tx | InvType::WitnessTx)
    }
}

/// One entry of an `inv` or `getdata` vector: a type tag and the
/// 32-byte hash of the announced object (wire byte order).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvEntry {
    pub inv_type: InvType,
    pub hash: [u8; 32],
}

/// A raw transaction as carried by a `tx` message.
///
/// The bytes are opaque to this client; only the double SHA256 is
/// computed, to correlate the arrival with a pending `getdata`.
#[derive(Clone, PartialEq, Eq)]
pub struct TxPayload {
    raw: Vec<u8>,
}

impl TxPayload {
    pub fn new(raw: Vec<u8>) -> Self {
        TxPayload { raw }
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// The transaction identifier: double SHA256 of the raw bytes,
    /// in wire (little-endian) order. Reverse for display.
    pub fn hash(&self) -> [u8; 32] {
        hash256(&self.raw)
    }
}

impl Debug for TxPayload {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "TxPayload({} bytes)", self.raw.len())
    }
}

/// A fully decoded message payload, one variant per wire command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Version(VersionMessage),
    Verack,
    /// `None` models the zero-length pings some peers emit; they are
    /// never answered with a pong.
    Ping(Option<u64>),
    Pong(u64),
    Inv(Vec<InvEntry>),
    GetData(Vec<InvEntry>),
    Tx(TxPayload),
}

impl Payload {
    /// The wire command this payload travels under.
    pub fn command(&self) -> Command {
        match self {
            Payload::Version(_) => Command::Version,
            Payload::Verack => Command::Verack,
            Payload::Ping(_) => Command::Ping,
            Payload::Pong(_) => Command::Pong,
            Payload::Inv(_) => Command::Inv,
            Payload::GetData(_) => Command::GetData,
            Payload::Tx(_) => Command::Tx,
        }
    }
}
