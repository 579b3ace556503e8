/// Network magic values used in the Bitcoin P2P message header.
///
/// The first 4 bytes of every Bitcoin P2P message identify the
/// network (mainnet, testnet, regtest, signet) and act as a
/// message boundary marker in the TCP stream.
///
/// You can see how Bitcoin Core maps magic values to networks
/// in `GetNetworkForMagic`:
/// https://github.com/bitcoin/bitcoin/blob/master/src/kernel/chainparams.cpp#L703-L723
pub const MAINNET_MAGIC: u32 = 0xD9B4BEF9;
pub const TESTNET3_MAGIC: u32 = 0x0709110B;
pub const REGTEST_MAGIC: u32 = 0xDAB5BFFA;
pub const SIGNET_MAGIC: u32 = 0x40CF030A;

/// Bitcoin P2P protocol version sent in our `version` message.
///
/// 70012 is the floor for peers that understand witness inventory
/// types (BIP144); any Bitcoin Core release from 0.13 on accepts it.
///
/// Notable versions: https://developer.bitcoin.org/reference/p2p_networking.html#protocol-versions
pub const PROTOCOL_VERSION: i32 = 70012;

/// Total size of the fixed message header:
/// magic (4) + command (12) + payload length (4) + checksum (4).
///
/// https://developer.bitcoin.org/reference/p2p_networking.html#message-headers
pub const HEADER_LEN: usize = 24;

/// Byte ranges of the header fields, relative to the start of a frame.
pub const MAGIC_RANGE: std::ops::Range<usize> = 0..4;
pub const COMMAND_RANGE: std::ops::Range<usize> = 4..16;
pub const LENGTH_RANGE: std::ops::Range<usize> = 16..20;
pub const CHECKSUM_RANGE: std::ops::Range<usize> = 20..24;

/// Upper bound on the entry count of an `inv` or `getdata` payload.
///
/// Matches the `MAX_INV_SZ` limit enforced by Bitcoin Core; a peer
/// announcing more than this in one message is violating the protocol.
/// https://developer.bitcoin.org/reference/p2p_networking.html#inv
pub const INV_MAX: u64 = 50_000;

/// Serialized size of one inventory entry: type (u32) + hash (32).
pub const INV_ENTRY_LEN: usize = 36;

/// Serialized size of a network address record inside a `version`
/// payload (no timestamp prefix): services (8) + IPv6 (16) + port (2).
pub const NET_ADDR_LEN: usize = 26;

/// Minimum serialized size of a `version` payload: the 80-byte fixed
/// part, a 1-byte user agent varint, and a 4-byte start height.
pub const VERSION_MIN_LEN: usize = 85;
