//! A lightweight client for the Bitcoin P2P wire protocol.
//!
//! This crate maintains a persistent logical link to a single remote
//! full node. It frames and parses the node's message stream, runs
//! the `version`/`verack` handshake and `ping`/`pong` liveness
//! exchange, and layers a request/response pattern over the
//! fire-and-forget `inv`/`getdata` messages so callers can fetch
//! transactions by hash. Socket drops are healed by an internal
//! reconnect loop with backoff.
//!
//! ```no_run
//! use btc_peer::{InvEntry, InvType, Network, Peer, PeerConfig};
//! use std::time::Duration;
//!
//! let peer = Peer::new(PeerConfig::new("127.0.0.1", 8333, Network::Mainnet));
//! peer.connect(false)?;
//!
//! let entry = InvEntry { inv_type: InvType::WitnessTx, hash: [0u8; 32] };
//! let tx = peer.get_tx(entry, Duration::from_secs(30))?;
//! println!("{} raw bytes", tx.raw().len());
//!
//! peer.shutdown();
//! # Ok::<(), btc_peer::PeerError>(())
//! ```
//!
//! Protocol reference:
//! https://developer.bitcoin.org/reference/p2p_networking.html
//!
//! Only the seven messages the link needs are spoken: `version`,
//! `verack`, `ping`, `pong`, `inv`, `getdata` and `tx`. Everything
//! else a node sends is skipped at the framing layer. Note that the
//! stream decoder does not reassemble frames split across socket
//! reads; a frame truncated at the end of a read is treated as a
//! framing error and heals through a reconnect.

pub mod config;
pub mod error;
pub mod peer;
pub mod tables;
pub mod wire;

pub use config::{Network, PeerConfig};
pub use error::{PeerError, WireError};
pub use peer::Peer;
pub use wire::{InvEntry, InvType, Payload, Services, TxPayload};
