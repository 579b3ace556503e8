use std::str::FromStr;
use std::time::Duration;

use crate::wire::constants::{
    MAINNET_MAGIC, PROTOCOL_VERSION, REGTEST_MAGIC, SIGNET_MAGIC, TESTNET3_MAGIC,
};
use crate::wire::message::Services;

/// The Bitcoin networks this client knows magic values for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet3,
    Regtest,
    Signet,
}

impl Network {
    /// The 4-byte magic identifying this network on the wire.
    pub const fn magic(self) -> u32 {
        match self {
            Network::Mainnet => MAINNET_MAGIC,
            Network::Testnet3 => TESTNET3_MAGIC,
            Network::Regtest => REGTEST_MAGIC,
            Network::Signet => SIGNET_MAGIC,
        }
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" | "testnet3" => Ok(Network::Testnet3),
            "regtest" => Ok(Network::Regtest),
            "signet" => Ok(Network::Signet),
            other => Err(format!("unknown network: {other}")),
        }
    }
}

/// Settings for the link to one remote node.
///
/// Only `host`, `port` and `magic` have no sensible default; the
/// remaining fields tune the handshake and the reconnect loop.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub host: String,
    pub port: u16,
    pub magic: u32,

    /// Advertised in our `version` message.
    pub user_agent: String,
    pub protocol_version: i32,
    pub services: Services,

    /// Backoff growth per failed connection attempt.
    pub reconnect_increment: Duration,
    /// Backoff ceiling.
    pub reconnect_max: Duration,
}

impl PeerConfig {
    pub fn new(host: impl Into<String>, port: u16, network: Network) -> Self {
        Self::with_magic(host, port, network.magic())
    }

    pub fn with_magic(host: impl Into<String>, port: u16, magic: u32) -> Self {
        PeerConfig {
            host: host.into(),
            port,
            magic,
            user_agent: format!("{}:{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            protocol_version: PROTOCOL_VERSION,
            services: Services::NODE_WITNESS,
            reconnect_increment: Duration::from_millis(1000),
            reconnect_max: Duration::from_millis(5000),
        }
    }
}
