use clap::{Parser, Subcommand};
use std::error::Error;
use std::sync::mpsc;
use std::time::Duration;

use btc_peer::{InvEntry, InvType, Network, Peer, PeerConfig};

#[derive(Parser)]
#[command(name = "btc-peer")]
struct Cli {
    /// Node address as host:port
    #[arg(long)]
    node: String,

    #[arg(long, default_value = "mainnet")]
    network: Network,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stay connected and print inventory announcements
    Watch,
    /// Fetch a raw transaction by txid (display byte order)
    GetTx {
        txid: String,

        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let (host, port) = cli
        .node
        .rsplit_once(':')
        .ok_or("node must be given as host:port")?;
    let port: u16 = port.parse()?;

    let peer = Peer::new(PeerConfig::new(host, port, cli.network));
    peer.connect(false)?;
    println!(
        "connected to {} (witness: {})",
        cli.node,
        peer.peer_uses_witness()
    );

    match cli.command {
        Commands::Watch => watch(&peer),
        Commands::GetTx { txid, timeout_secs } => get_tx(&peer, &txid, timeout_secs)?,
    }

    peer.shutdown();
    Ok(())
}

fn watch(peer: &Peer) {
    peer.set_tx_inv(|batch| {
        for entry in batch {
            println!("tx announced:    {}", display_hash(&entry.hash));
        }
    });

    // Block subscribers are one-shot; re-register after each batch.
    loop {
        let (sender, receiver) = mpsc::channel();
        peer.register_block_inv(move |batch| {
            let _ = sender.send(batch.to_vec());
        });

        let Ok(batch) = receiver.recv() else { return };
        for entry in batch {
            if entry.inv_type == InvType::Terminate {
                return;
            }
            println!("block announced: {}", display_hash(&entry.hash));
        }
    }
}

fn get_tx(peer: &Peer, txid: &str, timeout_secs: u64) -> Result<(), Box<dyn Error>> {
    let mut hash: [u8; 32] = hex::decode(txid)?
        .try_into()
        .map_err(|_| "txid must be 32 bytes of hex")?;
    // Explorers show txids in reversed byte order.
    hash.reverse();

    let inv_type = if peer.peer_uses_witness() {
        InvType::WitnessTx
    } else {
        InvType::Tx
    };

    let tx = peer.get_tx(
        InvEntry { inv_type, hash },
        Duration::from_secs(timeout_secs),
    )?;
    println!("{}", hex::encode(tx.raw()));

    Ok(())
}

fn display_hash(hash: &[u8; 32]) -> String {
    let mut reversed = *hash;
    reversed.reverse();
    hex::encode(reversed)
}
