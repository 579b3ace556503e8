//! The connection engine: a persistent logical link to one Bitcoin
//! node.
//!
//! Three threads cooperate per connection:
//!
//! 1. *Reader* blocks on the socket and pushes raw byte chunks onto
//!    an unbounded queue. Closing the socket is what unblocks it.
//! 2. *Dispatcher* pops chunks, decodes zero or more frames from
//!    each, and reacts per message type. Replies are sent inline.
//! 3. Any thread that sends serializes the frame first, then writes
//!    it under the socket mutex, so frames never interleave on the
//!    wire.
//!
//! The engine thread itself runs the reconnect loop: open socket,
//! handshake, ride the connection until it dies, back off, repeat.
//! Transient network failures are invisible to callers beyond logs.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;

use crate::config::PeerConfig;
use crate::error::PeerError;
use crate::tables::{InvSubscribers, ServeTable, TxWaiters};
use crate::wire::codec::{decode_stream, encode_message};
use crate::wire::message::{
    InvEntry, InvType, NetworkAddress, Payload, Services, TxPayload, VersionMessage,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_CHUNK_SIZE: usize = 8192;

/// A client-side link to one Bitcoin full node.
///
/// `connect` spawns the engine; afterwards the link looks continuous
/// to callers even across socket drops and reconnects. All methods
/// take `&self`; the type is `Send + Sync` and meant to be shared.
pub struct Peer {
    shared: Arc<Shared>,
    engine: Mutex<Option<JoinHandle<()>>>,
}

/// State shared between the engine threads and the public API.
struct Shared {
    config: PeerConfig,
    run: AtomicBool,
    connecting: AtomicBool,
    /// Whether the node advertised NODE_WITNESS in its last version.
    witness: AtomicBool,
    /// Write side of the current socket; also the write mutex.
    socket: Mutex<Option<TcpStream>>,
    waiters: TxWaiters,
    serve: ServeTable,
    subs: InvSubscribers,
}

impl Peer {
    pub fn new(config: PeerConfig) -> Self {
        Peer {
            shared: Arc::new(Shared {
                config,
                run: AtomicBool::new(false),
                connecting: AtomicBool::new(false),
                witness: AtomicBool::new(false),
                socket: Mutex::new(None),
                waiters: TxWaiters::default(),
                serve: ServeTable::default(),
                subs: InvSubscribers::default(),
            }),
            engine: Mutex::new(None),
        }
    }

    /// Spawns the engine and, unless `background` is set, blocks
    /// until the first handshake completes.
    ///
    /// A handshake failure is returned to a foreground caller; the
    /// engine keeps retrying with backoff either way. Fails with
    /// [`PeerError::ConnectInProgress`] while an engine is running.
    pub fn connect(&self, background: bool) -> Result<(), PeerError> {
        if self
            .shared
            .connecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(PeerError::ConnectInProgress);
        }

        self.shared.run.store(true, Ordering::SeqCst);

        let (connected_tx, connected_rx) = mpsc::channel();
        let shared = self.shared.clone();
        let handle = match thread::Builder::new()
            .name("peer-engine".into())
            .spawn(move || connect_loop(shared, connected_tx))
        {
            Ok(handle) => handle,
            Err(err) => {
                self.shared.connecting.store(false, Ordering::SeqCst);
                return Err(err.into());
            }
        };
        *self.engine.lock().unwrap() = Some(handle);

        if background {
            return Ok(());
        }

        match connected_rx.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(PeerError::HandshakeFailed(
                "engine stopped before the handshake".into(),
            )),
        }
    }

    /// Fetches a transaction by inventory entry.
    ///
    /// Sends a single-entry `getdata` and blocks until the matching
    /// `tx` arrives or `timeout` expires (a zero timeout waits
    /// forever). Nothing is cached: a repeat call asks the node
    /// again.
    pub fn get_tx(&self, entry: InvEntry, timeout: Duration) -> Result<TxPayload, PeerError> {
        if !entry.inv_type.is_tx() {
            return Err(PeerError::WrongInvType);
        }

        let (sender, receiver) = mpsc::sync_channel(1);
        self.shared.waiters.insert(entry.hash, sender);

        if let Err(err) = send_message(&self.shared, &Payload::GetData(vec![entry])) {
            self.shared.waiters.remove(&entry.hash);
            return Err(err);
        }

        if timeout.is_zero() {
            // Only a cleared table (shutdown) can drop the sender.
            receiver.recv().map_err(|_| PeerError::GetDataTimeout)
        } else {
            receiver.recv_timeout(timeout).map_err(|_| {
                self.shared.waiters.remove(&entry.hash);
                PeerError::GetDataTimeout
            })
        }
    }

    /// Queues a one-shot callback for the next block inventory batch.
    pub fn register_block_inv(&self, callback: impl FnOnce(&[InvEntry]) + Send + 'static) {
        self.shared.subs.push_block(Box::new(callback));
    }

    /// Sets the callback invoked on every transaction inventory batch.
    pub fn set_tx_inv(&self, callback: impl Fn(&[InvEntry]) + Send + 'static) {
        self.shared.subs.set_tx(Box::new(callback));
    }

    /// Stores a payload to ship when the node requests `hash` via
    /// `getdata`. The returned receiver fires on the first fetch.
    pub fn register_payload(&self, hash: [u8; 32], payload: Payload) -> Receiver<()> {
        self.shared.serve.insert(hash, payload)
    }

    /// Whether the node advertised witness support in its `version`.
    pub fn peer_uses_witness(&self) -> bool {
        self.shared.witness.load(Ordering::SeqCst)
    }

    /// Stops the engine and releases every waiter. Idempotent.
    ///
    /// Pending `get_tx` calls observe a timeout; queued block-inv
    /// subscribers are drained once with a `Terminate` entry so they
    /// can unblock whatever they are holding open.
    pub fn shutdown(&self) {
        self.shared.run.store(false, Ordering::SeqCst);

        if let Some(stream) = self.shared.socket.lock().unwrap().as_ref() {
            let _ = stream.shutdown(Shutdown::Both);
        }

        if let Some(engine) = self.engine.lock().unwrap().take() {
            let _ = engine.join();
        }

        self.shared.waiters.clear();

        let terminate = [InvEntry {
            inv_type: InvType::Terminate,
            hash: [0u8; 32],
        }];
        self.shared.subs.notify_blocks(&terminate);
    }
}

/// Serializes `payload` and writes the frame under the socket mutex.
fn send_message(shared: &Shared, payload: &Payload) -> Result<(), PeerError> {
    let msg = encode_message(shared.config.magic, payload)?;

    let guard = shared.socket.lock().unwrap();
    match guard.as_ref() {
        Some(mut stream) => {
            stream.write_all(&msg)?;
            Ok(())
        }
        None => Err(PeerError::NotConnected),
    }
}

/// The engine thread: reconnect loop with linear backoff.
fn connect_loop(shared: Arc<Shared>, connected: Sender<Result<(), PeerError>>) {
    let mut connected = Some(connected);
    let mut backoff = Duration::ZERO;

    while shared.run.load(Ordering::SeqCst) {
        let stream = match open_socket(&shared, &mut backoff) {
            Some(stream) => stream,
            None => break,
        };
        let local_addr = stream.local_addr().ok();
        let peer_addr = stream.peer_addr().ok();

        let reader_stream = match stream.try_clone() {
            Ok(clone) => clone,
            Err(err) => {
                tracing::warn!(%err, "failed to clone the socket");
                backoff = grow(backoff, &shared.config);
                thread::sleep(backoff);
                continue;
            }
        };
        *shared.socket.lock().unwrap() = Some(stream);

        // Per-connection wiring: data queue, verack one-shot, and a
        // slot for the dispatcher's terminal error.
        let (chunk_tx, chunk_rx) = mpsc::channel();
        let (verack_tx, verack_rx) = mpsc::sync_channel(1);
        let fault: Arc<Mutex<Option<PeerError>>> = Arc::default();

        let reader = thread::Builder::new()
            .name("peer-reader".into())
            .spawn(move || read_loop(reader_stream, chunk_tx));
        let dispatcher = {
            let shared = shared.clone();
            let fault = fault.clone();
            thread::Builder::new()
                .name("peer-dispatcher".into())
                .spawn(move || dispatch_loop(&shared, chunk_rx, verack_tx, &fault))
        };
        let (reader, dispatcher) = match (reader, dispatcher) {
            (Ok(reader), Ok(dispatcher)) => (reader, dispatcher),
            _ => {
                tracing::error!("failed to spawn connection threads");
                teardown_socket(&shared);
                backoff = grow(backoff, &shared.config);
                thread::sleep(backoff);
                continue;
            }
        };

        match handshake(&shared, peer_addr, local_addr, &verack_rx, &fault) {
            Ok(()) => {
                tracing::info!("connected to bitcoin node");
                backoff = Duration::ZERO;
                if let Some(sender) = connected.take() {
                    let _ = sender.send(Ok(()));
                }
            }
            Err(err) => {
                tracing::warn!(%err, "handshake failed");
                if let Some(sender) = connected.take() {
                    let _ = sender.send(Err(err));
                }
                backoff = grow(backoff, &shared.config);
                if shared.run.load(Ordering::SeqCst) {
                    thread::sleep(backoff);
                }
            }
        }

        // Ride the connection until the dispatcher ends, then close
        // the socket so the reader is guaranteed to unblock.
        let _ = dispatcher.join();
        teardown_socket(&shared);
        let _ = reader.join();

        tracing::info!("disconnected from bitcoin node");
    }

    shared.connecting.store(false, Ordering::SeqCst);
}

/// Opens the socket, sleeping through backoff growth on failure.
/// Returns `None` once the run flag is cleared.
fn open_socket(shared: &Shared, backoff: &mut Duration) -> Option<TcpStream> {
    loop {
        if !shared.run.load(Ordering::SeqCst) {
            return None;
        }

        match try_open(&shared.config) {
            Ok(stream) => return Some(stream),
            Err(err) => {
                tracing::warn!(
                    host = %shared.config.host,
                    port = shared.config.port,
                    %err,
                    "connection attempt failed"
                );
                *backoff = grow(*backoff, &shared.config);
                thread::sleep(*backoff);
            }
        }
    }
}

fn try_open(config: &PeerConfig) -> io::Result<TcpStream> {
    let addr = (config.host.as_str(), config.port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses"))?;

    TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
}

fn grow(backoff: Duration, config: &PeerConfig) -> Duration {
    (backoff + config.reconnect_increment).min(config.reconnect_max)
}

fn teardown_socket(shared: &Shared) {
    if let Some(stream) = shared.socket.lock().unwrap().take() {
        let _ = stream.shutdown(Shutdown::Both);
    }
}

/// Sends our `version` and blocks until the node's `verack` lands.
fn handshake(
    shared: &Shared,
    peer_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
    verack: &Receiver<()>,
    fault: &Mutex<Option<PeerError>>,
) -> Result<(), PeerError> {
    let version = build_version(&shared.config, peer_addr, local_addr);
    send_message(shared, &Payload::Version(version))?;

    verack.recv().map_err(|_| {
        // The dispatcher dropped its sender; prefer its own account
        // of what went wrong.
        match fault.lock().unwrap().take() {
            Some(err) => PeerError::HandshakeFailed(err.to_string()),
            None => PeerError::HandshakeFailed("connection closed before verack".into()),
        }
    })
}

fn build_version(
    config: &PeerConfig,
    peer_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
) -> VersionMessage {
    let services = config.services.bits();
    let to_record = |addr: Option<SocketAddr>| {
        addr.map(|a| NetworkAddress::from_socket_addr(services, a))
            .unwrap_or(NetworkAddress::UNSPECIFIED)
    };

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0);

    VersionMessage {
        version: config.protocol_version,
        services: config.services,
        timestamp,
        addr_recv: to_record(peer_addr),
        addr_from: to_record(local_addr),
        nonce: rand::thread_rng().gen(),
        user_agent: config.user_agent.clone(),
        // We track no chain, so the best height is unknown.
        start_height: -1,
    }
}

/// The reader thread: socket bytes into the data queue, one chunk
/// per read. Dropping the sender is the queue's terminate marker.
fn read_loop(mut stream: TcpStream, chunks: Sender<Vec<u8>>) {
    let mut buffer = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                if chunks.send(buffer[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(err) => {
                tracing::debug!(%err, "socket read ended");
                break;
            }
        }
    }
}

/// The dispatcher thread: decodes chunks and reacts per message.
///
/// Exits when the queue terminates or a framing-level error occurs;
/// its verack sender drops on exit, which is what fails a pending
/// handshake wait.
fn dispatch_loop(
    shared: &Shared,
    chunks: Receiver<Vec<u8>>,
    verack: SyncSender<()>,
    fault: &Mutex<Option<PeerError>>,
) {
    while let Ok(chunk) = chunks.recv() {
        let payloads = match decode_stream(&chunk, shared.config.magic) {
            Ok(payloads) => payloads,
            Err(err) => {
                tracing::error!(%err, "framing error, dropping the connection");
                *fault.lock().unwrap() = Some(err.into());
                return;
            }
        };

        for payload in payloads {
            if let Err(err) = dispatch(shared, &verack, payload) {
                tracing::error!(%err, "dispatch failed, dropping the connection");
                *fault.lock().unwrap() = Some(err);
                return;
            }
        }
    }
}

fn dispatch(shared: &Shared, verack: &SyncSender<()>, payload: Payload) -> Result<(), PeerError> {
    match payload {
        Payload::Version(version) => {
            let witness = version.services.contains(Services::NODE_WITNESS);
            shared.witness.store(witness, Ordering::SeqCst);
            tracing::debug!(user_agent = %version.user_agent, witness, "node version");
            send_message(shared, &Payload::Verack)?;
        }
        Payload::Verack => {
            // At most one send lands; spurious repeats are dropped.
            let _ = verack.try_send(());
        }
        Payload::Ping(Some(nonce)) => send_message(shared, &Payload::Pong(nonce))?,
        // Zero-length pings are never answered.
        Payload::Ping(None) => {}
        Payload::Pong(_) => {}
        Payload::Inv(entries) => {
            let blocks: Vec<InvEntry> = entries
                .iter()
                .filter(|entry| entry.inv_type == InvType::Block)
                .copied()
                .collect();
            let txs: Vec<InvEntry> = entries
                .iter()
                .filter(|entry| entry.inv_type == InvType::Tx)
                .copied()
                .collect();

            if !blocks.is_empty() {
                shared.subs.notify_blocks(&blocks);
            }
            if !txs.is_empty() {
                shared.subs.notify_txs(&txs);
            }
        }
        Payload::GetData(entries) => {
            for request in entries {
                if let Some(stored) = shared.serve.fetch(&request) {
                    send_message(shared, &stored)?;
                }
            }
        }
        Payload::Tx(tx) => {
            if tx.is_empty() {
                tracing::error!("node sent an empty tx payload");
                return Ok(());
            }
            // Unsolicited transactions have no waiter and are dropped.
            if let Some(waiter) = shared.waiters.take(&tx.hash()) {
                let _ = waiter.try_send(tx);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Network, PeerConfig};
    use crate::wire::constants::{HEADER_LEN, LENGTH_RANGE, REGTEST_MAGIC};
    use crate::wire::message::hash256;
    use std::net::TcpListener;

    const MAGIC: u32 = REGTEST_MAGIC;

    fn test_config(port: u16) -> PeerConfig {
        let mut config = PeerConfig::new("127.0.0.1", port, Network::Regtest);
        config.reconnect_increment = Duration::from_millis(20);
        config.reconnect_max = Duration::from_millis(100);
        config
    }

    fn read_frame_bytes(stream: &mut TcpStream) -> Vec<u8> {
        let mut frame = vec![0u8; HEADER_LEN];
        stream.read_exact(&mut frame).unwrap();
        let length = u32::from_le_bytes(frame[LENGTH_RANGE].try_into().unwrap()) as usize;
        frame.resize(HEADER_LEN + length, 0);
        stream.read_exact(&mut frame[HEADER_LEN..]).unwrap();
        frame
    }

    fn read_frame(stream: &mut TcpStream) -> Payload {
        let frame = read_frame_bytes(stream);
        let mut decoded = decode_stream(&frame, MAGIC).unwrap();
        assert_eq!(decoded.len(), 1, "expected exactly one decodable frame");
        decoded.remove(0)
    }

    fn command_of(frame: &[u8]) -> String {
        frame[4..16]
            .iter()
            .take_while(|&&byte| byte != 0)
            .map(|&byte| byte as char)
            .collect()
    }

    fn write_payload(stream: &mut TcpStream, payload: &Payload) {
        stream
            .write_all(&encode_message(MAGIC, payload).unwrap())
            .unwrap();
    }

    fn node_version(services: u64) -> VersionMessage {
        VersionMessage {
            version: 70012,
            services: Services::new(services),
            timestamp: 1700000000,
            addr_recv: NetworkAddress::UNSPECIFIED,
            addr_from: NetworkAddress::UNSPECIFIED,
            nonce: 1,
            user_agent: "/fake-node:1.0/".into(),
            start_height: 100,
        }
    }

    /// Plays the node side of a handshake on a fresh connection.
    fn accept_and_handshake(listener: &TcpListener, services: u64) -> TcpStream {
        let (mut stream, _) = listener.accept().unwrap();

        let Payload::Version(hello) = read_frame(&mut stream) else {
            panic!("expected version first");
        };
        assert_eq!(hello.start_height, -1);

        write_payload(&mut stream, &Payload::Version(node_version(services)));
        write_payload(&mut stream, &Payload::Verack);

        assert_eq!(read_frame(&mut stream), Payload::Verack);
        stream
    }

    /// Blocks until the client closes the connection.
    fn wait_for_close(stream: &mut TcpStream) {
        let mut buffer = [0u8; 64];
        while matches!(stream.read(&mut buffer), Ok(n) if n > 0) {}
    }

    #[test]
    fn handshake_then_get_tx_end_to_end() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let raw_tx = vec![0x02, 0x00, 0x00, 0x00, 0x01, 0xAB, 0xCD];
        let txid = hash256(&raw_tx);

        let node_tx = raw_tx.clone();
        let node = thread::spawn(move || {
            // services 0x09: NODE_NETWORK | NODE_WITNESS
            let mut stream = accept_and_handshake(&listener, 0x09);

            // Serve the same transaction twice: the client must ask
            // again on a repeat call, there is no cache.
            for _ in 0..2 {
                let frame = read_frame_bytes(&mut stream);
                assert_eq!(command_of(&frame), "getdata");

                let body = &frame[HEADER_LEN..];
                assert_eq!(body[0], 1, "one inventory entry");
                assert_eq!(&body[1..5], &0x4000_0001u32.to_le_bytes());
                assert_eq!(&body[5..37], &hash256(&node_tx));

                write_payload(&mut stream, &Payload::Tx(TxPayload::new(node_tx.clone())));
            }

            wait_for_close(&mut stream);
        });

        let peer = Peer::new(test_config(port));
        peer.connect(false).unwrap();
        assert!(peer.peer_uses_witness());

        let entry = InvEntry {
            inv_type: InvType::WitnessTx,
            hash: txid,
        };
        for _ in 0..2 {
            let tx = peer.get_tx(entry, Duration::from_secs(2)).unwrap();
            assert_eq!(tx.raw(), &raw_tx[..]);
            assert_eq!(tx.hash(), txid);
        }
        assert!(!peer.shared.waiters.contains(&txid));

        peer.shutdown();
        node.join().unwrap();
    }

    #[test]
    fn nonced_ping_is_answered_and_zero_length_ping_is_not() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let node = thread::spawn(move || {
            let mut stream = accept_and_handshake(&listener, 1);

            write_payload(&mut stream, &Payload::Ping(None));
            write_payload(&mut stream, &Payload::Ping(Some(0x0123456789ABCDEF)));

            // The first and only reply must answer the nonced ping.
            assert_eq!(read_frame(&mut stream), Payload::Pong(0x0123456789ABCDEF));
            wait_for_close(&mut stream);
        });

        let peer = Peer::new(test_config(port));
        peer.connect(false).unwrap();
        node.join().unwrap();
        peer.shutdown();
    }

    #[test]
    fn get_tx_timeout_removes_the_waiter() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let node = thread::spawn(move || {
            let mut stream = accept_and_handshake(&listener, 1);
            let frame = read_frame_bytes(&mut stream);
            assert_eq!(command_of(&frame), "getdata");
            // Never respond.
            wait_for_close(&mut stream);
        });

        let peer = Peer::new(test_config(port));
        peer.connect(false).unwrap();

        let entry = InvEntry {
            inv_type: InvType::Tx,
            hash: [0x44; 32],
        };
        let err = peer
            .get_tx(entry, Duration::from_millis(200))
            .unwrap_err();
        assert!(matches!(err, PeerError::GetDataTimeout));
        assert!(!peer.shared.waiters.contains(&[0x44; 32]));

        peer.shutdown();
        node.join().unwrap();
    }

    #[test]
    fn get_tx_rejects_non_transaction_entries() {
        let peer = Peer::new(test_config(1));
        let entry = InvEntry {
            inv_type: InvType::Block,
            hash: [0u8; 32],
        };

        let err = peer.get_tx(entry, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, PeerError::WrongInvType));
    }

    #[test]
    fn second_connect_fails_while_engine_is_running() {
        // Bind and drop to get a port nothing listens on; the engine
        // just cycles through refused attempts.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let peer = Peer::new(test_config(port));
        peer.connect(true).unwrap();

        let err = peer.connect(true).unwrap_err();
        assert!(matches!(err, PeerError::ConnectInProgress));

        peer.shutdown();
    }

    #[test]
    fn inv_announcements_reach_subscribers() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let node = thread::spawn(move || {
            let mut stream = accept_and_handshake(&listener, 1);
            write_payload(
                &mut stream,
                &Payload::Inv(vec![
                    InvEntry {
                        inv_type: InvType::Block,
                        hash: [0xA1; 32],
                    },
                    InvEntry {
                        inv_type: InvType::Tx,
                        hash: [0xB2; 32],
                    },
                    InvEntry {
                        inv_type: InvType::Error,
                        hash: [0xC3; 32],
                    },
                    InvEntry {
                        inv_type: InvType::Block,
                        hash: [0xD4; 32],
                    },
                ]),
            );
            wait_for_close(&mut stream);
        });

        let peer = Peer::new(test_config(port));

        let (block_tx, block_rx) = mpsc::channel();
        peer.register_block_inv(move |batch| block_tx.send(batch.to_vec()).unwrap());
        let (txinv_tx, txinv_rx) = mpsc::channel();
        peer.set_tx_inv(move |batch| txinv_tx.send(batch.to_vec()).unwrap());

        peer.connect(false).unwrap();

        let blocks = block_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].hash, [0xA1; 32]);
        assert_eq!(blocks[1].hash, [0xD4; 32]);

        let txs = txinv_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].hash, [0xB2; 32]);

        peer.shutdown();
        node.join().unwrap();
    }

    #[test]
    fn registered_payload_is_served_on_getdata() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let raw_tx = vec![0x01, 0x00, 0x00, 0x00, 0xFF];
        let txid = hash256(&raw_tx);

        let node_tx = raw_tx.clone();
        let node = thread::spawn(move || {
            let mut stream = accept_and_handshake(&listener, 1);

            write_payload(
                &mut stream,
                &Payload::GetData(vec![InvEntry {
                    inv_type: InvType::Tx,
                    hash: hash256(&node_tx),
                }]),
            );

            let Payload::Tx(tx) = read_frame(&mut stream) else {
                panic!("expected the stored transaction");
            };
            assert_eq!(tx.raw(), &node_tx[..]);
            wait_for_close(&mut stream);
        });

        let peer = Peer::new(test_config(port));
        let fetched = peer.register_payload(txid, Payload::Tx(TxPayload::new(raw_tx)));
        peer.connect(false).unwrap();

        fetched.recv_timeout(Duration::from_secs(2)).unwrap();

        peer.shutdown();
        node.join().unwrap();
    }

    #[test]
    fn reconnects_after_the_node_drops_the_link() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let node = thread::spawn(move || {
            let stream = accept_and_handshake(&listener, 1);
            drop(stream);

            // The client must come back on its own.
            let mut stream = accept_and_handshake(&listener, 1);
            wait_for_close(&mut stream);
        });

        let peer = Peer::new(test_config(port));
        peer.connect(false).unwrap();

        node.join().unwrap();
        peer.shutdown();
    }

    #[test]
    fn foreground_connect_surfaces_a_broken_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let node = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let _ = read_frame_bytes(&mut stream); // client version

            // A header whose declared length never arrives is a
            // framing error on the client side.
            let mut header = vec![];
            header.extend(MAGIC.to_le_bytes());
            header.extend(crate::wire::message::Command::Verack.as_bytes());
            header.extend(1000u32.to_le_bytes());
            header.extend([0u8; 4]);
            stream.write_all(&header).unwrap();
        });

        let peer = Peer::new(test_config(port));
        let err = peer.connect(false).unwrap_err();
        assert!(matches!(err, PeerError::HandshakeFailed(_)));

        node.join().unwrap();
        peer.shutdown();
    }

    #[test]
    fn shutdown_unblocks_a_pending_block_inv_subscriber() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let node = thread::spawn(move || {
            let mut stream = accept_and_handshake(&listener, 1);
            wait_for_close(&mut stream);
        });

        let peer = Peer::new(test_config(port));
        peer.connect(false).unwrap();

        let (sentinel_tx, sentinel_rx) = mpsc::channel();
        peer.register_block_inv(move |batch| sentinel_tx.send(batch.to_vec()).unwrap());

        peer.shutdown();

        let batch = sentinel_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].inv_type, InvType::Terminate);

        // A second shutdown is a no-op.
        peer.shutdown();
        node.join().unwrap();
    }
}
