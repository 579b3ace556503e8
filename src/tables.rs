//! Correlation state shared between the dispatcher thread and the
//! public API: pending transaction requests, payloads served on
//! demand, and inventory subscribers.

use std::collections::HashMap;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Mutex;

use crate::wire::message::{InvEntry, Payload, TxPayload};

/// Invoked once with a batch of block inventory entries, then dropped.
pub type BlockInvCallback = Box<dyn FnOnce(&[InvEntry]) + Send>;

/// Invoked on every batch of transaction inventory entries.
pub type TxInvCallback = Box<dyn Fn(&[InvEntry]) + Send>;

/// Pending `get_tx` calls, keyed by transaction hash.
///
/// The value is the sending half of a one-shot rendezvous; the
/// requesting thread owns the receiving half. `take` removes the
/// entry atomically, which is what guarantees a waiter fires at most
/// once.
#[derive(Default)]
pub struct TxWaiters {
    inner: Mutex<HashMap<[u8; 32], SyncSender<TxPayload>>>,
}

impl TxWaiters {
    /// Registers a waiter, replacing any previous one for the hash.
    pub fn insert(&self, hash: [u8; 32], sender: SyncSender<TxPayload>) {
        self.inner.lock().unwrap().insert(hash, sender);
    }

    pub fn remove(&self, hash: &[u8; 32]) {
        self.inner.lock().unwrap().remove(hash);
    }

    /// Removes and returns the waiter for `hash`, if any.
    pub fn take(&self, hash: &[u8; 32]) -> Option<SyncSender<TxPayload>> {
        self.inner.lock().unwrap().remove(hash)
    }

    /// Drops every pending waiter; their callers observe a timeout.
    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }

    pub fn contains(&self, hash: &[u8; 32]) -> bool {
        self.inner.lock().unwrap().contains_key(hash)
    }
}

struct ServeEntry {
    payload: Payload,
    fetched: SyncSender<()>,
}

/// Payloads handed to us in advance, shipped when the peer asks for
/// them by hash in a `getdata`.
#[derive(Default)]
pub struct ServeTable {
    inner: Mutex<HashMap<[u8; 32], ServeEntry>>,
}

impl ServeTable {
    /// Stores a payload under `hash` and returns a receiver that
    /// fires the first time the peer fetches it.
    pub fn insert(&self, hash: [u8; 32], payload: Payload) -> Receiver<()> {
        let (fetched, receiver) = sync_channel(1);
        self.inner
            .lock()
            .unwrap()
            .insert(hash, ServeEntry { payload, fetched });
        receiver
    }

    /// Looks up the payload for a `getdata` entry.
    ///
    /// Returns a clone to ship and signals the fetch notification.
    /// An entry whose stored payload does not match the requested
    /// inventory type is skipped silently.
    pub fn fetch(&self, request: &InvEntry) -> Option<Payload> {
        let table = self.inner.lock().unwrap();
        let entry = table.get(&request.hash)?;

        let matches = match &entry.payload {
            Payload::Tx(_) => request.inv_type.is_tx(),
            _ => false,
        };
        if !matches {
            return None;
        }

        let _ = entry.fetched.try_send(());
        Some(entry.payload.clone())
    }
}

/// Inventory announcement consumers.
///
/// Block subscribers queue up and are drained wholesale on the next
/// block announcement (or at shutdown, with a terminate sentinel).
/// The transaction slot holds a single persistent callback.
#[derive(Default)]
pub struct InvSubscribers {
    block: Mutex<Vec<BlockInvCallback>>,
    tx: Mutex<Option<TxInvCallback>>,
}

impl InvSubscribers {
    pub fn push_block(&self, callback: BlockInvCallback) {
        self.block.lock().unwrap().push(callback);
    }

    pub fn set_tx(&self, callback: TxInvCallback) {
        *self.tx.lock().unwrap() = Some(callback);
    }

    /// Takes every queued block subscriber and invokes them in
    /// registration order with the batch.
    pub fn notify_blocks(&self, entries: &[InvEntry]) {
        let callbacks = std::mem::take(&mut *self.block.lock().unwrap());
        for callback in callbacks {
            callback(entries);
        }
    }

    pub fn notify_txs(&self, entries: &[InvEntry]) {
        if let Some(callback) = &*self.tx.lock().unwrap() {
            callback(entries);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::message::InvType;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::channel;
    use std::sync::Arc;

    fn entry(inv_type: InvType, byte: u8) -> InvEntry {
        InvEntry {
            inv_type,
            hash: [byte; 32],
        }
    }

    #[test]
    fn waiter_fires_at_most_once() {
        let waiters = TxWaiters::default();
        let (sender, receiver) = sync_channel(1);

        waiters.insert([1; 32], sender);
        let taken = waiters.take(&[1; 32]).unwrap();
        assert!(waiters.take(&[1; 32]).is_none());

        taken.try_send(TxPayload::new(vec![0xAA])).unwrap();
        assert_eq!(receiver.recv().unwrap().raw(), &[0xAA]);
    }

    #[test]
    fn waiter_insert_overwrites() {
        let waiters = TxWaiters::default();
        let (first, first_rx) = sync_channel(1);
        let (second, second_rx) = sync_channel(1);

        waiters.insert([1; 32], first);
        waiters.insert([1; 32], second);

        // The first waiter's sender was dropped by the overwrite.
        assert!(first_rx.recv().is_err());

        waiters.take(&[1; 32]).unwrap().try_send(TxPayload::new(vec![])).unwrap();
        assert!(second_rx.recv().is_ok());
    }

    #[test]
    fn cleared_waiters_observe_disconnect() {
        let waiters = TxWaiters::default();
        let (sender, receiver) = sync_channel::<TxPayload>(1);
        waiters.insert([2; 32], sender);

        waiters.clear();
        assert!(!waiters.contains(&[2; 32]));
        assert!(receiver.recv().is_err());
    }

    #[test]
    fn serve_table_ships_matching_type_and_signals() {
        let table = ServeTable::default();
        let tx = TxPayload::new(vec![0x01]);
        let fetched = table.insert([3; 32], Payload::Tx(tx.clone()));

        // Block-typed request for a stored transaction: skipped.
        assert!(table.fetch(&entry(InvType::Block, 3)).is_none());
        assert!(fetched.try_recv().is_err());

        // Both tx types match a stored transaction payload.
        assert_eq!(
            table.fetch(&entry(InvType::Tx, 3)),
            Some(Payload::Tx(tx.clone()))
        );
        assert!(fetched.recv().is_ok());
        assert_eq!(
            table.fetch(&entry(InvType::WitnessTx, 3)),
            Some(Payload::Tx(tx))
        );

        assert!(table.fetch(&entry(InvType::Tx, 9)).is_none());
    }

    #[test]
    fn block_subscribers_drain_in_fifo_order() {
        let subs = InvSubscribers::default();
        let (sender, receiver) = channel();

        for tag in 0..3 {
            let sender = sender.clone();
            subs.push_block(Box::new(move |batch| {
                sender.send((tag, batch.len())).unwrap();
            }));
        }

        subs.notify_blocks(&[entry(InvType::Block, 1), entry(InvType::Block, 2)]);
        assert_eq!(receiver.try_recv().unwrap(), (0, 2));
        assert_eq!(receiver.try_recv().unwrap(), (1, 2));
        assert_eq!(receiver.try_recv().unwrap(), (2, 2));

        // Drained: a second batch reaches nobody.
        subs.notify_blocks(&[entry(InvType::Block, 3)]);
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn tx_slot_is_invoked_per_batch() {
        let subs = InvSubscribers::default();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = seen.clone();
        subs.set_tx(Box::new(move |batch| {
            counter.fetch_add(batch.len(), Ordering::SeqCst);
        }));

        subs.notify_txs(&[entry(InvType::Tx, 1)]);
        subs.notify_txs(&[entry(InvType::Tx, 2), entry(InvType::Tx, 3)]);
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }
}
