//! # Mempool
//!
//! An in-memory FIFO queue of signature-verified, not-yet-mined
//! transactions, keyed by transaction hash with a parallel `last_seen`
//! timestamp. `announce_transaction` is the local-origin entry point
//! (broadcasts `bc:new_tx` and inserts); gossip ingress is the
//! remote-origin entry point (verifies the signature first, silently
//! drops invalid transactions).
//!
//! Membership is soft: an entry not re-seen within
//! [`crate::constants::MEMPOOL_ENTRY_TTL_SECS`] is evicted by the
//! background cleanup loop. There is no persistence — a restart loses
//! every pending transaction, matching the reference implementation.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, warn};

use super::transaction::{Transaction, TransactionError};
use crate::constants::{MEMPOOL_CLEANUP_INTERVAL_SECS, MEMPOOL_ENTRY_TTL_SECS};
use crate::gossip::{Gossip, GossipError, GossipHandler, GossipMessage};

/// Errors surfaced by the mempool.
#[derive(Debug, Error)]
pub enum MempoolError {
    #[error("gossip error: {0}")]
    Gossip(#[from] GossipError),

    #[error("malformed transaction payload: {0}")]
    MalformedTransaction(#[from] TransactionError),
}

struct Inner {
    txs: HashMap<String, Transaction>,
    last_seen: HashMap<String, Instant>,
    order: VecDeque<String>,
}

/// The transaction mempool, wired to gossip's `bc:new_tx` kind.
pub struct Mempool {
    gossip: Arc<Gossip>,
    inner: RwLock<Inner>,
}

impl Mempool {
    /// Builds a `Mempool` and registers its `bc:new_tx` gossip handler.
    pub fn new(gossip: Arc<Gossip>) -> Result<Arc<Self>, MempoolError> {
        let mempool = Arc::new(Self {
            gossip: gossip.clone(),
            inner: RwLock::new(Inner {
                txs: HashMap::new(),
                last_seen: HashMap::new(),
                order: VecDeque::new(),
            }),
        });

        gossip.register(
            "bc:new_tx",
            Arc::new(NewTxHandler {
                mempool: mempool.clone(),
            }),
        )?;

        Ok(mempool)
    }

    /// Broadcasts `tx` as a `bc:new_tx` gossip message and inserts it
    /// locally without re-verifying — the caller (the node's own wallet)
    /// is trusted to have signed it correctly.
    pub async fn announce_transaction(&self, tx: Transaction) -> Result<(), MempoolError> {
        self.insert_unchecked(tx.clone());
        let message = GossipMessage::new("bc:new_tx", tx.serialize())?;
        self.gossip.broadcast(message).await;
        Ok(())
    }

    fn insert_unchecked(&self, tx: Transaction) {
        let hash = tx.hash();
        let mut inner = self.inner.write();
        if !inner.txs.contains_key(&hash) {
            inner.order.push_back(hash.clone());
        }
        inner.last_seen.insert(hash.clone(), Instant::now());
        inner.txs.insert(hash, tx);
    }

    fn handle_gossip_tx(&self, raw: &str) {
        let tx = match Transaction::deserialize(raw) {
            Ok(tx) => tx,
            Err(err) => {
                warn!(target: "node::err", error = %err, "dropping malformed gossiped transaction");
                return;
            }
        };

        if !tx.validate_signature() {
            warn!(target: "node::err", hash = %tx.hash(), "dropping transaction with invalid signature");
            return;
        }

        debug!(target: "node::blc", hash = %tx.hash(), "accepted transaction into mempool");
        self.insert_unchecked(tx);
    }

    /// Returns every live transaction, oldest-first (FIFO).
    pub fn get_transactions(&self) -> Vec<Transaction> {
        let inner = self.inner.read();
        inner.order.iter().filter_map(|hash| inner.txs.get(hash).cloned()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().txs.is_empty()
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.inner.read().txs.contains_key(hash)
    }

    /// Removes a transaction by value (compares by hash), used when a
    /// speculative apply during block-building fails.
    pub fn evict_transaction(&self, tx: &Transaction) {
        self.evict_hash(&tx.hash());
    }

    fn evict_hash(&self, hash: &str) {
        let mut inner = self.inner.write();
        inner.txs.remove(hash);
        inner.last_seen.remove(hash);
        inner.order.retain(|h| h != hash);
    }

    /// Starts the background cleanup loop: every
    /// `MEMPOOL_CLEANUP_INTERVAL_SECS`, evict entries not re-seen within
    /// `MEMPOOL_ENTRY_TTL_SECS`.
    pub fn spawn_cleanup_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let mempool = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(MEMPOOL_CLEANUP_INTERVAL_SECS));
            loop {
                interval.tick().await;
                mempool.run_cleanup_sweep();
            }
        })
    }

    fn run_cleanup_sweep(&self) {
        let now = Instant::now();
        let ttl = Duration::from_secs(MEMPOOL_ENTRY_TTL_SECS);
        let expired: Vec<String> = {
            let inner = self.inner.read();
            inner
                .last_seen
                .iter()
                .filter(|(_, seen)| now.duration_since(**seen) > ttl)
                .map(|(hash, _)| hash.clone())
                .collect()
        };
        for hash in expired {
            debug!(target: "node::blc", hash, "evicting stale mempool entry");
            self.evict_hash(&hash);
        }
    }
}

struct NewTxHandler {
    mempool: Arc<Mempool>,
}

#[async_trait]
impl GossipHandler for NewTxHandler {
    async fn handle(&self, message: GossipMessage) {
        let Some(raw) = message.payload.as_str() else {
            warn!(target: "node::err", "bc:new_tx payload is not a string");
            return;
        };
        self.mempool.handle_gossip_tx(raw);
    }
}
