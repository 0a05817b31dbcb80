//! # Block producer (miner)
//!
//! The background mining loop: build a candidate atop the latest
//! canonical state, grind its proof-of-work nonce, and publish it the
//! moment it meets difficulty — abandoning the attempt early if a
//! competing tip arrives first.
//!
//! Coinbase identity is a keypair persisted under the `privkey`
//! namespace; a fresh node generates one on first run.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::canonical::{CanonicalError, ChainCanonicaliser};
use super::fork::ForkManager;
use super::mempool::Mempool;
use super::store::{Store, StoreError};
use super::validator;
use crate::crypto::{KeyError, Keypair, PublicKey};
use crate::gossip::{Gossip, GossipError, GossipMessage};

const PRIVATE_KEY_NAMESPACE: &str = "privkey";
const PRIVATE_KEY_KEY: &str = "privkey";

/// Number of nonce increments attempted between checks of whether the
/// fork manager's tip has moved out from under the candidate being mined.
const ABANDON_CHECK_INTERVAL: u64 = 50_000;

#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("canonicaliser error: {0}")]
    Canonical(#[from] CanonicalError),

    #[error("gossip error: {0}")]
    Gossip(#[from] GossipError),

    #[error("persisted private key is corrupt: {0}")]
    CorruptKey(#[from] KeyError),
}

/// Loads the node's coinbase keypair from `privkey/privkey`, generating
/// and persisting a fresh one if this is a new data directory.
pub fn load_or_generate_coinbase(store: &Store) -> Result<Keypair, ProducerError> {
    match store.get(PRIVATE_KEY_NAMESPACE, PRIVATE_KEY_KEY)? {
        Some(hex_key) => Ok(Keypair::from_hex(&hex_key)?),
        None => {
            let keypair = Keypair::generate();
            store.put(PRIVATE_KEY_NAMESPACE, PRIVATE_KEY_KEY, &keypair.to_hex())?;
            info!(target: "node::blc", address = %keypair.public_key().to_hex(), "generated new coinbase identity");
            Ok(keypair)
        }
    }
}

pub struct BlockProducer {
    coinbase: PublicKey,
    mempool: Arc<Mempool>,
    fork: Arc<ForkManager>,
    canonical: Arc<ChainCanonicaliser>,
    gossip: Arc<Gossip>,
}

impl BlockProducer {
    pub fn new(
        coinbase: PublicKey,
        mempool: Arc<Mempool>,
        fork: Arc<ForkManager>,
        canonical: Arc<ChainCanonicaliser>,
        gossip: Arc<Gossip>,
    ) -> Arc<Self> {
        Arc::new(Self {
            coinbase,
            mempool,
            fork,
            canonical,
            gossip,
        })
    }

    pub fn coinbase(&self) -> &PublicKey {
        &self.coinbase
    }

    /// Starts the continuous mining loop as a background task.
    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let producer = self.clone();
        tokio::spawn(async move {
            loop {
                if let Err(err) = producer.run_mining_cycle().await {
                    warn!(target: "node::err", error = %err, "mining cycle failed, retrying");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        })
    }

    /// Runs one build-grind-publish cycle to completion (or abandonment).
    async fn run_mining_cycle(&self) -> Result<(), ProducerError> {
        let starting_tip = self.fork.highest_block();

        self.canonical.update_canonical()?;
        let state = self.canonical.get_latest_state()?;
        let mut candidate = validator::build_block(&state, self.coinbase.clone(), &self.mempool);

        debug!(
            target: "node::blc",
            number = candidate.number,
            transactions = candidate.transactions.len(),
            "mining candidate block"
        );

        loop {
            if candidate.meets_difficulty() {
                self.publish(candidate).await?;
                return Ok(());
            }

            for _ in 0..ABANDON_CHECK_INTERVAL {
                if candidate.meets_difficulty() {
                    break;
                }
                candidate.pow_nonce += 1;
            }

            let current_tip = self.fork.highest_block();
            if tip_changed(&starting_tip, &current_tip) {
                debug!(target: "node::blc", number = candidate.number, "abandoning candidate, tip advanced");
                return Ok(());
            }

            // Yield so the abandon check and other tasks actually get to run
            // between grinding bursts.
            tokio::task::yield_now().await;
        }
    }

    async fn publish(&self, block: super::block::Block) -> Result<(), ProducerError> {
        let hash = block.hash_hex();
        self.fork.handle_candidate(block.clone()).await;

        let message = GossipMessage::new("bc:new_block", block.serialize())?;
        self.gossip.broadcast(message).await;

        info!(target: "node::blc", number = block.number, hash = %hash, "mined and published block");
        Ok(())
    }
}

fn tip_changed(before: &Option<super::block::Block>, after: &Option<super::block::Block>) -> bool {
    match (before, after) {
        (None, None) => false,
        (Some(a), Some(b)) => a.hash_hex() != b.hash_hex(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::Messaging;
    use crate::peering::Peering;
    use crate::search::Search;
    use crate::transport::Transport;

    async fn harness() -> (Arc<BlockProducer>, Arc<Store>) {
        let transport = Transport::bind(0).await.unwrap();
        let messaging = Arc::new(Messaging::new(transport));
        let peering = Peering::new(messaging.clone(), 4).unwrap();
        let gossip = Gossip::new(messaging, peering).unwrap();
        let search = Search::new(gossip.clone()).unwrap();
        let store = Arc::new(Store::open_temporary().unwrap());
        let fork = ForkManager::new(gossip.clone(), search, store.clone()).unwrap();
        let canonical = ChainCanonicaliser::new(store.clone(), fork.clone()).unwrap();
        let mempool = Mempool::new(gossip.clone()).unwrap();
        let coinbase = load_or_generate_coinbase(&store).unwrap().public_key();
        let producer = BlockProducer::new(coinbase, mempool, fork, canonical, gossip);
        (producer, store)
    }

    #[test]
    fn load_or_generate_coinbase_persists_key() {
        let store = Store::open_temporary().unwrap();
        let first = load_or_generate_coinbase(&store).unwrap();
        let second = load_or_generate_coinbase(&store).unwrap();
        assert_eq!(first.public_key().to_hex(), second.public_key().to_hex());
    }

    #[test]
    fn tip_changed_detects_transitions() {
        let genesis = crate::blockchain::block::Block::genesis();
        assert!(!tip_changed(&None, &None));
        assert!(tip_changed(&None, &Some(genesis.clone())));
        assert!(tip_changed(&Some(genesis.clone()), &None));
        assert!(!tip_changed(&Some(genesis.clone()), &Some(genesis)));
    }

    #[tokio::test]
    async fn mining_cycle_produces_and_confirms_one_block() {
        let (producer, store) = harness().await;
        producer.run_mining_cycle().await.unwrap();

        assert_eq!(producer.fork.highest_block().unwrap().number, 1);
        producer.canonical.update_canonical().unwrap();
        assert_eq!(producer.canonical.latest_number(), 1);

        let state = producer.canonical.get_latest_state().unwrap();
        assert_eq!(state.balance_of(producer.coinbase()), crate::constants::BLOCK_REWARD);
        drop(store);
    }
}
