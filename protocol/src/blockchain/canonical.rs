//! # Chain canonicaliser
//!
//! Decides which branch of the blocks known to the [`super::fork::ForkManager`]
//! is actually applied to persistent account state, and keeps the
//! `blocknum`/`blockstate` namespaces in sync with that decision.
//!
//! `update_canonical` is idempotent and meant to be called from a single
//! place (the block producer's loop) — it is not internally
//! synchronised against concurrent callers.

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{error, info, warn};

use super::block::Block;
use super::fork::ForkManager;
use super::state::State;
use super::store::{Store, StoreError};
use super::validator::{self, ValidationError};

/// Errors from the canonicaliser's bootstrap and read paths. Mid-loop
/// validation failures are logged and abort the current cycle rather
/// than propagating — see [`ChainCanonicaliser::update_canonical`].
#[derive(Debug, Error)]
pub enum CanonicalError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("persisted state at block {0} is corrupt: {1}")]
    CorruptState(u64, serde_json::Error),

    #[error("persisted block {0} is corrupt: {1}")]
    CorruptBlock(String, super::block::BlockError),
}

/// The canonical chain's current tip, cached in memory for fast reads.
#[derive(Clone)]
struct Latest {
    number: u64,
    hash: String,
}

pub struct ChainCanonicaliser {
    store: Arc<Store>,
    fork: Arc<ForkManager>,
    latest: RwLock<Latest>,
}

impl ChainCanonicaliser {
    /// Opens the canonicaliser against `store`, bootstrapping the
    /// genesis block/state if this is a fresh data directory.
    pub fn new(store: Arc<Store>, fork: Arc<ForkManager>) -> Result<Arc<Self>, CanonicalError> {
        let latest = Self::bootstrap_genesis(&store)?;
        Ok(Arc::new(Self {
            store,
            fork,
            latest: RwLock::new(latest),
        }))
    }

    fn bootstrap_genesis(store: &Store) -> Result<Latest, CanonicalError> {
        if let Some(number_str) = store.get("blocknum", "latest")? {
            let number: u64 = number_str.parse().unwrap_or(0);
            let hash = store.require("blocknum", &number.to_string())?;
            return Ok(Latest { number, hash });
        }

        let genesis = Block::genesis();
        let hash = genesis.hash_hex();
        let state = State::genesis(hash.clone());

        store.put("block", &hash, &genesis.serialize())?;
        store.put("blocknum", "0", &hash)?;
        store.put("blocknum", "latest", "0")?;
        store.put("blockstate", "0", &state.to_json().expect("state always serialises"))?;

        info!(target: "node::blc", hash = %hash, "bootstrapped genesis block");
        Ok(Latest { number: 0, hash })
    }

    fn load_block_by_hash(&self, hash: &str) -> Result<Option<Block>, CanonicalError> {
        if let Some(block) = self.fork.known_block(hash) {
            return Ok(Some(block));
        }
        match self.store.get("block", hash)? {
            Some(raw) => Block::deserialize(&raw)
                .map(Some)
                .map_err(|e| CanonicalError::CorruptBlock(hash.to_string(), e)),
            None => Ok(None),
        }
    }

    fn load_block_by_number(&self, number: u64) -> Result<Option<Block>, CanonicalError> {
        match self.store.get("blocknum", &number.to_string())? {
            Some(hash) => self.load_block_by_hash(&hash),
            None => Ok(None),
        }
    }

    fn load_state_at(&self, number: u64) -> Result<State, CanonicalError> {
        let raw = self.store.require("blockstate", &number.to_string())?;
        State::from_json(&raw).map_err(|e| CanonicalError::CorruptState(number, e))
    }

    /// `get_block_by_hash` read operation.
    pub fn get_block_by_hash(&self, hash: &str) -> Result<Option<Block>, CanonicalError> {
        self.load_block_by_hash(hash)
    }

    /// `get_block_by_number` read operation; `-1` (pass `None`) means latest.
    pub fn get_block_by_number(&self, number: Option<u64>) -> Result<Option<Block>, CanonicalError> {
        let number = number.unwrap_or_else(|| self.latest.read().number);
        self.load_block_by_number(number)
    }

    pub fn get_state_at(&self, number: u64) -> Result<State, CanonicalError> {
        self.load_state_at(number)
    }

    pub fn get_latest_state(&self) -> Result<State, CanonicalError> {
        self.load_state_at(self.latest.read().number)
    }

    pub fn latest_number(&self) -> u64 {
        self.latest.read().number
    }

    pub fn latest_hash(&self) -> String {
        self.latest.read().hash.clone()
    }

    /// Iterates every canonical block from genesis to the current tip.
    pub fn iter_blocks(&self) -> Result<Vec<Block>, CanonicalError> {
        let latest = self.latest.read().number;
        (0..=latest)
            .map(|n| {
                self.load_block_by_number(n)?
                    .ok_or_else(|| CanonicalError::Store(StoreError::MissingKey {
                        namespace: "block".to_string(),
                        key: n.to_string(),
                    }))
            })
            .collect()
    }

    /// Idempotent, single-threaded: reconciles the persisted canonical
    /// chain with the fork manager's current best tip via a
    /// common-ancestor walk, then applies every newly-canonical block in
    /// height order.
    pub fn update_canonical(&self) -> Result<(), CanonicalError> {
        let Some(mut tip) = self.fork.highest_block() else {
            return Ok(());
        };

        let latest = self.latest.read().clone();
        let Some(mut cur) = self.load_block_by_number(latest.number)? else {
            warn!(target: "node::err", number = latest.number, "canonical tip block missing from store");
            return Ok(());
        };

        if tip.hash_hex() == cur.hash_hex() {
            return Ok(());
        }

        let mut todo = Vec::new();
        while tip.number > cur.number {
            todo.push(tip.clone());
            let Some(parent) = self.load_block_by_hash(&hex::encode(tip.parent_hash))? else {
                warn!(target: "node::err", hash = %tip.hash_hex(), "tip ancestry incomplete, aborting canonicalisation");
                return Ok(());
            };
            tip = parent;
        }

        while tip.hash_hex() != cur.hash_hex() {
            todo.push(tip.clone());
            let (Some(tip_parent), Some(cur_parent)) = (
                self.load_block_by_hash(&hex::encode(tip.parent_hash))?,
                self.load_block_by_hash(&hex::encode(cur.parent_hash))?,
            ) else {
                warn!(target: "node::err", "common ancestor walk ran off the known chain, aborting canonicalisation");
                return Ok(());
            };
            tip = tip_parent;
            cur = cur_parent;
        }

        let common_ancestor_number = tip.number;
        let mut state = self.load_state_at(common_ancestor_number)?;

        for block in todo.into_iter().rev() {
            match validator::apply_block(&block, &mut state) {
                Ok(()) => {
                    let hash = block.hash_hex();
                    self.store.put("blockstate", &block.number.to_string(), &state.to_json().expect("state always serialises"))?;
                    self.store.put("blocknum", &block.number.to_string(), &hash)?;
                    self.store.put("blocknum", "latest", &block.number.to_string())?;

                    let mut latest = self.latest.write();
                    latest.number = block.number;
                    latest.hash = hash.clone();
                    drop(latest);

                    info!(target: "node::blc", number = block.number, hash = %hash, "advanced canonical chain");
                }
                Err(err) => {
                    self.log_rejected_block(&block, &err);
                    break;
                }
            }
        }

        Ok(())
    }

    fn log_rejected_block(&self, block: &Block, err: &ValidationError) {
        error!(
            target: "node::err",
            number = block.number,
            hash = %block.hash_hex(),
            error = %err,
            "block failed state transition during canonicalisation, aborting cycle"
        );
    }
}
