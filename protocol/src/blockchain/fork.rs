//! # Fork manager
//!
//! Admits, validates, and confirms candidate blocks received over gossip
//! or produced locally. Tracks the best known tip and answers remote
//! searches for blocks by hash. Accepts any difficulty-valid candidate
//! regardless of branch — deciding which branch state actually follows
//! is the canonicaliser's job, not this one's.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::block::{Block, BlockError};
use super::store::{Store, StoreError};
use crate::gossip::{Gossip, GossipError, GossipHandler, GossipMessage};
use crate::search::{Search, SearchError, SearchResultHandler, Searcher};

/// Errors surfaced while wiring the fork manager to gossip/search.
#[derive(Debug, Error)]
pub enum ForkError {
    #[error("gossip error: {0}")]
    Gossip(#[from] GossipError),

    #[error("search error: {0}")]
    Search(#[from] SearchError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Where the ancestor walk for a candidate block ended up.
enum WalkOutcome {
    /// Walked all the way down to the genesis block.
    ReachedGenesis,
    /// Walked down to a block that is already confirmed.
    ReachedConfirmed,
    /// The walk's current block's parent isn't known locally yet.
    MissingParent { frontier: Block },
}

/// Tracks candidate blocks and drives their admission into the
/// confirmed, persisted set.
pub struct ForkManager {
    search: Arc<Search>,
    store: Arc<Store>,
    known_blocks: DashMap<String, Block>,
    confirmed_blocks: DashMap<String, ()>,
    highest_block: RwLock<Option<Block>>,
}

impl ForkManager {
    /// Builds a `ForkManager`, registers its `bc:new_block` gossip kind,
    /// and registers its `"block"` search responder.
    pub fn new(gossip: Arc<Gossip>, search: Arc<Search>, store: Arc<Store>) -> Result<Arc<Self>, ForkError> {
        let manager = Arc::new(Self {
            search: search.clone(),
            store,
            known_blocks: DashMap::new(),
            confirmed_blocks: DashMap::new(),
            highest_block: RwLock::new(None),
        });

        gossip.register(
            "bc:new_block",
            Arc::new(NewBlockHandler { fork: manager.clone() }),
        )?;
        search.register("block", Arc::new(BlockSearcher { fork: manager.clone() }))?;

        Ok(manager)
    }

    pub fn highest_block(&self) -> Option<Block> {
        self.highest_block.read().clone()
    }

    pub fn is_confirmed(&self, hash: &str) -> bool {
        self.confirmed_blocks.contains_key(hash)
    }

    pub fn known_block(&self, hash: &str) -> Option<Block> {
        self.known_blocks.get(hash).map(|b| b.clone())
    }

    /// Resolves a block by hash, checking the in-memory candidate set
    /// first and falling back to persistent storage — a block's
    /// ancestry may already be confirmed-and-pruned from memory, or (for
    /// genesis) never have passed through the fork manager at all.
    fn resolve_block(&self, hash: &str) -> Option<Block> {
        if let Some(block) = self.known_block(hash) {
            return Some(block);
        }
        let raw = self.store.get("block", hash).ok().flatten()?;
        Block::deserialize(&raw).ok()
    }

    fn parent_of(&self, block: &Block) -> Option<Block> {
        self.resolve_block(&hex::encode(block.parent_hash))
    }

    fn walk_ancestry(&self, block: &Block) -> WalkOutcome {
        let mut current = block.clone();
        loop {
            if current.number == 0 {
                return WalkOutcome::ReachedGenesis;
            }
            if self.is_confirmed(&current.hash_hex()) {
                return WalkOutcome::ReachedConfirmed;
            }
            match self.parent_of(&current) {
                Some(parent) => current = parent,
                None => return WalkOutcome::MissingParent { frontier: current },
            }
        }
    }

    /// Handles a freshly-seen candidate block: validates difficulty,
    /// inserts it into `known_blocks`, and runs the ancestor walk —
    /// either confirming the chain immediately or issuing a search for
    /// the missing parent.
    pub async fn handle_candidate(self: &Arc<Self>, block: Block) {
        if !block.meets_difficulty() {
            warn!(target: "node::err", hash = %block.hash_hex(), "dropping block that does not meet difficulty");
            return;
        }

        let hash = block.hash_hex();
        self.known_blocks.insert(hash.clone(), block.clone());

        match self.walk_ancestry(&block) {
            WalkOutcome::ReachedGenesis | WalkOutcome::ReachedConfirmed => {
                self.confirm_and_persist(&block);
                self.update_tip(&block);
            }
            WalkOutcome::MissingParent { frontier } => {
                let parent_hash_hex = hex::encode(frontier.parent_hash);
                let parent_number = frontier.number - 1;
                debug!(
                    target: "node::blc",
                    hash = %hash,
                    missing_parent = %parent_hash_hex,
                    "searching for missing ancestor"
                );

                let resolver: Arc<dyn SearchResultHandler> = Arc::new(ParentResolver {
                    fork: self.clone(),
                    expected_parent_hash: parent_hash_hex.clone(),
                    expected_parent_number: parent_number,
                    child: block,
                });
                self.search
                    .search_for("block", Value::String(parent_hash_hex), resolver)
                    .await;
            }
        }
    }

    /// Walks from `block` toward its parent, persisting and marking
    /// confirmed every not-yet-confirmed block, stopping at the first
    /// already-confirmed ancestor or at height 0.
    fn confirm_and_persist(&self, block: &Block) {
        let mut current = block.clone();
        loop {
            let hash = current.hash_hex();
            if self.is_confirmed(&hash) {
                return;
            }

            self.confirmed_blocks.insert(hash.clone(), ());
            if let Err(err) = self.store.put("block", &hash, &current.serialize()) {
                warn!(target: "node::err", hash = %hash, error = %err, "failed to persist confirmed block");
            }
            debug!(target: "node::blc", hash = %hash, number = current.number, "confirmed block");

            if current.number == 0 {
                return;
            }
            match self.parent_of(&current) {
                Some(parent) => current = parent,
                None => return,
            }
        }
    }

    fn update_tip(&self, block: &Block) {
        let mut tip = self.highest_block.write();
        let should_replace = match tip.as_ref() {
            None => true,
            Some(current) => block.number > current.number,
        };
        if should_replace {
            *tip = Some(block.clone());
        }
    }

    /// Returns the serialised form of `hash_hex` if known in memory or
    /// persistent storage, else `None`.
    fn lookup_block(&self, hash_hex: &str) -> Option<String> {
        if let Some(block) = self.known_blocks.get(hash_hex) {
            return Some(block.serialize());
        }
        self.store.get("block", hash_hex).ok().flatten()
    }
}

struct ParentResolver {
    fork: Arc<ForkManager>,
    expected_parent_hash: String,
    expected_parent_number: u64,
    child: Block,
}

impl SearchResultHandler for ParentResolver {
    fn handle(&self, result: Option<Value>) -> bool {
        let Some(value) = result else {
            debug!(target: "node::blc", parent = %self.expected_parent_hash, "ancestor search timed out");
            return true;
        };

        let Some(raw) = value.as_str() else {
            warn!(target: "node::err", "block search result was not a string");
            return true;
        };

        let parent: Result<Block, BlockError> = Block::deserialize(raw);
        let parent = match parent {
            Ok(p) => p,
            Err(err) => {
                warn!(target: "node::err", error = %err, "failed to deserialise searched block");
                return true;
            }
        };

        let valid = parent.hash_hex() == self.expected_parent_hash
            && parent.number == self.expected_parent_number
            && parent.meets_difficulty();

        if !valid {
            warn!(target: "node::err", "searched block failed ancestry verification");
            return true;
        }

        self.fork.known_blocks.insert(parent.hash_hex(), parent);

        let fork = self.fork.clone();
        let child = self.child.clone();
        tokio::spawn(async move {
            fork.handle_candidate(child).await;
        });

        true
    }
}

struct NewBlockHandler {
    fork: Arc<ForkManager>,
}

#[async_trait]
impl GossipHandler for NewBlockHandler {
    async fn handle(&self, message: GossipMessage) {
        let Some(raw) = message.payload.as_str() else {
            warn!(target: "node::err", "bc:new_block payload is not a string");
            return;
        };
        match Block::deserialize(raw) {
            Ok(block) => self.fork.handle_candidate(block).await,
            Err(err) => warn!(target: "node::err", error = %err, "dropping malformed gossiped block"),
        }
    }
}

struct BlockSearcher {
    fork: Arc<ForkManager>,
}

#[async_trait]
impl Searcher for BlockSearcher {
    async fn search(&self, query: Value) -> Option<Value> {
        let hash_hex = query.as_str()?;
        self.fork.lookup_block(hash_hex).map(Value::String)
    }
}
