//! # Blockchain State
//!
//! The deterministic result of applying blocks `0..=N` to the genesis
//! state: a block number/hash pointer plus flat `balances`/`nonces` maps
//! keyed by 33-byte compressed public key (hex-encoded for JSON). There
//! is no Merkle-Patricia trie here and no `.root()` — the state's only
//! job is answering "what does address X have" and "apply block B",
//! snapshotted to `blockstate/<N>` after every successful application.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::crypto::PublicKey;

/// `(block_number, block_hash, balances, nonces)` — the full state
/// snapshot persisted under `blockstate/<N>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    pub block_number: u64,
    pub block_hash: String,
    pub balances: HashMap<String, u64>,
    pub nonces: HashMap<String, u64>,
}

impl State {
    /// The state at height 0: the genesis block's hash, empty balances
    /// and nonces.
    pub fn genesis(genesis_hash_hex: String) -> Self {
        Self {
            block_number: 0,
            block_hash: genesis_hash_hex,
            balances: HashMap::new(),
            nonces: HashMap::new(),
        }
    }

    pub fn balance_of(&self, address: &PublicKey) -> u64 {
        self.balances.get(&address.to_hex()).copied().unwrap_or(0)
    }

    pub fn nonce_of(&self, address: &PublicKey) -> u64 {
        self.nonces.get(&address.to_hex()).copied().unwrap_or(0)
    }

    pub fn set_balance(&mut self, address: &PublicKey, balance: u64) {
        self.balances.insert(address.to_hex(), balance);
    }

    pub fn set_nonce(&mut self, address: &PublicKey, nonce: u64) {
        self.nonces.insert(address.to_hex(), nonce);
    }

    pub fn credit(&mut self, address: &PublicKey, amount: u64) {
        let balance = self.balance_of(address) + amount;
        self.set_balance(address, balance);
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
