//! # Block
//!
//! A flat, header-less block: number, proof-of-work nonce, parent hash,
//! coinbase address, and an ordered transaction list. There is no Merkle
//! root — transactions are hashed as part of the block's own serialised
//! form, so any change to any transaction changes the block hash
//! directly.
//!
//! Serialised form: `"{number}:{pow_nonce}:{parent_hash_hex}:{coinbase_hex}[:{tx0}[:{tx1}…]]"`.
//! The block hash is the SHA-256 of that ASCII string, and a block "meets
//! difficulty `D`" iff its hex-encoded hash begins with `D` ASCII `'0'`
//! characters.

use thiserror::Error;

use super::transaction::{Transaction, TransactionError};
use crate::constants::DIFFICULTY_PREFIX_LEN;
use crate::crypto::hash::{meets_difficulty, sha256_hex};
use crate::crypto::keys::KeyError;
use crate::crypto::PublicKey;

/// Errors from block construction, (de)serialisation, and mining.
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("malformed block wire form: missing number/nonce/parent/coinbase fields")]
    MalformedWireForm,

    #[error("invalid integer in block field {field}: {source}")]
    InvalidInteger {
        field: &'static str,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error("invalid hex in block field {field}: {source}")]
    InvalidHex {
        field: &'static str,
        #[source]
        source: hex::FromHexError,
    },

    #[error("invalid coinbase public key: {0}")]
    InvalidCoinbase(#[from] KeyError),

    #[error("invalid transaction in block: {0}")]
    InvalidTransaction(#[from] TransactionError),
}

/// A candidate or confirmed block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub number: u64,
    pub pow_nonce: u64,
    pub parent_hash: [u8; 32],
    pub coinbase: PublicKey,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// The zero-height genesis block: zero parent hash, zero-padded
    /// coinbase, no transactions.
    pub fn genesis() -> Self {
        Self {
            number: 0,
            pow_nonce: 0,
            parent_hash: [0u8; 32],
            coinbase: PublicKey::zero(),
            transactions: Vec::new(),
        }
    }

    /// The colon-joined ASCII serialisation this block's hash is computed
    /// over.
    pub fn serialize(&self) -> String {
        let mut data = format!(
            "{}:{}:{}:{}",
            self.number,
            self.pow_nonce,
            hex::encode(self.parent_hash),
            self.coinbase.to_hex()
        );
        for tx in &self.transactions {
            data.push(':');
            data.push_str(&tx.serialize());
        }
        data
    }

    /// Parses the wire form produced by [`Block::serialize`].
    pub fn deserialize(data: &str) -> Result<Self, BlockError> {
        let mut parts = data.split(':');
        let number = parts
            .next()
            .ok_or(BlockError::MalformedWireForm)?
            .parse()
            .map_err(|source| BlockError::InvalidInteger { field: "number", source })?;
        let pow_nonce = parts
            .next()
            .ok_or(BlockError::MalformedWireForm)?
            .parse()
            .map_err(|source| BlockError::InvalidInteger { field: "pow_nonce", source })?;
        let parent_hash_hex = parts.next().ok_or(BlockError::MalformedWireForm)?;
        let parent_bytes = hex::decode(parent_hash_hex).map_err(|source| BlockError::InvalidHex {
            field: "parent_hash",
            source,
        })?;
        if parent_bytes.len() != 32 {
            return Err(BlockError::InvalidHex {
                field: "parent_hash",
                source: hex::FromHexError::InvalidStringLength,
            });
        }
        let mut parent_hash = [0u8; 32];
        parent_hash.copy_from_slice(&parent_bytes);

        let coinbase_hex = parts.next().ok_or(BlockError::MalformedWireForm)?;
        let coinbase = PublicKey::from_hex(coinbase_hex)?;

        let transactions = parts
            .map(Transaction::deserialize)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            number,
            pow_nonce,
            parent_hash,
            coinbase,
            transactions,
        })
    }

    /// SHA-256 of [`Block::serialize`], as a 32-byte array.
    pub fn hash(&self) -> [u8; 32] {
        crate::crypto::hash::sha256_array(self.serialize().as_bytes())
    }

    /// Lowercase hex digest of [`Block::hash`] — the form used in the
    /// `block/<hash_hex>` and `blocknum/<N>` persistent keys.
    pub fn hash_hex(&self) -> String {
        sha256_hex(self.serialize().as_bytes())
    }

    /// Whether this block's hash begins with [`DIFFICULTY_PREFIX_LEN`]
    /// ASCII `'0'` hex characters.
    pub fn meets_difficulty(&self) -> bool {
        meets_difficulty(&self.hash_hex(), DIFFICULTY_PREFIX_LEN)
    }

    /// Grinds `pow_nonce` upward until the block meets difficulty.
    /// Returns the winning hash. Intended to be interrupted externally
    /// (e.g. the producer checking whether the tip changed) rather than
    /// run to completion in latency-sensitive contexts.
    pub fn mine(&mut self) -> [u8; 32] {
        loop {
            let hash = self.hash();
            if meets_difficulty(&hex::encode(hash), DIFFICULTY_PREFIX_LEN) {
                return hash;
            }
            self.pow_nonce += 1;
        }
    }
}
