//! # Validator
//!
//! Pure state-transition logic: applying a block (and the transactions
//! within it) to a [`State`], and building a new candidate block out of
//! a state and a mempool. Nothing here touches the network, gossip, or
//! persistence — every function takes its inputs as arguments and
//! returns a new state or an error.

use thiserror::Error;

use super::block::Block;
use super::mempool::Mempool;
use super::state::State;
use super::transaction::Transaction;
use crate::constants::{BLOCK_REWARD, MAX_TRANSACTIONS_PER_BLOCK};
use crate::crypto::PublicKey;

/// Errors from applying a block or transaction to a state. Every variant
/// here means "reject silently" at the caller, never "crash".
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("block number {block} does not follow state height {state}")]
    WrongHeight { block: u64, state: u64 },

    #[error("block parent hash does not match state's block hash")]
    WrongParent,

    #[error("block does not meet difficulty")]
    InsufficientDifficulty,

    #[error("transaction signature does not verify")]
    BadSignature,

    #[error("transaction nonce {tx_nonce} does not match expected nonce {expected}")]
    BadNonce { tx_nonce: u64, expected: u64 },

    #[error("sender balance {balance} is less than transaction amount {amount}")]
    InsufficientBalance { balance: u64, amount: u64 },
}

/// Applies `tx` to `state` in place. On any rejection, `state` is left
/// untouched — there is no partial application of a rejected transaction.
pub fn apply_transaction(tx: &Transaction, state: &mut State) -> Result<(), ValidationError> {
    if !tx.validate_signature() {
        return Err(ValidationError::BadSignature);
    }

    let expected_nonce = state.nonce_of(&tx.sender);
    if tx.nonce != expected_nonce {
        return Err(ValidationError::BadNonce {
            tx_nonce: tx.nonce,
            expected: expected_nonce,
        });
    }

    let balance = state.balance_of(&tx.sender);
    if balance < tx.amount {
        return Err(ValidationError::InsufficientBalance {
            balance,
            amount: tx.amount,
        });
    }

    state.set_balance(&tx.sender, balance - tx.amount);
    state.credit(&tx.receiver, tx.amount);
    state.set_nonce(&tx.sender, expected_nonce + 1);
    Ok(())
}

/// Applies `block` to `state` in place: checks height, parentage, and
/// difficulty, applies every transaction in order (aborting the whole
/// block on the first rejected transaction), then credits the coinbase
/// reward and advances the state pointer.
pub fn apply_block(block: &Block, state: &mut State) -> Result<(), ValidationError> {
    if block.number != state.block_number + 1 {
        return Err(ValidationError::WrongHeight {
            block: block.number,
            state: state.block_number,
        });
    }
    if hex::encode(block.parent_hash) != state.block_hash {
        return Err(ValidationError::WrongParent);
    }
    if !block.meets_difficulty() {
        return Err(ValidationError::InsufficientDifficulty);
    }

    let mut scratch = state.clone();
    for tx in &block.transactions {
        apply_transaction(tx, &mut scratch)?;
    }

    scratch.credit(&block.coinbase, BLOCK_REWARD);
    scratch.block_number = block.number;
    scratch.block_hash = block.hash_hex();

    *state = scratch;
    Ok(())
}

/// Builds an unmined candidate block atop `state`, filling it from
/// `mempool` in FIFO order. Transactions that fail a speculative apply
/// are evicted from the mempool rather than included. Stops after
/// `MAX_TRANSACTIONS_PER_BLOCK`.
pub fn build_block(state: &State, coinbase: PublicKey, mempool: &Mempool) -> Block {
    let mut scratch = state.clone();
    let mut transactions = Vec::new();

    for tx in mempool.get_transactions() {
        if transactions.len() >= MAX_TRANSACTIONS_PER_BLOCK {
            break;
        }
        match apply_transaction(&tx, &mut scratch) {
            Ok(()) => transactions.push(tx),
            Err(_) => mempool.evict_transaction(&tx),
        }
    }

    let parent_hash_bytes = hex::decode(&state.block_hash).unwrap_or_else(|_| vec![0u8; 32]);
    let mut parent_hash = [0u8; 32];
    let len = parent_hash_bytes.len().min(32);
    parent_hash[..len].copy_from_slice(&parent_hash_bytes[..len]);

    Block {
        number: state.block_number + 1,
        pow_nonce: 0,
        parent_hash,
        coinbase,
        transactions,
    }
}
