//! # Blockchain Engine
//!
//! Everything above gossip and search: the block/transaction data model,
//! the mempool, the fork manager, the chain canonicaliser, the state
//! transition validator, and the proof-of-work block producer.
//!
//! Layering within this module mirrors the dependency order: `block`
//! and `transaction` are pure data; `state` is their deterministic
//! reduction; `store` is the persistence primitive everything else is
//! built on; `mempool`, `fork`, and `canonical` each own one piece of
//! shared state; `validator` is pure logic with no state of its own;
//! `producer` drives the whole stack from a single background loop.

pub mod block;
pub mod canonical;
pub mod fork;
pub mod mempool;
pub mod producer;
pub mod state;
pub mod store;
pub mod transaction;
pub mod validator;

pub use block::{Block, BlockError};
pub use canonical::{CanonicalError, ChainCanonicaliser};
pub use fork::{ForkError, ForkManager};
pub use mempool::{Mempool, MempoolError};
pub use producer::{load_or_generate_coinbase, BlockProducer, ProducerError};
pub use state::State;
pub use store::{Store, StoreError};
pub use transaction::{Transaction, TransactionError};
pub use validator::ValidationError;
