//! # Cryptographic Primitives
//!
//! This module is the foundation of everything security-related in the
//! protocol. Every signature flows through here — and that's the *only*
//! thing that flows through here.
//!
//! - **ECDSA over secp256k1** for signatures, with RFC 6979 deterministic
//!   nonces and 33-byte compressed public-key serialisation. This is the
//!   black-box signature primitive the rest of the crate depends on.
//! - **SHA-256** for hashing — block hashes, transaction hashes, gossip
//!   identifiers. One hash function, used everywhere, so two nodes never
//!   disagree about what a given byte string hashes to.
//!
//! ## A note on "rolling your own crypto"
//!
//! We don't. Everything here is a thin, type-safe wrapper around the
//! audited `k256` and `sha2` crates. If you're tempted to optimize these
//! functions, please reconsider. Then reconsider again.

pub mod hash;
pub mod keys;
pub mod signatures;

pub use hash::sha256;
pub use keys::{Keypair, PublicKey, Signature};
pub use signatures::{sign, verify, SignatureError};
