// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # meshchain — Core Protocol Library
//!
//! A peer-to-peer proof-of-work blockchain node built as a layered stack:
//! a raw datagram transport, a typed messaging envelope on top of it, a
//! liveness-checked peering overlay, epidemic gossip, a callback-driven
//! distributed search primitive, and — riding on all four — a blockchain
//! engine with a mempool, a fork manager, a reorg-capable canonicaliser,
//! and a proof-of-work miner.
//!
//! There is no consensus committee, no stake, no permissioning. Any node
//! that can grind a SHA-256 prefix of zeros gets to propose a block; the
//! heaviest valid chain wins. It is Bitcoin's core loop with the ceremony
//! stripped out.
//!
//! ## Architecture
//!
//! ```text
//! transport.rs  — UDP socket: send/receive bounded byte frames
//! messaging.rs  — [kind, payload] JSON envelope, dispatch by kind
//! peering.rs    — bounded peer table, liveness, bootstrap
//! gossip.rs     — epidemic broadcast with content-hash dedup
//! search.rs     — query/response over gossip, callback-driven
//! blockchain/   — block & transaction model, mempool, fork manager,
//!                 canonicaliser, validator, miner
//! crypto/       — ECDSA (secp256k1) keypairs, 33-byte compressed pubkeys
//! constants.rs  — every timing/size/limit parameter, in one place
//! ```
//!
//! ## Design Philosophy
//!
//! 1. Every shared structure gets exactly one lock; no structure is ever
//!    held across an `.await`.
//! 2. Transport, decode, and validation errors are absorbed locally —
//!    nothing a remote peer sends can crash this node.
//! 3. The wire format is the spec. If a byte doesn't match what a Python
//!    node on the same network would produce, it's a bug here, not there.

pub mod blockchain;
pub mod constants;
pub mod crypto;
pub mod gossip;
pub mod messaging;
pub mod peering;
pub mod search;
pub mod transport;
