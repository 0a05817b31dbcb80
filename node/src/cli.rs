//! # CLI Interface
//!
//! Defines the command-line argument structure for `meshchain-node` using
//! `clap` derive. Mirrors the five subcommands of the reference client one
//! for one: `messaging`, `peering`, `gossip`, `search`, and `blockchain`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Peer-to-peer proof-of-work blockchain node.
#[derive(Parser, Debug)]
#[command(
    name = "meshchain-node",
    about = "Peer-to-peer proof-of-work blockchain node",
    version,
    propagate_version = true
)]
pub struct MeshNodeCli {
    /// Comma-separated logging categories to enable at trace level
    /// (`err`, `log`, `udp`, `msg`, `p2p`, `gsp`, `sch`, `blc`, `p2d`, or
    /// `all`). Everything else stays at `warn`.
    #[arg(long = "log", short = 'L', default_value = "", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Bind a raw UDP socket and send typed lines to a single peer.
    Messaging(MessagingArgs),
    /// Join the peering overlay and broadcast lines to every known peer.
    Peering(PeeringArgs),
    /// Join gossip and print every `msg`-kind message received.
    Gossip(GossipArgs),
    /// Join the distributed search layer with a toy in-memory item store.
    Search(SearchArgs),
    /// Run a full blockchain node: mempool, fork manager, canonicaliser,
    /// and miner, with an interactive REPL on stdin.
    Blockchain(BlockchainArgs),
}

/// Shared peer-bootstrap arguments every subcommand but `messaging` takes
/// the same way.
#[derive(Parser, Debug)]
pub struct PeerArgs {
    /// UDP port to listen on.
    #[arg(long, short = 'p', default_value_t = meshchain_protocol::constants::DEFAULT_PORT)]
    pub port: u16,

    /// An initial peer to bootstrap from, `host:port`. May be repeated.
    #[arg(long = "peer", short = 'P')]
    pub peer: Vec<String>,
}

#[derive(Parser, Debug)]
pub struct MessagingArgs {
    #[arg(long, short = 'p', default_value_t = meshchain_protocol::constants::DEFAULT_PORT)]
    pub port: u16,

    /// The peer to send typed lines to, `host:port`.
    #[arg(long = "peer", short = 'P', required = true)]
    pub peer: String,
}

#[derive(Parser, Debug)]
pub struct PeeringArgs {
    #[command(flatten)]
    pub peers: PeerArgs,
}

#[derive(Parser, Debug)]
pub struct GossipArgs {
    #[command(flatten)]
    pub peers: PeerArgs,

    /// Enable the periodic topology-discovery probe.
    #[arg(long)]
    pub nd: bool,
}

#[derive(Parser, Debug)]
pub struct SearchArgs {
    #[command(flatten)]
    pub peers: PeerArgs,

    #[arg(long)]
    pub nd: bool,
}

#[derive(Parser, Debug)]
pub struct BlockchainArgs {
    #[command(flatten)]
    pub peers: PeerArgs,

    #[arg(long)]
    pub nd: bool,

    /// Periodically dump the canonical chain and latest state to
    /// `state.json` in the current directory.
    #[arg(long)]
    pub ds: bool,

    /// Directory backing the node's persistent store.
    #[arg(long = "state-dir", default_value = ".stor")]
    pub state_dir: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        MeshNodeCli::command().debug_assert();
    }
}
