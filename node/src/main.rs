// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # meshchain node
//!
//! Entry point for the `meshchain-node` binary. Parses CLI arguments,
//! initializes logging, and dispatches to one of five subcommands, each
//! standing up successively more of the protocol stack:
//!
//! - `messaging`  — raw UDP transport, send/print only
//! - `peering`    — + the bounded peer overlay
//! - `gossip`     — + epidemic broadcast
//! - `search`     — + distributed search, with a toy item store
//! - `blockchain` — the full engine: mempool, fork manager, canonicaliser,
//!   miner, and an interactive REPL

mod cli;
mod logging;

use std::io::{BufRead, Write as _};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;

use meshchain_protocol::blockchain::{
    load_or_generate_coinbase, BlockProducer, ChainCanonicaliser, ForkManager, Mempool, Store,
    Transaction,
};
use meshchain_protocol::constants::DEFAULT_PEER_LIMIT;
use meshchain_protocol::crypto::{Keypair, PublicKey};
use meshchain_protocol::gossip::{Gossip, GossipHandler, GossipMessage};
use meshchain_protocol::messaging::Messaging;
use meshchain_protocol::peering::{Peering, TopologyProbe};
use meshchain_protocol::search::{Search, Searcher};
use meshchain_protocol::transport::{Endpoint, Transport};

use cli::{BlockchainArgs, Commands, GossipArgs, MeshNodeCli, MessagingArgs, PeeringArgs, SearchArgs};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = MeshNodeCli::parse();
    logging::init_logging(&cli.log);

    match cli.command {
        Commands::Messaging(args) => run_messaging(args).await,
        Commands::Peering(args) => run_peering(args).await,
        Commands::Gossip(args) => run_gossip(args).await,
        Commands::Search(args) => run_search(args).await,
        Commands::Blockchain(args) => run_blockchain(args).await,
    }
}

/// Reads one line from stdin on a blocking thread so it never stalls the
/// async runtime's other tasks.
async fn read_line(prompt: &str) -> Result<String> {
    print!("{prompt}");
    std::io::stdout().flush().ok();
    tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        Ok::<_, std::io::Error>(line.trim().to_string())
    })
    .await
    .context("stdin reader task panicked")?
    .context("failed to read from stdin")
}

/// Stands up the diagnostic-only network-topology probe for `--nd`: it
/// tracks peer-of-peer adjacency and writes a human-readable dump, but
/// never feeds the peer table, gossip, or blockchain state.
fn spawn_topology_probe(messaging: Arc<Messaging>, peering: Arc<Peering>) -> Result<()> {
    let probe = TopologyProbe::new(messaging, peering).context("failed to start topology probe")?;
    probe.spawn(std::path::PathBuf::from("topology.txt"));
    tracing::info!(target: "node::p2d", "topology probe enabled, writing topology.txt");
    Ok(())
}

async fn bootstrap_peers(peering: &Arc<Peering>, peers: &[String]) -> Result<()> {
    for peer in peers {
        let endpoint = Endpoint::parse(peer).with_context(|| format!("invalid peer address {peer:?}"))?;
        peering.announce_to(&endpoint).await.context("failed to announce to peer")?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// messaging — raw transport only
// ---------------------------------------------------------------------------

async fn run_messaging(args: MessagingArgs) -> Result<()> {
    let peer = Endpoint::parse(&args.peer).context("invalid --peer address")?;
    let transport = Transport::bind(args.port).await.context("failed to bind UDP socket")?;
    tracing::info!(target: "node::udp", port = args.port, "listening");

    let receiver = transport.clone();
    tokio::spawn(async move {
        loop {
            if let Err(err) = transport_recv_and_print(&receiver).await {
                tracing::warn!(target: "node::err", error = %err, "receive failed");
            }
        }
    });

    loop {
        let line = read_line("Enter message: ").await?;
        if let Err(err) = transport.send(&peer, line.as_bytes()).await {
            tracing::warn!(target: "node::err", error = %err, "send failed");
        }
    }
}

async fn transport_recv_and_print(transport: &Transport) -> Result<()> {
    let datagram = transport.recv().await?;
    println!("{}: {}", datagram.from, String::from_utf8_lossy(&datagram.bytes));
    Ok(())
}

// ---------------------------------------------------------------------------
// peering — + bounded peer overlay
// ---------------------------------------------------------------------------

struct HelloHandler;

#[async_trait::async_trait]
impl meshchain_protocol::messaging::MessageHandler for HelloHandler {
    async fn handle(&self, payload: Value, from: Endpoint) {
        tracing::info!(target: "node::log", %from, %payload, "hello");
    }
}

async fn run_peering(args: PeeringArgs) -> Result<()> {
    let transport = Transport::bind(args.peers.port).await.context("failed to bind UDP socket")?;
    let messaging = Arc::new(Messaging::new(transport));
    messaging.register("hello", Arc::new(HelloHandler)).context("duplicate handler registration")?;

    let peering = Peering::new(messaging.clone(), DEFAULT_PEER_LIMIT).context("failed to start peering overlay")?;
    tokio::spawn(messaging.clone().run());
    peering.spawn_liveness_loop();

    bootstrap_peers(&peering, &args.peers.peer).await?;
    tracing::info!(target: "node::p2p", id = peering.my_id(), "peering overlay up");

    loop {
        let line = read_line("Enter message: ").await?;
        for record in peering.snapshot() {
            if let Err(err) = messaging.send(&record.endpoint, "hello", line.clone()).await {
                tracing::warn!(target: "node::err", error = %err, peer = %record.id, "failed to send");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// gossip — + epidemic broadcast
// ---------------------------------------------------------------------------

struct PrintGossipHandler;

#[async_trait::async_trait]
impl GossipHandler for PrintGossipHandler {
    async fn handle(&self, message: GossipMessage) {
        tracing::info!(target: "node::gsp", kind = %message.kind, payload = %message.payload, "message");
    }
}

async fn run_gossip(args: GossipArgs) -> Result<()> {
    let transport = Transport::bind(args.peers.port).await.context("failed to bind UDP socket")?;
    let messaging = Arc::new(Messaging::new(transport));
    let peering = Peering::new(messaging.clone(), DEFAULT_PEER_LIMIT).context("failed to start peering overlay")?;
    let gossip = Gossip::new(messaging.clone(), peering.clone()).context("failed to start gossip")?;
    gossip.register("msg", Arc::new(PrintGossipHandler)).context("duplicate gossip handler registration")?;

    tokio::spawn(messaging.clone().run());
    peering.spawn_liveness_loop();
    gossip.spawn_cleanup_loop();
    if args.nd {
        spawn_topology_probe(messaging.clone(), peering.clone())?;
    }

    bootstrap_peers(&peering, &args.peers.peer).await?;
    tracing::info!(target: "node::gsp", id = peering.my_id(), "gossip overlay up, waiting for ctrl-c");

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// search — + distributed search with a toy item store
// ---------------------------------------------------------------------------

struct ItemSearcher {
    items: Arc<parking_lot::RwLock<std::collections::HashMap<String, String>>>,
}

#[async_trait::async_trait]
impl Searcher for ItemSearcher {
    async fn search(&self, query: Value) -> Option<Value> {
        let query = query.as_str()?;
        self.items.read().get(query).cloned().map(Value::String)
    }
}

async fn run_search(args: SearchArgs) -> Result<()> {
    let transport = Transport::bind(args.peers.port).await.context("failed to bind UDP socket")?;
    let messaging = Arc::new(Messaging::new(transport));
    let peering = Peering::new(messaging.clone(), DEFAULT_PEER_LIMIT).context("failed to start peering overlay")?;
    let gossip = Gossip::new(messaging.clone(), peering.clone()).context("failed to start gossip")?;
    let search = Search::new(gossip.clone()).context("failed to start search")?;

    let items = Arc::new(parking_lot::RwLock::new(std::collections::HashMap::new()));
    search
        .register("item", Arc::new(ItemSearcher { items: items.clone() }))
        .context("duplicate searcher registration")?;

    tokio::spawn(messaging.clone().run());
    peering.spawn_liveness_loop();
    gossip.spawn_cleanup_loop();
    search.spawn_cleanup_loop();
    if args.nd {
        spawn_topology_probe(messaging.clone(), peering.clone())?;
    }

    bootstrap_peers(&peering, &args.peers.peer).await?;

    loop {
        let action = read_line("[s]earch, [p]rovide, [q]uit: ").await?;
        match action.as_str() {
            "s" => {
                let query = read_line("Enter query: ").await?;
                let handler = Arc::new(move |result: Option<Value>| -> bool {
                    match &result {
                        Some(value) => println!("Received result for {query:?}: {value}"),
                        None => println!("Search for {query:?} timed out"),
                    }
                    result.is_some()
                });
                search.search_for("item", Value::String(query), handler).await;
            }
            "p" => {
                let item = read_line("Enter item: ").await?;
                let value = read_line("Enter value: ").await?;
                items.write().insert(item, value);
            }
            "q" => break,
            _ => println!("Invalid action. Try again."),
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// blockchain — the full engine
// ---------------------------------------------------------------------------

async fn run_blockchain(args: BlockchainArgs) -> Result<()> {
    let transport = Transport::bind(args.peers.port).await.context("failed to bind UDP socket")?;
    let messaging = Arc::new(Messaging::new(transport));
    let peering = Peering::new(messaging.clone(), DEFAULT_PEER_LIMIT).context("failed to start peering overlay")?;
    let gossip = Gossip::new(messaging.clone(), peering.clone()).context("failed to start gossip")?;
    let search = Search::new(gossip.clone()).context("failed to start search")?;

    let store = Arc::new(Store::open(&args.state_dir).context("failed to open persistent store")?);
    let fork = ForkManager::new(gossip.clone(), search.clone(), store.clone()).context("failed to start fork manager")?;
    let canonical = ChainCanonicaliser::new(store.clone(), fork.clone()).context("failed to bootstrap chain")?;
    let mempool = Mempool::new(gossip.clone()).context("failed to start mempool")?;

    let coinbase_key = load_or_generate_coinbase(&store).context("failed to load coinbase key")?;
    let my_address = coinbase_key.public_key();

    let producer = BlockProducer::new(my_address.clone(), mempool.clone(), fork.clone(), canonical.clone(), gossip.clone());

    tokio::spawn(messaging.clone().run());
    peering.spawn_liveness_loop();
    gossip.spawn_cleanup_loop();
    search.spawn_cleanup_loop();
    mempool.spawn_cleanup_loop();
    producer.spawn();
    if args.nd {
        spawn_topology_probe(messaging.clone(), peering.clone())?;
    }

    bootstrap_peers(&peering, &args.peers.peer).await?;
    tracing::info!(target: "node::blc", address = %my_address.to_hex(), "node up, mining");

    if args.ds {
        let canonical = canonical.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(
                meshchain_protocol::constants::STATE_DUMP_INTERVAL_SECS,
            ));
            loop {
                interval.tick().await;
                if let Err(err) = dump_state(&canonical) {
                    tracing::warn!(target: "node::err", error = %err, "state dump failed");
                }
            }
        });
    }

    loop {
        let action = read_line("[s]end, [b]alance, [n]once, [l]atest, [q]uit: ").await?;
        match action.as_str() {
            "s" => {
                if let Err(err) = handle_send(&mempool, &canonical, &coinbase_key).await {
                    println!("send failed: {err}");
                }
            }
            "b" => {
                let address = resolve_address(&my_address).await?;
                match canonical.get_latest_state() {
                    Ok(state) => println!("{}", state.balance_of(&address)),
                    Err(err) => println!("failed to read state: {err}"),
                }
            }
            "n" => {
                let address = resolve_address(&my_address).await?;
                match canonical.get_latest_state() {
                    Ok(state) => println!("{}", state.nonce_of(&address)),
                    Err(err) => println!("failed to read state: {err}"),
                }
            }
            "l" => print_latest(&canonical),
            "q" => break,
            _ => println!("Invalid action. Try again."),
        }
    }
    Ok(())
}

async fn resolve_address(my_address: &PublicKey) -> Result<PublicKey> {
    let raw = read_line("Enter address: ").await?;
    if raw.is_empty() {
        return Ok(my_address.clone());
    }
    PublicKey::from_hex(&raw).context("invalid address")
}

async fn handle_send(mempool: &Arc<Mempool>, canonical: &Arc<ChainCanonicaliser>, key: &Keypair) -> Result<()> {
    let receiver_hex = read_line("Enter recipient: ").await?;
    let receiver = PublicKey::from_hex(&receiver_hex).context("invalid recipient address")?;
    let amount_str = read_line("Enter amount: ").await?;
    let amount: u64 = amount_str.parse().context("invalid amount")?;

    let nonce = canonical.get_latest_state()?.nonce_of(&key.public_key());
    let tx = Transaction::new_signed(key, receiver, nonce, amount);
    mempool.announce_transaction(tx).await.context("failed to submit transaction")?;
    Ok(())
}

fn print_latest(canonical: &Arc<ChainCanonicaliser>) {
    let state = match canonical.get_latest_state() {
        Ok(state) => state,
        Err(err) => {
            println!("failed to read state: {err}");
            return;
        }
    };
    println!("Latest state:");
    println!("  Block number: {}", state.block_number);
    println!("  Block hash: {}", state.block_hash);
    println!("  Accounts:");
    for (address, balance) in &state.balances {
        let nonce = state.nonces.get(address).copied().unwrap_or(0);
        println!("    {address} {balance} {nonce}");
    }
    println!();
}

fn dump_state(canonical: &Arc<ChainCanonicaliser>) -> Result<()> {
    let blocks: Vec<String> = canonical.iter_blocks()?.iter().map(|b| b.serialize()).collect();
    let latest_state = canonical.get_latest_state()?.to_json()?;
    let dump = serde_json::json!({ "blocks": blocks, "latest_state": latest_state });
    std::fs::write("state.json", serde_json::to_string_pretty(&dump)?)?;
    Ok(())
}
