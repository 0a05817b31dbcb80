//! # Peering Overlay
//!
//! Maintains a small, liveness-checked set of neighbour peers. This table
//! is the fan-out target for everything built on top of it — gossip
//! broadcasts to "all current peers", search queries ride on gossip, so
//! the peer table indirectly bounds the amplification of both.
//!
//! There is no authenticated identity here: a peer identifier is whatever
//! string the remote end claims in its `p2p:announce`. An attacker on the
//! network can impersonate any id. That's an explicit trust assumption,
//! not an oversight — see SPEC §4.3.
//!
//! The protocol is five messaging kinds: `p2p:announce`, `p2p:ask_for_peers`,
//! `p2p:peers`, `p2p:ping`, `p2p:pong`. All payloads are plain JSON, sent
//! directly over [`crate::messaging::Messaging`] — peering sits *under*
//! gossip, not on top of it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::seq::IteratorRandom;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::constants::{
    ACTIVITY_TIMEOUT_SECS, DEFAULT_PEER_LIMIT, PEER_ID_RANDOM_BYTES, PING_INTERVAL_SECS,
    TOPOLOGY_PROBE_INTERVAL_SECS,
};
use crate::messaging::{MessageHandler, Messaging, MessagingError};
use crate::transport::Endpoint;

/// Errors surfaced by the peering overlay.
#[derive(Debug, Error)]
pub enum PeeringError {
    #[error("messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("malformed peering payload: {0}")]
    MalformedPayload(String),
}

/// A peer's stable identifier: `"p2p:<16 hex chars>"`, derived from 8
/// cryptographically random bytes at node startup and stable for the
/// process's lifetime.
pub fn generate_peer_id() -> String {
    let mut bytes = vec![0u8; PEER_ID_RANDOM_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    format!("p2p:{}", hex::encode(bytes))
}

/// `(identifier, endpoint, last_seen_monotonic_time)`.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub id: String,
    pub endpoint: Endpoint,
    pub last_seen: Instant,
}

/// `(endpoint, id)` pair, the wire form exchanged in `p2p:peers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireEndpoint {
    host: String,
    port: u16,
}

impl From<&Endpoint> for WireEndpoint {
    fn from(e: &Endpoint) -> Self {
        Self {
            host: e.host.clone(),
            port: e.port,
        }
    }
}

impl From<WireEndpoint> for Endpoint {
    fn from(w: WireEndpoint) -> Self {
        Endpoint::new(w.host, w.port)
    }
}

/// The bounded, liveness-checked peer table and the five peering protocol
/// handlers registered over [`Messaging`].
///
/// Every mutation to the peer table goes through a single `parking_lot`
/// `RwLock` — the table is small and contention is low, so one lock for
/// the whole structure is the right call (never held across an `.await`).
pub struct Peering {
    messaging: Arc<Messaging>,
    my_id: String,
    peer_limit: usize,
    peers: RwLock<HashMap<String, PeerRecord>>,
}

impl Peering {
    /// Builds a `Peering` overlay and registers its five message handlers
    /// on `messaging`. Panics are not possible here — duplicate
    /// registration is a startup-time configuration error, propagated to
    /// the caller per SPEC §7.
    pub fn new(messaging: Arc<Messaging>, peer_limit: usize) -> Result<Arc<Self>, PeeringError> {
        let overlay = Arc::new(Self {
            messaging: messaging.clone(),
            my_id: generate_peer_id(),
            peer_limit,
            peers: RwLock::new(HashMap::new()),
        });

        messaging.register(
            "p2p:announce",
            Arc::new(AnnounceHandler {
                overlay: overlay.clone(),
            }),
        )?;
        messaging.register(
            "p2p:ask_for_peers",
            Arc::new(AskForPeersHandler {
                overlay: overlay.clone(),
            }),
        )?;
        messaging.register(
            "p2p:peers",
            Arc::new(PeersHandler {
                overlay: overlay.clone(),
            }),
        )?;
        messaging.register(
            "p2p:ping",
            Arc::new(PingHandler {
                overlay: overlay.clone(),
            }),
        )?;
        messaging.register(
            "p2p:pong",
            Arc::new(PongHandler {
                overlay: overlay.clone(),
            }),
        )?;

        Ok(overlay)
    }

    pub fn my_id(&self) -> &str {
        &self.my_id
    }

    /// Snapshot of the current peer table. Callers that iterate must use
    /// this rather than holding the lock across other work — handlers may
    /// mutate the table during dispatch.
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        self.peers.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.peers.read().contains_key(id)
    }

    /// Sends `p2p:announce` and `p2p:ask_for_peers` to `endpoint` —
    /// the bootstrap handshake, also re-used by the add-peer procedure
    /// when a brand new peer is learned about.
    pub async fn announce_to(&self, endpoint: &Endpoint) -> Result<(), PeeringError> {
        self.messaging.send(endpoint, "p2p:announce", self.my_id.clone()).await?;
        self.messaging.send(endpoint, "p2p:ask_for_peers", Value::Null).await?;
        Ok(())
    }

    /// The add-peer procedure (SPEC §4.3): ignore self, ignore duplicates,
    /// else insert, announce back, and evict a random victim if over
    /// capacity.
    async fn add_peer(&self, id: String, endpoint: Endpoint) {
        if id == self.my_id {
            return;
        }

        {
            let peers = self.peers.read();
            if peers.contains_key(&id) {
                return;
            }
        }

        info!(target: "node::p2p", peer = %id, endpoint = %endpoint, "new peer");
        {
            let mut peers = self.peers.write();
            peers.insert(
                id.clone(),
                PeerRecord {
                    id: id.clone(),
                    endpoint: endpoint.clone(),
                    last_seen: Instant::now(),
                },
            );

            if peers.len() > self.peer_limit {
                if let Some(victim) = peers.keys().cloned().choose(&mut rand::thread_rng()) {
                    debug!(target: "node::p2p", victim = %victim, "peer limit reached, evicting random peer");
                    peers.remove(&victim);
                }
            }
        }

        if let Err(err) = self.announce_to(&endpoint).await {
            warn!(target: "node::err", error = %err, peer = %id, "failed to announce back to new peer");
        }
    }

    /// Starts the background liveness loop: ping every `PING_INTERVAL_SECS`,
    /// evict anyone silent for `ACTIVITY_TIMEOUT_SECS`.
    pub fn spawn_liveness_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let overlay = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));
            loop {
                interval.tick().await;
                overlay.run_liveness_sweep().await;
            }
        })
    }

    async fn run_liveness_sweep(&self) {
        debug!(target: "node::p2p", "pinging peers");
        let snapshot = self.snapshot();
        for peer in &snapshot {
            if let Err(err) = self.messaging.send(&peer.endpoint, "p2p:ping", self.my_id.clone()).await {
                warn!(target: "node::err", error = %err, peer = %peer.id, "failed to ping peer");
            }
        }

        let now = Instant::now();
        let timeout = Duration::from_secs(ACTIVITY_TIMEOUT_SECS);
        let expired: Vec<String> = snapshot
            .iter()
            .filter(|p| now.duration_since(p.last_seen) > timeout)
            .map(|p| p.id.clone())
            .collect();

        if !expired.is_empty() {
            let mut peers = self.peers.write();
            for id in expired {
                info!(target: "node::p2p", peer = %id, "peer timed out");
                peers.remove(&id);
            }
        }
    }

    fn touch(&self, id: &str) {
        if let Some(record) = self.peers.write().get_mut(id) {
            record.last_seen = Instant::now();
        }
    }
}

// ---------------------------------------------------------------------------
// Message handlers
// ---------------------------------------------------------------------------

struct AnnounceHandler {
    overlay: Arc<Peering>,
}

#[async_trait]
impl MessageHandler for AnnounceHandler {
    async fn handle(&self, payload: Value, from: Endpoint) {
        let Some(id) = payload.as_str() else {
            warn!(target: "node::err", from = %from, "malformed p2p:announce payload");
            return;
        };
        debug!(target: "node::p2p", from = %from, id, "received announce");
        self.overlay.add_peer(id.to_string(), from).await;
    }
}

struct AskForPeersHandler {
    overlay: Arc<Peering>,
}

#[async_trait]
impl MessageHandler for AskForPeersHandler {
    async fn handle(&self, _payload: Value, from: Endpoint) {
        debug!(target: "node::p2p", from = %from, "sending peer table");
        let wire: Vec<(WireEndpoint, String)> = self
            .overlay
            .snapshot()
            .into_iter()
            .map(|p| (WireEndpoint::from(&p.endpoint), p.id))
            .collect();
        if let Err(err) = self.overlay.messaging.send(&from, "p2p:peers", wire).await {
            warn!(target: "node::err", error = %err, "failed to send peer list");
        }
    }
}

struct PeersHandler {
    overlay: Arc<Peering>,
}

#[async_trait]
impl MessageHandler for PeersHandler {
    async fn handle(&self, payload: Value, from: Endpoint) {
        let entries: Vec<(WireEndpoint, String)> = match serde_json::from_value(payload) {
            Ok(v) => v,
            Err(err) => {
                warn!(target: "node::err", from = %from, error = %err, "malformed p2p:peers payload");
                return;
            }
        };
        debug!(target: "node::p2p", from = %from, count = entries.len(), "received peer list");
        for (wire_endpoint, id) in entries {
            self.overlay.add_peer(id, wire_endpoint.into()).await;
        }
    }
}

struct PingHandler {
    overlay: Arc<Peering>,
}

#[async_trait]
impl MessageHandler for PingHandler {
    async fn handle(&self, _payload: Value, from: Endpoint) {
        debug!(target: "node::p2p", from = %from, "received ping");
        if let Err(err) = self
            .overlay
            .messaging
            .send(&from, "p2p:pong", self.overlay.my_id.clone())
            .await
        {
            warn!(target: "node::err", error = %err, "failed to send pong");
        }
    }
}

struct PongHandler {
    overlay: Arc<Peering>,
}

#[async_trait]
impl MessageHandler for PongHandler {
    async fn handle(&self, payload: Value, from: Endpoint) {
        let Some(id) = payload.as_str() else {
            warn!(target: "node::err", from = %from, "malformed p2p:pong payload");
            return;
        };
        debug!(target: "node::p2p", from = %from, id, "received pong");
        self.overlay.touch(id);
    }
}

// ---------------------------------------------------------------------------
// Optional network-topology probe (`--nd`)
// ---------------------------------------------------------------------------

/// Diagnostic-only adjacency tracker, enabled by the `--nd` CLI flag.
///
/// This is deliberately kept separate from [`Peering`] proper: it never
/// feeds the peer table, gossip, or blockchain state, and its absence
/// changes no protocol guarantee. It rides two messaging kinds of its
/// own (`p2pd:get_peers` / `p2pd:get_peers_resp`) so a misbehaving probe
/// can't be mistaken for peering traffic.
pub struct TopologyProbe {
    messaging: Arc<Messaging>,
    peering: Arc<Peering>,
    views: RwLock<HashMap<String, (Vec<String>, Instant)>>,
}

impl TopologyProbe {
    /// Builds a probe and registers its two message handlers on `messaging`.
    pub fn new(messaging: Arc<Messaging>, peering: Arc<Peering>) -> Result<Arc<Self>, PeeringError> {
        let probe = Arc::new(Self {
            messaging: messaging.clone(),
            peering,
            views: RwLock::new(HashMap::new()),
        });

        messaging.register(
            "p2pd:get_peers",
            Arc::new(GetPeersHandler { probe: probe.clone() }),
        )?;
        messaging.register(
            "p2pd:get_peers_resp",
            Arc::new(GetPeersRespHandler { probe: probe.clone() }),
        )?;

        Ok(probe)
    }

    /// Starts the periodic probe + adjacency-dump loop, writing to
    /// `dump_path` every sweep while the probe is alive.
    pub fn spawn(self: &Arc<Self>, dump_path: std::path::PathBuf) -> tokio::task::JoinHandle<()> {
        let probe = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(TOPOLOGY_PROBE_INTERVAL_SECS));
            loop {
                interval.tick().await;
                probe.run_sweep(&dump_path).await;
            }
        })
    }

    async fn run_sweep(&self, dump_path: &std::path::Path) {
        for peer in self.peering.snapshot() {
            if let Err(err) = self.messaging.send(&peer.endpoint, "p2pd:get_peers", Value::Null).await {
                warn!(target: "node::err", error = %err, peer = %peer.id, "topology probe request failed");
            }
        }

        let now = Instant::now();
        let timeout = Duration::from_secs(ACTIVITY_TIMEOUT_SECS);
        let expired: Vec<String> = self
            .views
            .read()
            .iter()
            .filter(|(_, (_, seen))| now.duration_since(*seen) > timeout)
            .map(|(id, _)| id.clone())
            .collect();
        if !expired.is_empty() {
            let mut views = self.views.write();
            for id in expired {
                debug!(target: "node::p2d", peer = %id, "topology probe view expired");
                views.remove(&id);
            }
        }

        if let Err(err) = self.write_dump(dump_path) {
            warn!(target: "node::err", error = %err, "failed to write topology dump");
        }
    }

    fn record_response(&self, id: String, adjacency: Vec<String>) {
        self.views.write().insert(id, (adjacency, Instant::now()));
    }

    fn write_dump(&self, dump_path: &std::path::Path) -> std::io::Result<()> {
        let mut out = String::new();
        out.push_str(&format!("{}:\n", self.peering.my_id()));
        for (id, (adjacency, _)) in self.views.read().iter() {
            out.push_str(&format!("{id}: {}\n", adjacency.join(", ")));
        }
        std::fs::write(dump_path, out)
    }
}

struct GetPeersHandler {
    probe: Arc<TopologyProbe>,
}

#[async_trait]
impl MessageHandler for GetPeersHandler {
    async fn handle(&self, _payload: Value, from: Endpoint) {
        let adjacency: Vec<String> = self.probe.peering.snapshot().into_iter().map(|p| p.id).collect();
        if let Err(err) = self
            .probe
            .messaging
            .send(&from, "p2pd:get_peers_resp", adjacency)
            .await
        {
            warn!(target: "node::err", error = %err, from = %from, "failed to answer topology probe");
        }
    }
}

struct GetPeersRespHandler {
    probe: Arc<TopologyProbe>,
}

#[async_trait]
impl MessageHandler for GetPeersRespHandler {
    async fn handle(&self, payload: Value, from: Endpoint) {
        let adjacency: Vec<String> = match serde_json::from_value(payload) {
            Ok(v) => v,
            Err(err) => {
                warn!(target: "node::err", from = %from, error = %err, "malformed p2pd:get_peers_resp payload");
                return;
            }
        };
        let Some(id) = self
            .probe
            .peering
            .snapshot()
            .into_iter()
            .find(|p| p.endpoint == from)
            .map(|p| p.id)
        else {
            debug!(target: "node::p2d", from = %from, "topology probe response from unknown peer, dropping");
            return;
        };
        self.probe.record_response(id, adjacency);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;

    async fn overlay(limit: usize) -> Arc<Peering> {
        let transport = Transport::bind(0).await.unwrap();
        let messaging = Arc::new(Messaging::new(transport));
        Peering::new(messaging, limit).unwrap()
    }

    #[test]
    fn peer_id_has_expected_shape() {
        let id = generate_peer_id();
        assert!(id.starts_with("p2p:"));
        assert_eq!(id.len(), "p2p:".len() + PEER_ID_RANDOM_BYTES * 2);
    }

    #[test]
    fn peer_ids_are_unique() {
        assert_ne!(generate_peer_id(), generate_peer_id());
    }

    #[tokio::test]
    async fn starts_with_empty_peer_table() {
        let o = overlay(DEFAULT_PEER_LIMIT).await;
        assert_eq!(o.len(), 0);
        assert!(o.is_empty());
    }

    #[tokio::test]
    async fn add_peer_ignores_self() {
        let o = overlay(4).await;
        let my_id = o.my_id().to_string();
        o.add_peer(my_id, Endpoint::new("127.0.0.1", 1)).await;
        assert_eq!(o.len(), 0);
    }

    #[tokio::test]
    async fn add_peer_ignores_duplicate_id() {
        let o = overlay(4).await;
        o.add_peer("p2p:aaaa".into(), Endpoint::new("127.0.0.1", 1)).await;
        o.add_peer("p2p:aaaa".into(), Endpoint::new("127.0.0.1", 2)).await;
        assert_eq!(o.len(), 1);
        // First endpoint wins; re-announcement does not move it.
        assert_eq!(o.snapshot()[0].endpoint.port, 1);
    }

    #[tokio::test]
    async fn peer_table_never_exceeds_limit() {
        let o = overlay(3).await;
        for i in 0..20 {
            o.add_peer(format!("p2p:{i:04}"), Endpoint::new("127.0.0.1", i as u16)).await;
            assert!(o.len() <= 3);
        }
    }

    #[tokio::test]
    async fn touch_updates_last_seen() {
        let o = overlay(4).await;
        o.add_peer("p2p:bbbb".into(), Endpoint::new("127.0.0.1", 1)).await;
        let before = o.snapshot()[0].last_seen;
        tokio::time::sleep(Duration::from_millis(5)).await;
        o.touch("p2p:bbbb");
        let after = o.snapshot()[0].last_seen;
        assert!(after > before);
    }

    #[tokio::test]
    async fn liveness_sweep_evicts_silent_peers() {
        let o = overlay(4).await;
        o.add_peer("p2p:cccc".into(), Endpoint::new("127.0.0.1", 1)).await;
        {
            let mut peers = o.peers.write();
            let record = peers.get_mut("p2p:cccc").unwrap();
            record.last_seen = Instant::now() - Duration::from_secs(ACTIVITY_TIMEOUT_SECS + 1);
        }
        o.run_liveness_sweep().await;
        assert_eq!(o.len(), 0);
    }

    #[tokio::test]
    async fn topology_probe_answers_get_peers_with_current_adjacency() {
        let transport_a = Transport::bind(0).await.unwrap();
        let port_a = transport_a.local_addr().unwrap().port();
        let messaging_a = Arc::new(Messaging::new(transport_a));
        let peering_a = Peering::new(messaging_a.clone(), 4).unwrap();
        let probe_a = TopologyProbe::new(messaging_a.clone(), peering_a.clone()).unwrap();

        let transport_b = Transport::bind(0).await.unwrap();
        let messaging_b = Arc::new(Messaging::new(transport_b));
        let peering_b = Peering::new(messaging_b.clone(), 4).unwrap();
        let probe_b = TopologyProbe::new(messaging_b.clone(), peering_b.clone()).unwrap();

        tokio::spawn(messaging_a.clone().run());
        tokio::spawn(messaging_b.clone().run());

        peering_b
            .announce_to(&Endpoint::new("127.0.0.1", port_a))
            .await
            .unwrap();

        for _ in 0..50 {
            if peering_a.len() >= 1 && peering_b.len() >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(peering_a.len() >= 1 && peering_b.len() >= 1);

        probe_b.run_sweep(std::path::Path::new("/dev/null")).await;

        for _ in 0..50 {
            if !probe_b.views.read().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let views = probe_b.views.read();
        assert_eq!(views.len(), 1);
        let (adjacency, _) = views.values().next().unwrap();
        assert_eq!(adjacency, &vec![peering_b.my_id().to_string()]);
    }

    #[tokio::test]
    async fn topology_probe_view_expires_without_response() {
        let o = overlay(4).await;
        let transport = Transport::bind(0).await.unwrap();
        let messaging = Arc::new(Messaging::new(transport));
        let probe = TopologyProbe::new(messaging, o.clone()).unwrap();
        probe
            .views
            .write()
            .insert("p2p:stale".into(), (vec![], Instant::now() - Duration::from_secs(ACTIVITY_TIMEOUT_SECS + 1)));
        probe.run_sweep(std::path::Path::new("/dev/null")).await;
        assert!(probe.views.read().is_empty());
    }
}
