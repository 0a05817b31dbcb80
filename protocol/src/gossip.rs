//! # Gossip
//!
//! Epidemic broadcast over the peering overlay: `broadcast(msg)` delivers
//! `msg` at least once to every node in the transitive peer graph, with
//! probabilistic completeness and no cross-message ordering guarantee.
//!
//! Every gossip message carries the SHA-256 hex digest of its canonical
//! `[kind, payload]` JSON encoding as its identifier. A local `known_messages`
//! set (keyed by identifier, each entry expiring 30s after first
//! observation) makes re-delivery a silent no-op — this is what keeps
//! "forward to every peer, unconditionally" from amplifying forever.
//!
//! One wire idiosyncrasy, preserved deliberately for interop: the envelope
//! carried over messaging's `gossip:send` kind is the *raw JSON string* of
//! the inner `[kind, payload]` array, not a nested JSON value. Re-encoding
//! would change the bytes and therefore the identifier, breaking dedup
//! against nodes that didn't re-encode.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::constants::{GOSSIP_CLEANUP_INTERVAL_SECS, GOSSIP_MESSAGE_TTL_SECS};
use crate::crypto::hash::sha256_hex;
use crate::messaging::{MessageHandler, Messaging, MessagingError};
use crate::peering::Peering;
use crate::transport::Endpoint;

/// Errors surfaced by the gossip layer.
#[derive(Debug, Error)]
pub enum GossipError {
    #[error("messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("a handler is already registered for gossip kind {0:?}")]
    DuplicateHandler(String),

    #[error("failed to encode gossip message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A decoded gossip message: `(kind, payload, raw, identifier)`. Two
/// gossip messages are equal iff their identifiers are equal.
#[derive(Debug, Clone)]
pub struct GossipMessage {
    pub kind: String,
    pub payload: Value,
    pub raw: String,
    pub identifier: String,
}

impl GossipMessage {
    /// Constructs a new gossip message, computing its canonical raw form
    /// and identifier from `kind` and `payload`.
    pub fn new(kind: impl Into<String>, payload: impl serde::Serialize) -> Result<Self, GossipError> {
        let kind = kind.into();
        let payload_value = serde_json::to_value(payload)?;
        let raw = serde_json::to_string(&(kind.clone(), payload_value.clone()))?;
        let identifier = sha256_hex(raw.as_bytes());
        Ok(Self {
            kind,
            payload: payload_value,
            raw,
            identifier,
        })
    }

    /// Parses a gossip message from its raw `[kind, payload]` JSON string
    /// form — the inner content carried by a `gossip:send` envelope.
    fn from_raw(raw: String) -> Result<Self, GossipError> {
        let (kind, payload): (String, Value) = serde_json::from_str(&raw)?;
        let identifier = sha256_hex(raw.as_bytes());
        Ok(Self {
            kind,
            payload,
            raw,
            identifier,
        })
    }
}

/// A handler invoked for every freshly-seen gossip message of its
/// registered kind.
#[async_trait]
pub trait GossipHandler: Send + Sync {
    async fn handle(&self, message: GossipMessage);
}

struct Entry {
    message: GossipMessage,
    expires_at: Instant,
}

/// The gossip engine: dedup set, handler registry, and the re-broadcast
/// loop that turns a single `broadcast()` call into epidemic delivery.
pub struct Gossip {
    messaging: Arc<Messaging>,
    peering: Arc<Peering>,
    handlers: DashMap<String, Arc<dyn GossipHandler>>,
    known: DashMap<String, Entry>,
}

impl Gossip {
    /// Builds a `Gossip` engine and registers its `gossip:send` handler on
    /// `messaging`.
    pub fn new(messaging: Arc<Messaging>, peering: Arc<Peering>) -> Result<Arc<Self>, GossipError> {
        let engine = Arc::new(Self {
            messaging: messaging.clone(),
            peering,
            handlers: DashMap::new(),
            known: DashMap::new(),
        });

        messaging.register(
            "gossip:send",
            Arc::new(GossipIngressHandler {
                engine: engine.clone(),
            }),
        )?;

        Ok(engine)
    }

    /// Registers `handler` for every gossip message of the given kind.
    /// Fails if a handler is already registered for that kind.
    pub fn register(&self, kind: impl Into<String>, handler: Arc<dyn GossipHandler>) -> Result<(), GossipError> {
        let kind = kind.into();
        match self.handlers.entry(kind.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(GossipError::DuplicateHandler(kind)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(handler);
                Ok(())
            }
        }
    }

    /// Broadcasts `message` to every current peer. Marks it known locally
    /// first, so a looped-back copy of our own broadcast is dropped
    /// rather than re-handled.
    pub async fn broadcast(&self, message: GossipMessage) {
        self.mark_known(message.clone());
        debug!(target: "node::gsp", kind = %message.kind, ident = &message.identifier[..6], "broadcasting");

        let peers = self.peering.snapshot();
        for peer in peers {
            if let Err(err) = self
                .messaging
                .send(&peer.endpoint, "gossip:send", message.raw.clone())
                .await
            {
                warn!(target: "node::err", error = %err, peer = %peer.id, "gossip send failed");
            }
        }
    }

    fn mark_known(&self, message: GossipMessage) {
        let expires_at = Instant::now() + Duration::from_secs(GOSSIP_MESSAGE_TTL_SECS);
        self.known.insert(message.identifier.clone(), Entry { message, expires_at });
    }

    fn is_known(&self, identifier: &str) -> bool {
        self.known.contains_key(identifier)
    }

    async fn handle_ingress(&self, raw: String) {
        let message = match GossipMessage::from_raw(raw) {
            Ok(m) => m,
            Err(err) => {
                warn!(target: "node::err", error = %err, "dropping malformed gossip envelope");
                return;
            }
        };

        if self.is_known(&message.identifier) {
            trace!(target: "node::gsp", ident = &message.identifier[..6], "already known, dropping");
            return;
        }

        if let Some(handler) = self.handlers.get(&message.kind).map(|h| h.clone()) {
            handler.handle(message.clone()).await;
        } else {
            warn!(target: "node::err", kind = %message.kind, "unhandled gossip message kind");
        }

        self.broadcast(message).await;
    }

    /// Starts the background cleanup loop: every `GOSSIP_CLEANUP_INTERVAL_SECS`,
    /// drop dedup entries whose TTL has elapsed.
    pub fn spawn_cleanup_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(GOSSIP_CLEANUP_INTERVAL_SECS));
            loop {
                interval.tick().await;
                engine.run_cleanup_sweep();
            }
        })
    }

    fn run_cleanup_sweep(&self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .known
            .iter()
            .filter(|entry| entry.value().expires_at <= now)
            .map(|entry| entry.key().clone())
            .collect();
        for ident in expired {
            trace!(target: "node::gsp", ident = &ident[..6], "expiring known message");
            self.known.remove(&ident);
        }
    }

    #[cfg(test)]
    fn known_count(&self) -> usize {
        self.known.len()
    }
}

struct GossipIngressHandler {
    engine: Arc<Gossip>,
}

#[async_trait]
impl MessageHandler for GossipIngressHandler {
    async fn handle(&self, payload: Value, _from: Endpoint) {
        let Some(raw) = payload.as_str() else {
            warn!(target: "node::err", "gossip:send payload is not a JSON string");
            return;
        };
        self.engine.handle_ingress(raw.to_string()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn engine() -> Arc<Gossip> {
        let transport = crate::transport::Transport::bind(0).await.unwrap();
        let messaging = Arc::new(Messaging::new(transport));
        let peering = Peering::new(messaging.clone(), 4).unwrap();
        Gossip::new(messaging, peering).unwrap()
    }

    #[test]
    fn identical_content_yields_identical_identifier() {
        let a = GossipMessage::new("bc:new_tx", "payload").unwrap();
        let b = GossipMessage::new("bc:new_tx", "payload").unwrap();
        assert_eq!(a.identifier, b.identifier);
    }

    #[test]
    fn different_payload_yields_different_identifier() {
        let a = GossipMessage::new("bc:new_tx", "payload-a").unwrap();
        let b = GossipMessage::new("bc:new_tx", "payload-b").unwrap();
        assert_ne!(a.identifier, b.identifier);
    }

    #[test]
    fn from_raw_round_trips() {
        let msg = GossipMessage::new("search:query", serde_json::json!(["q:1", "block", "abc"])).unwrap();
        let parsed = GossipMessage::from_raw(msg.raw.clone()).unwrap();
        assert_eq!(parsed.identifier, msg.identifier);
        assert_eq!(parsed.kind, msg.kind);
    }

    #[tokio::test]
    async fn duplicate_handler_registration_fails() {
        let g = engine().await;
        struct NoopHandler;
        #[async_trait]
        impl GossipHandler for NoopHandler {
            async fn handle(&self, _: GossipMessage) {}
        }
        g.register("msg", Arc::new(NoopHandler)).unwrap();
        assert!(g.register("msg", Arc::new(NoopHandler)).is_err());
    }

    #[tokio::test]
    async fn handler_invoked_at_most_once_per_identifier() {
        let g = engine().await;
        let count = Arc::new(AtomicUsize::new(0));

        struct CountingHandler {
            count: Arc<AtomicUsize>,
        }
        #[async_trait]
        impl GossipHandler for CountingHandler {
            async fn handle(&self, _: GossipMessage) {
                self.count.fetch_add(1, Ordering::SeqCst);
            }
        }
        g.register("msg", Arc::new(CountingHandler { count: count.clone() })).unwrap();

        let msg = GossipMessage::new("msg", "hello").unwrap();
        g.handle_ingress(msg.raw.clone()).await;
        g.handle_ingress(msg.raw.clone()).await;
        g.handle_ingress(msg.raw.clone()).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unhandled_kind_is_dropped_without_panic() {
        let g = engine().await;
        let msg = GossipMessage::new("mystery:kind", "x").unwrap();
        g.handle_ingress(msg.raw).await;
    }

    #[tokio::test]
    async fn broadcast_marks_message_known() {
        let g = engine().await;
        let msg = GossipMessage::new("msg", "x").unwrap();
        assert!(!g.is_known(&msg.identifier));
        g.broadcast(msg.clone()).await;
        assert!(g.is_known(&msg.identifier));
    }

    #[tokio::test]
    async fn cleanup_sweep_drops_expired_entries() {
        let g = engine().await;
        let msg = GossipMessage::new("msg", "x").unwrap();
        g.known.insert(
            msg.identifier.clone(),
            Entry {
                message: msg.clone(),
                expires_at: Instant::now() - Duration::from_secs(1),
            },
        );
        assert_eq!(g.known_count(), 1);
        g.run_cleanup_sweep();
        assert_eq!(g.known_count(), 0);
    }

    #[tokio::test]
    async fn malformed_envelope_is_dropped_not_panicked() {
        let g = engine().await;
        g.handle_ingress("not-json".to_string()).await;
        g.handle_ingress("[1,2,3]".to_string()).await;
    }

    #[tokio::test]
    async fn repeated_broadcasts_of_same_message_keep_ttl_fresh() {
        // Mirrors the `_message_timeout[ident] = time.time() + 30` rewrite
        // on every re-broadcast in the reference implementation.
        let g = engine().await;
        let msg = GossipMessage::new("msg", "x").unwrap();
        g.broadcast(msg.clone()).await;
        let first_expiry = g.known.get(&msg.identifier).unwrap().expires_at;
        tokio::time::sleep(Duration::from_millis(5)).await;
        g.broadcast(msg.clone()).await;
        let second_expiry = g.known.get(&msg.identifier).unwrap().expires_at;
        assert!(second_expiry >= first_expiry);
    }
}
