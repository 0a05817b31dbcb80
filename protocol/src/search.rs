//! # Distributed Search
//!
//! An asynchronous find-anywhere primitive layered on gossip. A node calls
//! [`Search::search_for`] with a kind and a query; any peer with a
//! registered searcher for that kind may answer over gossip's
//! `search:response` kind. Multiple answers are possible — the handler
//! decides when it's satisfied.
//!
//! This is deliberately callback-based, not a single-shot future: the
//! reference implementation expects multiple responders, and a future
//! that resolves once would either drop every answer after the first or
//! require a fundamentally different API. The callback contract is:
//! return `true` from the handler to stop listening, `false` to keep the
//! pending entry alive for further responses, and a `None` result means
//! "timed out, no more responses coming."

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use rand::RngCore;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::constants::{QUERY_ID_RANDOM_BYTES, SEARCH_CLEANUP_INTERVAL_SECS, SEARCH_TIMEOUT_SECS};
use crate::gossip::{Gossip, GossipError, GossipHandler, GossipMessage};

/// Errors surfaced by the search layer.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("gossip error: {0}")]
    Gossip(#[from] GossipError),

    #[error("a searcher is already registered for kind {0:?}")]
    DuplicateSearcher(String),

    #[error("malformed search payload: {0}")]
    MalformedPayload(String),
}

/// A search result handler. Called with `Some(result)` for every
/// response received, and with `None` exactly once if the query times
/// out with no (further) responses. Returning `true` stops the search.
pub trait SearchResultHandler: Send + Sync {
    fn handle(&self, result: Option<Value>) -> bool;
}

impl<F> SearchResultHandler for F
where
    F: Fn(Option<Value>) -> bool + Send + Sync,
{
    fn handle(&self, result: Option<Value>) -> bool {
        self(result)
    }
}

/// A locally registered responder for a given search kind. Returns
/// `Some(result)` if it can answer the query, `None` otherwise.
#[async_trait]
pub trait Searcher: Send + Sync {
    async fn search(&self, query: Value) -> Option<Value>;
}

struct PendingQuery {
    expires_at: Instant,
    handler: Arc<dyn SearchResultHandler>,
}

/// Generates a locally unique query identifier: `"q:<16 hex chars>"`.
pub fn generate_query_id() -> String {
    let mut bytes = vec![0u8; QUERY_ID_RANDOM_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    format!("q:{}", hex::encode(bytes))
}

/// Query/response lookups layered on gossip: per-query IDs, timeouts, and
/// multi-result handler callbacks.
pub struct Search {
    gossip: Arc<Gossip>,
    searchers: DashMap<String, Arc<dyn Searcher>>,
    pending: DashMap<String, PendingQuery>,
}

impl Search {
    /// Builds a `Search` primitive and registers its two gossip kinds
    /// (`search:query`, `search:response`) on `gossip`.
    pub fn new(gossip: Arc<Gossip>) -> Result<Arc<Self>, SearchError> {
        let search = Arc::new(Self {
            gossip: gossip.clone(),
            searchers: DashMap::new(),
            pending: DashMap::new(),
        });

        gossip.register(
            "search:query",
            Arc::new(QueryIngressHandler { search: search.clone() }),
        )?;
        gossip.register(
            "search:response",
            Arc::new(ResponseIngressHandler { search: search.clone() }),
        )?;

        Ok(search)
    }

    /// Registers `searcher` to answer queries of the given `kind`. Fails
    /// if a searcher is already registered for that kind.
    pub fn register(&self, kind: impl Into<String>, searcher: Arc<dyn Searcher>) -> Result<(), SearchError> {
        let kind = kind.into();
        match self.searchers.entry(kind.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(SearchError::DuplicateSearcher(kind)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(searcher);
                Ok(())
            }
        }
    }

    /// Issues a search for `query` of the given `kind`, using the default
    /// 60s timeout. See [`Search::search_for_with_timeout`] to override it.
    pub async fn search_for(&self, kind: &str, query: Value, handler: Arc<dyn SearchResultHandler>) {
        self.search_for_with_timeout(kind, query, handler, Duration::from_secs(SEARCH_TIMEOUT_SECS))
            .await;
    }

    pub async fn search_for_with_timeout(
        &self,
        kind: &str,
        query: Value,
        handler: Arc<dyn SearchResultHandler>,
        timeout: Duration,
    ) {
        let query_id = generate_query_id();
        debug!(target: "node::sch", query_id, kind, ?query, "issuing search");

        self.pending.insert(
            query_id.clone(),
            PendingQuery {
                expires_at: Instant::now() + timeout,
                handler,
            },
        );

        match GossipMessage::new("search:query", serde_json::json!([query_id, kind, query])) {
            Ok(msg) => self.gossip.broadcast(msg).await,
            Err(err) => warn!(target: "node::err", error = %err, "failed to encode search query"),
        }
    }

    async fn handle_query(&self, message: GossipMessage) {
        let (query_id, kind, query): (String, String, Value) = match serde_json::from_value(message.payload) {
            Ok(v) => v,
            Err(err) => {
                warn!(target: "node::err", error = %err, "malformed search:query payload");
                return;
            }
        };

        let Some(searcher) = self.searchers.get(&kind).map(|s| s.clone()) else {
            warn!(target: "node::err", kind, "no searcher registered for kind");
            return;
        };

        let result = searcher.search(query).await;
        debug!(target: "node::sch", query_id, kind, found = result.is_some(), "search resolved locally");

        let Some(result) = result else {
            return;
        };

        match GossipMessage::new("search:response", serde_json::json!([query_id, result])) {
            Ok(msg) => self.gossip.broadcast(msg).await,
            Err(err) => warn!(target: "node::err", error = %err, "failed to encode search response"),
        }
    }

    fn handle_response(&self, message: GossipMessage) {
        let (query_id, result): (String, Value) = match serde_json::from_value(message.payload) {
            Ok(v) => v,
            Err(err) => {
                warn!(target: "node::err", error = %err, "malformed search:response payload");
                return;
            }
        };

        let Some(entry) = self.pending.get(&query_id) else {
            return;
        };

        debug!(target: "node::sch", query_id, "received result");
        let done = entry.handler.handle(Some(result));
        drop(entry);

        if done {
            debug!(target: "node::sch", query_id, "handler signalled completion, removing pending query");
            self.pending.remove(&query_id);
        }
    }

    /// Starts the background cleanup loop: expired pending queries are
    /// removed and their handler is invoked exactly once with `None`.
    pub fn spawn_cleanup_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let search = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(SEARCH_CLEANUP_INTERVAL_SECS));
            loop {
                interval.tick().await;
                search.run_cleanup_sweep();
            }
        })
    }

    fn run_cleanup_sweep(&self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|entry| entry.value().expires_at <= now)
            .map(|entry| entry.key().clone())
            .collect();

        for query_id in expired {
            if let Some((_, entry)) = self.pending.remove(&query_id) {
                debug!(target: "node::sch", query_id, "query timed out");
                entry.handler.handle(None);
            }
        }
    }

    #[cfg(test)]
    fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

struct QueryIngressHandler {
    search: Arc<Search>,
}

#[async_trait]
impl GossipHandler for QueryIngressHandler {
    async fn handle(&self, message: GossipMessage) {
        self.search.handle_query(message).await;
    }
}

struct ResponseIngressHandler {
    search: Arc<Search>,
}

#[async_trait]
impl GossipHandler for ResponseIngressHandler {
    async fn handle(&self, message: GossipMessage) {
        self.search.handle_response(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    async fn harness() -> Arc<Search> {
        let transport = crate::transport::Transport::bind(0).await.unwrap();
        let messaging = Arc::new(crate::messaging::Messaging::new(transport));
        let peering = crate::peering::Peering::new(messaging.clone(), 4).unwrap();
        let gossip = Gossip::new(messaging, peering).unwrap();
        Search::new(gossip).unwrap()
    }

    struct EchoSearcher;
    #[async_trait]
    impl Searcher for EchoSearcher {
        async fn search(&self, query: Value) -> Option<Value> {
            Some(query)
        }
    }

    struct AbsentSearcher;
    #[async_trait]
    impl Searcher for AbsentSearcher {
        async fn search(&self, _query: Value) -> Option<Value> {
            None
        }
    }

    #[test]
    fn query_id_has_expected_shape() {
        let id = generate_query_id();
        assert!(id.starts_with("q:"));
        assert_eq!(id.len(), "q:".len() + QUERY_ID_RANDOM_BYTES * 2);
    }

    #[tokio::test]
    async fn duplicate_searcher_registration_fails() {
        let s = harness().await;
        s.register("item", Arc::new(EchoSearcher)).unwrap();
        assert!(s.register("item", Arc::new(EchoSearcher)).is_err());
    }

    #[tokio::test]
    async fn query_with_no_searcher_is_dropped() {
        let s = harness().await;
        let msg = GossipMessage::new("search:query", serde_json::json!(["q:1", "missing-kind", "x"])).unwrap();
        s.handle_query(msg).await;
    }

    #[tokio::test]
    async fn query_with_absent_result_sends_no_response() {
        let s = harness().await;
        s.register("item", Arc::new(AbsentSearcher)).unwrap();
        let msg = GossipMessage::new("search:query", serde_json::json!(["q:1", "item", "x"])).unwrap();
        s.handle_query(msg).await;
        // No response broadcast means no new known-message entry for a
        // search:response; we simply assert no panic occurred.
    }

    #[tokio::test]
    async fn response_for_unknown_query_id_is_dropped() {
        let s = harness().await;
        let msg = GossipMessage::new("search:response", serde_json::json!(["q:unknown", "result"])).unwrap();
        s.handle_response(msg);
    }

    #[tokio::test]
    async fn response_invokes_handler_and_keeps_pending_until_true() {
        let s = harness().await;
        let calls = Arc::new(Mutex::new(Vec::new()));

        let calls_clone = calls.clone();
        let handler: Arc<dyn SearchResultHandler> = Arc::new(move |result: Option<Value>| {
            calls_clone.lock().unwrap().push(result);
            false
        });

        s.pending.insert(
            "q:test".to_string(),
            PendingQuery {
                expires_at: Instant::now() + Duration::from_secs(60),
                handler,
            },
        );

        let msg = GossipMessage::new("search:response", serde_json::json!(["q:test", "first"])).unwrap();
        s.handle_response(msg);
        assert_eq!(s.pending_count(), 1);
        assert_eq!(calls.lock().unwrap().len(), 1);

        let msg2 = GossipMessage::new("search:response", serde_json::json!(["q:test", "second"])).unwrap();
        s.handle_response(msg2);
        assert_eq!(s.pending_count(), 1);
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn response_handler_returning_true_removes_pending_entry() {
        let s = harness().await;
        let handler: Arc<dyn SearchResultHandler> = Arc::new(|_result: Option<Value>| true);
        s.pending.insert(
            "q:test".to_string(),
            PendingQuery {
                expires_at: Instant::now() + Duration::from_secs(60),
                handler,
            },
        );

        let msg = GossipMessage::new("search:response", serde_json::json!(["q:test", "result"])).unwrap();
        s.handle_response(msg);
        assert_eq!(s.pending_count(), 0);
    }

    #[tokio::test]
    async fn cleanup_sweep_fires_none_exactly_once_on_timeout() {
        let s = harness().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let handler: Arc<dyn SearchResultHandler> = Arc::new(move |result: Option<Value>| {
            assert!(result.is_none());
            calls_clone.fetch_add(1, Ordering::SeqCst);
            true
        });

        s.pending.insert(
            "q:expired".to_string(),
            PendingQuery {
                expires_at: Instant::now() - Duration::from_secs(1),
                handler,
            },
        );

        s.run_cleanup_sweep();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(s.pending_count(), 0);
    }

    #[tokio::test]
    async fn cleanup_sweep_ignores_unexpired_entries() {
        let s = harness().await;
        let handler: Arc<dyn SearchResultHandler> = Arc::new(|_: Option<Value>| {
            panic!("should not fire before expiry");
        });
        s.pending.insert(
            "q:fresh".to_string(),
            PendingQuery {
                expires_at: Instant::now() + Duration::from_secs(60),
                handler,
            },
        );
        s.run_cleanup_sweep();
        assert_eq!(s.pending_count(), 1);
    }
}
