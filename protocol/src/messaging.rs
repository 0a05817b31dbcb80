//! # Messaging
//!
//! A typed envelope on top of the raw datagram transport: every message on
//! the wire is the two-element JSON array `[kind, payload]`. This module
//! owns encoding/decoding that envelope and dispatching decoded messages to
//! the handler registered for their `kind`.
//!
//! A `kind` may have at most one handler. Re-registering a kind is treated
//! as a configuration error and is fatal at startup — two subsystems racing
//! to own the same message kind is a bug, not something to paper over at
//! runtime.
//!
//! Decode failures and messages with no registered handler are logged and
//! dropped. Nothing a remote peer sends over the wire is allowed to crash
//! this node.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;
use tracing::{trace, warn};

use crate::transport::{Endpoint, Transport, TransportError};

/// Errors from the messaging layer.
#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("a handler is already registered for kind {0:?}")]
    DuplicateHandler(String),

    #[error("failed to encode message payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A handler invoked whenever a decoded message of its registered `kind`
/// arrives. Handlers run concurrently with the receive loop — a slow
/// handler never stalls delivery of the next datagram.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, payload: Value, from: Endpoint);
}

/// Wraps a bound [`Transport`] with the `[kind, payload]` envelope and a
/// per-kind handler registry.
pub struct Messaging {
    transport: Transport,
    handlers: DashMap<String, Arc<dyn MessageHandler>>,
}

impl Messaging {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            handlers: DashMap::new(),
        }
    }

    /// Registers `handler` to receive every message of the given `kind`.
    /// Fails if a handler is already registered for that kind.
    pub fn register(&self, kind: impl Into<String>, handler: Arc<dyn MessageHandler>) -> Result<(), MessagingError> {
        let kind = kind.into();
        match self.handlers.entry(kind.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(MessagingError::DuplicateHandler(kind)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(handler);
                Ok(())
            }
        }
    }

    /// Encodes `[kind, payload]` and sends it to `endpoint`.
    pub async fn send(
        &self,
        endpoint: &Endpoint,
        kind: &str,
        payload: impl serde::Serialize,
    ) -> Result<(), MessagingError> {
        let payload_value = serde_json::to_value(payload)?;
        let envelope = serde_json::to_vec(&(kind, payload_value))?;
        self.transport.send(endpoint, &envelope).await?;
        Ok(())
    }

    /// Receives and dispatches exactly one datagram. Decode failures and
    /// messages with no registered handler are logged and dropped, never
    /// propagated to the caller.
    pub async fn receive_once(&self) -> Result<(), MessagingError> {
        let datagram = self.transport.recv().await?;
        self.dispatch(datagram.bytes, datagram.from);
        Ok(())
    }

    /// Runs the receive loop forever. Intended to be spawned as its own
    /// task; transport-level errors are logged and the loop continues.
    pub async fn run(self: Arc<Self>) {
        loop {
            match self.transport.recv().await {
                Ok(datagram) => self.dispatch(datagram.bytes, datagram.from),
                Err(err) => warn!(error = %err, "datagram receive failed"),
            }
        }
    }

    fn dispatch(&self, bytes: Vec<u8>, from: Endpoint) {
        let envelope: Value = match serde_json::from_slice(&bytes) {
            Ok(v) => v,
            Err(err) => {
                warn!(from = %from, error = %err, "dropping undecodable datagram");
                return;
            }
        };

        let Some(array) = envelope.as_array() else {
            warn!(from = %from, "dropping datagram: envelope is not a JSON array");
            return;
        };
        if array.len() != 2 {
            warn!(from = %from, len = array.len(), "dropping datagram: envelope is not a 2-element array");
            return;
        }
        let Some(kind) = array[0].as_str() else {
            warn!(from = %from, "dropping datagram: kind is not a string");
            return;
        };
        let payload = array[1].clone();

        let Some(handler) = self.handlers.get(kind).map(|h| h.clone()) else {
            warn!(from = %from, kind, "no handler registered for message kind");
            return;
        };

        trace!(from = %from, kind, "dispatching message");
        tokio::spawn(async move {
            handler.handle(payload, from).await;
        });
    }
}
