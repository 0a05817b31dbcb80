//! # Datagram Transport
//!
//! The lowest layer of the stack: bind a UDP port, send bounded byte frames
//! to `host:port` endpoints, and receive them back. Everything above this
//! module — messaging, peering, gossip, search, the blockchain engine — is
//! built on the assumption that datagrams may be lost, reordered, or
//! duplicated, and tolerates all three.
//!
//! There is no retry, no ack, no congestion control here. If you need
//! reliability, build it at a higher layer — that's what the gossip
//! dedup set and the search timeout are for.

use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::warn;

use crate::constants::UDP_FRAME_BUDGET_BYTES;

/// Errors from the datagram transport layer.
///
/// These are all "transport-local": the caller logs and moves on, nothing
/// here is ever allowed to crash a background worker.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind udp socket on port {port}: {source}")]
    Bind { port: u16, source: std::io::Error },

    #[error("failed to send datagram to {endpoint}: {source}")]
    Send {
        endpoint: Endpoint,
        source: std::io::Error,
    },

    #[error("failed to receive datagram: {0}")]
    Recv(std::io::Error),

    #[error("invalid endpoint string {0:?}")]
    InvalidEndpoint(String),
}

/// A remote address: `(host, port)`. Equality and hashing are structural,
/// matching the serialised form `"a.b.c.d:port"` used on the wire and in
/// logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses `"host:port"`.
    pub fn parse(s: &str) -> Result<Self, TransportError> {
        let (host, port_str) = s
            .rsplit_once(':')
            .ok_or_else(|| TransportError::InvalidEndpoint(s.to_string()))?;
        let port: u16 = port_str
            .parse()
            .map_err(|_| TransportError::InvalidEndpoint(s.to_string()))?;
        Ok(Self::new(host, port))
    }

    pub fn to_socket_addr(&self) -> Result<SocketAddr, TransportError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| TransportError::InvalidEndpoint(self.to_string()))
    }

    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl std::str::FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A single inbound datagram, bundled with where it came from.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub bytes: Vec<u8>,
    pub from: Endpoint,
}

/// A bound UDP socket, shared across the send path and the receive loop.
///
/// Cloning a `Transport` is cheap — the underlying socket is reference
/// counted, so every subsystem that needs to send can hold its own handle.
#[derive(Clone)]
pub struct Transport {
    socket: Arc<UdpSocket>,
}

impl Transport {
    /// Binds `0.0.0.0:<port>` with `SO_REUSEADDR` set, matching the
    /// original node's socket setup so a restarted process can immediately
    /// rebind a still-lingering port.
    pub async fn bind(port: u16) -> Result<Self, TransportError> {
        let addr: SocketAddr = format!("0.0.0.0:{port}")
            .parse()
            .expect("0.0.0.0 with a u16 port always parses");

        let raw = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|source| TransportError::Bind { port, source })?;
        raw.set_reuse_address(true)
            .map_err(|source| TransportError::Bind { port, source })?;
        raw.set_nonblocking(true)
            .map_err(|source| TransportError::Bind { port, source })?;
        raw.bind(&addr.into())
            .map_err(|source| TransportError::Bind { port, source })?;

        let socket = UdpSocket::from_std(raw.into())
            .map_err(|source| TransportError::Bind { port, source })?;

        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    /// Sends `bytes` to `endpoint`. Silently truncating oversized frames is
    /// the caller's job to avoid — this just relays whatever it's given.
    pub async fn send(&self, endpoint: &Endpoint, bytes: &[u8]) -> Result<(), TransportError> {
        if bytes.len() > UDP_FRAME_BUDGET_BYTES {
            warn!(
                endpoint = %endpoint,
                len = bytes.len(),
                budget = UDP_FRAME_BUDGET_BYTES,
                "sending datagram larger than the documented frame budget"
            );
        }
        let addr = endpoint.to_socket_addr()?;
        self.socket
            .send_to(bytes, addr)
            .await
            .map(|_| ())
            .map_err(|source| TransportError::Send {
                endpoint: endpoint.clone(),
                source,
            })
    }

    /// Receives a single datagram, bounded at [`UDP_FRAME_BUDGET_BYTES`].
    /// A datagram larger than the buffer is truncated by the OS, same as
    /// the reference implementation's fixed-size `recvfrom` buffer.
    pub async fn recv(&self) -> Result<Datagram, TransportError> {
        let mut buf = vec![0u8; UDP_FRAME_BUDGET_BYTES];
        let (len, from) = self
            .socket
            .recv_from(&mut buf)
            .await
            .map_err(TransportError::Recv)?;
        buf.truncate(len);
        Ok(Datagram {
            bytes: buf,
            from: Endpoint::from_socket_addr(from),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_parses_host_and_port() {
        let ep = Endpoint::parse("127.0.0.1:9000").unwrap();
        assert_eq!(ep.host, "127.0.0.1");
        assert_eq!(ep.port, 9000);
    }

    #[test]
    fn endpoint_display_round_trips_through_parse() {
        let ep = Endpoint::new("10.0.0.5", 4242);
        let rendered = ep.to_string();
        assert_eq!(rendered, "10.0.0.5:4242");
        assert_eq!(Endpoint::parse(&rendered).unwrap(), ep);
    }

    #[test]
    fn endpoint_rejects_malformed_input() {
        assert!(Endpoint::parse("no-port-here").is_err());
        assert!(Endpoint::parse("host:not-a-number").is_err());
    }

    #[test]
    fn endpoint_equality_is_structural() {
        let a = Endpoint::new("1.2.3.4", 10);
        let b = Endpoint::new("1.2.3.4", 10);
        let c = Endpoint::new("1.2.3.4", 11);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn bind_send_recv_roundtrip() {
        let a = Transport::bind(0).await.unwrap();
        let b = Transport::bind(0).await.unwrap();

        let b_addr = b.local_addr().unwrap();
        let b_endpoint = Endpoint::from_socket_addr(b_addr);

        a.send(&b_endpoint, b"hello").await.unwrap();

        let datagram = b.recv().await.unwrap();
        assert_eq!(datagram.bytes, b"hello");
    }

    #[tokio::test]
    async fn two_binds_on_port_zero_get_different_ports() {
        let a = Transport::bind(0).await.unwrap();
        let b = Transport::bind(0).await.unwrap();
        assert_ne!(
            a.local_addr().unwrap().port(),
            b.local_addr().unwrap().port()
        );
    }
}
