//! Datagram transports.
//!
//! The event loop is the only caller of [`Transport::recv`]; sends may come
//! from the loop only as well, so implementations need no internal fairness.

pub mod memory;
pub mod udp;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use udp::UdpTransport;

use async_trait::async_trait;
use bytes::Bytes;

use super::types::Endpoint;

/// Errors raised by a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Socket level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The datagram exceeds what the transport can carry.
    #[error("Datagram of {0} bytes exceeds the transport limit")]
    DatagramTooLarge(usize),
    /// The transport has no broadcast destination configured.
    #[error("Broadcast is not available on this transport")]
    NoBroadcast,
    /// The endpoint is already taken by another transport.
    #[error("Address {0} is already in use")]
    AddrInUse(Endpoint),
    /// The transport has been detached from its network.
    #[error("Transport closed")]
    Closed,
}

/// A received datagram together with the address it came from.
#[derive(Debug, Clone)]
pub struct Datagram {
    /// Raw datagram bytes.
    pub bytes: Bytes,
    /// Source address as seen by the transport.
    pub from: Endpoint,
}

/// Unreliable, unordered datagram delivery.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Endpoint advertised to peers for requests and replies.
    fn local_endpoint(&self) -> Endpoint;

    /// Sends one datagram to `target`. Delivery is not confirmed.
    async fn send_to(&self, target: &Endpoint, bytes: &[u8]) -> Result<(), TransportError>;

    /// Sends one datagram to every node of the discovery domain.
    async fn broadcast(&self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Waits for the next datagram. Must be cancel safe.
    async fn recv(&self) -> Result<Datagram, TransportError>;
}
