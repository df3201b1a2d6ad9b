//! In-process transport for deterministic tests.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{Datagram, Transport, TransportError};
use crate::mesh::types::Endpoint;
use crate::mesh::wire::MAX_DATAGRAM_SIZE;

const FIRST_PORT: u16 = 40_000;

#[derive(Default)]
struct Hub {
    next_port: u16,
    peers: HashMap<Endpoint, mpsc::UnboundedSender<Datagram>>,
}

impl Hub {
    fn allocate(&mut self) -> Endpoint {
        loop {
            let port = FIRST_PORT.wrapping_add(self.next_port);
            self.next_port = self.next_port.wrapping_add(1);
            let endpoint = Endpoint::from_socket_addr(SocketAddr::new(
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                port,
            ));
            if !self.peers.contains_key(&endpoint) {
                return endpoint;
            }
        }
    }
}

/// Shared medium connecting [`MemoryTransport`]s.
///
/// Unicast to an unknown endpoint is silently lost, like UDP. Broadcast
/// reaches every attached transport, the sender included.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl MemoryNetwork {
    /// Creates an empty network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a transport on a fresh `127.0.0.1` endpoint.
    #[must_use]
    pub fn attach(&self) -> MemoryTransport {
        let mut hub = self.hub.lock();
        let endpoint = hub.allocate();
        let (tx, rx) = mpsc::unbounded_channel();
        hub.peers.insert(endpoint, tx);
        MemoryTransport::new(self.clone(), endpoint, rx)
    }

    /// Attaches a transport on a chosen endpoint.
    ///
    /// # Errors
    /// Returns `TransportError::AddrInUse` if the endpoint is taken.
    pub fn attach_at(&self, endpoint: Endpoint) -> Result<MemoryTransport, TransportError> {
        let mut hub = self.hub.lock();
        if hub.peers.contains_key(&endpoint) {
            return Err(TransportError::AddrInUse(endpoint));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        hub.peers.insert(endpoint, tx);
        Ok(MemoryTransport::new(self.clone(), endpoint, rx))
    }

    /// Number of attached transports.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hub.lock().peers.len()
    }

    /// Returns `true` when no transport is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn deliver(&self, from: Endpoint, target: &Endpoint, bytes: &[u8]) {
        let hub = self.hub.lock();
        if let Some(tx) = hub.peers.get(target) {
            let _ = tx.send(Datagram {
                bytes: Bytes::copy_from_slice(bytes),
                from,
            });
        }
    }

    fn deliver_all(&self, from: Endpoint, bytes: &[u8]) {
        let hub = self.hub.lock();
        let bytes = Bytes::copy_from_slice(bytes);
        for tx in hub.peers.values() {
            let _ = tx.send(Datagram {
                bytes: bytes.clone(),
                from,
            });
        }
    }

    fn detach(&self, endpoint: &Endpoint) {
        self.hub.lock().peers.remove(endpoint);
    }
}

/// Transport attached to a [`MemoryNetwork`]. Detaches when dropped.
pub struct MemoryTransport {
    network: MemoryNetwork,
    endpoint: Endpoint,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Datagram>>,
}

impl MemoryTransport {
    fn new(
        network: MemoryNetwork,
        endpoint: Endpoint,
        rx: mpsc::UnboundedReceiver<Datagram>,
    ) -> Self {
        Self {
            network,
            endpoint,
            rx: tokio::sync::Mutex::new(rx),
        }
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.network.detach(&self.endpoint);
    }
}

fn check_size(bytes: &[u8]) -> Result<(), TransportError> {
    if bytes.len() > MAX_DATAGRAM_SIZE {
        return Err(TransportError::DatagramTooLarge(bytes.len()));
    }
    Ok(())
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_endpoint(&self) -> Endpoint {
        self.endpoint
    }

    async fn send_to(&self, target: &Endpoint, bytes: &[u8]) -> Result<(), TransportError> {
        check_size(bytes)?;
        self.network.deliver(self.endpoint, target, bytes);
        Ok(())
    }

    async fn broadcast(&self, bytes: &[u8]) -> Result<(), TransportError> {
        check_size(bytes)?;
        self.network.deliver_all(self.endpoint, bytes);
        Ok(())
    }

    async fn recv(&self) -> Result<Datagram, TransportError> {
        self.rx.lock().await.recv().await.ok_or(TransportError::Closed)
    }
}
