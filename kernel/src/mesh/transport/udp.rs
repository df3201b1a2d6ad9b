//! UDP transport.
//!
//! One socket carries requests, replies and rendezvous traffic. In broadcast
//! mode a second socket, shared by every node on the host through address
//! reuse, listens on the discovery port.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket as StdUdpSocket};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use super::{Datagram, Transport, TransportError};
use crate::mesh::types::{Endpoint, NodeConfig};
use crate::mesh::wire::MAX_DATAGRAM_SIZE;

/// Target used only to pick the outbound interface; nothing is sent to it.
const ROUTE_TARGET: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), 80);

/// Transport over real UDP sockets.
pub struct UdpTransport {
    socket: UdpSocket,
    discovery: Option<UdpSocket>,
    endpoint: Endpoint,
    broadcast_target: Option<SocketAddr>,
    /// Receive buffer shared by both sockets, sized for the largest datagram.
    buf: Mutex<Vec<u8>>,
}

impl UdpTransport {
    /// Binds the sockets described by `config`.
    ///
    /// With a master endpoint the request socket first tries the master
    /// address itself; if that is taken or not local, it falls back to
    /// `config.bind`. Without a master, the shared discovery socket is bound
    /// on `config.discovery.port`.
    ///
    /// # Errors
    /// Returns `TransportError::Io` if a socket cannot be created or bound.
    pub async fn bind(config: &NodeConfig) -> Result<Self, TransportError> {
        let socket = match config.master {
            Some(master) => match UdpSocket::bind(master.socket_addr()).await {
                Ok(socket) => {
                    info!(%master, "Bound rendezvous endpoint");
                    socket
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::AddrInUse
                            | io::ErrorKind::AddrNotAvailable
                            | io::ErrorKind::PermissionDenied
                    ) =>
                {
                    debug!(%master, error = %e, "Rendezvous endpoint taken, binding member socket");
                    UdpSocket::bind(config.bind).await?
                }
                Err(e) => return Err(e.into()),
            },
            None => UdpSocket::bind(config.bind).await?,
        };

        let (discovery, broadcast_target) = if config.master.is_none() {
            socket.set_broadcast(true)?;
            let discovery = bind_shared(config.discovery.port)?;
            let target = SocketAddr::new(IpAddr::V4(config.discovery.broadcast_ip), config.discovery.port);
            (Some(discovery), Some(target))
        } else {
            (None, None)
        };

        let local = socket.local_addr()?;
        let ip = if local.ip().is_unspecified() {
            config.advertise_ip.unwrap_or_else(|| {
                detect_local_ip(config.master.map(|m| m.socket_addr()))
            })
        } else {
            local.ip()
        };
        let endpoint = Endpoint::from_socket_addr(SocketAddr::new(ip, local.port()));

        debug!(%endpoint, broadcast = ?broadcast_target, "UDP transport ready");
        Ok(Self {
            socket,
            discovery,
            endpoint,
            broadcast_target,
            buf: Mutex::new(vec![0u8; MAX_DATAGRAM_SIZE]),
        })
    }
}

/// Binds `0.0.0.0:port` with address reuse so every local node can listen.
fn bind_shared(port: u16) -> Result<UdpSocket, TransportError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true)?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    socket.bind(&addr.into())?;
    let std_socket: StdUdpSocket = socket.into();
    Ok(UdpSocket::from_std(std_socket)?)
}

/// Picks the address of the interface that routes towards `target`.
fn detect_local_ip(target: Option<SocketAddr>) -> IpAddr {
    let route = || -> io::Result<IpAddr> {
        let socket = StdUdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect(target.unwrap_or(ROUTE_TARGET))?;
        Ok(socket.local_addr()?.ip())
    };
    match route() {
        Ok(ip) if !ip.is_unspecified() => ip,
        Ok(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        Err(e) => {
            warn!(error = %e, "Could not detect local address, advertising loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

fn check_size(bytes: &[u8]) -> Result<(), TransportError> {
    if bytes.len() > MAX_DATAGRAM_SIZE {
        return Err(TransportError::DatagramTooLarge(bytes.len()));
    }
    Ok(())
}

fn datagram(buf: &[u8], len: usize, from: SocketAddr) -> Datagram {
    Datagram {
        bytes: Bytes::copy_from_slice(&buf[..len]),
        from: Endpoint::from_socket_addr(from),
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn local_endpoint(&self) -> Endpoint {
        self.endpoint
    }

    async fn send_to(&self, target: &Endpoint, bytes: &[u8]) -> Result<(), TransportError> {
        check_size(bytes)?;
        self.socket.send_to(bytes, target.socket_addr()).await?;
        Ok(())
    }

    async fn broadcast(&self, bytes: &[u8]) -> Result<(), TransportError> {
        check_size(bytes)?;
        let target = self.broadcast_target.ok_or(TransportError::NoBroadcast)?;
        self.socket.send_to(bytes, target).await?;
        Ok(())
    }

    async fn recv(&self) -> Result<Datagram, TransportError> {
        loop {
            let socket = match &self.discovery {
                None => {
                    self.socket.readable().await?;
                    &self.socket
                }
                Some(discovery) => tokio::select! {
                    r = self.socket.readable() => { r?; &self.socket }
                    r = discovery.readable() => { r?; discovery }
                },
            };
            // The guard never crosses an await.
            let received = {
                let mut buf = self.buf.lock();
                socket
                    .try_recv_from(&mut buf[..])
                    .map(|(len, from)| datagram(&buf, len, from))
            };
            match received {
                Ok(dgram) => return Ok(dgram),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
}
