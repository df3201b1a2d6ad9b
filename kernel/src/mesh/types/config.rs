//! Node construction settings with validated types.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use super::addressing::Endpoint;
use super::node::ValidationError;

/// Default UDP port shared by every node for broadcast discovery.
pub const DEFAULT_DISCOVERY_PORT: u16 = 11312;
/// Default period between two announcements of the same service.
pub const DEFAULT_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(1);
/// Default number of announce intervals a provider survives without refresh.
pub const DEFAULT_LEASE_MULTIPLIER: u32 = 3;
/// Default time a member keeps re-querying a name nobody asked for since.
pub const DEFAULT_INTEREST_TTL: Duration = Duration::from_secs(60);
/// Default deadline applied by callers that do not pick their own.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// Timing and addressing of the discovery protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Period between two announcements of each local service.
    pub announce_interval: Duration,
    /// Age after which an unrefreshed remote provider is evicted.
    pub lease_ttl: Duration,
    /// UDP port of the shared broadcast discovery socket.
    pub port: u16,
    /// Destination address of discovery broadcasts.
    pub broadcast_ip: Ipv4Addr,
    /// Idle time after which a member stops re-querying a service name.
    pub interest_ttl: Duration,
}

impl DiscoveryConfig {
    /// Builds a config whose lease is `multiplier` announce intervals long.
    ///
    /// # Errors
    /// Returns `ValidationError::InvalidSetting` for a zero interval or multiplier.
    pub fn with_lease_multiplier(
        announce_interval: Duration,
        multiplier: u32,
    ) -> Result<Self, ValidationError> {
        if announce_interval.is_zero() {
            return Err(ValidationError::InvalidSetting(
                "announce interval must be greater than zero".into(),
            ));
        }
        if multiplier == 0 {
            return Err(ValidationError::InvalidSetting(
                "lease multiplier must be at least 1".into(),
            ));
        }
        Ok(Self {
            announce_interval,
            lease_ttl: announce_interval * multiplier,
            ..Self::default()
        })
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            announce_interval: DEFAULT_ANNOUNCE_INTERVAL,
            lease_ttl: DEFAULT_ANNOUNCE_INTERVAL * DEFAULT_LEASE_MULTIPLIER,
            port: DEFAULT_DISCOVERY_PORT,
            broadcast_ip: Ipv4Addr::BROADCAST,
            interest_ttl: DEFAULT_INTEREST_TTL,
        }
    }
}

/// Configuration of a [`Node`](crate::mesh::Node).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// Rendezvous endpoint; `None` selects link-local broadcast discovery.
    pub master: Option<Endpoint>,
    /// Raises per-message diagnostics to `info`. No behavioural effect.
    pub verbose: bool,
    /// Local address of the request socket (port 0 picks an ephemeral port).
    pub bind: SocketAddr,
    /// Address announced to peers when `bind` is a wildcard address.
    pub advertise_ip: Option<IpAddr>,
    /// Discovery timing and addressing.
    pub discovery: DiscoveryConfig,
    /// Deadline used by [`Node::call`](crate::mesh::Node::call).
    pub request_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            master: None,
            verbose: false,
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            advertise_ip: None,
            discovery: DiscoveryConfig::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl NodeConfig {
    /// Returns a builder for constructing `NodeConfig` with validation.
    #[must_use]
    pub fn builder() -> NodeConfigBuilder {
        NodeConfigBuilder::default()
    }
}

/// Builder for constructing `NodeConfig` instances with validation.
#[derive(Debug, Default)]
pub struct NodeConfigBuilder {
    master: Option<Endpoint>,
    verbose: bool,
    bind: Option<SocketAddr>,
    advertise_ip: Option<IpAddr>,
    announce_interval: Option<Duration>,
    lease_multiplier: Option<u32>,
    discovery_port: Option<u16>,
    broadcast_ip: Option<Ipv4Addr>,
    interest_ttl: Option<Duration>,
    request_timeout: Option<Duration>,
}

impl NodeConfigBuilder {
    /// Sets the rendezvous endpoint.
    #[must_use]
    pub fn master(mut self, master: Endpoint) -> Self {
        self.master = Some(master);
        self
    }

    /// Sets the rendezvous endpoint from its textual form; empty means none.
    ///
    /// # Errors
    /// Returns `ValidationError::InvalidAddressFormat` for a malformed endpoint.
    pub fn master_str(mut self, master: &str) -> Result<Self, ValidationError> {
        self.master = if master.trim().is_empty() {
            None
        } else {
            Some(Endpoint::new(master)?)
        };
        Ok(self)
    }

    /// Enables verbose diagnostics.
    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Sets the local request socket address.
    #[must_use]
    pub fn bind(mut self, bind: SocketAddr) -> Self {
        self.bind = Some(bind);
        self
    }

    /// Sets the address announced to peers.
    #[must_use]
    pub fn advertise_ip(mut self, ip: IpAddr) -> Self {
        self.advertise_ip = Some(ip);
        self
    }

    /// Sets the announce period.
    #[must_use]
    pub fn announce_interval(mut self, interval: Duration) -> Self {
        self.announce_interval = Some(interval);
        self
    }

    /// Sets the lease length in announce intervals.
    #[must_use]
    pub fn lease_multiplier(mut self, multiplier: u32) -> Self {
        self.lease_multiplier = Some(multiplier);
        self
    }

    /// Sets the shared discovery port.
    #[must_use]
    pub fn discovery_port(mut self, port: u16) -> Self {
        self.discovery_port = Some(port);
        self
    }

    /// Sets the broadcast destination address.
    #[must_use]
    pub fn broadcast_ip(mut self, ip: Ipv4Addr) -> Self {
        self.broadcast_ip = Some(ip);
        self
    }

    /// Sets how long a member keeps re-querying an unused service name.
    #[must_use]
    pub fn interest_ttl(mut self, ttl: Duration) -> Self {
        self.interest_ttl = Some(ttl);
        self
    }

    /// Sets the default request deadline.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Builds the `NodeConfig` instance.
    ///
    /// # Errors
    /// Returns `ValidationError::InvalidSetting` if a timing value is zero.
    pub fn build(self) -> Result<NodeConfig, ValidationError> {
        let defaults = NodeConfig::default();
        let mut discovery = DiscoveryConfig::with_lease_multiplier(
            self.announce_interval
                .unwrap_or(defaults.discovery.announce_interval),
            self.lease_multiplier.unwrap_or(DEFAULT_LEASE_MULTIPLIER),
        )?;
        if let Some(port) = self.discovery_port {
            discovery.port = port;
        }
        if let Some(ip) = self.broadcast_ip {
            discovery.broadcast_ip = ip;
        }
        if let Some(ttl) = self.interest_ttl {
            if ttl.is_zero() {
                return Err(ValidationError::InvalidSetting(
                    "interest ttl must be greater than zero".into(),
                ));
            }
            discovery.interest_ttl = ttl;
        }

        let request_timeout = self.request_timeout.unwrap_or(defaults.request_timeout);
        if request_timeout.is_zero() {
            return Err(ValidationError::InvalidSetting(
                "request timeout must be greater than zero".into(),
            ));
        }

        Ok(NodeConfig {
            master: self.master,
            verbose: self.verbose,
            bind: self.bind.unwrap_or(defaults.bind),
            advertise_ip: self.advertise_ip,
            discovery,
            request_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::builder().build().unwrap();
        assert_eq!(config.master, None);
        assert!(!config.verbose);
        assert_eq!(config.discovery.announce_interval, Duration::from_secs(1));
        assert_eq!(config.discovery.lease_ttl, Duration::from_secs(3));
        assert_eq!(config.discovery.port, DEFAULT_DISCOVERY_PORT);
        assert_eq!(config.discovery.broadcast_ip, Ipv4Addr::BROADCAST);
        assert_eq!(config.discovery.interest_ttl, DEFAULT_INTEREST_TTL);
    }

    #[test]
    fn test_lease_follows_interval() {
        let config = NodeConfig::builder()
            .announce_interval(Duration::from_millis(200))
            .lease_multiplier(5)
            .build()
            .unwrap();
        assert_eq!(config.discovery.lease_ttl, Duration::from_millis(1000));
    }

    #[test]
    fn test_empty_master_means_broadcast() {
        let config = NodeConfig::builder().master_str("").unwrap().build().unwrap();
        assert!(config.master.is_none());

        let config = NodeConfig::builder()
            .master_str("127.0.0.1:11400")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(config.master.unwrap().port(), 11400);
    }

    #[test]
    fn test_invalid_master() {
        assert!(matches!(
            NodeConfig::builder().master_str("not-an-endpoint"),
            Err(ValidationError::InvalidAddressFormat(_))
        ));
    }

    #[test]
    fn test_zero_values_rejected() {
        assert!(NodeConfig::builder()
            .announce_interval(Duration::ZERO)
            .build()
            .is_err());
        assert!(NodeConfig::builder().lease_multiplier(0).build().is_err());
        assert!(NodeConfig::builder()
            .interest_ttl(Duration::ZERO)
            .build()
            .is_err());
        assert!(NodeConfig::builder()
            .request_timeout(Duration::ZERO)
            .build()
            .is_err());
    }
}
