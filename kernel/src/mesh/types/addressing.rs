//! Network addressing types for mesh networking.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use super::node::ValidationError;

/// Address at which a node receives requests and discovery traffic.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Endpoint(SocketAddr);

impl Endpoint {
    /// Creates a new `Endpoint` from a string such as `"10.0.0.7:11400"`.
    ///
    /// # Errors
    /// Returns `ValidationError::EmptyAddress` if the address is empty.
    /// Returns `ValidationError::InvalidAddressFormat` if the address is not `ip:port`.
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyAddress);
        }
        trimmed
            .parse::<SocketAddr>()
            .map(Self)
            .map_err(|e| ValidationError::InvalidAddressFormat(format!("'{trimmed}': {e}")))
    }

    /// Wraps an already resolved socket address.
    #[must_use]
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        Self(addr)
    }

    /// Returns the socket address.
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }

    /// Returns the IP part of the endpoint.
    #[must_use]
    pub fn ip(&self) -> IpAddr {
        self.0.ip()
    }

    /// Returns the port part of the endpoint.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.0.port()
    }
}

impl FromStr for Endpoint {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_new() {
        let ep = Endpoint::new("127.0.0.1:8080").unwrap();
        assert_eq!(ep.port(), 8080);
        assert_eq!(ep.to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn test_endpoint_trims_whitespace() {
        let ep = Endpoint::new("  10.1.2.3:9 ").unwrap();
        assert_eq!(ep.to_string(), "10.1.2.3:9");
    }

    #[test]
    fn test_endpoint_empty() {
        assert!(matches!(Endpoint::new(""), Err(ValidationError::EmptyAddress)));
        assert!(matches!(Endpoint::new("   "), Err(ValidationError::EmptyAddress)));
    }

    #[test]
    fn test_endpoint_invalid() {
        assert!(matches!(
            Endpoint::new("localhost"),
            Err(ValidationError::InvalidAddressFormat(_))
        ));
    }

    #[test]
    fn test_endpoint_ipv6() {
        let ep: Endpoint = "[::1]:4000".parse().unwrap();
        assert!(ep.ip().is_loopback());
        assert_eq!(ep.to_string(), "[::1]:4000");
    }
}
