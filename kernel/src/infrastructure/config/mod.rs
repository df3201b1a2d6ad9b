//! Configuration management for beacon nodes.
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! environment variables prefixed with `BEACON` using `__` as the section
//! separator (for example `BEACON__NODE__MASTER=10.0.0.5:11400` or
//! `BEACON__DISCOVERY__ANNOUNCE_INTERVAL_MS=500`).
//!
//! # Example
//!
//! ```
//! use beacon_kernel::infrastructure::config::Settings;
//!
//! let settings = Settings::new().expect("Failed to load configuration");
//! let node_config = settings.node_config().expect("Invalid node settings");
//! assert_eq!(node_config.discovery.port, 11312);
//! ```

pub mod discovery;
pub mod node;
pub mod telemetry;

pub use discovery::DiscoverySettings;
pub use node::NodeSettings;
pub use telemetry::{LogFormat, TelemetrySettings};

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

use crate::mesh::types::{NodeConfig, ValidationError};

/// Top-level configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Local node settings.
    pub node: NodeSettings,
    /// Discovery settings.
    pub discovery: DiscoverySettings,
    /// Telemetry settings.
    pub telemetry: TelemetrySettings,
}

impl Settings {
    /// Loads settings from defaults and environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be built or deserialized.
    pub fn new() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Loads settings from defaults, an optional TOML file and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or malformed, or if a value
    /// has the wrong type.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::from_sources(file, Environment::with_prefix("BEACON"))
    }

    fn from_sources(file: Option<&Path>, environment: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("node.bind_host", "0.0.0.0")?
            .set_default("node.port", 0)?
            .set_default("node.request_timeout_ms", 1000)?
            .set_default("node.verbose", false)?
            .set_default("discovery.port", 11312)?
            .set_default("discovery.broadcast_host", "255.255.255.255")?
            .set_default("discovery.announce_interval_ms", 1000)?
            .set_default("discovery.lease_multiplier", 3)?
            .set_default("discovery.interest_ttl_ms", 60_000)?
            .set_default("telemetry.service_name", "beacon")?
            .set_default("telemetry.sampling_ratio", 1.0)?;

        if let Some(path) = file {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }

        builder
            .add_source(
                environment
                    .separator("__")
                    .try_parsing(true)
                    .ignore_empty(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Converts the node and discovery sections into a validated [`NodeConfig`].
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` for malformed addresses or zero timings.
    pub fn node_config(&self) -> Result<NodeConfig, ValidationError> {
        let bind_ip: IpAddr = parse_ip(&self.node.bind_host)?;
        let broadcast_ip: Ipv4Addr = self.discovery.broadcast_host.trim().parse().map_err(|e| {
            ValidationError::InvalidAddressFormat(format!("'{}': {e}", self.discovery.broadcast_host))
        })?;

        let mut builder = NodeConfig::builder()
            .bind(SocketAddr::new(bind_ip, self.node.port))
            .verbose(self.node.verbose)
            .announce_interval(Duration::from_millis(self.discovery.announce_interval_ms))
            .lease_multiplier(self.discovery.lease_multiplier)
            .interest_ttl(Duration::from_millis(self.discovery.interest_ttl_ms))
            .discovery_port(self.discovery.port)
            .broadcast_ip(broadcast_ip)
            .request_timeout(Duration::from_millis(self.node.request_timeout_ms));

        if let Some(host) = &self.node.advertise_host {
            builder = builder.advertise_ip(parse_ip(host)?);
        }
        if let Some(master) = &self.node.master {
            builder = builder.master_str(master)?;
        }
        builder.build()
    }
}

fn parse_ip(host: &str) -> Result<IpAddr, ValidationError> {
    host.trim()
        .parse()
        .map_err(|e| ValidationError::InvalidAddressFormat(format!("'{host}': {e}")))
}
