//! Discovery protocol settings.

use serde::Deserialize;

/// Timing and addressing of service discovery.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct DiscoverySettings {
    /// Shared UDP port for broadcast discovery.
    pub port: u16,
    /// Broadcast destination address.
    pub broadcast_host: String,
    /// Period between announcements in milliseconds.
    pub announce_interval_ms: u64,
    /// Provider lease length, in announce intervals.
    pub lease_multiplier: u32,
    /// Idle time in milliseconds before a member stops re-querying a name.
    pub interest_ttl_ms: u64,
}
