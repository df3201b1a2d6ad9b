//! Node addressing and request settings.

use serde::Deserialize;

/// Settings of the local node.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct NodeSettings {
    /// Host of the request socket.
    pub bind_host: String,
    /// Port of the request socket; 0 picks an ephemeral port.
    pub port: u16,
    /// Address announced to peers instead of the detected one.
    #[serde(default)]
    pub advertise_host: Option<String>,
    /// Rendezvous endpoint (`ip:port`); unset or empty selects broadcast discovery.
    #[serde(default)]
    pub master: Option<String>,
    /// Default request deadline in milliseconds.
    pub request_timeout_ms: u64,
    /// Log every envelope at `info`.
    #[serde(default)]
    pub verbose: bool,
}
