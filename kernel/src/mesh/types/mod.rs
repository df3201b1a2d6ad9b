//! Core types for mesh networking.

pub mod addressing;
pub mod config;
pub mod node;
pub mod service;

pub use addressing::Endpoint;
pub use config::{DiscoveryConfig, NodeConfig, NodeConfigBuilder};
pub use node::{NodeId, ValidationError};
pub use service::{ServiceName, SERVICE_NAME_MAX_LEN};
