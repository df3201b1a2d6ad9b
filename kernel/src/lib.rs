//! Beacon Kernel - broker-less service discovery and request/reply RPC.
//!
//! Processes advertise named services, discover remote providers of those
//! names without a central broker, and call them synchronously over UDP.
//!
//! ```no_run
//! use std::time::Duration;
//! use beacon_kernel::mesh::{Node, NodeConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let node = Node::bind(NodeConfig::default()).await?;
//! node.advertise("echo", |_: &str, payload: &[u8]| (payload.to_vec(), 0))?;
//!
//! let reply = node.request("echo", b"hello", Duration::from_secs(1)).await?;
//! assert_eq!(&reply.payload[..], b"hello");
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]

/// Infrastructure components (config, telemetry, audit).
pub mod infrastructure;
/// Service discovery and RPC.
pub mod mesh;
