//! Broker-less service discovery and request/reply RPC.
//!
//! A [`Node`] advertises named services, learns which peers provide which
//! names through the discovery protocol, and calls them over a datagram
//! [`Transport`](transport::Transport). All socket I/O, discovery timers and
//! handler invocations happen on the task that spins the node.

pub mod discovery;
pub mod error;
pub mod handler;
pub mod node;
pub mod registry;
pub mod rpc;
pub mod transport;
pub mod types;
pub mod wire;

pub use discovery::Role;
pub use error::{CodecError, NodeError, RpcError};
pub use handler::{Reply, RequestHandler, ResponseStatus};
pub use node::Node;
pub use registry::{AdvertiseOutcome, RemoteProvider};
pub use transport::{MemoryNetwork, MemoryTransport, Transport, TransportError, UdpTransport};
pub use types::*;
