//! Error types for the discovery and RPC layers.

use std::time::Duration;

use super::transport::TransportError;
use super::types::ValidationError;

/// Errors returned by node lifecycle and registration operations.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// The service name failed validation.
    #[error("Invalid service name: {0}")]
    InvalidService(#[from] ValidationError),
    /// The service is not advertised by this node.
    #[error("Service not advertised: {0}")]
    NotFound(String),
    /// Another task is already driving the event loop.
    #[error("Event loop is already spinning")]
    AlreadySpinning,
    /// The node has been shut down.
    #[error("Node has been shut down")]
    Shutdown,
    /// The transport failed while binding or sending.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    /// The node configuration is unusable.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Errors returned by a request that did not produce a [`Reply`](super::Reply).
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Nobody is known to provide the service.
    #[error("No provider for service '{0}'")]
    NoProvider(String),
    /// The provider did not answer before the deadline.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// The request could not be sent.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    /// The node shut down before the request completed.
    #[error("Node has been shut down")]
    Shutdown,
    /// A blocking request was issued from a context that drives the event loop.
    #[error("Blocking request issued from inside the event loop or an async context")]
    Reentrant,
    /// The encoded request does not fit into one datagram.
    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    /// The service name failed validation.
    #[error("Invalid service name: {0}")]
    InvalidService(#[from] ValidationError),
}

impl RpcError {
    /// Label used for the `outcome` dimension of request metrics.
    #[must_use]
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::NoProvider(_) => "no_provider",
            Self::Timeout(_) => "timeout",
            Self::Transport(_) => "transport",
            Self::Shutdown => "shutdown",
            Self::Reentrant => "reentrant",
            Self::PayloadTooLarge(_) => "too_large",
            Self::InvalidService(_) => "invalid",
        }
    }
}

/// Errors raised while encoding or decoding wire envelopes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The envelope header carries a protocol version this node does not speak.
    #[error("Unsupported protocol version {0}")]
    UnsupportedVersion(u16),
    /// The kind byte is not a known envelope kind.
    #[error("Unknown envelope kind {0}")]
    UnknownKind(u8),
    /// The datagram ended while reading the named field.
    #[error("Truncated envelope while reading {0}")]
    Truncated(&'static str),
    /// Bytes remain after the last field.
    #[error("{0} trailing bytes after envelope")]
    TrailingBytes(usize),
    /// A text field is not valid UTF-8.
    #[error("Field {0} is not valid UTF-8")]
    InvalidUtf8(&'static str),
    /// The service name is empty or too long.
    #[error("Invalid service name: {0}")]
    InvalidServiceName(ValidationError),
    /// The sender endpoint does not parse as `ip:port`.
    #[error("Invalid sender endpoint: {0}")]
    InvalidEndpoint(ValidationError),
    /// The encoded envelope exceeds the datagram limit.
    #[error("Envelope of {0} bytes exceeds the datagram limit")]
    TooLarge(usize),
}
