//! Node identification and validation errors for mesh networking.

use std::fmt;
use uuid::Uuid;

/// Error type for validation failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The node ID is empty or not a valid UUID.
    InvalidId(String),
    /// The service name is empty.
    EmptyServiceName,
    /// The service name exceeds the wire limit.
    ServiceNameTooLong(usize),
    /// The endpoint is empty or contains only whitespace.
    EmptyAddress,
    /// The address format is invalid with a descriptive message.
    InvalidAddressFormat(String),
    /// A timing or sizing setting is out of range.
    InvalidSetting(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::InvalidId(id) => write!(f, "Invalid node ID: {id}"),
            ValidationError::EmptyServiceName => write!(f, "Service name cannot be empty"),
            ValidationError::ServiceNameTooLong(len) => write!(
                f,
                "Service name is {len} bytes, maximum is {}",
                super::service::SERVICE_NAME_MAX_LEN
            ),
            ValidationError::EmptyAddress => write!(f, "Endpoint cannot be empty"),
            ValidationError::InvalidAddressFormat(msg) => {
                write!(f, "Invalid address format: {msg}")
            }
            ValidationError::InvalidSetting(msg) => write!(f, "Invalid setting: {msg}"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Unique identifier for a node in the discovery domain.
///
/// Every envelope carries the sender's id so a node can recognise (and drop)
/// its own broadcasts when the network loops them back.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Length of a node id on the wire.
    pub const LEN: usize = 16;

    /// Creates a new unique node ID with a generated UUID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses a `NodeId` from its hyphenated string form.
    ///
    /// # Errors
    /// Returns `ValidationError::InvalidId` if the string is not a UUID.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| ValidationError::InvalidId(s.to_string()))
    }

    /// Rebuilds a `NodeId` from its 16 wire bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the 16 wire bytes of this id.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        self.0.as_bytes()
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_creation() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_node_id_parse() {
        let id = NodeId::parse("67e55044-10b1-426f-9247-bb680e5fe0c8").unwrap();
        assert_eq!(id.to_string(), "67e55044-10b1-426f-9247-bb680e5fe0c8");
    }

    #[test]
    fn test_node_id_parse_invalid() {
        assert!(matches!(
            NodeId::parse("node-1"),
            Err(ValidationError::InvalidId(_))
        ));
        assert!(matches!(NodeId::parse("   "), Err(ValidationError::InvalidId(_))));
    }

    #[test]
    fn test_node_id_bytes_identity() {
        let id = NodeId::new();
        assert_eq!(NodeId::from_bytes(*id.as_bytes()), id);
    }

    #[test]
    fn test_validation_error_display() {
        assert_eq!(
            ValidationError::EmptyServiceName.to_string(),
            "Service name cannot be empty"
        );
        assert_eq!(
            ValidationError::ServiceNameTooLong(300).to_string(),
            "Service name is 300 bytes, maximum is 192"
        );
    }
}
