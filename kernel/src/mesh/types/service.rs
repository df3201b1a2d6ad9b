//! Service naming for advertised callbacks.

use std::borrow::Borrow;
use std::fmt;

use super::node::ValidationError;

/// Longest service name that fits the one-byte length prefix on the wire.
pub const SERVICE_NAME_MAX_LEN: usize = 192;

/// Case-sensitive, non-empty name of a service within a discovery domain.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ServiceName(String);

impl ServiceName {
    /// Creates a validated `ServiceName`.
    ///
    /// Names are not trimmed: `"echo"` and `" echo"` are distinct services.
    ///
    /// # Errors
    /// Returns `ValidationError::EmptyServiceName` for an empty string and
    /// `ValidationError::ServiceNameTooLong` past [`SERVICE_NAME_MAX_LEN`] bytes.
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ValidationError::EmptyServiceName);
        }
        if name.len() > SERVICE_NAME_MAX_LEN {
            return Err(ValidationError::ServiceNameTooLong(name.len()));
        }
        Ok(Self(name))
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the `ServiceName` and returns the inner String.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl Borrow<str> for ServiceName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ServiceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for ServiceName {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
