//! Request handler contract and reply types.

use std::fmt;

use bytes::Bytes;

/// Callback serving requests for an advertised service.
///
/// Handlers run on the task that drives the event loop, one at a time. A
/// status of 0 means success; any other value is an application failure that
/// travels back to the caller inside the [`Reply`].
pub trait RequestHandler: Send + Sync {
    /// Serves one request and returns the response payload and status.
    fn handle(&self, service: &str, payload: &[u8]) -> (Vec<u8>, i32);
}

impl<F> RequestHandler for F
where
    F: Fn(&str, &[u8]) -> (Vec<u8>, i32) + Send + Sync,
{
    fn handle(&self, service: &str, payload: &[u8]) -> (Vec<u8>, i32) {
        self(service, payload)
    }
}

/// Outcome carried by a response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseStatus {
    /// The handler succeeded.
    Ok,
    /// The handler returned a non-zero status, clamped to `1..=252`.
    Application(u8),
    /// The response did not fit into one datagram and was dropped.
    ResponseTooLarge,
    /// The handler panicked.
    HandlerPanicked,
    /// The receiving node does not advertise the service.
    NoSuchService,
}

impl ResponseStatus {
    /// Highest application code representable on the wire.
    pub const MAX_APPLICATION_CODE: u8 = 252;

    /// Maps a handler status to a wire status.
    ///
    /// Codes outside `1..=252` (negative or too large) collapse to 252.
    #[must_use]
    pub fn from_handler_code(code: i32) -> Self {
        if code == 0 {
            return Self::Ok;
        }
        match u8::try_from(code) {
            Ok(c) if c <= Self::MAX_APPLICATION_CODE => Self::Application(c),
            _ => Self::Application(Self::MAX_APPLICATION_CODE),
        }
    }

    /// Decodes the status byte of a response envelope.
    #[must_use]
    pub fn from_wire(byte: u8) -> Self {
        match byte {
            0 => Self::Ok,
            253 => Self::ResponseTooLarge,
            254 => Self::HandlerPanicked,
            255 => Self::NoSuchService,
            code => Self::Application(code),
        }
    }

    /// Encodes the status as its wire byte.
    #[must_use]
    pub fn to_wire(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::Application(code) => code.clamp(1, Self::MAX_APPLICATION_CODE),
            Self::ResponseTooLarge => 253,
            Self::HandlerPanicked => 254,
            Self::NoSuchService => 255,
        }
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Application(code) => write!(f, "application error {code}"),
            Self::ResponseTooLarge => write!(f, "response too large"),
            Self::HandlerPanicked => write!(f, "handler panicked"),
            Self::NoSuchService => write!(f, "no such service"),
        }
    }
}

/// Result of a completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Response bytes produced by the handler.
    pub payload: Bytes,
    /// Outcome reported by the provider.
    pub status: ResponseStatus,
}

impl Reply {
    /// Creates a reply.
    #[must_use]
    pub fn new(payload: impl Into<Bytes>, status: ResponseStatus) -> Self {
        Self {
            payload: payload.into(),
            status,
        }
    }

    /// Returns `true` when the handler reported success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Ok
    }

    /// Returns the payload as UTF-8 text, replacing invalid sequences.
    #[must_use]
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_is_handler() {
        let handler = |service: &str, payload: &[u8]| (format!("{service}:{}", payload.len()).into_bytes(), 0);
        let (out, status) = handler.handle("echo", b"abc");
        assert_eq!(out, b"echo:3");
        assert_eq!(status, 0);
    }

    #[test]
    fn test_handler_code_mapping() {
        assert_eq!(ResponseStatus::from_handler_code(0), ResponseStatus::Ok);
        assert_eq!(
            ResponseStatus::from_handler_code(7),
            ResponseStatus::Application(7)
        );
        assert_eq!(
            ResponseStatus::from_handler_code(-1),
            ResponseStatus::Application(252)
        );
        assert_eq!(
            ResponseStatus::from_handler_code(1000),
            ResponseStatus::Application(252)
        );
    }

    #[test]
    fn test_wire_bytes() {
        assert_eq!(ResponseStatus::Ok.to_wire(), 0);
        assert_eq!(ResponseStatus::ResponseTooLarge.to_wire(), 253);
        assert_eq!(ResponseStatus::HandlerPanicked.to_wire(), 254);
        assert_eq!(ResponseStatus::NoSuchService.to_wire(), 255);
        assert_eq!(ResponseStatus::from_wire(42), ResponseStatus::Application(42));
        assert_eq!(ResponseStatus::from_wire(255), ResponseStatus::NoSuchService);
    }

    #[test]
    fn test_reply_success() {
        assert!(Reply::new(&b"hello"[..], ResponseStatus::Ok).is_success());
        assert!(!Reply::new(Bytes::new(), ResponseStatus::Application(3)).is_success());
    }
}
