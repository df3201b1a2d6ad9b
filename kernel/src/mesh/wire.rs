//! Binary envelope codec.
//!
//! Every datagram carries exactly one envelope, laid out little-endian:
//!
//! ```text
//! version:u16 | node_id:[u8;16] | kind:u8 | name_len:u8 | name
//! | [correlation_id:u64]          (Request, Response)
//! | sender_len:u16 | sender "ip:port"
//! | payload_len:u32 | payload
//! | [status:u8]                   (Response)
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::CodecError;
use super::handler::ResponseStatus;
use super::types::{Endpoint, NodeId, ServiceName};

/// Protocol version written into every envelope.
pub const PROTOCOL_VERSION: u16 = 1;
/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Discriminates the five envelope kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EnvelopeKind {
    /// "I provide this service at this endpoint."
    Announce = 1,
    /// "Who provides this service?"
    Query = 2,
    /// Invocation of a remote service.
    Request = 3,
    /// Result of a request.
    Response = 4,
    /// "I no longer provide this service."
    Withdraw = 5,
}

impl EnvelopeKind {
    fn has_correlation(self) -> bool {
        matches!(self, Self::Request | Self::Response)
    }

    /// Returns `true` for the kinds handled by the discovery engine.
    #[must_use]
    pub fn is_discovery(self) -> bool {
        matches!(self, Self::Announce | Self::Query | Self::Withdraw)
    }
}

impl TryFrom<u8> for EnvelopeKind {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Announce),
            2 => Ok(Self::Query),
            3 => Ok(Self::Request),
            4 => Ok(Self::Response),
            5 => Ok(Self::Withdraw),
            other => Err(CodecError::UnknownKind(other)),
        }
    }
}

/// A decoded wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Message kind.
    pub kind: EnvelopeKind,
    /// Id of the node that produced the envelope.
    pub node_id: NodeId,
    /// Service the envelope is about.
    pub service: ServiceName,
    /// Correlation id; present for requests and responses only.
    pub correlation_id: Option<u64>,
    /// Endpoint the sender receives requests and replies on.
    pub sender: Endpoint,
    /// Opaque payload bytes.
    pub payload: Bytes,
    /// Outcome; present for responses only.
    pub status: Option<ResponseStatus>,
}

impl Envelope {
    fn discovery(kind: EnvelopeKind, node_id: NodeId, service: ServiceName, sender: Endpoint) -> Self {
        Self {
            kind,
            node_id,
            service,
            correlation_id: None,
            sender,
            payload: Bytes::new(),
            status: None,
        }
    }

    /// Builds an announcement.
    #[must_use]
    pub fn announce(node_id: NodeId, service: ServiceName, sender: Endpoint) -> Self {
        Self::discovery(EnvelopeKind::Announce, node_id, service, sender)
    }

    /// Builds a provider query.
    #[must_use]
    pub fn query(node_id: NodeId, service: ServiceName, sender: Endpoint) -> Self {
        Self::discovery(EnvelopeKind::Query, node_id, service, sender)
    }

    /// Builds a withdrawal.
    #[must_use]
    pub fn withdraw(node_id: NodeId, service: ServiceName, sender: Endpoint) -> Self {
        Self::discovery(EnvelopeKind::Withdraw, node_id, service, sender)
    }

    /// Builds a request.
    #[must_use]
    pub fn request(
        node_id: NodeId,
        service: ServiceName,
        correlation_id: u64,
        sender: Endpoint,
        payload: Bytes,
    ) -> Self {
        Self {
            kind: EnvelopeKind::Request,
            node_id,
            service,
            correlation_id: Some(correlation_id),
            sender,
            payload,
            status: None,
        }
    }

    /// Builds a response.
    #[must_use]
    pub fn response(
        node_id: NodeId,
        service: ServiceName,
        correlation_id: u64,
        sender: Endpoint,
        payload: Bytes,
        status: ResponseStatus,
    ) -> Self {
        Self {
            kind: EnvelopeKind::Response,
            node_id,
            service,
            correlation_id: Some(correlation_id),
            sender,
            payload,
            status: Some(status),
        }
    }

    /// Number of bytes [`encode`](Self::encode) produces.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        let mut len = 2 + NodeId::LEN + 1 + 1 + self.service.as_str().len();
        if self.kind.has_correlation() {
            len += 8;
        }
        len += 2 + self.sender.to_string().len();
        len += 4 + self.payload.len();
        if self.kind == EnvelopeKind::Response {
            len += 1;
        }
        len
    }

    /// Serializes the envelope.
    ///
    /// # Errors
    /// Returns `CodecError::TooLarge` if the result exceeds [`MAX_DATAGRAM_SIZE`].
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        let len = self.encoded_len();
        if len > MAX_DATAGRAM_SIZE {
            return Err(CodecError::TooLarge(len));
        }
        let name = self.service.as_str().as_bytes();
        let sender = self.sender.to_string();
        let name_len = u8::try_from(name.len()).map_err(|_| CodecError::TooLarge(len))?;
        let sender_len = u16::try_from(sender.len()).map_err(|_| CodecError::TooLarge(len))?;
        let payload_len = u32::try_from(self.payload.len()).map_err(|_| CodecError::TooLarge(len))?;

        let mut buf = BytesMut::with_capacity(len);
        buf.put_u16_le(PROTOCOL_VERSION);
        buf.put_slice(self.node_id.as_bytes());
        buf.put_u8(self.kind as u8);
        buf.put_u8(name_len);
        buf.put_slice(name);
        if self.kind.has_correlation() {
            buf.put_u64_le(self.correlation_id.unwrap_or_default());
        }
        buf.put_u16_le(sender_len);
        buf.put_slice(sender.as_bytes());
        buf.put_u32_le(payload_len);
        buf.put_slice(&self.payload);
        if self.kind == EnvelopeKind::Response {
            buf.put_u8(self.status.unwrap_or(ResponseStatus::Ok).to_wire());
        }
        Ok(buf.freeze())
    }

    /// Parses one envelope; the payload shares memory with `datagram`.
    ///
    /// # Errors
    /// Returns a `CodecError` for a foreign protocol version, an unknown kind,
    /// a truncated or over-long datagram, or invalid text fields.
    pub fn decode(datagram: &Bytes) -> Result<Self, CodecError> {
        if datagram.len() > MAX_DATAGRAM_SIZE {
            return Err(CodecError::TooLarge(datagram.len()));
        }
        let mut buf = datagram.clone();

        let version = read_u16(&mut buf, "version")?;
        if version != PROTOCOL_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let mut id = [0u8; NodeId::LEN];
        take(&mut buf, NodeId::LEN, "node id")?.copy_to_slice(&mut id);
        let node_id = NodeId::from_bytes(id);
        let kind = EnvelopeKind::try_from(read_u8(&mut buf, "kind")?)?;

        let name_len = usize::from(read_u8(&mut buf, "name length")?);
        let name = utf8(take(&mut buf, name_len, "name")?, "name")?;
        let service = ServiceName::new(name).map_err(CodecError::InvalidServiceName)?;

        let correlation_id = if kind.has_correlation() {
            Some(read_u64(&mut buf, "correlation id")?)
        } else {
            None
        };

        let sender_len = usize::from(read_u16(&mut buf, "sender length")?);
        let sender = utf8(take(&mut buf, sender_len, "sender")?, "sender")?;
        let sender = Endpoint::new(&sender).map_err(CodecError::InvalidEndpoint)?;

        let payload_len = read_u32(&mut buf, "payload length")? as usize;
        let payload = take(&mut buf, payload_len, "payload")?;

        let status = if kind == EnvelopeKind::Response {
            Some(ResponseStatus::from_wire(read_u8(&mut buf, "status")?))
        } else {
            None
        };

        if buf.has_remaining() {
            return Err(CodecError::TrailingBytes(buf.remaining()));
        }

        Ok(Self {
            kind,
            node_id,
            service,
            correlation_id,
            sender,
            payload,
            status,
        })
    }
}

fn take(buf: &mut Bytes, n: usize, field: &'static str) -> Result<Bytes, CodecError> {
    if buf.remaining() < n {
        return Err(CodecError::Truncated(field));
    }
    Ok(buf.split_to(n))
}

fn read_u8(buf: &mut Bytes, field: &'static str) -> Result<u8, CodecError> {
    if buf.remaining() < 1 {
        return Err(CodecError::Truncated(field));
    }
    Ok(buf.get_u8())
}

fn read_u16(buf: &mut Bytes, field: &'static str) -> Result<u16, CodecError> {
    if buf.remaining() < 2 {
        return Err(CodecError::Truncated(field));
    }
    Ok(buf.get_u16_le())
}

fn read_u32(buf: &mut Bytes, field: &'static str) -> Result<u32, CodecError> {
    if buf.remaining() < 4 {
        return Err(CodecError::Truncated(field));
    }
    Ok(buf.get_u32_le())
}

fn read_u64(buf: &mut Bytes, field: &'static str) -> Result<u64, CodecError> {
    if buf.remaining() < 8 {
        return Err(CodecError::Truncated(field));
    }
    Ok(buf.get_u64_le())
}

fn utf8(bytes: Bytes, field: &'static str) -> Result<String, CodecError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8(field))
}
