//! Request correlation and handler dispatch.

use std::cell::Cell;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, error};

use super::error::{CodecError, RpcError};
use super::handler::{Reply, RequestHandler, ResponseStatus};
use super::types::{Endpoint, NodeId, ServiceName};
use super::wire::Envelope;

/// Channel end a caller waits on.
pub type ReplyReceiver = oneshot::Receiver<Result<Reply, RpcError>>;

thread_local! {
    static IN_HANDLER: Cell<bool> = const { Cell::new(false) };
}

/// Returns `true` while the current thread is running a request handler.
#[must_use]
pub fn in_handler() -> bool {
    IN_HANDLER.with(Cell::get)
}

struct HandlerScope {
    outer: bool,
}

impl HandlerScope {
    fn enter() -> Self {
        Self {
            outer: IN_HANDLER.with(|flag| flag.replace(true)),
        }
    }
}

impl Drop for HandlerScope {
    fn drop(&mut self) {
        IN_HANDLER.with(|flag| flag.set(self.outer));
    }
}

/// Runs `handler`, converting a panic into [`ResponseStatus::HandlerPanicked`].
pub fn invoke(handler: &dyn RequestHandler, service: &str, payload: &[u8]) -> (Bytes, ResponseStatus) {
    let _scope = HandlerScope::enter();
    match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(service, payload))) {
        Ok((body, code)) => (Bytes::from(body), ResponseStatus::from_handler_code(code)),
        Err(cause) => {
            let reason = cause
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| cause.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".into());
            error!(service, %reason, "Request handler panicked");
            (Bytes::new(), ResponseStatus::HandlerPanicked)
        }
    }
}

/// Serves an inbound request and encodes the response envelope.
///
/// An unknown service yields `NoSuchService`; a response too large for one
/// datagram is replaced by an empty `ResponseTooLarge` response.
///
/// # Errors
/// Returns a `CodecError` only if even the empty response cannot be encoded.
pub fn respond(
    handler: Option<&Arc<dyn RequestHandler>>,
    request: &Envelope,
    node_id: NodeId,
    local: Endpoint,
) -> Result<(Bytes, ResponseStatus), CodecError> {
    let (payload, status) = match handler {
        Some(handler) => invoke(handler.as_ref(), request.service.as_str(), &request.payload),
        None => (Bytes::new(), ResponseStatus::NoSuchService),
    };
    let correlation_id = request.correlation_id.unwrap_or_default();
    let response = Envelope::response(
        node_id,
        request.service.clone(),
        correlation_id,
        local,
        payload,
        status,
    );
    match response.encode() {
        Ok(bytes) => Ok((bytes, status)),
        Err(CodecError::TooLarge(len)) => {
            debug!(service = %request.service, len, "Response exceeds datagram limit");
            let truncated = Envelope::response(
                node_id,
                request.service.clone(),
                correlation_id,
                local,
                Bytes::new(),
                ResponseStatus::ResponseTooLarge,
            );
            Ok((truncated.encode()?, ResponseStatus::ResponseTooLarge))
        }
        Err(e) => Err(e),
    }
}

struct PendingRequest {
    service: ServiceName,
    target: Endpoint,
    deadline: Instant,
    timeout: Duration,
    reply: oneshot::Sender<Result<Reply, RpcError>>,
}

/// What happened to an inbound response.
#[derive(Debug, PartialEq, Eq)]
pub enum Completion {
    /// The waiting caller received the reply.
    Delivered,
    /// The provider no longer offers the service; the caller got `NoProvider`.
    NoSuchService {
        /// Service that was requested.
        service: ServiceName,
        /// Provider that should be forgotten.
        provider: Endpoint,
    },
    /// No outstanding request has this correlation id (late or duplicate).
    Unknown,
    /// The response came from another endpoint than the request went to.
    Mismatched,
}

/// Outstanding requests keyed by correlation id.
#[derive(Default)]
pub struct PendingTable {
    next_id: u64,
    entries: HashMap<u64, PendingRequest>,
    closed: bool,
}

impl PendingTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a request and returns its correlation id and reply channel.
    ///
    /// # Errors
    /// Returns `RpcError::Shutdown` once the table has been drained.
    pub fn register(
        &mut self,
        service: ServiceName,
        target: Endpoint,
        timeout: Duration,
        now: Instant,
    ) -> Result<(u64, ReplyReceiver), RpcError> {
        if self.closed {
            return Err(RpcError::Shutdown);
        }
        let id = loop {
            self.next_id = self.next_id.wrapping_add(1);
            if self.next_id != 0 && !self.entries.contains_key(&self.next_id) {
                break self.next_id;
            }
        };
        let (tx, rx) = oneshot::channel();
        self.entries.insert(
            id,
            PendingRequest {
                service,
                target,
                deadline: now + timeout,
                timeout,
                reply: tx,
            },
        );
        Ok((id, rx))
    }

    /// Drops a request without answering it.
    pub fn cancel(&mut self, id: u64) {
        self.entries.remove(&id);
    }

    /// Resolves a request with an error. Returns `false` if it was not pending.
    pub fn fail(&mut self, id: u64, err: RpcError) -> bool {
        match self.entries.remove(&id) {
            Some(pending) => {
                let _ = pending.reply.send(Err(err));
                true
            }
            None => false,
        }
    }

    /// Matches a response envelope against the outstanding requests.
    pub fn complete(&mut self, response: &Envelope) -> Completion {
        let Some(id) = response.correlation_id else {
            return Completion::Unknown;
        };
        let Some(pending) = self.entries.get(&id) else {
            return Completion::Unknown;
        };
        if pending.target != response.sender {
            return Completion::Mismatched;
        }
        let Some(pending) = self.entries.remove(&id) else {
            return Completion::Unknown;
        };

        let status = response.status.unwrap_or(ResponseStatus::Ok);
        if status == ResponseStatus::NoSuchService {
            let _ = pending
                .reply
                .send(Err(RpcError::NoProvider(pending.service.to_string())));
            return Completion::NoSuchService {
                service: pending.service,
                provider: pending.target,
            };
        }
        let _ = pending
            .reply
            .send(Ok(Reply::new(response.payload.clone(), status)));
        Completion::Delivered
    }

    /// Fails every request whose deadline has passed with `Timeout`.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let expired: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            if let Some(pending) = self.entries.remove(id) {
                debug!(service = %pending.service, correlation_id = id, "Request timed out");
                let _ = pending.reply.send(Err(RpcError::Timeout(pending.timeout)));
            }
        }
        expired.len()
    }

    /// Earliest deadline among outstanding requests.
    #[must_use]
    pub fn soonest_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|p| p.deadline).min()
    }

    /// Fails every request with `Shutdown` and refuses new ones.
    pub fn close(&mut self) -> usize {
        self.closed = true;
        let drained = self.entries.len();
        for (_, pending) in self.entries.drain() {
            let _ = pending.reply.send(Err(RpcError::Shutdown));
        }
        drained
    }

    /// Number of outstanding requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing is outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(port: u16) -> Endpoint {
        Endpoint::new(&format!("127.0.0.1:{port}")).unwrap()
    }

    fn name(s: &str) -> ServiceName {
        ServiceName::new(s).unwrap()
    }

    fn response(id: u64, from: Endpoint, status: ResponseStatus) -> Envelope {
        Envelope::response(NodeId::new(), name("svc"), id, from, Bytes::from_static(b"ok"), status)
    }

    #[test]
    fn test_invoke_maps_status() {
        let echo = |_: &str, p: &[u8]| (p.to_vec(), 0);
        assert_eq!(invoke(&echo, "svc", b"hi"), (Bytes::from_static(b"hi"), ResponseStatus::Ok));

        let failing = |_: &str, _: &[u8]| (Vec::new(), 5);
        assert_eq!(invoke(&failing, "svc", b"").1, ResponseStatus::Application(5));
    }

    #[test]
    fn test_invoke_isolates_panic() {
        let boom = |_: &str, _: &[u8]| -> (Vec<u8>, i32) { panic!("boom") };
        let (payload, status) = invoke(&boom, "svc", b"");
        assert!(payload.is_empty());
        assert_eq!(status, ResponseStatus::HandlerPanicked);
        assert!(!in_handler());
    }

    #[test]
    fn test_in_handler_flag() {
        let check_flag = |_: &str, _: &[u8]| (vec![u8::from(in_handler())], 0);
        assert_eq!(&invoke(&check_flag, "svc", b"").0[..], &[1]);
        assert!(!in_handler());
    }

    #[test]
    fn test_respond_unknown_service() {
        let request = Envelope::request(NodeId::new(), name("svc"), 4, ep(2), Bytes::new());
        let (bytes, status) = respond(None, &request, NodeId::new(), ep(1)).unwrap();
        assert_eq!(status, ResponseStatus::NoSuchService);
        let decoded = Envelope::decode(&bytes).unwrap();
        assert_eq!(decoded.correlation_id, Some(4));
        assert_eq!(decoded.status, Some(ResponseStatus::NoSuchService));
    }

    #[test]
    fn test_respond_too_large() {
        let big: Arc<dyn RequestHandler> = Arc::new(|_: &str, _: &[u8]| (vec![7u8; 70_000], 0));
        let request = Envelope::request(NodeId::new(), name("svc"), 1, ep(2), Bytes::new());
        let (bytes, status) = respond(Some(&big), &request, NodeId::new(), ep(1)).unwrap();
        assert_eq!(status, ResponseStatus::ResponseTooLarge);
        assert!(Envelope::decode(&bytes).unwrap().payload.is_empty());
    }

    #[test]
    fn test_complete_delivers_reply() {
        let mut table = PendingTable::new();
        let (id, mut rx) = table
            .register(name("svc"), ep(2), Duration::from_secs(1), Instant::now())
            .unwrap();

        assert_eq!(table.complete(&response(id, ep(2), ResponseStatus::Ok)), Completion::Delivered);
        let reply = rx.try_recv().unwrap().unwrap();
        assert_eq!(&reply.payload[..], b"ok");
        assert!(table.is_empty());

        // Late duplicate.
        assert_eq!(table.complete(&response(id, ep(2), ResponseStatus::Ok)), Completion::Unknown);
    }

    #[test]
    fn test_complete_rejects_foreign_sender() {
        let mut table = PendingTable::new();
        let (id, _rx) = table
            .register(name("svc"), ep(2), Duration::from_secs(1), Instant::now())
            .unwrap();
        assert_eq!(table.complete(&response(id, ep(3), ResponseStatus::Ok)), Completion::Mismatched);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_no_such_service_becomes_no_provider() {
        let mut table = PendingTable::new();
        let (id, mut rx) = table
            .register(name("svc"), ep(2), Duration::from_secs(1), Instant::now())
            .unwrap();
        assert_eq!(
            table.complete(&response(id, ep(2), ResponseStatus::NoSuchService)),
            Completion::NoSuchService {
                service: name("svc"),
                provider: ep(2)
            }
        );
        assert!(matches!(rx.try_recv().unwrap(), Err(RpcError::NoProvider(_))));
    }

    #[test]
    fn test_sweep_times_out_expired_only() {
        let mut table = PendingTable::new();
        let t0 = Instant::now();
        let (_, mut short) = table.register(name("svc"), ep(2), Duration::from_millis(10), t0).unwrap();
        let (_, mut long) = table.register(name("svc"), ep(2), Duration::from_secs(10), t0).unwrap();

        assert_eq!(table.soonest_deadline(), Some(t0 + Duration::from_millis(10)));
        assert_eq!(table.sweep(t0 + Duration::from_millis(5)), 0);
        assert_eq!(table.sweep(t0 + Duration::from_millis(10)), 1);
        assert!(matches!(short.try_recv().unwrap(), Err(RpcError::Timeout(_))));
        assert!(long.try_recv().is_err());
    }

    #[test]
    fn test_close_fails_everything_and_refuses_new() {
        let mut table = PendingTable::new();
        let (_, mut rx) = table
            .register(name("svc"), ep(2), Duration::from_secs(1), Instant::now())
            .unwrap();
        assert_eq!(table.close(), 1);
        assert!(matches!(rx.try_recv().unwrap(), Err(RpcError::Shutdown)));
        assert!(matches!(
            table.register(name("svc"), ep(2), Duration::from_secs(1), Instant::now()),
            Err(RpcError::Shutdown)
        ));
    }

    #[test]
    fn test_correlation_ids_are_unique() {
        let mut table = PendingTable::new();
        let now = Instant::now();
        let (a, _ra) = table.register(name("svc"), ep(2), Duration::from_secs(1), now).unwrap();
        let (b, _rb) = table.register(name("svc"), ep(2), Duration::from_secs(1), now).unwrap();
        assert_ne!(a, b);
    }
}
