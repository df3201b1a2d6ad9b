//! The node handle and its event loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, instrument, trace, warn};

use super::discovery::{DiscoveryEngine, Outgoing, Role, Targets};
use super::error::{NodeError, RpcError};
use super::handler::{Reply, RequestHandler};
use super::registry::{AdvertiseOutcome, RemoteProvider, ServiceRegistry};
use super::rpc::{self, Completion, PendingTable, ReplyReceiver};
use super::transport::{Datagram, Transport, TransportError, UdpTransport};
use super::types::{Endpoint, NodeConfig, NodeId, ServiceName};
use super::wire::{Envelope, EnvelopeKind};
use crate::infrastructure::audit::{log_audit, AuditEvent};

/// Pause after a failed receive so a broken socket does not spin the CPU.
const RECV_BACKOFF: Duration = Duration::from_millis(50);

enum LoopCommand {
    Send {
        service: ServiceName,
        correlation_id: u64,
        target: Endpoint,
        bytes: Bytes,
    },
    Announce(ServiceName),
    Withdraw(ServiceName),
    Query(ServiceName),
}

enum Event {
    Shutdown,
    Command(LoopCommand),
    Datagram(Result<Datagram, TransportError>),
    Wake,
}

struct LoopState {
    commands: mpsc::UnboundedReceiver<LoopCommand>,
    shutdown: watch::Receiver<bool>,
    discovery: DiscoveryEngine,
}

struct NodeInner {
    id: NodeId,
    endpoint: Endpoint,
    role: Role,
    config: NodeConfig,
    transport: Arc<dyn Transport>,
    registry: RwLock<ServiceRegistry>,
    pending: Mutex<PendingTable>,
    commands: mpsc::UnboundedSender<LoopCommand>,
    loop_state: tokio::sync::Mutex<LoopState>,
    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
}

/// A participant of the discovery domain.
///
/// `Node` is a cheap handle; clones share the same tables and event loop.
/// Exactly one task drives the loop through [`spin`](Self::spin) or
/// [`spin_once`](Self::spin_once). Request handlers run on that task.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.inner.id)
            .field("endpoint", &self.inner.endpoint)
            .field("role", &self.inner.role)
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Creates a node on UDP sockets bound according to `config`.
    ///
    /// # Errors
    /// Returns `NodeError::Transport` if the sockets cannot be bound.
    pub async fn bind(config: NodeConfig) -> Result<Self, NodeError> {
        let transport = UdpTransport::bind(&config).await?;
        Ok(Self::with_transport(config, transport))
    }

    /// Creates a node on an arbitrary transport.
    #[must_use]
    pub fn with_transport(config: NodeConfig, transport: impl Transport) -> Self {
        let id = NodeId::new();
        let endpoint = transport.local_endpoint();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let discovery = DiscoveryEngine::new(
            id,
            endpoint,
            config.discovery.clone(),
            config.master,
            Instant::now(),
        );
        let role = discovery.role();

        info!(node_id = %id, %endpoint, ?role, "Node created");
        log_audit(&AuditEvent::NodeStarted {
            node_id: id.to_string(),
            endpoint: endpoint.to_string(),
        });

        Self {
            inner: Arc::new(NodeInner {
                id,
                endpoint,
                role,
                config,
                transport: Arc::new(transport),
                registry: RwLock::new(ServiceRegistry::new()),
                pending: Mutex::new(PendingTable::new()),
                commands: commands_tx,
                loop_state: tokio::sync::Mutex::new(LoopState {
                    commands: commands_rx,
                    shutdown: shutdown_rx,
                    discovery,
                }),
                shutdown: shutdown_tx,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Id carried in every envelope this node sends.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Endpoint peers send requests to.
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        self.inner.endpoint
    }

    /// Position of this node in the discovery topology.
    #[must_use]
    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// Configuration the node was built with.
    #[must_use]
    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Registers `handler` under `name` and announces it.
    ///
    /// The handler is callable in-process right away; peers learn about it
    /// once the event loop sends the announcement.
    ///
    /// # Errors
    /// Returns `NodeError::InvalidService` for a bad name and
    /// `NodeError::Shutdown` after shutdown.
    pub fn advertise(
        &self,
        name: &str,
        handler: impl RequestHandler + 'static,
    ) -> Result<AdvertiseOutcome, NodeError> {
        let name = ServiceName::new(name)?;
        if self.is_shut_down() {
            return Err(NodeError::Shutdown);
        }
        let outcome = self
            .inner
            .registry
            .write()
            .advertise(name.clone(), Arc::new(handler));
        if outcome == AdvertiseOutcome::Replaced {
            debug!(service = %name, "Service already advertised locally, handler replaced");
        }
        log_audit(&AuditEvent::ServiceAdvertised {
            service: name.to_string(),
        });
        self.enqueue(LoopCommand::Announce(name));
        Ok(outcome)
    }

    /// Removes a local service and tells peers to forget it.
    ///
    /// # Errors
    /// Returns `NodeError::NotFound` if `name` is not advertised here.
    pub fn unadvertise(&self, name: &str) -> Result<(), NodeError> {
        let name = ServiceName::new(name)?;
        if !self.inner.registry.write().unadvertise(name.as_str()) {
            return Err(NodeError::NotFound(name.into_string()));
        }
        log_audit(&AuditEvent::ServiceWithdrawn {
            service: name.to_string(),
        });
        self.enqueue(LoopCommand::Withdraw(name));
        Ok(())
    }

    /// Names of the services advertised by this node.
    #[must_use]
    pub fn local_services(&self) -> Vec<ServiceName> {
        self.inner.registry.read().local_services()
    }

    /// Remote providers currently known for `name`.
    #[must_use]
    pub fn providers(&self, name: &str) -> Vec<RemoteProvider> {
        self.inner.registry.read().providers(name)
    }

    /// Number of requests waiting for a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Calls `name` with the configured default timeout.
    ///
    /// # Errors
    /// See [`request`](Self::request).
    pub async fn call(&self, name: &str, payload: &[u8]) -> Result<Reply, RpcError> {
        self.request(name, payload, self.inner.config.request_timeout)
            .await
    }

    /// Calls `name` and waits for its reply.
    ///
    /// A service advertised by this node is served in-process. Otherwise the
    /// most recently seen remote provider is used. Without any provider a
    /// query is sent and `NoProvider` is returned at once.
    ///
    /// When no task is spinning the node, the calling task drives the event
    /// loop itself until the reply arrives or the deadline passes.
    ///
    /// # Errors
    /// Returns `NoProvider`, `Timeout`, `Transport`, `Shutdown`,
    /// `PayloadTooLarge` or `InvalidService`.
    #[instrument(skip(self, payload), fields(len = payload.len()))]
    pub async fn request(
        &self,
        name: &str,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Reply, RpcError> {
        let result = match self.call_local(name, payload) {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => match self.dispatch_remote(name, payload, timeout) {
                Ok(rx) => self.await_reply(rx).await,
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        record_outcome(&result);
        result
    }

    /// Blocking form of [`request`](Self::request) for plain threads.
    ///
    /// In-process self-calls are allowed everywhere, including inside a
    /// handler.
    ///
    /// # Errors
    /// As [`request`](Self::request), plus `Reentrant` when a remote call is
    /// attempted from inside a handler or from an async context, where
    /// blocking would stall the event loop.
    pub fn request_blocking(
        &self,
        name: &str,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Reply, RpcError> {
        let result = match self.call_local(name, payload) {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) if rpc::in_handler() || tokio::runtime::Handle::try_current().is_ok() => {
                Err(RpcError::Reentrant)
            }
            Ok(None) => match self.dispatch_remote(name, payload, timeout) {
                Ok(rx) => rx.blocking_recv().unwrap_or(Err(RpcError::Shutdown)),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        record_outcome(&result);
        result
    }

    async fn await_reply(&self, mut rx: ReplyReceiver) -> Result<Reply, RpcError> {
        let Ok(mut state) = self.inner.loop_state.try_lock() else {
            return rx.await.unwrap_or(Err(RpcError::Shutdown));
        };
        loop {
            match rx.try_recv() {
                Ok(result) => return result,
                Err(TryRecvError::Closed) => return Err(RpcError::Shutdown),
                Err(TryRecvError::Empty) => {}
            }
            if *state.shutdown.borrow() {
                return Err(RpcError::Shutdown);
            }
            self.turn(&mut state, None).await;
        }
    }

    fn call_local(&self, name: &str, payload: &[u8]) -> Result<Option<Reply>, RpcError> {
        let name = ServiceName::new(name)?;
        if self.is_shut_down() {
            return Err(RpcError::Shutdown);
        }
        // Clone the handler out so the lock is released before it runs.
        let Some(handler) = self.inner.registry.read().local_handler(name.as_str()) else {
            return Ok(None);
        };
        trace!(service = %name, "Serving self-call in-process");
        let (body, status) = rpc::invoke(handler.as_ref(), name.as_str(), payload);
        Ok(Some(Reply::new(body, status)))
    }

    fn dispatch_remote(
        &self,
        name: &str,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<ReplyReceiver, RpcError> {
        let name = ServiceName::new(name)?;
        let Some(target) = self.inner.registry.read().select_provider(name.as_str()) else {
            debug!(service = %name, "No known provider, querying");
            self.enqueue(LoopCommand::Query(name.clone()));
            return Err(RpcError::NoProvider(name.into_string()));
        };

        let mut pending = self.inner.pending.lock();
        let (correlation_id, rx) =
            pending.register(name.clone(), target, timeout, Instant::now())?;
        let envelope = Envelope::request(
            self.inner.id,
            name.clone(),
            correlation_id,
            self.inner.endpoint,
            Bytes::copy_from_slice(payload),
        );
        let bytes = match envelope.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                pending.cancel(correlation_id);
                debug!(service = %envelope.service, error = %e, "Request rejected");
                return Err(RpcError::PayloadTooLarge(envelope.encoded_len()));
            }
        };
        metrics::gauge!("beacon_pending_requests").set(pending.len() as f64);
        drop(pending);

        self.enqueue(LoopCommand::Send {
            service: name,
            correlation_id,
            target,
            bytes,
        });
        Ok(rx)
    }

    fn enqueue(&self, command: LoopCommand) {
        // The receiver lives in `inner`, so this only fails during teardown.
        let _ = self.inner.commands.send(command);
    }

    /// Stops the node.
    ///
    /// Every waiting request fails with `Shutdown`, local services are
    /// withdrawn and a running [`spin`](Self::spin) returns. Calling it twice
    /// is harmless.
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let drained = self.inner.pending.lock().close();
        metrics::gauge!("beacon_pending_requests").set(0.0);

        let services = {
            let mut registry = self.inner.registry.write();
            let names = registry.local_services();
            for name in &names {
                registry.unadvertise(name.as_str());
            }
            names
        };
        for name in services {
            self.enqueue(LoopCommand::Withdraw(name));
        }

        self.inner.shutdown.send_replace(true);
        info!(node_id = %self.inner.id, drained, "Node shut down");
        log_audit(&AuditEvent::NodeStopped {
            reason: "shutdown requested".into(),
        });
    }

    /// Drives the event loop until [`shutdown`](Self::shutdown) is called.
    ///
    /// # Errors
    /// Returns `NodeError::AlreadySpinning` if another task drives the loop.
    pub async fn spin(&self) -> Result<(), NodeError> {
        let mut state = self
            .inner
            .loop_state
            .try_lock()
            .map_err(|_| NodeError::AlreadySpinning)?;
        debug!(node_id = %self.inner.id, "Event loop started");
        while !*state.shutdown.borrow() {
            self.turn(&mut state, None).await;
        }
        self.flush_withdrawals(&mut state).await;
        debug!(node_id = %self.inner.id, "Event loop stopped");
        Ok(())
    }

    /// Runs a single loop turn, waiting at most `max_wait` for activity.
    ///
    /// # Errors
    /// Returns `NodeError::AlreadySpinning` if another task drives the loop
    /// and `NodeError::Shutdown` after shutdown.
    pub async fn spin_once(&self, max_wait: Duration) -> Result<(), NodeError> {
        let mut state = self
            .inner
            .loop_state
            .try_lock()
            .map_err(|_| NodeError::AlreadySpinning)?;
        if *state.shutdown.borrow() {
            self.flush_withdrawals(&mut state).await;
            return Err(NodeError::Shutdown);
        }
        self.turn(&mut state, Some(max_wait)).await;
        Ok(())
    }

    async fn turn(&self, state: &mut LoopState, max_wait: Option<Duration>) {
        let now = Instant::now();
        let mut wake = state.discovery.next_tick();
        if let Some(deadline) = self.inner.pending.lock().soonest_deadline() {
            wake = wake.min(deadline);
        }
        if let Some(max_wait) = max_wait {
            wake = wake.min(now + max_wait);
        }

        let event = tokio::select! {
            biased;
            _ = state.shutdown.changed() => Event::Shutdown,
            cmd = state.commands.recv() => cmd.map_or(Event::Wake, Event::Command),
            received = self.inner.transport.recv() => Event::Datagram(received),
            () = tokio::time::sleep_until(wake) => Event::Wake,
        };

        match event {
            Event::Shutdown => return,
            Event::Command(command) => self.execute(state, command).await,
            Event::Datagram(Ok(datagram)) => self.on_datagram(state, datagram).await,
            Event::Datagram(Err(e)) => {
                warn!(error = %e, "Receive failed");
                tokio::time::sleep(RECV_BACKOFF).await;
            }
            Event::Wake => {}
        }

        self.housekeeping(state).await;
    }

    async fn execute(&self, state: &mut LoopState, command: LoopCommand) {
        match command {
            LoopCommand::Send {
                service,
                correlation_id,
                target,
                bytes,
            } => {
                state.discovery.touch(&service, Instant::now());
                if let Err(e) = self.inner.transport.send_to(&target, &bytes).await {
                    warn!(%target, error = %e, "Request send failed");
                    self.inner
                        .pending
                        .lock()
                        .fail(correlation_id, RpcError::Transport(e));
                }
            }
            LoopCommand::Announce(name) => {
                let still_local = self.inner.registry.read().is_local(name.as_str());
                if still_local {
                    let out = state.discovery.announce(&name);
                    self.send_all(out).await;
                }
            }
            LoopCommand::Withdraw(name) => {
                let out = state.discovery.withdraw(&name);
                self.send_all(out).await;
            }
            LoopCommand::Query(name) => {
                let out = state.discovery.query(&name, Instant::now());
                self.send_all(out).await;
            }
        }
    }

    async fn on_datagram(&self, state: &mut LoopState, datagram: Datagram) {
        let envelope = match Envelope::decode(&datagram.bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(from = %datagram.from, error = %e, "Dropping malformed datagram");
                return;
            }
        };
        if envelope.node_id == self.inner.id {
            return;
        }
        self.log_envelope("recv", &envelope);

        match envelope.kind {
            EnvelopeKind::Announce | EnvelopeKind::Query | EnvelopeKind::Withdraw => {
                let out = {
                    let mut registry = self.inner.registry.write();
                    state
                        .discovery
                        .handle(&envelope, &mut registry, Instant::now())
                };
                self.send_all(out).await;
            }
            EnvelopeKind::Request => self.serve(&envelope).await,
            EnvelopeKind::Response => {
                let completion = self.inner.pending.lock().complete(&envelope);
                match completion {
                    Completion::Delivered => {}
                    Completion::NoSuchService { service, provider } => {
                        debug!(%service, %provider, "Provider no longer offers service");
                        let removed = self
                            .inner
                            .registry
                            .write()
                            .remove_provider(service.as_str(), &provider);
                        if removed {
                            metrics::counter!("beacon_providers_evicted_total").increment(1);
                        }
                    }
                    Completion::Unknown => {
                        debug!(correlation_id = ?envelope.correlation_id, "Dropping late or unknown response");
                    }
                    Completion::Mismatched => {
                        debug!(from = %envelope.sender, "Dropping response from unexpected sender");
                    }
                }
            }
        }
    }

    async fn serve(&self, request: &Envelope) {
        let handler = self
            .inner
            .registry
            .read()
            .local_handler(request.service.as_str());
        match rpc::respond(handler.as_ref(), request, self.inner.id, self.inner.endpoint) {
            Ok((bytes, status)) => {
                metrics::counter!("beacon_requests_served_total").increment(1);
                trace!(service = %request.service, %status, "Request served");
                if let Err(e) = self.inner.transport.send_to(&request.sender, &bytes).await {
                    warn!(to = %request.sender, error = %e, "Response send failed");
                }
            }
            Err(e) => warn!(service = %request.service, error = %e, "Could not encode response"),
        }
    }

    async fn housekeeping(&self, state: &mut LoopState) {
        let now = Instant::now();
        if now >= state.discovery.next_tick() {
            let report = {
                let mut registry = self.inner.registry.write();
                state.discovery.tick(&mut registry, now)
            };
            for (service, provider) in &report.evicted {
                debug!(%service, %provider, "Provider lease expired");
            }
            for member in &report.departed {
                debug!(%member, "Rendezvous member lease expired");
            }
            if !report.evicted.is_empty() {
                metrics::counter!("beacon_providers_evicted_total")
                    .increment(report.evicted.len() as u64);
            }
            self.send_all(report.outgoing).await;
        }

        let mut pending = self.inner.pending.lock();
        let expired = pending.sweep(now);
        if expired > 0 {
            metrics::counter!("beacon_requests_timed_out_total").increment(expired as u64);
        }
        metrics::gauge!("beacon_pending_requests").set(pending.len() as f64);
    }

    async fn flush_withdrawals(&self, state: &mut LoopState) {
        while let Ok(command) = state.commands.try_recv() {
            if let LoopCommand::Withdraw(name) = command {
                let out = state.discovery.withdraw(&name);
                self.send_all(out).await;
            }
        }
    }

    async fn send_all(&self, outgoing: Vec<Outgoing>) {
        for Outgoing { envelope, targets } in outgoing {
            let bytes = match envelope.encode() {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(service = %envelope.service, error = %e, "Could not encode envelope");
                    continue;
                }
            };
            self.log_envelope("send", &envelope);
            if envelope.kind == EnvelopeKind::Announce {
                metrics::counter!("beacon_announcements_sent_total").increment(1);
            }
            match targets {
                Targets::Broadcast => {
                    if let Err(e) = self.inner.transport.broadcast(&bytes).await {
                        warn!(error = %e, "Broadcast failed");
                    }
                }
                Targets::Unicast(endpoints) => {
                    for target in endpoints {
                        if let Err(e) = self.inner.transport.send_to(&target, &bytes).await {
                            warn!(%target, error = %e, "Discovery send failed");
                        }
                    }
                }
            }
        }
    }

    fn log_envelope(&self, direction: &'static str, envelope: &Envelope) {
        if self.inner.config.verbose {
            info!(direction, kind = ?envelope.kind, service = %envelope.service, peer = %envelope.sender, "Envelope");
        } else {
            trace!(direction, kind = ?envelope.kind, service = %envelope.service, peer = %envelope.sender, "Envelope");
        }
    }
}

fn record_outcome(result: &Result<Reply, RpcError>) {
    let outcome = match result {
        Ok(reply) if reply.is_success() => "ok",
        Ok(_) => "failed",
        Err(e) => e.outcome(),
    };
    metrics::counter!("beacon_requests_total", "outcome" => outcome).increment(1);
}
