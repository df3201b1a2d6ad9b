//! Discovery protocol state machine.
//!
//! The engine decides *what* to send and *where*; the event loop owns the
//! transport and performs the sends. Three roles exist:
//!
//! - **Broadcast**: no master configured, discovery goes to the broadcast
//!   address and every node hears every other node.
//! - **Member**: discovery goes unicast to the master endpoint.
//! - **Rendezvous**: this node owns the master endpoint. It tracks members
//!   under the same lease as providers and relays every discovery envelope
//!   it receives to all other members.

use std::collections::{BTreeMap, HashMap};

use tokio::time::Instant;
use tracing::{debug, trace};

use super::registry::ServiceRegistry;
use super::types::{DiscoveryConfig, Endpoint, NodeId, ServiceName};
use super::wire::{Envelope, EnvelopeKind};

/// Position of a node in the discovery topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Link-local broadcast discovery.
    Broadcast,
    /// Discovery through the rendezvous at `master`.
    Member {
        /// Rendezvous endpoint.
        master: Endpoint,
    },
    /// This node owns the master endpoint.
    Rendezvous,
}

impl Role {
    /// Derives the role from the configured master and the bound endpoint.
    #[must_use]
    pub fn resolve(master: Option<Endpoint>, local: Endpoint) -> Self {
        match master {
            None => Self::Broadcast,
            Some(master) if master == local => Self::Rendezvous,
            Some(master) => Self::Member { master },
        }
    }
}

/// Where an outgoing envelope goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Targets {
    /// The broadcast address of the discovery domain.
    Broadcast,
    /// Each listed endpoint.
    Unicast(Vec<Endpoint>),
}

/// An envelope the event loop must send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    /// Envelope to encode.
    pub envelope: Envelope,
    /// Destinations.
    pub targets: Targets,
}

/// Result of one periodic discovery tick.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Announcements (and interest queries) to send.
    pub outgoing: Vec<Outgoing>,
    /// Providers whose lease expired.
    pub evicted: Vec<(ServiceName, Endpoint)>,
    /// Rendezvous members whose lease expired.
    pub departed: Vec<Endpoint>,
}

/// Pure discovery logic for one node.
pub struct DiscoveryEngine {
    node_id: NodeId,
    endpoint: Endpoint,
    config: DiscoveryConfig,
    role: Role,
    members: HashMap<Endpoint, Instant>,
    interests: BTreeMap<ServiceName, Instant>,
    next_tick: Instant,
}

impl DiscoveryEngine {
    /// Creates an engine whose first tick is due at `now`.
    #[must_use]
    pub fn new(
        node_id: NodeId,
        endpoint: Endpoint,
        config: DiscoveryConfig,
        master: Option<Endpoint>,
        now: Instant,
    ) -> Self {
        Self {
            node_id,
            endpoint,
            config,
            role: Role::resolve(master, endpoint),
            members: HashMap::new(),
            interests: BTreeMap::new(),
            next_tick: now,
        }
    }

    /// Role of this node.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Instant at which [`tick`](Self::tick) is next due.
    #[must_use]
    pub fn next_tick(&self) -> Instant {
        self.next_tick
    }

    /// Endpoints currently registered with this rendezvous.
    #[must_use]
    pub fn members(&self) -> Vec<Endpoint> {
        let mut members: Vec<_> = self.members.keys().copied().collect();
        members.sort();
        members
    }

    fn targets(&self, exclude: Option<Endpoint>) -> Option<Targets> {
        match self.role {
            Role::Broadcast => Some(Targets::Broadcast),
            Role::Member { master } => Some(Targets::Unicast(vec![master])),
            Role::Rendezvous => {
                let mut members: Vec<_> = self
                    .members
                    .keys()
                    .copied()
                    .filter(|m| Some(*m) != exclude)
                    .collect();
                if members.is_empty() {
                    return None;
                }
                members.sort();
                Some(Targets::Unicast(members))
            }
        }
    }

    fn outgoing(&self, envelope: Envelope, exclude: Option<Endpoint>) -> Vec<Outgoing> {
        self.targets(exclude)
            .map(|targets| Outgoing { envelope, targets })
            .into_iter()
            .collect()
    }

    /// Announcement of a local service.
    #[must_use]
    pub fn announce(&self, name: &ServiceName) -> Vec<Outgoing> {
        self.outgoing(
            Envelope::announce(self.node_id, name.clone(), self.endpoint),
            None,
        )
    }

    /// Query for providers of `name`; members remember it as an interest.
    pub fn query(&mut self, name: &ServiceName, now: Instant) -> Vec<Outgoing> {
        self.touch(name, now);
        self.outgoing(
            Envelope::query(self.node_id, name.clone(), self.endpoint),
            None,
        )
    }

    /// Marks `name` as in use by this node.
    ///
    /// Only members keep interests; they expire after the configured
    /// interest TTL without another query or request for the name.
    pub fn touch(&mut self, name: &ServiceName, now: Instant) {
        if matches!(self.role, Role::Member { .. }) {
            self.interests.insert(name.clone(), now);
        }
    }

    /// Names this node currently re-queries, in order.
    #[must_use]
    pub fn interests(&self) -> Vec<ServiceName> {
        self.interests.keys().cloned().collect()
    }

    /// Withdrawal of a local service.
    #[must_use]
    pub fn withdraw(&self, name: &ServiceName) -> Vec<Outgoing> {
        self.outgoing(
            Envelope::withdraw(self.node_id, name.clone(), self.endpoint),
            None,
        )
    }

    /// Applies a discovery envelope received from a peer.
    ///
    /// Envelopes produced by this node are ignored. Request and response
    /// envelopes are not discovery traffic and yield nothing.
    pub fn handle(
        &mut self,
        envelope: &Envelope,
        registry: &mut ServiceRegistry,
        now: Instant,
    ) -> Vec<Outgoing> {
        if envelope.node_id == self.node_id || !envelope.kind.is_discovery() {
            return Vec::new();
        }

        let mut out = Vec::new();
        if self.role == Role::Rendezvous {
            if self.members.insert(envelope.sender, now).is_none() {
                debug!(member = %envelope.sender, "Rendezvous member joined");
            }
            out.extend(self.outgoing(envelope.clone(), Some(envelope.sender)));
        }

        match envelope.kind {
            EnvelopeKind::Announce => {
                let fresh = registry.upsert_provider(
                    envelope.service.clone(),
                    envelope.sender,
                    envelope.node_id,
                    now,
                );
                if fresh {
                    debug!(service = %envelope.service, provider = %envelope.sender, "Discovered provider");
                } else {
                    trace!(service = %envelope.service, provider = %envelope.sender, "Refreshed provider");
                }
            }
            EnvelopeKind::Query => {
                if registry.is_local(envelope.service.as_str()) {
                    out.extend(self.announce(&envelope.service));
                }
            }
            EnvelopeKind::Withdraw => {
                if registry.remove_provider(envelope.service.as_str(), &envelope.sender) {
                    debug!(service = %envelope.service, provider = %envelope.sender, "Provider withdrew");
                }
            }
            EnvelopeKind::Request | EnvelopeKind::Response => {}
        }
        out
    }

    /// Periodic housekeeping: announce local services and expire leases.
    ///
    /// A member without local services re-sends its interest queries so the
    /// rendezvous keeps relaying to it. Interests idle for longer than the
    /// interest TTL are dropped first.
    pub fn tick(&mut self, registry: &mut ServiceRegistry, now: Instant) -> TickReport {
        self.next_tick = now + self.config.announce_interval;

        let mut report = TickReport::default();
        let local = registry.local_services();
        for name in &local {
            report.outgoing.extend(self.announce(name));
        }
        let interest_ttl = self.config.interest_ttl;
        self.interests
            .retain(|_, used| now.saturating_duration_since(*used) <= interest_ttl);
        if local.is_empty() && matches!(self.role, Role::Member { .. }) {
            for name in self.interests.keys() {
                report.outgoing.extend(self.outgoing(
                    Envelope::query(self.node_id, name.clone(), self.endpoint),
                    None,
                ));
            }
        }

        report.evicted = registry.evict_expired(now, self.config.lease_ttl);

        let ttl = self.config.lease_ttl;
        self.members.retain(|member, seen| {
            let alive = now.saturating_duration_since(*seen) <= ttl;
            if !alive {
                report.departed.push(*member);
            }
            alive
        });
        report
    }
}
