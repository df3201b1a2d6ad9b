//! Local service table and remote provider table.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::handler::RequestHandler;
use super::types::{Endpoint, NodeId, ServiceName};

/// Result of advertising a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertiseOutcome {
    /// The name was not advertised before.
    Registered,
    /// The name was already advertised locally; its handler was replaced.
    Replaced,
}

/// A remote node known to provide a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteProvider {
    /// Endpoint requests are sent to.
    pub endpoint: Endpoint,
    /// Id of the providing node.
    pub node_id: NodeId,
    /// When the provider was last announced.
    pub last_seen: Instant,
}

/// Both service tables of a node.
///
/// Local services and remote providers are kept apart: a node may provide
/// and discover the same name without one shadowing the other.
#[derive(Default)]
pub struct ServiceRegistry {
    local: HashMap<ServiceName, Arc<dyn RequestHandler>>,
    remote: HashMap<ServiceName, Vec<RemoteProvider>>,
}

impl ServiceRegistry {
    /// Creates empty tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `name`, replacing any previous handler.
    pub fn advertise(&mut self, name: ServiceName, handler: Arc<dyn RequestHandler>) -> AdvertiseOutcome {
        match self.local.insert(name, handler) {
            Some(_) => AdvertiseOutcome::Replaced,
            None => AdvertiseOutcome::Registered,
        }
    }

    /// Removes a local service. Returns `false` if it was not advertised.
    pub fn unadvertise(&mut self, name: &str) -> bool {
        self.local.remove(name).is_some()
    }

    /// Handler of a local service.
    #[must_use]
    pub fn local_handler(&self, name: &str) -> Option<Arc<dyn RequestHandler>> {
        self.local.get(name).cloned()
    }

    /// Returns `true` if this node advertises `name`.
    #[must_use]
    pub fn is_local(&self, name: &str) -> bool {
        self.local.contains_key(name)
    }

    /// Names of all local services, sorted.
    #[must_use]
    pub fn local_services(&self) -> Vec<ServiceName> {
        let mut names: Vec<_> = self.local.keys().cloned().collect();
        names.sort();
        names
    }

    /// Inserts or refreshes a provider. Returns `true` for a new entry.
    pub fn upsert_provider(
        &mut self,
        name: ServiceName,
        endpoint: Endpoint,
        node_id: NodeId,
        now: Instant,
    ) -> bool {
        let providers = self.remote.entry(name).or_default();
        if let Some(existing) = providers.iter_mut().find(|p| p.endpoint == endpoint) {
            existing.node_id = node_id;
            existing.last_seen = now;
            return false;
        }
        providers.push(RemoteProvider {
            endpoint,
            node_id,
            last_seen: now,
        });
        true
    }

    /// Forgets one provider of `name`. Returns `true` if it was known.
    pub fn remove_provider(&mut self, name: &str, endpoint: &Endpoint) -> bool {
        let Some(providers) = self.remote.get_mut(name) else {
            return false;
        };
        let before = providers.len();
        providers.retain(|p| p.endpoint != *endpoint);
        let removed = providers.len() != before;
        if providers.is_empty() {
            self.remote.remove(name);
        }
        removed
    }

    /// Most recently seen provider of `name`.
    #[must_use]
    pub fn select_provider(&self, name: &str) -> Option<Endpoint> {
        self.remote
            .get(name)?
            .iter()
            .max_by_key(|p| p.last_seen)
            .map(|p| p.endpoint)
    }

    /// All known providers of `name`.
    #[must_use]
    pub fn providers(&self, name: &str) -> Vec<RemoteProvider> {
        self.remote.get(name).cloned().unwrap_or_default()
    }

    /// Drops providers not refreshed within `ttl` and returns them.
    pub fn evict_expired(&mut self, now: Instant, ttl: Duration) -> Vec<(ServiceName, Endpoint)> {
        let mut evicted = Vec::new();
        self.remote.retain(|name, providers| {
            providers.retain(|p| {
                let alive = now.saturating_duration_since(p.last_seen) <= ttl;
                if !alive {
                    evicted.push((name.clone(), p.endpoint));
                }
                alive
            });
            !providers.is_empty()
        });
        evicted
    }
}
