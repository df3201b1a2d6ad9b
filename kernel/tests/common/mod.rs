//! Shared helpers for node tests on an in-process network.

#![allow(dead_code)]

use std::time::Duration;

use beacon_kernel::mesh::transport::Transport;
use beacon_kernel::mesh::wire::{Envelope, EnvelopeKind};
use beacon_kernel::mesh::{MemoryTransport, Node, NodeConfig, NodeError};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};

/// Announce interval used by tests; short so discovery settles quickly.
pub const TICK: Duration = Duration::from_millis(50);

/// Config with a fast announce interval and a lease of three ticks.
pub fn fast_config() -> NodeConfig {
    NodeConfig::builder()
        .announce_interval(TICK)
        .lease_multiplier(3)
        .build()
        .expect("valid config")
}

/// Config with a fast announce interval that discovers through `master`.
pub fn member_config(master: beacon_kernel::mesh::Endpoint) -> NodeConfig {
    NodeConfig::builder()
        .announce_interval(TICK)
        .lease_multiplier(3)
        .master(master)
        .build()
        .expect("valid config")
}

/// Drives `node` on a background task.
pub fn spawn_spin(node: &Node) -> JoinHandle<Result<(), NodeError>> {
    let node = node.clone();
    tokio::spawn(async move { node.spin().await })
}

/// Waits until `node` knows a remote provider of `service`.
pub async fn wait_for_provider(node: &Node, service: &str) {
    timeout(Duration::from_secs(2), async {
        while node.providers(service).is_empty() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no provider for '{service}' discovered"));
}

/// Waits until `node` has forgotten every provider of `service`.
pub async fn wait_for_no_provider(node: &Node, service: &str) {
    timeout(Duration::from_secs(2), async {
        while !node.providers(service).is_empty() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("provider for '{service}' was never evicted"));
}

/// Receives envelopes on a raw transport until one of `kind` arrives.
pub async fn next_of_kind(
    transport: &MemoryTransport,
    kind: EnvelopeKind,
    within: Duration,
) -> Option<Envelope> {
    let deadline = Instant::now() + within;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let datagram = timeout(remaining, transport.recv()).await.ok()?.ok()?;
        if let Ok(envelope) = Envelope::decode(&datagram.bytes) {
            if envelope.kind == kind {
                return Some(envelope);
            }
        }
    }
}

/// Discards everything a raw transport receives until it stays quiet for `quiet`.
pub async fn drain(transport: &MemoryTransport, quiet: Duration) {
    while timeout(quiet, transport.recv()).await.is_ok() {}
}
