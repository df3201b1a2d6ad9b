//! Discovery behaviour on an in-process network: announcements, leases,
//! withdrawals, queries and rendezvous relaying.

mod common;

use std::time::Duration;

use beacon_kernel::mesh::transport::Transport;
use beacon_kernel::mesh::wire::{Envelope, EnvelopeKind};
use beacon_kernel::mesh::{
    Endpoint, MemoryNetwork, Node, NodeConfig, NodeId, Role, RpcError, ServiceName,
};
use common::{
    drain, fast_config, member_config, next_of_kind, spawn_spin, wait_for_no_provider,
    wait_for_provider, TICK,
};
use tokio::time::sleep;

fn echo(_: &str, payload: &[u8]) -> (Vec<u8>, i32) {
    (payload.to_vec(), 0)
}

/// Slow announcements and a long lease, so only explicit messages matter.
fn slow_config() -> NodeConfig {
    NodeConfig::builder()
        .announce_interval(Duration::from_secs(10))
        .lease_multiplier(3)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_periodic_announcements_keep_provider_alive() {
    let net = MemoryNetwork::new();
    let provider = Node::with_transport(fast_config(), net.attach());
    let observer = Node::with_transport(fast_config(), net.attach());
    provider.advertise("svc", echo).unwrap();
    spawn_spin(&provider);
    spawn_spin(&observer);

    wait_for_provider(&observer, "svc").await;
    // Several leases pass; refreshes keep the entry.
    sleep(TICK * 8).await;

    let providers = observer.providers("svc");
    assert_eq!(providers.len(), 1);
    assert_eq!(providers[0].endpoint, provider.endpoint());
    assert_eq!(providers[0].node_id, provider.id());
}

#[tokio::test]
async fn test_lease_expires_without_announcements() {
    let net = MemoryNetwork::new();
    let observer = Node::with_transport(fast_config(), net.attach());
    spawn_spin(&observer);

    let once = net.attach();
    let announce = Envelope::announce(
        NodeId::new(),
        ServiceName::new("one-shot").unwrap(),
        once.local_endpoint(),
    );
    once.broadcast(&announce.encode().unwrap()).await.unwrap();

    wait_for_provider(&observer, "one-shot").await;
    wait_for_no_provider(&observer, "one-shot").await;
}

#[tokio::test]
async fn test_unadvertise_withdraws_immediately() {
    let net = MemoryNetwork::new();
    let provider = Node::with_transport(slow_config(), net.attach());
    let observer = Node::with_transport(slow_config(), net.attach());
    provider.advertise("svc", echo).unwrap();
    spawn_spin(&provider);
    spawn_spin(&observer);
    wait_for_provider(&observer, "svc").await;

    provider.unadvertise("svc").unwrap();
    // Well inside the thirty second lease.
    wait_for_no_provider(&observer, "svc").await;
    assert!(provider.local_services().is_empty());
    assert!(provider.unadvertise("svc").is_err());
}

#[tokio::test]
async fn test_shutdown_withdraws_services() {
    let net = MemoryNetwork::new();
    let provider = Node::with_transport(slow_config(), net.attach());
    let observer = Node::with_transport(slow_config(), net.attach());
    provider.advertise("svc", echo).unwrap();
    let spinner = spawn_spin(&provider);
    spawn_spin(&observer);
    wait_for_provider(&observer, "svc").await;

    provider.shutdown();
    assert!(spinner.await.unwrap().is_ok());
    wait_for_no_provider(&observer, "svc").await;
}

#[tokio::test]
async fn test_query_triggers_announcement() {
    let net = MemoryNetwork::new();
    let provider = Node::with_transport(slow_config(), net.attach());
    provider.advertise("svc", echo).unwrap();
    let observer = net.attach();
    spawn_spin(&provider);
    drain(&observer, Duration::from_millis(100)).await;

    let query = Envelope::query(
        NodeId::new(),
        ServiceName::new("svc").unwrap(),
        observer.local_endpoint(),
    );
    observer.broadcast(&query.encode().unwrap()).await.unwrap();

    let answer = next_of_kind(&observer, EnvelopeKind::Announce, Duration::from_millis(500))
        .await
        .expect("provider answered the query");
    assert_eq!(answer.service.as_str(), "svc");
    assert_eq!(answer.sender, provider.endpoint());
    assert_eq!(answer.node_id, provider.id());
}

#[tokio::test]
async fn test_query_for_unknown_service_is_ignored() {
    let net = MemoryNetwork::new();
    let provider = Node::with_transport(slow_config(), net.attach());
    provider.advertise("svc", echo).unwrap();
    let observer = net.attach();
    spawn_spin(&provider);
    drain(&observer, Duration::from_millis(100)).await;

    let query = Envelope::query(
        NodeId::new(),
        ServiceName::new("other").unwrap(),
        observer.local_endpoint(),
    );
    observer.broadcast(&query.encode().unwrap()).await.unwrap();

    assert!(
        next_of_kind(&observer, EnvelopeKind::Announce, Duration::from_millis(200))
            .await
            .is_none()
    );
}

#[tokio::test]
async fn test_own_announcements_are_ignored() {
    let net = MemoryNetwork::new();
    let node = Node::with_transport(fast_config(), net.attach());
    node.advertise("svc", echo).unwrap();
    spawn_spin(&node);

    sleep(TICK * 4).await;
    assert!(node.providers("svc").is_empty());
    assert_eq!(node.local_services().len(), 1);
}

#[tokio::test]
async fn test_malformed_datagrams_are_dropped() {
    let net = MemoryNetwork::new();
    let provider = Node::with_transport(fast_config(), net.attach());
    let caller = Node::with_transport(fast_config(), net.attach());
    provider.advertise("echo", echo).unwrap();
    spawn_spin(&provider);
    spawn_spin(&caller);

    let noise = net.attach();
    noise.broadcast(b"\x02\x00garbage").await.unwrap();
    noise.broadcast(&[]).await.unwrap();

    wait_for_provider(&caller, "echo").await;
    let reply = caller
        .request("echo", b"after noise", Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(&reply.payload[..], b"after noise");
}

#[tokio::test]
async fn test_rendezvous_relays_between_members() {
    let net = MemoryNetwork::new();
    let master = Endpoint::new("127.0.0.1:11311").unwrap();

    let rendezvous = Node::with_transport(member_config(master), net.attach_at(master).unwrap());
    let provider = Node::with_transport(member_config(master), net.attach());
    let caller = Node::with_transport(member_config(master), net.attach());
    let bystander = net.attach();

    assert_eq!(rendezvous.role(), Role::Rendezvous);
    assert_eq!(provider.role(), Role::Member { master });
    assert_eq!(caller.role(), Role::Member { master });

    provider.advertise("echo", echo).unwrap();
    spawn_spin(&rendezvous);
    spawn_spin(&provider);
    spawn_spin(&caller);

    // The first miss registers interest with the rendezvous.
    assert!(matches!(
        caller.request("echo", b"", Duration::from_secs(1)).await,
        Err(RpcError::NoProvider(_))
    ));
    wait_for_provider(&caller, "echo").await;
    assert_eq!(caller.providers("echo")[0].endpoint, provider.endpoint());

    let reply = caller
        .request("echo", b"via rendezvous", Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(&reply.payload[..], b"via rendezvous");

    // Members talk only to the rendezvous, never to the whole network.
    assert!(
        next_of_kind(&bystander, EnvelopeKind::Announce, TICK * 4)
            .await
            .is_none()
    );
}

#[tokio::test]
async fn test_rendezvous_can_serve_and_call() {
    let net = MemoryNetwork::new();
    let master = Endpoint::new("127.0.0.1:11311").unwrap();

    let rendezvous = Node::with_transport(member_config(master), net.attach_at(master).unwrap());
    let member = Node::with_transport(member_config(master), net.attach());
    rendezvous.advertise("on-master", echo).unwrap();
    member.advertise("on-member", echo).unwrap();
    spawn_spin(&rendezvous);
    spawn_spin(&member);

    // The member's announcements register it; the rendezvous then
    // includes it when announcing its own services.
    wait_for_provider(&rendezvous, "on-member").await;
    wait_for_provider(&member, "on-master").await;

    let reply = member
        .request("on-master", b"up", Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(&reply.payload[..], b"up");

    let reply = rendezvous
        .request("on-member", b"down", Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(&reply.payload[..], b"down");
}
