//! Benchmarks for the service registry in kernel/src/mesh/registry.rs
//!
//! Performance-critical paths:
//! - `select_provider`: runs for every outgoing remote request
//! - `upsert_provider`: runs for every announcement received
//! - `evict_expired`: runs once per discovery tick

#![allow(missing_docs)]

use std::time::Duration;

use beacon_kernel::mesh::registry::ServiceRegistry;
use beacon_kernel::mesh::{Endpoint, NodeId, ServiceName};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use tokio::time::Instant;

fn endpoint(i: usize) -> Endpoint {
    Endpoint::new(&format!("10.0.{}.{}:40000", i / 250, i % 250 + 1)).unwrap()
}

/// Registry with `services` names, each offered by `per_service` providers.
fn populated(services: usize, per_service: usize, now: Instant) -> ServiceRegistry {
    let mut registry = ServiceRegistry::new();
    for s in 0..services {
        let name = ServiceName::new(format!("service-{s}")).unwrap();
        for p in 0..per_service {
            registry.upsert_provider(name.clone(), endpoint(p), NodeId::new(), now);
        }
    }
    registry
}

fn bench_select_provider(c: &mut Criterion) {
    let mut group = c.benchmark_group("select_provider");
    let now = Instant::now();

    for &providers in &[1usize, 8, 64] {
        let registry = populated(100, providers, now);
        group.bench_with_input(
            BenchmarkId::from_parameter(providers),
            &registry,
            |b, reg| {
                b.iter(|| reg.select_provider(black_box("service-50")));
            },
        );
    }

    group.finish();
}

fn bench_upsert_refresh(c: &mut Criterion) {
    let now = Instant::now();
    let mut registry = populated(100, 8, now);
    let name = ServiceName::new("service-10").unwrap();
    let node_id = NodeId::new();
    let provider = endpoint(3);

    c.bench_function("upsert_refresh", |b| {
        b.iter(|| registry.upsert_provider(black_box(name.clone()), provider, node_id, now));
    });
}

fn bench_evict_nothing_expired(c: &mut Criterion) {
    let now = Instant::now();
    let mut registry = populated(500, 4, now);
    let ttl = Duration::from_secs(3);

    c.bench_function("evict_expired_none", |b| {
        b.iter(|| registry.evict_expired(black_box(now), ttl));
    });
}

criterion_group!(
    benches,
    bench_select_provider,
    bench_upsert_refresh,
    bench_evict_nothing_expired
);
criterion_main!(benches);
