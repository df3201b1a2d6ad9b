//! Benchmarks for the envelope codec in kernel/src/mesh/wire.rs
//!
//! Every datagram a node sends or receives passes through `encode` or
//! `decode`, so both sit on the request path twice per call.

#![allow(missing_docs)]

use beacon_kernel::mesh::wire::Envelope;
use beacon_kernel::mesh::{Endpoint, NodeId, ResponseStatus, ServiceName};
use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

const PAYLOAD_SIZES: &[usize] = &[0, 64, 1024, 16 * 1024, 60 * 1024];

fn sample_request(size: usize) -> Envelope {
    Envelope::request(
        NodeId::new(),
        ServiceName::new("bench.echo").unwrap(),
        42,
        Endpoint::new("192.168.1.20:40000").unwrap(),
        Bytes::from(vec![0xAB; size]),
    )
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_request");

    for &size in PAYLOAD_SIZES {
        let envelope = sample_request(size);
        group.throughput(Throughput::Bytes(envelope.encoded_len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &envelope, |b, env| {
            b.iter(|| black_box(env).encode().unwrap());
        });
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_request");

    for &size in PAYLOAD_SIZES {
        let bytes = sample_request(size).encode().unwrap();
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &bytes, |b, bytes| {
            b.iter(|| Envelope::decode(black_box(bytes)).unwrap());
        });
    }

    group.finish();
}

fn bench_discovery_envelopes(c: &mut Criterion) {
    let mut group = c.benchmark_group("discovery");
    let node_id = NodeId::new();
    let sender = Endpoint::new("10.0.0.7:51000").unwrap();
    let service = ServiceName::new("sensors/lidar/front").unwrap();

    let announce = Envelope::announce(node_id, service.clone(), sender);
    group.bench_function("encode_announce", |b| {
        b.iter(|| black_box(&announce).encode().unwrap());
    });

    let bytes = announce.encode().unwrap();
    group.bench_function("decode_announce", |b| {
        b.iter(|| Envelope::decode(black_box(&bytes)).unwrap());
    });

    let response = Envelope::response(
        node_id,
        service,
        7,
        sender,
        Bytes::from_static(b"ok"),
        ResponseStatus::Ok,
    );
    group.bench_function("encode_response", |b| {
        b.iter(|| black_box(&response).encode().unwrap());
    });

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode, bench_discovery_envelopes);
criterion_main!(benches);
