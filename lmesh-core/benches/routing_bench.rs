//! Benchmark for route computation

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lmesh_core::{compute_routes, route_delta, RouteNode};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::BTreeSet;

/// Random mesh with one controller at address 1 and a guaranteed chain
fn random_mesh(size: u8, seed: u64) -> Vec<RouteNode> {
    let mut rng = StdRng::seed_from_u64(seed);
    (1..=size)
        .map(|address| {
            let mut node = RouteNode::new(address);
            if address == 1 {
                node = node.controller();
            }
            for neighbor in 1..=size {
                let chained = neighbor + 1 == address || address + 1 == neighbor;
                if neighbor != address && (chained || rng.gen_bool(0.15)) {
                    node = node.link(neighbor, rng.gen_range(0.2..1.0));
                }
            }
            node
        })
        .collect()
}

fn bench_compute_routes(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute_routes");

    for size in [8u8, 32, 63] {
        let mesh = random_mesh(size, 7);
        group.bench_with_input(BenchmarkId::new("random", size), &mesh, |b, mesh| {
            b.iter(|| compute_routes(black_box(mesh)))
        });
    }

    group.finish();
}

fn bench_route_delta(c: &mut Criterion) {
    let previous: BTreeSet<u8> = (1..40).collect();
    let calculated: BTreeSet<u8> = (20..63).collect();

    c.bench_function("route_delta", |b| {
        b.iter(|| route_delta(black_box(&previous), black_box(&calculated)))
    });
}

criterion_group!(benches, bench_compute_routes, bench_route_delta);
criterion_main!(benches);
