use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use tpctrack::clusters::store::ClusterStore;
use tpctrack::geometry::DetectorGeometry;
use tpctrack::params::TrackerParams;
use tpctrack::Tracker;

#[path = "../tests/common/mod.rs"]
mod common;

use common::{synthetic_event, Smearing};

/// Full reconstruction at a few multiplicities.
fn bench_reconstruct(c: &mut Criterion) {
    let tracker = Tracker::new(DetectorGeometry::standard(), TrackerParams::default())
        .expect("default tracker");
    let mut group = c.benchmark_group("reconstruct");
    for n in [10, 50, 200] {
        let (_, clusters) = synthetic_event(tracker.geometry(), n, &Smearing::REALISTIC, 7);
        group.bench_function(format!("{n}_particles"), |b| {
            b.iter_batched(
                || clusters.clone(),
                |clusters| black_box(tracker.reconstruct(clusters)),
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

/// Store construction alone: validation, per-row sort and bucket tables.
fn bench_store(c: &mut Criterion) {
    let geometry = DetectorGeometry::standard();
    let (_, clusters) = synthetic_event(&geometry, 200, &Smearing::REALISTIC, 8);
    c.bench_function("cluster_store_build", |b| {
        b.iter_batched(
            || clusters.clone(),
            |clusters| black_box(ClusterStore::build(&geometry, clusters)),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    name = benches;
    config = Criterion::default()
        .sample_size(30)
        .measurement_time(Duration::from_secs(10));
    targets = bench_reconstruct, bench_store
);
criterion_main!(benches);
