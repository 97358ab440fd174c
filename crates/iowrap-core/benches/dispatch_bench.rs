//! Criterion benchmarks for subscription fan-out.
//!
//! A poll tick calls `fire_callbacks` once per changed binding; with several
//! profiles bound to the same button the cost scales with subscriber count.
//!
//! Run with:
//! ```bash
//! cargo bench --package iowrap-core --bench dispatch_bench
//! ```

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use iowrap_core::{
    BindingDescriptor, DeviceDescriptor, InputSubscriptionRequest, ProfileActivationSet,
    SubscriptionRegistry,
};
use uuid::Uuid;

fn registry(subscribers: usize, active: bool) -> SubscriptionRegistry {
    let device = DeviceDescriptor::new("bench", 0);
    let profiles = ProfileActivationSet::new();
    let profile = Uuid::new_v4();
    profiles.set_state(profile, active);
    let total = Arc::new(AtomicI64::new(0));

    let mut registry = SubscriptionRegistry::new(device.clone(), profiles);
    for _ in 0..subscribers {
        let total = Arc::clone(&total);
        let request = InputSubscriptionRequest::new(
            Uuid::new_v4(),
            profile,
            "bench",
            device.clone(),
            BindingDescriptor::button(0),
            move |v| {
                total.fetch_add(i64::from(v), Ordering::Relaxed);
            },
        );
        registry.add(request).expect("unrestricted registry accepts any binding");
    }
    registry
}

fn bench_fire_callbacks(c: &mut Criterion) {
    let mut group = c.benchmark_group("fire_callbacks");
    for subscribers in [1usize, 8, 64] {
        let active = registry(subscribers, true);
        group.bench_with_input(BenchmarkId::new("active", subscribers), &active, |b, r| {
            b.iter(|| r.fire_callbacks(black_box(&BindingDescriptor::button(0)), black_box(1)))
        });

        let inactive = registry(subscribers, false);
        group.bench_with_input(BenchmarkId::new("inactive", subscribers), &inactive, |b, r| {
            b.iter(|| r.fire_callbacks(black_box(&BindingDescriptor::button(0)), black_box(1)))
        });
    }
    group.finish();
}

fn bench_snapshot_swap(c: &mut Criterion) {
    let base = registry(64, true);
    c.bench_function("registry_clone_64", |b| b.iter(|| black_box(base.clone())));
}

criterion_group!(benches, bench_fire_callbacks, bench_snapshot_swap);
criterion_main!(benches);
