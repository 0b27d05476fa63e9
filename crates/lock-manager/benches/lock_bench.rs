use std::time::Duration;

use criterion::{Criterion, criterion_group, criterion_main};
use lock_manager::{AcquireRequest, LockManager};

const TTL: Duration = Duration::from_secs(60);

fn bench_acquire_release(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let manager = LockManager::default();

    c.bench_function("lock_manager/acquire_release", |b| {
        b.iter(|| {
            rt.block_on(async {
                let grant = manager
                    .acquire(AcquireRequest::new("bench-key", "bench-owner", TTL))
                    .await
                    .unwrap();
                manager
                    .release("bench-key", grant.lock_id, "bench-owner")
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_contended_acquire(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let manager = LockManager::default();
    rt.block_on(async {
        manager
            .acquire(AcquireRequest::new("held-key", "holder", TTL))
            .await
            .unwrap();
    });

    c.bench_function("lock_manager/acquire_held_key", |b| {
        b.iter(|| {
            rt.block_on(async {
                let result = manager
                    .acquire(AcquireRequest::new("held-key", "other", TTL))
                    .await;
                assert!(result.is_err());
            });
        });
    });
}

fn bench_acquire_many_keys(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("lock_manager/acquire_100_keys", |b| {
        b.iter(|| {
            rt.block_on(async {
                let manager = LockManager::default();
                for i in 0..100 {
                    manager
                        .acquire(AcquireRequest::new(format!("key-{i}"), "owner", TTL))
                        .await
                        .unwrap();
                }
            });
        });
    });
}

fn bench_status(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let manager = LockManager::default();
    rt.block_on(async {
        manager
            .acquire(AcquireRequest::new("status-key", "holder", TTL))
            .await
            .unwrap();
    });

    c.bench_function("lock_manager/status", |b| {
        b.iter(|| manager.status("status-key"));
    });
}

criterion_group!(
    benches,
    bench_acquire_release,
    bench_contended_acquire,
    bench_acquire_many_keys,
    bench_status
);
criterion_main!(benches);
