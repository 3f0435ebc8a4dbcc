// Lock manager performance benchmarks: fast-path grants, conversions,
// contended acquisition, escalation, and deadlock detection over a
// populated resource table.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rusty_lockmgr::transaction::{
    lock_config::LockManagerConfig, lock_mode::Mode, lock_oid::Oid, lock_wait::WaitBudget,
    lock_isolation::TranIsolation, lock_manager::LockManager,
};
use std::sync::Arc;

fn oid(page: i32, slot: i16) -> Oid {
    Oid::new(0, page, slot)
}

fn bench_fast_grant(c: &mut Criterion) {
    c.bench_function("fast_grant_uncontended", |b| {
        let lm = LockManager::new(LockManagerConfig::default());
        let mut page = 0i32;
        b.iter(|| {
            page += 1;
            let class = oid(page, 0);
            let inst = oid(page, 1);
            let outcome = lm
                .lock(1, inst, Some(class), Mode::X, WaitBudget::Infinite, TranIsolation::default(), false)
                .unwrap();
            black_box(outcome);
            lm.unlock_all(1);
        });
    });
}

fn bench_repeat_conversion(c: &mut Criterion) {
    c.bench_function("repeat_same_mode_conversion", |b| {
        let lm = LockManager::new(LockManagerConfig::default());
        let class = oid(1, 0);
        let inst = oid(1, 1);
        lm.lock(1, inst, Some(class), Mode::S, WaitBudget::Infinite, TranIsolation::default(), false).unwrap();
        b.iter(|| {
            let outcome = lm
                .lock(1, inst, Some(class), Mode::S, WaitBudget::Infinite, TranIsolation::default(), false)
                .unwrap();
            black_box(outcome);
        });
    });
}

fn bench_isolation_levels(c: &mut Criterion) {
    let mut group = c.benchmark_group("isolation_levels");
    let levels = vec![
        TranIsolation::Serializable,
        TranIsolation::RepClassRepInstance,
        TranIsolation::RepClassCommitInstance,
        TranIsolation::RepClassUncommitInstance,
        TranIsolation::CommitClassCommitInstance,
        TranIsolation::CommitClassUncommitInstance,
    ];

    for level in levels {
        group.bench_with_input(BenchmarkId::from_parameter(format!("{level:?}")), &level, |b, &level| {
            let lm = LockManager::new(LockManagerConfig::default());
            let mut page = 100i32;
            b.iter(|| {
                page += 1;
                let class = oid(page, 0);
                let inst = oid(page, 1);
                lm.lock(1, inst, Some(class), Mode::S, WaitBudget::Infinite, level, false).ok();
                lm.end_statement(1, level).ok();
                lm.unlock_all(1);
            });
        });
    }
    group.finish();
}

fn bench_lock_contention(c: &mut Criterion) {
    c.bench_function("lock_contention_shared_readers", |b| {
        let lm = Arc::new(LockManager::new(LockManagerConfig::default()));
        let class = oid(9000, 0);
        let inst = oid(9000, 1);
        b.iter(|| {
            let handles: Vec<_> = (0..4u64)
                .map(|t| {
                    let lm = Arc::clone(&lm);
                    std::thread::spawn(move || {
                        lm.lock(t + 1, inst, Some(class), Mode::S, WaitBudget::Infinite, TranIsolation::default(), false)
                            .ok();
                    })
                })
                .collect();
            for h in handles {
                h.join().ok();
            }
            for t in 1..=4u64 {
                lm.unlock_all(t);
            }
        });
    });
}

fn bench_escalation(c: &mut Criterion) {
    c.bench_function("escalation_many_instances", |b| {
        let mut config = LockManagerConfig::default();
        config.escalation_at = 50;
        let lm = LockManager::new(config);
        let class = oid(20000, 0);
        b.iter(|| {
            for slot in 1..=60i16 {
                lm.lock(1, oid(20000, slot), Some(class), Mode::S, WaitBudget::Infinite, TranIsolation::default(), false)
                    .ok();
            }
            black_box(lm.get_object_lock(1, class, None));
            lm.unlock_all(1);
        });
    });
}

fn bench_deadlock_detection(c: &mut Criterion) {
    c.bench_function("deadlock_detection_pass", |b| {
        let lm = LockManager::new(LockManagerConfig::default());
        for page in 0..200i32 {
            lm.lock(1, oid(page, 1), Some(oid(page, 0)), Mode::S, WaitBudget::Infinite, TranIsolation::default(), false)
                .ok();
        }
        b.iter(|| {
            black_box(lm.detect_local_deadlock());
        });
    });
}

criterion_group!(
    benches,
    bench_fast_grant,
    bench_repeat_conversion,
    bench_isolation_levels,
    bench_lock_contention,
    bench_escalation,
    bench_deadlock_detection,
);
criterion_main!(benches);
