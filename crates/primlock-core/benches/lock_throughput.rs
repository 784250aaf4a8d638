use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use primlock_core::LockManager;
use std::thread;

fn bench_uncontended(c: &mut Criterion) {
    let manager = LockManager::default();
    let lock = manager.create_lock("bench").unwrap();

    c.bench_function("exclusive_lock_unlock", |b| {
        b.iter(|| {
            lock.exclusive_lock().unwrap();
            lock.unlock().unwrap();
        });
    });

    c.bench_function("shared_lock_unlock", |b| {
        b.iter(|| {
            lock.shared_lock().unwrap();
            lock.unlock().unwrap();
        });
    });

    c.bench_function("shared_then_upgrade", |b| {
        b.iter(|| {
            lock.shared_lock().unwrap();
            lock.exclusive_lock().unwrap();
            lock.unlock().unwrap();
        });
    });
}

fn bench_registry(c: &mut Criterion) {
    let manager = LockManager::default();
    let _keep = manager.create_lock("registered").unwrap();

    c.bench_function("open_existing", |b| {
        b.iter(|| manager.create_lock(black_box("registered")).unwrap());
    });

    c.bench_function("create_and_remove", |b| {
        b.iter(|| manager.create_lock(black_box("transient")).unwrap().close());
    });
}

fn bench_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended");
    let iterations = 1_000u64;

    for threads in [2usize, 4, 8] {
        group.throughput(Throughput::Elements(iterations * threads as u64));
        group.bench_with_input(BenchmarkId::new("exclusive", threads), &threads, |b, &threads| {
            let manager = LockManager::default();
            let lock = manager.create_lock("contended").unwrap();
            b.iter(|| {
                thread::scope(|scope| {
                    for _ in 0..threads {
                        scope.spawn(|| {
                            for _ in 0..iterations {
                                lock.exclusive_lock().unwrap();
                                lock.unlock().unwrap();
                            }
                            manager.close_session();
                        });
                    }
                });
            });
        });
        group.bench_with_input(BenchmarkId::new("mixed", threads), &threads, |b, &threads| {
            let manager = LockManager::default();
            let lock = manager.create_lock("contended").unwrap();
            b.iter(|| {
                thread::scope(|scope| {
                    for worker in 0..threads {
                        let (lock, manager) = (&lock, &manager);
                        scope.spawn(move || {
                            for i in 0..iterations {
                                if (i + worker as u64) % 4 == 0 {
                                    lock.exclusive_lock().unwrap();
                                } else {
                                    lock.shared_lock().unwrap();
                                }
                                lock.unlock().unwrap();
                            }
                            manager.close_session();
                        });
                    }
                });
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_uncontended, bench_registry, bench_contended);
criterion_main!(benches);
