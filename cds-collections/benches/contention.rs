//! Throughput under contention for a representative slice of the
//! library: one lock-free structure, one lock-coupled structure, and one
//! priority queue, each driven by a fixed thread count performing a mixed
//! workload.

use cds_collections::pq::sl_pq::ShavitLotanQueue;
use cds_collections::skiplist::fhsl_b::LockCoupledSkipList;
use cds_collections::skiplist::fhsl_lf::LockFreeSkipList;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use std::thread;

const KEYS_PER_THREAD: i64 = 2_000;

fn mixed_workload_fhsl_lf(threads: usize) {
    let set = Arc::new(LockFreeSkipList::new());
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let set = set.clone();
            thread::spawn(move || {
                let mut seed = (t as u64 + 1) * 2654435761;
                for i in 0..KEYS_PER_THREAD {
                    let key = t as i64 * KEYS_PER_THREAD + i;
                    set.add(key, &mut seed);
                    set.contains(key);
                    set.remove(key);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}

fn mixed_workload_fhsl_b(threads: usize) {
    let set = Arc::new(LockCoupledSkipList::new());
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let set = set.clone();
            thread::spawn(move || {
                let mut seed = (t as u64 + 1) * 2654435761;
                for i in 0..KEYS_PER_THREAD {
                    let key = t as i64 * KEYS_PER_THREAD + i;
                    set.add(key, &mut seed);
                    set.contains(key);
                    set.remove(key);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}

fn concurrent_pops_sl_pq(threads: usize) {
    let pq = Arc::new(ShavitLotanQueue::new());
    let mut seed = 1u64;
    for t in 0..threads {
        for i in 0..KEYS_PER_THREAD {
            pq.add(t as i64 * KEYS_PER_THREAD + i, &mut seed);
        }
    }
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let pq = pq.clone();
            thread::spawn(move || while pq.pop_min().is_some() {})
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}

fn bench_structures(c: &mut Criterion) {
    let mut group = c.benchmark_group("contention");
    for threads in [1, 4, 8] {
        group.bench_with_input(BenchmarkId::new("fhsl_lf", threads), &threads, |b, &t| {
            b.iter(|| mixed_workload_fhsl_lf(t));
        });
        group.bench_with_input(BenchmarkId::new("fhsl_b", threads), &threads, |b, &t| {
            b.iter(|| mixed_workload_fhsl_b(t));
        });
        group.bench_with_input(BenchmarkId::new("sl_pq", threads), &threads, |b, &t| {
            b.iter(|| concurrent_pops_sl_pq(t));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_structures);
criterion_main!(benches);
