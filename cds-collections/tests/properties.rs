//! Cross-module integration tests checking properties that span a whole
//! public API rather than one internal code path.

use cds_collections::flat_combining::apq_server::ApqServer;
use cds_collections::skiplist::fhsl_lf::LockFreeSkipList;
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;

/// After a concurrent mixed add/remove workload quiesces, the set equals
/// exactly the keys whose successful-add count exceeds their
/// successful-remove count by one.
#[test]
fn concurrent_mixed_workload_matches_add_remove_parity() {
    const KEY_SPACE: i64 = 64;
    const THREADS: usize = 6;
    const ITERS: usize = 3_000;

    let set = Arc::new(LockFreeSkipList::new());
    let add_counts: Arc<Vec<AtomicI64>> =
        Arc::new((0..KEY_SPACE).map(|_| AtomicI64::new(0)).collect());
    let remove_counts: Arc<Vec<AtomicI64>> =
        Arc::new((0..KEY_SPACE).map(|_| AtomicI64::new(0)).collect());

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let set = set.clone();
            let add_counts = add_counts.clone();
            let remove_counts = remove_counts.clone();
            thread::spawn(move || {
                let mut seed = (t as u64 + 1) * 0x9E3779B1;
                for i in 0..ITERS {
                    seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
                    let key = (seed % KEY_SPACE as u64) as i64;
                    if i % 2 == 0 {
                        if set.add(key, &mut seed) {
                            add_counts[key as usize].fetch_add(1, Ordering::Relaxed);
                        }
                    } else if set.remove(key) {
                        remove_counts[key as usize].fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    for key in 0..KEY_SPACE {
        let adds = add_counts[key as usize].load(Ordering::Relaxed);
        let removes = remove_counts[key as usize].load(Ordering::Relaxed);
        let expected_present = adds - removes == 1;
        assert_eq!(
            set.contains(key),
            expected_present,
            "key {key}: {adds} adds, {removes} removes"
        );
    }
}

/// Scenario 6 from the test plan: create an APQ with a cutoff, insert a
/// range spanning both tiers, and confirm the whole range drains exactly
/// once in ascending order once both tiers have emptied.
#[test]
fn apq_hot_cold_drains_every_key_exactly_once() {
    let apq = ApqServer::with_config(1, 100, 40, 10);
    let mut seed = 11u64;
    for k in 0..200i64 {
        assert!(apq.add(k, 0, &mut seed));
    }

    thread::sleep(std::time::Duration::from_millis(100));

    let mut seen = HashSet::new();
    let mut popped = vec![];
    while let Some(k) = apq.pop_min(0) {
        assert!(seen.insert(k), "key {k} popped twice");
        popped.push(k);
    }
    popped.sort_unstable();
    assert_eq!(popped, (0..200).collect::<Vec<_>>());
}
