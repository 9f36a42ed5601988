//! Flat-combining ordered set (`fhsl_fc`).
//!
//! Every client thread owns a cache-line-padded slot. To call an
//! operation a client writes its argument, publishes the op code with
//! release ordering, then spins on its own slot until the dedicated
//! server thread resets the op code to [`NONE`] and leaves a result
//! behind. The server iterates the slot array in thread-id order,
//! applying each pending op to a private [`SerialSkipList`] back-end with
//! no locking of its own — the combining is what eliminates internal
//! contention.

use super::serial::SerialSkipList;
use cds_core::types::{Key, MIN_KEY};
use crossbeam::utils::CachePadded;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8};
use std::sync::Arc;
use std::thread;

const NONE: u8 = 0;
const CONTAINS: u8 = 1;
const ADD: u8 = 2;
const REMOVE: u8 = 3;
const POP_MIN: u8 = 4;

struct Slot {
    op: AtomicU8,
    arg: AtomicI64,
    ret: AtomicI64,
}

impl Slot {
    fn new() -> Self {
        Self {
            op: AtomicU8::new(NONE),
            arg: AtomicI64::new(0),
            ret: AtomicI64::new(MIN_KEY),
        }
    }
}

/// An ordered set doubling as a priority queue, whose `contains`/`add`/
/// `remove`/`pop_min` are combined through a dedicated server thread
/// rather than synchronized directly.
pub struct FlatCombiningSkipList {
    slots: Arc<Vec<CachePadded<Slot>>>,
    shutdown: Arc<AtomicBool>,
    server: Option<thread::JoinHandle<()>>,
}

impl FlatCombiningSkipList {
    /// Spawns the server thread and reserves one slot per client.
    pub fn new(num_threads: usize) -> Self {
        let slots: Arc<Vec<CachePadded<Slot>>> = Arc::new(
            (0..num_threads.max(1))
                .map(|_| CachePadded::new(Slot::new()))
                .collect(),
        );
        let shutdown = Arc::new(AtomicBool::new(false));
        let server = {
            let slots = slots.clone();
            let shutdown = shutdown.clone();
            thread::spawn(move || Self::server_loop(slots, shutdown))
        };
        Self {
            slots,
            shutdown,
            server: Some(server),
        }
    }

    fn server_loop(slots: Arc<Vec<CachePadded<Slot>>>, shutdown: Arc<AtomicBool>) {
        log::debug!("fhsl_fc server thread started with {} slots", slots.len());
        let mut backend = SerialSkipList::new(0x5eed);
        while !shutdown.load(Acquire) {
            for slot in slots.iter() {
                let op = slot.op.load(Acquire);
                if op == NONE {
                    continue;
                }
                let arg = slot.arg.load(Relaxed);
                let ret = match op {
                    CONTAINS => backend.contains(arg) as i64,
                    ADD => backend.add(arg) as i64,
                    REMOVE => backend.remove(arg) as i64,
                    POP_MIN => backend.pop_min().unwrap_or(MIN_KEY),
                    _ => MIN_KEY,
                };
                slot.ret.store(ret, Relaxed);
                slot.op.store(NONE, Release);
            }
            std::hint::spin_loop();
        }
        log::debug!("fhsl_fc server thread shutting down");
    }

    fn call(&self, op: u8, arg: Key, thread_id: usize) -> i64 {
        let slot = &self.slots[thread_id];
        slot.arg.store(arg, Relaxed);
        slot.op.store(op, Release);
        while slot.op.load(Acquire) != NONE {
            std::hint::spin_loop();
        }
        slot.ret.load(Relaxed)
    }

    /// Returns `true` iff `key` is present, as of the server's next
    /// processing step after this call is published.
    pub fn contains(&self, key: Key, thread_id: usize) -> bool {
        self.call(CONTAINS, key, thread_id) != 0
    }

    /// Inserts `key`. Returns `true` iff it was absent and is now present.
    pub fn add(&self, key: Key, thread_id: usize) -> bool {
        self.call(ADD, key, thread_id) != 0
    }

    /// Removes `key`. Returns `true` iff it was present and is now absent.
    pub fn remove(&self, key: Key, thread_id: usize) -> bool {
        self.call(REMOVE, key, thread_id) != 0
    }

    /// Removes and returns the minimum key, or `None` if empty.
    pub fn pop_min(&self, thread_id: usize) -> Option<Key> {
        let ret = self.call(POP_MIN, 0, thread_id);
        if ret == MIN_KEY {
            None
        } else {
            Some(ret)
        }
    }
}

impl Drop for FlatCombiningSkipList {
    fn drop(&mut self) {
        self.shutdown.store(true, Release);
        if let Some(handle) = self.server.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoke_single_thread() {
        let fc = FlatCombiningSkipList::new(1);
        assert!(fc.add(5, 0));
        assert!(!fc.add(5, 0));
        assert!(fc.contains(5, 0));
        assert!(fc.remove(5, 0));
        assert!(!fc.contains(5, 0));
    }

    #[test]
    fn pop_min_drains_in_ascending_order() {
        let fc = FlatCombiningSkipList::new(1);
        for k in [9, 1, 5, 3, 7] {
            assert!(fc.add(k, 0));
        }
        let mut popped = vec![];
        while let Some(k) = fc.pop_min(0) {
            popped.push(k);
        }
        assert_eq!(popped, vec![1, 3, 5, 7, 9]);
    }

    #[test]
    fn concurrent_clients_see_consistent_state() {
        use std::sync::Arc;
        use std::thread as std_thread;

        let fc = Arc::new(FlatCombiningSkipList::new(8));
        let mut handles = vec![];
        for t in 0..8 {
            let fc = fc.clone();
            handles.push(std_thread::spawn(move || {
                for i in 0..200 {
                    let key = (t * 200 + i) as i64;
                    assert!(fc.add(key, t));
                    assert!(fc.contains(key, t));
                    assert!(fc.remove(key, t));
                    assert!(!fc.contains(key, t));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }
}
