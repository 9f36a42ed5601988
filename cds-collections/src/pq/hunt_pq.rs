//! Heap-array priority queue with a bit-reversed insertion counter
//! (`hunt_pq`).
//!
//! A fixed-capacity 1-indexed binary heap with one spinlock per bucket.
//! `add` claims the next leaf via a globally-locked bit-reversed counter,
//! then releases the global lock immediately and sifts up using only
//! pairwise parent/child locking. `pop_min` does the mirror image with the
//! counter's `decrement`, moving the last leaf's value into the root and
//! sifting down.
//!
//! The bit reversal is what makes this scale: consecutive counter values
//! land in different subtrees, so concurrent inserts rarely lock-contend
//! on the same ancestors during sift-up.
//!
//! **Naming note.** The algorithm this is ported from orders buckets so
//! that a strictly *greater* priority sifts toward the root — it is a
//! max-heap, and `pop_min` removes the *largest* priority. This
//! implementation keeps that confirmed behavior rather than silently
//! inverting the comparison, and documents it here instead of leaving it
//! as a latent surprise.

use cds_core::locks::Spinlock;
use cds_core::types::Key;
use std::cell::UnsafeCell;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use std::thread_local;

const EMPTY: u64 = u64::MAX;
const AVAILABLE: u64 = u64::MAX - 1;

static TAG_SOURCE: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static THREAD_TAG: u64 = TAG_SOURCE.fetch_add(1, Relaxed);
}

fn current_tag() -> u64 {
    THREAD_TAG.with(|t| *t)
}

struct Bucket {
    lock: Spinlock,
    tag: AtomicU64,
    priority: UnsafeCell<Key>,
}

impl Bucket {
    fn new() -> Self {
        Self {
            lock: Spinlock::new(),
            tag: AtomicU64::new(EMPTY),
            priority: UnsafeCell::new(0),
        }
    }
}

unsafe impl Sync for Bucket {}

struct BitReversedCounter {
    count: u64,
    reversed: u64,
    high_bit: i32,
}

impl BitReversedCounter {
    fn new() -> Self {
        Self {
            count: 0,
            reversed: 0,
            high_bit: -1,
        }
    }

    fn increment(&mut self) -> u64 {
        self.count += 1;
        let mut bit = self.high_bit;
        while bit >= 0 {
            let mask = 1u64 << bit;
            let was_set = self.reversed & mask != 0;
            self.reversed ^= mask;
            if was_set {
                break;
            }
            bit -= 1;
        }
        if bit < 0 {
            self.reversed = self.count;
            self.high_bit += 1;
        }
        self.reversed
    }

    fn decrement(&mut self) -> u64 {
        self.count -= 1;
        let mut bit = self.high_bit;
        while bit >= 0 {
            let mask = 1u64 << bit;
            let was_set = self.reversed & mask != 0;
            self.reversed ^= mask;
            if !was_set {
                break;
            }
            bit -= 1;
        }
        if bit < 0 {
            self.reversed = self.count;
            self.high_bit -= 1;
        }
        self.reversed
    }
}

/// A fixed-capacity heap-array priority queue. Out-of-capacity inserts
/// are rejected explicitly: `add` returns `false` once every bucket is in
/// use, rather than growing.
pub struct HuntQueue {
    counter_lock: Spinlock,
    counter: UnsafeCell<BitReversedCounter>,
    buckets: Vec<Bucket>,
}

impl HuntQueue {
    /// Creates an empty queue with room for `capacity - 1` elements
    /// (index 0 is never used, matching the 1-indexed heap layout).
    pub fn new(capacity: usize) -> Self {
        Self {
            counter_lock: Spinlock::new(),
            counter: UnsafeCell::new(BitReversedCounter::new()),
            buckets: (0..capacity.max(2)).map(|_| Bucket::new()).collect(),
        }
    }

    fn swap_buckets(&self, a: usize, b: usize) {
        let tag_a = self.buckets[a].tag.load(Relaxed);
        let tag_b = self.buckets[b].tag.load(Relaxed);
        let (pa, pb) = unsafe { (*self.buckets[a].priority.get(), *self.buckets[b].priority.get()) };
        self.buckets[a].tag.store(tag_b, Relaxed);
        self.buckets[b].tag.store(tag_a, Relaxed);
        unsafe {
            *self.buckets[a].priority.get() = pb;
            *self.buckets[b].priority.get() = pa;
        }
    }

    /// Inserts `priority`. Returns `false` if the heap is at capacity.
    pub fn add(&self, priority: Key) -> bool {
        let tag = current_tag();
        self.counter_lock.lock();
        let leaf = unsafe { (*self.counter.get()).increment() } as usize;
        if leaf >= self.buckets.len() {
            unsafe { (*self.counter.get()).decrement() };
            self.counter_lock.unlock();
            log::warn!("hunt_pq rejected insert: at capacity ({} buckets)", self.buckets.len());
            return false;
        }
        self.buckets[leaf].lock.lock();
        self.counter_lock.unlock();
        unsafe { *self.buckets[leaf].priority.get() = priority };
        self.buckets[leaf].tag.store(tag, Release);
        self.buckets[leaf].lock.unlock();

        let mut i = leaf;
        while i > 1 {
            let parent = i / 2;
            self.buckets[parent].lock.lock();
            self.buckets[i].lock.lock();
            let old_i = i;

            if self.buckets[parent].tag.load(Acquire) == AVAILABLE
                && self.buckets[i].tag.load(Acquire) == tag
            {
                let p_i = unsafe { *self.buckets[i].priority.get() };
                let p_parent = unsafe { *self.buckets[parent].priority.get() };
                if p_i > p_parent {
                    self.swap_buckets(i, parent);
                    i = parent;
                } else {
                    self.buckets[i].tag.store(AVAILABLE, Release);
                    i = 0;
                }
            } else if self.buckets[parent].tag.load(Acquire) == EMPTY {
                i = 0;
            } else if self.buckets[i].tag.load(Acquire) != tag {
                i = parent;
            }

            self.buckets[old_i].lock.unlock();
            self.buckets[parent].lock.unlock();
        }
        if i == 1 {
            self.buckets[1].lock.lock();
            if self.buckets[1].tag.load(Acquire) == tag {
                self.buckets[1].tag.store(AVAILABLE, Release);
            }
            self.buckets[1].lock.unlock();
        }
        true
    }

    /// Removes and returns the root priority (the *largest*, per this
    /// structure's confirmed max-heap ordering), or `None` if empty.
    pub fn pop_min(&self) -> Option<Key> {
        self.counter_lock.lock();
        if unsafe { (*self.counter.get()).count } == 0 {
            self.counter_lock.unlock();
            return None;
        }
        let bottom = unsafe { (*self.counter.get()).decrement() } as usize;
        self.buckets[bottom].lock.lock();
        self.counter_lock.unlock();

        let priority = unsafe { *self.buckets[bottom].priority.get() };
        self.buckets[bottom].tag.store(EMPTY, Release);
        self.buckets[bottom].lock.unlock();

        self.buckets[1].lock.lock();
        if self.buckets[1].tag.load(Acquire) == EMPTY {
            self.buckets[1].lock.unlock();
            return Some(priority);
        }

        unsafe {
            *self.buckets[bottom].priority.get() = *self.buckets[1].priority.get();
            *self.buckets[1].priority.get() = priority;
        }
        self.buckets[1].tag.store(AVAILABLE, Release);

        let mut i = 1usize;
        let size = self.buckets.len();
        while i < size / 2 {
            let left = i * 2;
            let right = i * 2 + 1;
            self.buckets[left].lock.lock();
            self.buckets[right].lock.lock();

            let child;
            if self.buckets[left].tag.load(Acquire) == EMPTY {
                self.buckets[right].lock.unlock();
                self.buckets[left].lock.unlock();
                break;
            } else if self.buckets[right].tag.load(Acquire) == EMPTY
                || unsafe { *self.buckets[left].priority.get() }
                    > unsafe { *self.buckets[right].priority.get() }
            {
                self.buckets[right].lock.unlock();
                child = left;
            } else {
                self.buckets[left].lock.unlock();
                child = right;
            }

            let p_child = unsafe { *self.buckets[child].priority.get() };
            let p_i = unsafe { *self.buckets[i].priority.get() };
            if p_child > p_i {
                self.swap_buckets(child, i);
                self.buckets[i].lock.unlock();
                i = child;
            } else {
                self.buckets[child].lock.unlock();
                break;
            }
        }
        self.buckets[i].lock.unlock();
        Some(priority)
    }
}

unsafe impl Send for HuntQueue {}
unsafe impl Sync for HuntQueue {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn sequential_pops_are_descending() {
        let pq = HuntQueue::new(64);
        for k in [9, 1, 5, 3, 7] {
            assert!(pq.add(k));
        }
        let mut popped = vec![];
        while let Some(k) = pq.pop_min() {
            popped.push(k);
        }
        assert_eq!(popped, vec![9, 7, 5, 3, 1]);
    }

    #[test]
    fn rejects_inserts_past_capacity() {
        let pq = HuntQueue::new(4);
        assert!(pq.add(1));
        assert!(pq.add(2));
        assert!(pq.add(3));
        assert!(!pq.add(4));
    }

    #[test]
    fn concurrent_workload_drains_every_insert_exactly_once() {
        let capacity = 5000;
        let pq = Arc::new(HuntQueue::new(capacity));
        let per_thread = 600;
        let threads = 6;

        let mut handles = vec![];
        for t in 0..threads {
            let pq = pq.clone();
            handles.push(thread::spawn(move || {
                for i in 0..per_thread {
                    pq.add((t * per_thread + i) as i64);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let mut seen = HashSet::new();
        while let Some(k) = pq.pop_min() {
            assert!(seen.insert(k));
        }
        assert_eq!(seen.len(), threads * per_thread);
    }
}
