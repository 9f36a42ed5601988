//! Spray-list priority queue (`spray_pq`).
//!
//! A Harris-style lock-free skip-list exactly like
//! [`crate::skiplist::fhsl_lf`], plus a tri-state `state` field
//! (`Padding` / `Active` / `Deleted`) used purely to pick a pop-min
//! winner, and a chain of padding nodes prepended to the real head so
//! that repeated sprays don't all converge on the same first few live
//! nodes. Of the several cleaner variants the algorithm admits, this
//! implements the mutex-serialized cleaner: with probability `1/T` a
//! popper takes an exclusive lock and walks from the real head instead of
//! spraying, splicing past any run of already-deleted nodes it passes.
//! Both pop-min paths are relaxed: quiescently consistent, not
//! linearizable.

use cds_core::reclaim::{self, Atomic, Guard, Owned, Shared};
use cds_core::rng;
use cds_core::types::{Key, MAX_HEIGHT, MAX_KEY, MIN_KEY};
use parking_lot::Mutex;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};

const MARK: usize = 0b1;

const PADDING: u8 = 0;
const ACTIVE: u8 = 1;
const DELETED: u8 = 2;

struct Node {
    key: Key,
    top_level: usize,
    next: Vec<Atomic<Node>>,
    state: AtomicU8,
}

impl Node {
    fn new<'g>(key: Key, top_level: usize, succs: &[Shared<'g, Node>], state: u8) -> Self {
        let next = (0..=top_level).map(|i| Atomic::from(succs[i])).collect();
        Self {
            key,
            top_level,
            next,
            state: AtomicU8::new(state),
        }
    }

    fn sentinel(key: Key, fill: Shared<'_, Node>, state: u8) -> Self {
        let next = (0..MAX_HEIGHT).map(|_| Atomic::from(fill)).collect();
        Self {
            key,
            top_level: MAX_HEIGHT - 1,
            next,
            state: AtomicU8::new(state),
        }
    }
}

fn unmark<'g>(ptr: Shared<'g, Node>) -> Shared<'g, Node> {
    ptr.with_tag(0)
}

fn is_marked(ptr: Shared<'_, Node>) -> bool {
    ptr.tag() & MARK != 0
}

fn mark<'g>(ptr: Shared<'g, Node>) -> Shared<'g, Node> {
    ptr.with_tag(MARK)
}

/// Spray-descent tuning derived from the expected thread count, per the
/// reference configuration: `H = J = log2(T) + 1`, `D = 1`,
/// `padding_amount = T * log2(max(T, 2)) / 2`.
#[derive(Debug, Clone, Copy)]
pub struct SprayConfig {
    pub start_height: usize,
    pub max_jump: usize,
    pub descend_amount: usize,
    pub padding_amount: usize,
    pub thread_count: usize,
}

impl SprayConfig {
    pub fn for_thread_count(thread_count: usize) -> Self {
        let t = thread_count.max(1);
        let log2t = (t as f64).log2();
        let start_height = ((log2t + 1.0).ceil() as usize).clamp(1, MAX_HEIGHT);
        let max_jump = start_height;
        let padding_amount = ((t as f64) * (t.max(2) as f64).log2() / 2.0).ceil() as usize;
        Self {
            start_height,
            max_jump,
            descend_amount: 1,
            padding_amount: padding_amount.max(1),
            thread_count: t,
        }
    }
}

/// A relaxed lock-free priority queue using randomized spray descent to
/// sample an approximate minimum.
pub struct SprayQueue {
    head: Atomic<Node>,
    padding_head: Atomic<Node>,
    config: SprayConfig,
    cleaner_lock: Mutex<()>,
}

impl SprayQueue {
    /// Creates an empty priority queue tuned for `thread_count` concurrent
    /// poppers.
    pub fn new(thread_count: usize) -> Self {
        let config = SprayConfig::for_thread_count(thread_count);
        let guard = &reclaim::pin();
        let tail = Owned::new(Node::sentinel(MAX_KEY, Shared::null(), ACTIVE)).into_shared(guard);
        let head = Owned::new(Node::sentinel(MIN_KEY, tail, PADDING)).into_shared(guard);

        let mut next = head;
        for _ in 0..config.padding_amount {
            let pad = Node::sentinel(MIN_KEY, next, PADDING);
            next = Owned::new(pad).into_shared(guard);
        }

        Self {
            head: Atomic::from(head),
            padding_head: Atomic::from(next),
            config,
            cleaner_lock: Mutex::new(()),
        }
    }

    fn head_shared<'g>(&self, guard: &'g Guard) -> Shared<'g, Node> {
        self.head.load(Acquire, guard)
    }

    fn find<'g>(
        &self,
        key: Key,
        preds: &mut [Shared<'g, Node>],
        succs: &mut [Shared<'g, Node>],
        guard: &'g Guard,
    ) -> bool {
        'retry: loop {
            let mut pred = self.head_shared(guard);
            for level in (0..MAX_HEIGHT).rev() {
                let mut curr = unsafe { pred.deref() }.next[level].load(Acquire, guard);
                loop {
                    let curr_ref = unsafe { unmark(curr).deref() };
                    let succ = curr_ref.next[level].load(Acquire, guard);
                    if is_marked(succ) {
                        let unmarked_succ = unmark(succ);
                        match unsafe { pred.deref() }.next[level].compare_exchange(
                            curr,
                            unmarked_succ,
                            Release,
                            Acquire,
                            guard,
                        ) {
                            Ok(_) => {
                                curr = unmarked_succ;
                                continue;
                            }
                            Err(_) => continue 'retry,
                        }
                    }
                    if curr_ref.key < key {
                        pred = unmark(curr);
                        curr = succ;
                    } else {
                        break;
                    }
                }
                preds[level] = pred;
                succs[level] = curr;
            }
            return unsafe { unmark(succs[0]).deref() }.key == key;
        }
    }

    /// Returns `true` iff `key` is present and active.
    pub fn contains(&self, key: Key) -> bool {
        let guard = &reclaim::pin();
        let mut preds = vec![Shared::null(); MAX_HEIGHT];
        let mut succs = vec![Shared::null(); MAX_HEIGHT];
        if !self.find(key, &mut preds, &mut succs, guard) {
            return false;
        }
        unsafe { unmark(succs[0]).deref() }.state.load(Acquire) == ACTIVE
    }

    /// Inserts `key`. Returns `true` iff it was absent and is now present.
    pub fn add(&self, key: Key, seed: &mut u64) -> bool {
        let top_level = rng::random_level(seed, MAX_HEIGHT);
        let guard = &reclaim::pin();
        let mut preds = vec![Shared::null(); MAX_HEIGHT];
        let mut succs = vec![Shared::null(); MAX_HEIGHT];
        loop {
            if self.find(key, &mut preds, &mut succs, guard) {
                let existing = unsafe { unmark(succs[0]).deref() };
                if existing.state.load(Acquire) == DELETED {
                    self.remove_impl(key, true);
                    continue;
                }
                return false;
            }

            let new_node =
                Owned::new(Node::new(key, top_level, &succs, ACTIVE)).into_shared(guard);
            match unsafe { preds[0].deref() }.next[0].compare_exchange(
                succs[0],
                new_node,
                Release,
                Acquire,
                guard,
            ) {
                Ok(_) => {}
                Err(_) => {
                    unsafe { drop(new_node.into_owned()) };
                    continue;
                }
            }

            for level in 1..=top_level {
                loop {
                    unsafe { new_node.deref() }.next[level].store(succs[level], Release);
                    match unsafe { preds[level].deref() }.next[level].compare_exchange(
                        succs[level],
                        new_node,
                        Release,
                        Acquire,
                        guard,
                    ) {
                        Ok(_) => break,
                        Err(_) => {
                            self.find(key, &mut preds, &mut succs, guard);
                        }
                    }
                }
            }
            return true;
        }
    }

    /// Removes `key` outright, abandoning the unlinked node.
    pub fn remove_leaky(&self, key: Key) -> bool {
        self.remove_impl(key, false)
    }

    /// Removes `key`. Returns `true` iff it was present and is now absent.
    pub fn remove(&self, key: Key) -> bool {
        self.remove_impl(key, true)
    }

    fn remove_impl(&self, key: Key, retire: bool) -> bool {
        let guard = &reclaim::pin();
        let mut preds = vec![Shared::null(); MAX_HEIGHT];
        let mut succs = vec![Shared::null(); MAX_HEIGHT];
        if !self.find(key, &mut preds, &mut succs, guard) {
            return false;
        }
        let node = succs[0];
        let node_ref = unsafe { node.deref() };
        node_ref.state.store(DELETED, Release);

        for level in (1..=node_ref.top_level).rev() {
            loop {
                let succ = node_ref.next[level].load(Acquire, guard);
                if is_marked(succ) {
                    break;
                }
                if node_ref.next[level]
                    .compare_exchange(succ, mark(succ), Release, Acquire, guard)
                    .is_ok()
                {
                    break;
                }
            }
        }

        loop {
            let succ = node_ref.next[0].load(Acquire, guard);
            if is_marked(succ) {
                return false;
            }
            if node_ref.next[0]
                .compare_exchange(succ, mark(succ), Release, Acquire, guard)
                .is_ok()
            {
                self.find(key, &mut preds, &mut succs, guard);
                if retire {
                    unsafe { guard.defer_destroy(node) };
                }
                return true;
            }
        }
    }

    /// Randomized top-down descent from the padding chain, returning a
    /// node near (but not guaranteed at) the front of the list.
    fn spray<'g>(&self, seed: &mut u64, guard: &'g Guard) -> Shared<'g, Node> {
        let mut node = self.padding_head.load(Acquire, guard);
        let mut level = self.config.start_height.saturating_sub(1);
        loop {
            let jump = (rng::next(seed) % (self.config.max_jump as u64 + 1)) as usize;
            for _ in 0..jump {
                let next = unsafe { node.deref() }.next[level].load(Acquire, guard);
                if unsafe { next.deref() }.key == MAX_KEY {
                    break;
                }
                node = next;
            }
            if level == 0 {
                break;
            }
            level = level.saturating_sub(self.config.descend_amount);
        }
        node
    }

    /// Removes and returns an approximate minimum, or `None` if the queue
    /// is empty. With probability `1/thread_count` takes the serialized
    /// cleaner role instead of spraying.
    pub fn pop_min(&self, seed: &mut u64) -> Option<Key> {
        let guard = &reclaim::pin();
        if rng::next(seed) % (self.config.thread_count as u64) == 0 {
            return self.pop_min_cleaner(guard);
        }

        let mut curr = self.spray(seed, guard);
        loop {
            let curr_ref = unsafe { unmark(curr).deref() };
            if curr_ref.key == MAX_KEY {
                return None;
            }
            match curr_ref.state.load(Acquire) {
                PADDING | DELETED => {
                    curr = curr_ref.next[0].load(Acquire, guard);
                    continue;
                }
                _ => {}
            }
            match curr_ref
                .state
                .compare_exchange(ACTIVE, DELETED, Release, Acquire)
            {
                Ok(_) => {
                    let key = curr_ref.key;
                    self.remove_impl(key, true);
                    return Some(key);
                }
                Err(_) => {
                    curr = curr_ref.next[0].load(Acquire, guard);
                }
            }
        }
    }

    fn pop_min_cleaner(&self, guard: &Guard) -> Option<Key> {
        let _held = self.cleaner_lock.lock();
        let head = self.head_shared(guard);
        let head_next0 = unsafe { head.deref() }.next[0].load(Acquire, guard);
        let mut curr = head_next0;
        loop {
            let curr_addr = unmark(curr);
            let curr_ref = unsafe { curr_addr.deref() };
            if curr_ref.key == MAX_KEY {
                // Nothing to claim; best-effort advance head past the dead
                // prefix we just walked. A concurrent `add` may have linked
                // a new node onto `head.next[0]` since we observed it, in
                // which case the CAS fails and we simply leave head alone.
                let _ = unsafe { head.deref() }.next[0].compare_exchange(
                    head_next0,
                    curr_addr,
                    Release,
                    Relaxed,
                    guard,
                );
                return None;
            }
            if curr_ref.state.load(Acquire) == DELETED {
                curr = curr_ref.next[0].load(Acquire, guard);
                continue;
            }
            if curr_ref
                .state
                .compare_exchange(ACTIVE, DELETED, Release, Acquire)
                .is_err()
            {
                curr = curr_ref.next[0].load(Acquire, guard);
                continue;
            }
            let succ = unmark(curr_ref.next[0].load(Acquire, guard));
            // Same best-effort advance as above: skip it rather than
            // clobbering a concurrently-linked insert if head moved.
            let _ = unsafe { head.deref() }.next[0].compare_exchange(
                head_next0,
                succ,
                Release,
                Relaxed,
                guard,
            );
            return Some(curr_ref.key);
        }
    }
}

impl Drop for SprayQueue {
    fn drop(&mut self) {
        // The padding chain's tail links into `head`, whose own level-0
        // chain links through every real node to `tail`, so one walk from
        // `padding_head` frees the entire structure.
        let guard = &reclaim::pin();
        let mut curr = self.padding_head.load(Acquire, guard);
        while !curr.is_null() {
            let curr_addr = unmark(curr);
            let next = unsafe { curr_addr.deref() }.next[0].load(Acquire, guard);
            unsafe { drop(curr_addr.into_owned()) };
            curr = unmark(next);
        }
    }
}

unsafe impl Send for SprayQueue {}
unsafe impl Sync for SprayQueue {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn smoke() {
        let pq = SprayQueue::new(4);
        let mut seed = 1u64;
        assert!(pq.add(5, &mut seed));
        assert!(pq.contains(5));
        assert!(pq.remove(5));
        assert!(!pq.contains(5));
    }

    #[test]
    fn starvation_freedom_under_contention() {
        let threads = 8usize;
        let total = 100_000i64;
        let pq = Arc::new(SprayQueue::new(threads));
        let mut seed = 3u64;
        for k in 1..=total {
            pq.add(k, &mut seed);
        }

        let popped_total = Arc::new(AtomicUsize::new(0));
        let per_thread_counts = Arc::new(Mutex::new(vec![0usize; threads]));
        let seen = Arc::new(Mutex::new(HashSet::new()));

        let mut handles = vec![];
        for t in 0..threads {
            let pq = pq.clone();
            let popped_total = popped_total.clone();
            let per_thread_counts = per_thread_counts.clone();
            let seen = seen.clone();
            handles.push(thread::spawn(move || {
                let mut seed = (t as u64 + 1) * 7919;
                let mut local = 0usize;
                loop {
                    match pq.pop_min(&mut seed) {
                        Some(k) => {
                            local += 1;
                            assert!(seen.lock().insert(k), "key {k} popped twice");
                            popped_total.fetch_add(1, Ordering::Relaxed);
                        }
                        None => {
                            if popped_total.load(Ordering::Relaxed) as i64 >= total {
                                break;
                            }
                        }
                    }
                }
                per_thread_counts.lock()[t] = local;
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(popped_total.load(Ordering::Relaxed) as i64, total);
        assert_eq!(seen.lock().len() as i64, total);
        for count in per_thread_counts.lock().iter() {
            assert!(*count <= (total as usize / threads) * 2);
        }
    }
}
