//! Shavit–Lotan priority queue (`sl_pq`).
//!
//! A Harris-style lock-free skip-list (the same find/mark/unlink protocol
//! as [`crate::skiplist::fhsl_lf`]) augmented with a one-shot `deleted`
//! flag per node. `pop_min` walks from `head.next[0]`, skips nodes already
//! flagged deleted, and races to flip the first live candidate's flag from
//! `false` to `true`; the winner then calls the ordinary `remove` to
//! physically unlink it. The flip is the linearization point, so pop-min
//! here is strictly linearizable, unlike [`crate::pq::lj_pq`] or
//! [`crate::pq::spray_pq`].

use cds_core::reclaim::{self, Atomic, Guard, Owned, Shared};
use cds_core::rng;
use cds_core::types::{Key, MAX_HEIGHT, MAX_KEY, MIN_KEY};
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::{Acquire, Release};

const MARK: usize = 0b1;

struct Node {
    key: Key,
    top_level: usize,
    next: Vec<Atomic<Node>>,
    deleted: AtomicBool,
}

impl Node {
    fn new<'g>(key: Key, top_level: usize, succs: &[Shared<'g, Node>]) -> Self {
        let next = (0..=top_level).map(|i| Atomic::from(succs[i])).collect();
        Self {
            key,
            top_level,
            next,
            deleted: AtomicBool::new(false),
        }
    }

    fn sentinel(key: Key, fill: Shared<'_, Node>) -> Self {
        let next = (0..MAX_HEIGHT).map(|_| Atomic::from(fill)).collect();
        Self {
            key,
            top_level: MAX_HEIGHT - 1,
            next,
            deleted: AtomicBool::new(false),
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

/// A lock-free priority queue backed by a skip-list with per-node
/// `deleted` flags.
pub struct ShavitLotanQueue {
    head: Atomic<Node>,
}

impl Default for ShavitLotanQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ShavitLotanQueue {
    /// Creates an empty priority queue.
    pub fn new() -> Self {
        let guard = &reclaim::pin();
        let tail = Owned::new(Node::sentinel(MAX_KEY, Shared::null())).into_shared(guard);
        let head = Node::sentinel(MIN_KEY, tail);
        Self {
            head: Atomic::new(head),
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

    /// Returns `true` iff `key` is present and not logically deleted.
    pub fn contains(&self, key: Key) -> bool {
        let guard = &reclaim::pin();
        let mut pred = self.head_shared(guard);
        for level in (0..MAX_HEIGHT).rev() {
            let mut curr = unsafe { pred.deref() }.next[level].load(Acquire, guard);
            loop {
                let curr_addr = unmark(curr);
                let curr_ref = unsafe { curr_addr.deref() };
                if curr_ref.key < key {
                    pred = curr_addr;
                    curr = curr_ref.next[level].load(Acquire, guard);
                } else {
                    break;
                }
            }
        }
        let succ = unsafe { pred.deref() }.next[0].load(Acquire, guard);
        let succ_ref = unsafe { unmark(succ).deref() };
        succ_ref.key == key && !is_marked(succ) && !succ_ref.deleted.load(Acquire)
    }

    /// Inserts `key`. Returns `true` iff it was absent and is now present.
    pub fn add(&self, key: Key, seed: &mut u64) -> bool {
        let top_level = rng::random_level(seed, MAX_HEIGHT);
        let guard = &reclaim::pin();
        let mut preds = vec![Shared::null(); MAX_HEIGHT];
        let mut succs = vec![Shared::null(); MAX_HEIGHT];
        loop {
            if self.find(key, &mut preds, &mut succs, guard) {
                return false;
            }

            let new_node = Owned::new(Node::new(key, top_level, &succs)).into_shared(guard);
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
        node_ref.deleted.store(true, Release);

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

    /// Removes and returns the smallest key, or `None` if the queue is
    /// empty. Linearizes at the CAS that flips the winning node's
    /// `deleted` flag from `false` to `true`.
    pub fn pop_min(&self) -> Option<Key> {
        loop {
            let guard = &reclaim::pin();
            let mut curr = unsafe { self.head_shared(guard).deref() }.next[0].load(Acquire, guard);
            loop {
                let curr_addr = unmark(curr);
                let curr_ref = unsafe { curr_addr.deref() };
                if curr_ref.key == MAX_KEY {
                    return None;
                }
                if curr_ref.deleted.load(Acquire) {
                    curr = curr_ref.next[0].load(Acquire, guard);
                    continue;
                }
                match curr_ref
                    .deleted
                    .compare_exchange(false, true, Release, Acquire)
                {
                    Ok(_) => {
                        let key = curr_ref.key;
                        self.remove(key);
                        return Some(key);
                    }
                    Err(_) => {
                        curr = curr_ref.next[0].load(Acquire, guard);
                        continue;
                    }
                }
            }
        }
    }
}

impl Drop for ShavitLotanQueue {
    fn drop(&mut self) {
        let guard = &reclaim::pin();
        let mut curr = self.head.load(Acquire, guard);
        while !curr.is_null() {
            let curr_addr = unmark(curr);
            let next = unsafe { curr_addr.deref() }.next[0].load(Acquire, guard);
            unsafe { drop(curr_addr.into_owned()) };
            curr = unmark(next);
        }
    }
}

unsafe impl Send for ShavitLotanQueue {}
unsafe impl Sync for ShavitLotanQueue {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_invariant() {
        let pq = ShavitLotanQueue::new();
        let mut seed = 11u64;
        for k in [9, 1, 5, 3, 7] {
            assert!(pq.add(k, &mut seed));
        }
        let mut popped = vec![];
        while let Some(k) = pq.pop_min() {
            popped.push(k);
        }
        assert_eq!(popped, vec![1, 3, 5, 7, 9]);
    }

    #[test]
    fn pop_on_empty_is_none() {
        let pq = ShavitLotanQueue::new();
        assert_eq!(pq.pop_min(), None);
    }

    #[test]
    fn concurrent_pops_never_duplicate() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;
        use std::thread;

        let pq = Arc::new(ShavitLotanQueue::new());
        let mut seed = 5u64;
        let n = 2000;
        for k in 0..n {
            pq.add(k, &mut seed);
        }

        let popped_count = Arc::new(AtomicUsize::new(0));
        let mut handles = vec![];
        for t in 0..8 {
            let pq = pq.clone();
            let popped_count = popped_count.clone();
            handles.push(thread::spawn(move || {
                let _ = t;
                let mut local = 0;
                while pq.pop_min().is_some() {
                    local += 1;
                }
                popped_count.fetch_add(local, Ordering::Relaxed);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(popped_count.load(Ordering::Relaxed), n as usize);
        assert_eq!(pq.pop_min(), None);
    }
}
