//! Lock-free fixed-height skip list (`fhsl_lf`).
//!
//! Harris/Michael-style marking: a node's level-0 mark bit (encoded in the
//! low bit of the next-pointer tag) is set before the node is physically
//! unlinked, and `find` opportunistically helps unlink any marked run it
//! walks past. The same find/mark/unlink protocol is reused almost
//! verbatim by [`crate::pq::sl_pq`]'s pop-min.

use cds_core::reclaim::{self, Atomic, Guard, Owned, Shared};
use cds_core::rng;
use cds_core::types::{Key, MAX_HEIGHT, MAX_KEY, MIN_KEY};
use std::sync::atomic::Ordering::{Acquire, Release};

const MARK: usize = 0b1;

struct Node {
    key: Key,
    top_level: usize,
    next: Vec<Atomic<Node>>,
}

impl Node {
    fn new<'g>(key: Key, top_level: usize, succs: &[Shared<'g, Node>]) -> Self {
        let next = (0..=top_level).map(|i| Atomic::from(succs[i])).collect();
        Self {
            key,
            top_level,
            next,
        }
    }

    fn sentinel(key: Key, fill: Shared<'_, Node>) -> Self {
        let next = (0..MAX_HEIGHT).map(|_| Atomic::from(fill)).collect();
        Self {
            key,
            top_level: MAX_HEIGHT - 1,
            next,
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

/// A lock-free ordered set of 64-bit signed keys backed by a fixed-height
/// skip list.
pub struct LockFreeSkipList {
    head: Atomic<Node>,
}

impl Default for LockFreeSkipList {
    fn default() -> Self {
        Self::new()
    }
}

impl LockFreeSkipList {
    /// Creates an empty skip list.
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

    /// Finds the chain of predecessors/successors for `key` at every
    /// level, physically unlinking any marked node it walks past.
    /// Returns `true` iff `succs[0]` is an exact match for `key`.
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

    /// Returns `true` iff `key` is present. Read-only: never helps unlink.
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
        succ_ref.key == key && !is_marked(succ)
    }

    /// Inserts `key`, threading `seed` through the shared geometric level
    /// sampler. Returns `true` iff it was absent and is now present.
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

    /// Removes `key`, abandoning the unlinked node rather than retiring it.
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
}

impl Drop for LockFreeSkipList {
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

unsafe impl Send for LockFreeSkipList {}
unsafe impl Sync for LockFreeSkipList {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn smoke() {
        let sl = LockFreeSkipList::new();
        let mut seed = 1u64;
        assert!(sl.add(5, &mut seed));
        assert!(sl.add(3, &mut seed));
        assert!(sl.add(7, &mut seed));
        assert!(!sl.add(5, &mut seed));
        assert!(sl.contains(5));
        assert!(!sl.contains(4));
        assert!(sl.remove(5));
        assert!(!sl.contains(5));
        assert!(!sl.remove(5));
    }

    #[test]
    fn concurrent_race_matches_parity() {
        let sl = Arc::new(LockFreeSkipList::new());
        let keys = 1024usize;
        let threads = 6;
        let adds: Arc<Vec<AtomicUsize>> =
            Arc::new((0..keys).map(|_| AtomicUsize::new(0)).collect());
        let removes: Arc<Vec<AtomicUsize>> =
            Arc::new((0..keys).map(|_| AtomicUsize::new(0)).collect());

        let mut handles = vec![];
        for t in 0..threads {
            let sl = sl.clone();
            let adds = adds.clone();
            let removes = removes.clone();
            handles.push(thread::spawn(move || {
                let mut seed = (t as u64 + 1) * 104_729;
                for _ in 0..3000 {
                    let k = (rng::next(&mut seed) as usize % keys) as i64;
                    match rng::next(&mut seed) % 3 {
                        0 => {
                            if sl.add(k, &mut seed) {
                                adds[k as usize].fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        1 => {
                            if sl.remove(k) {
                                removes[k as usize].fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        _ => {
                            sl.contains(k);
                        }
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        for k in 0..keys {
            let a = adds[k].load(Ordering::Relaxed);
            let r = removes[k].load(Ordering::Relaxed);
            assert_eq!(sl.contains(k as i64), a > r);
        }
    }
}
