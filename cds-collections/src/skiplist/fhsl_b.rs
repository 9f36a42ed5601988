//! Lock-coupled fixed-height skip list with bulk transfer (`fhsl_b`).
//!
//! Reads are lock-free; `add`/`remove` lock each distinct predecessor
//! across the target's levels, validate, then publish or unlink. Lock
//! order is strict level-ascending across distinct predecessors, which
//! together with "only ever hold a node's own lock plus its locked
//! predecessors" precludes deadlock.
//!
//! The bulk operations exist for [`crate::flat_combining::apq_server`]:
//! `bulk_pop` detaches a prefix of the list as a standalone chain and
//! `bulk_push` splices such a chain into another `fhsl_b` instance.

use cds_core::locks::Spinlock;
use cds_core::reclaim::{self, Atomic, Guard, Owned, Shared};
use cds_core::rng;
use cds_core::types::{Key, MAX_HEIGHT, MAX_KEY, MIN_KEY};
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use std::sync::atomic::AtomicBool;

struct Node {
    key: Key,
    top_level: usize,
    next: Vec<Atomic<Node>>,
    marked: AtomicBool,
    fully_linked: AtomicBool,
    lock: Spinlock,
}

impl Node {
    fn new(key: Key, top_level: usize) -> Self {
        Self {
            key,
            top_level,
            next: (0..=top_level).map(|_| Atomic::null()).collect(),
            marked: AtomicBool::new(false),
            fully_linked: AtomicBool::new(false),
            lock: Spinlock::new(),
        }
    }

    fn sentinel(key: Key) -> Self {
        let mut n = Self::new(key, MAX_HEIGHT - 1);
        n.fully_linked.store(true, Relaxed);
        n
    }
}

/// A chain of nodes detached from one [`LockCoupledSkipList`] by
/// [`LockCoupledSkipList::bulk_pop`], ready to be spliced into another via
/// [`LockCoupledSkipList::bulk_push`].
pub struct DetachedChain {
    head: *const (),
    tail: *const (),
    /// Number of nodes detached; an approximate count under the
    /// documented no-concurrent-removers constraint.
    pub count: usize,
}

unsafe impl Send for DetachedChain {}

impl DetachedChain {
    /// Consumes the chain, returning its keys in ascending order and
    /// freeing every node. Used where the destination isn't another
    /// `LockCoupledSkipList` and [`LockCoupledSkipList::bulk_push`]
    /// doesn't apply.
    pub fn into_keys(self) -> Vec<Key> {
        let guard = &reclaim::pin();
        let mut keys = Vec::with_capacity(self.count);
        let mut curr = self.head;
        loop {
            let shared: Shared<'_, Node> = unsafe { Shared::from(curr as *const Node) };
            let node_ref = unsafe { shared.deref() };
            keys.push(node_ref.key);
            let next = node_ref.next[0].load(Relaxed, guard);
            let is_tail = curr == self.tail;
            unsafe { drop(shared.into_owned()) };
            if is_tail {
                break;
            }
            curr = next.as_raw() as *const ();
        }
        keys
    }
}

/// A set backed by a fixed-height skip list using lock coupling on
/// writers with lock-free readers.
pub struct LockCoupledSkipList {
    head: Atomic<Node>,
}

impl Default for LockCoupledSkipList {
    fn default() -> Self {
        Self::new()
    }
}

impl LockCoupledSkipList {
    /// Creates an empty skip list.
    pub fn new() -> Self {
        let guard = &reclaim::pin();
        let tail = Owned::new(Node::sentinel(MAX_KEY)).into_shared(guard);
        let mut head = Node::sentinel(MIN_KEY);
        for level in 0..MAX_HEIGHT {
            head.next[level].store(tail, Release);
        }
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
        let mut pred = self.head_shared(guard);
        let mut found = false;
        for level in (0..MAX_HEIGHT).rev() {
            let mut curr = unsafe { pred.deref() }.next[level].load(Acquire, guard);
            while unsafe { curr.deref() }.key < key {
                pred = curr;
                curr = unsafe { curr.deref() }.next[level].load(Acquire, guard);
            }
            if !found && unsafe { curr.deref() }.key == key {
                found = true;
            }
            preds[level] = pred;
            succs[level] = curr;
        }
        found
    }

    /// Returns `true` iff `key` is present and fully linked.
    pub fn contains(&self, key: Key) -> bool {
        let guard = &reclaim::pin();
        let mut pred = self.head_shared(guard);
        for level in (0..MAX_HEIGHT).rev() {
            let mut curr = unsafe { pred.deref() }.next[level].load(Acquire, guard);
            while unsafe { curr.deref() }.key < key {
                pred = curr;
                curr = unsafe { curr.deref() }.next[level].load(Acquire, guard);
            }
            let curr_ref = unsafe { curr.deref() };
            if curr_ref.key == key {
                return curr_ref.fully_linked.load(Acquire) && !curr_ref.marked.load(Acquire);
            }
        }
        false
    }

    /// Inserts `key`. Returns `true` iff it was absent and is now present.
    pub fn add(&self, key: Key, seed: &mut u64) -> bool {
        let top_level = rng::random_level(seed, MAX_HEIGHT);
        loop {
            let guard = &reclaim::pin();
            let mut preds = vec![Shared::null(); MAX_HEIGHT];
            let mut succs = vec![Shared::null(); MAX_HEIGHT];
            if self.find(key, &mut preds, &mut succs, guard) {
                let node_ref = unsafe { succs[0].deref() };
                if node_ref.marked.load(Acquire) {
                    continue;
                }
                while !node_ref.fully_linked.load(Acquire) {
                    std::hint::spin_loop();
                }
                return false;
            }

            let mut locked: Vec<Shared<Node>> = Vec::new();
            let mut valid = true;
            for level in 0..=top_level {
                let pred = preds[level];
                let succ = succs[level];
                if !locked.contains(&pred) {
                    unsafe { pred.deref() }.lock.lock();
                    locked.push(pred);
                }
                let pred_ref = unsafe { pred.deref() };
                valid = !pred_ref.marked.load(Acquire)
                    && !unsafe { succ.deref() }.marked.load(Acquire)
                    && pred_ref.next[level].load(Acquire, guard) == succ;
                if !valid {
                    break;
                }
            }

            if !valid {
                for p in &locked {
                    unsafe { p.deref() }.lock.unlock();
                }
                continue;
            }

            let new_node = Owned::new(Node::new(key, top_level)).into_shared(guard);
            for level in 0..=top_level {
                unsafe { new_node.deref() }.next[level].store(succs[level], Relaxed);
            }
            for level in 0..=top_level {
                unsafe { preds[level].deref() }.next[level].store(new_node, Release);
            }
            unsafe { new_node.deref() }.fully_linked.store(true, Release);

            for p in &locked {
                unsafe { p.deref() }.lock.unlock();
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
        let mut victim: Option<Shared<Node>> = None;
        let mut top_level = 0usize;
        let mut marked_by_us = false;
        let guard_owned = reclaim::pin();
        let guard = &guard_owned;

        loop {
            let mut preds = vec![Shared::null(); MAX_HEIGHT];
            let mut succs = vec![Shared::null(); MAX_HEIGHT];
            let found = self.find(key, &mut preds, &mut succs, guard);

            if !marked_by_us {
                if !found {
                    return false;
                }
                let candidate = succs[0];
                let candidate_ref = unsafe { candidate.deref() };
                if !candidate_ref.fully_linked.load(Acquire) {
                    continue;
                }
                candidate_ref.lock.lock();
                if candidate_ref.marked.load(Acquire) {
                    candidate_ref.lock.unlock();
                    return false;
                }
                candidate_ref.marked.store(true, Release);
                victim = Some(candidate);
                top_level = candidate_ref.top_level;
                marked_by_us = true;
            }

            let victim = victim.unwrap();
            let mut locked: Vec<Shared<Node>> = Vec::new();
            let mut valid = true;
            for level in 0..=top_level {
                let pred = preds[level];
                if !locked.contains(&pred) {
                    unsafe { pred.deref() }.lock.lock();
                    locked.push(pred);
                }
                let pred_ref = unsafe { pred.deref() };
                valid = !pred_ref.marked.load(Acquire)
                    && pred_ref.next[level].load(Acquire, guard) == victim;
                if !valid {
                    break;
                }
            }

            if !valid {
                for p in &locked {
                    unsafe { p.deref() }.lock.unlock();
                }
                continue;
            }

            for level in (0..=top_level).rev() {
                let succ = unsafe { victim.deref() }.next[level].load(Acquire, guard);
                unsafe { preds[level].deref() }.next[level].store(succ, Release);
            }
            unsafe { victim.deref() }.lock.unlock();
            for p in &locked {
                unsafe { p.deref() }.lock.unlock();
            }
            if retire {
                unsafe { guard.defer_destroy(victim) };
            }
            return true;
        }
    }

    /// Detaches up to `n` nodes from the front of the list as a standalone
    /// chain, re-homing `head`'s pointers past them.
    ///
    /// # Safety
    ///
    /// The source algorithm this is ported from documents this as unsafe
    /// under concurrent `remove`/`pop` on the same list: the caller must
    /// ensure no other thread is removing from this list while a bulk
    /// transfer is in flight. Concurrent `add`/`contains` are fine.
    pub unsafe fn bulk_pop(&self, n: usize) -> Option<DetachedChain> {
        if n == 0 {
            return None;
        }
        let guard = &reclaim::pin();
        let first = unsafe { self.head_shared(guard).deref() }.next[0].load(Acquire, guard);
        if unsafe { first.deref() }.key == MAX_KEY {
            return None;
        }

        let mut tail = first;
        let mut count = 1;
        while count < n {
            let next = unsafe { tail.deref() }.next[0].load(Acquire, guard);
            if unsafe { next.deref() }.key == MAX_KEY {
                break;
            }
            tail = next;
            count += 1;
        }

        let next_key = {
            let after = unsafe { tail.deref() }.next[0].load(Acquire, guard);
            unsafe { after.deref() }.key
        };

        let mut preds = vec![Shared::null(); MAX_HEIGHT];
        let mut succs = vec![Shared::null(); MAX_HEIGHT];
        self.find(next_key, &mut preds, &mut succs, guard);

        let head = self.head_shared(guard);
        let head_ref = unsafe { head.deref() };
        head_ref.lock.lock();
        for level in 0..MAX_HEIGHT {
            head_ref.next[level].store(succs[level], Release);
        }
        head_ref.lock.unlock();

        Some(DetachedChain {
            head: first.as_raw() as *const (),
            tail: tail.as_raw() as *const (),
            count,
        })
    }

    /// Splices a chain detached by [`Self::bulk_pop`] into this list,
    /// linking it in just before the destination's tail sentinel.
    ///
    /// # Safety
    ///
    /// `chain` must have been produced by `bulk_pop` on a list whose
    /// nodes are compatible with this one (same `Node` layout) and must
    /// not be reused after this call.
    pub unsafe fn bulk_push(&self, chain: DetachedChain) {
        let guard = &reclaim::pin();
        let mut preds = vec![Shared::null(); MAX_HEIGHT];
        let mut succs = vec![Shared::null(); MAX_HEIGHT];
        self.find(MAX_KEY, &mut preds, &mut succs, guard);

        let chain_head: Shared<'_, Node> = unsafe { Shared::from(chain.head as *const Node) };
        let chain_tail: Shared<'_, Node> = unsafe { Shared::from(chain.tail as *const Node) };

        let mut level_head: Vec<Option<Shared<Node>>> = vec![None; MAX_HEIGHT];
        let mut level_tail: Vec<Option<Shared<Node>>> = vec![None; MAX_HEIGHT];

        let mut node = chain_head;
        loop {
            let node_ref = unsafe { node.deref() };
            for level in 0..=node_ref.top_level {
                level_head[level].get_or_insert(node);
                level_tail[level] = Some(node);
            }
            if node.as_raw() == chain_tail.as_raw() {
                break;
            }
            node = node_ref.next[0].load(Acquire, guard);
        }

        for level in 0..MAX_HEIGHT {
            if let (Some(h), Some(t)) = (level_head[level], level_tail[level]) {
                unsafe { t.deref() }.next[level].store(succs[level], Relaxed);
                unsafe { preds[level].deref() }.next[level].store(h, Release);
            }
        }
    }
}

impl Drop for LockCoupledSkipList {
    fn drop(&mut self) {
        let guard = &reclaim::pin();
        let mut curr = self.head.load(Acquire, guard);
        while !curr.is_null() {
            let next = unsafe { curr.deref() }.next[0].load(Acquire, guard);
            unsafe { drop(curr.into_owned()) };
            curr = next;
        }
    }
}

unsafe impl Send for LockCoupledSkipList {}
unsafe impl Sync for LockCoupledSkipList {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoke() {
        let sl = LockCoupledSkipList::new();
        let mut seed = 3u64;
        assert!(sl.add(5, &mut seed));
        assert!(sl.add(1, &mut seed));
        assert!(!sl.add(5, &mut seed));
        assert!(sl.contains(1));
        assert!(sl.remove(5));
        assert!(!sl.contains(5));
    }

    #[test]
    fn bulk_transfer_preserves_order_and_drains_source() {
        let src = LockCoupledSkipList::new();
        let dst = LockCoupledSkipList::new();
        let mut seed = 99u64;
        for k in [10, 20, 30, 40, 50] {
            src.add(k, &mut seed);
        }
        let chain = unsafe { src.bulk_pop(3) }.unwrap();
        assert_eq!(chain.count, 3);
        assert!(!src.contains(10));
        assert!(!src.contains(20));
        assert!(!src.contains(30));
        assert!(src.contains(40));
        assert!(src.contains(50));

        unsafe { dst.bulk_push(chain) };
        assert!(dst.contains(10));
        assert!(dst.contains(20));
        assert!(dst.contains(30));
    }
}
