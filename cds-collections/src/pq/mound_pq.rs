//! Mound priority queue (`mound_pq`): a heap of sorted lists.
//!
//! A fixed-capacity 1-indexed binary heap where every node owns a lock
//! and a pointer to a sorted singly linked list (ascending by priority).
//! Heap order is on list heads: a child's head priority is always `>=`
//! its parent's. `add` samples random leaves to find a node whose list
//! head brackets the new priority, then walks up to the shallowest such
//! point; `pop_min` pops the root's list head and restores heap order
//! locally via [`MoundQueue::moundify`], recursing only into the child
//! whose list it swapped in.

use cds_core::locks::Spinlock;
use cds_core::reclaim::{self, Atomic, Guard, Owned, Shared};
use cds_core::rng;
use cds_core::types::{Key, MAX_KEY};
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use std::sync::atomic::AtomicUsize;

const ROOT: usize = 1;
const SEARCH_THRESHOLD: usize = 10;

struct ListNode {
    priority: Key,
    next: Atomic<ListNode>,
}

struct MoundNode {
    lock: Spinlock,
    list: Atomic<ListNode>,
}

impl MoundNode {
    fn new() -> Self {
        Self {
            lock: Spinlock::new(),
            list: Atomic::null(),
        }
    }
}

fn is_leaf(depth: usize, i: usize) -> bool {
    let lower = 1usize << depth.saturating_sub(1);
    if i < lower {
        return false;
    }
    let upper = (1usize << depth).saturating_sub(1);
    i <= upper
}

/// A heap of sorted lists over a fixed-size tree skeleton. Unlike
/// [`crate::pq::HuntQueue`], `capacity` bounds only the search tree's
/// shape (how many nodes `add` can index into, and thus how quickly it
/// finds an insertion point) — it does not bound how many keys the queue
/// can hold, since every node owns an unbounded sorted list rather than
/// a single slot. `add` therefore always succeeds and there is no
/// out-of-capacity case to grow or reject: a key that can't be placed at
/// some indexable node always has the root as a fallback, which accepts
/// any priority no larger than the current minimum.
pub struct MoundQueue {
    tree: Vec<MoundNode>,
    depth: AtomicUsize,
    max_depth: usize,
}

impl MoundQueue {
    /// Creates an empty queue over a tree of `capacity` nodes (index 0
    /// unused, matching the 1-indexed layout).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(4);
        let tree = (0..capacity).map(|_| MoundNode::new()).collect();
        let max_depth = (usize::BITS - 1 - (capacity as u32).leading_zeros()) as usize;
        Self {
            tree,
            depth: AtomicUsize::new(max_depth.saturating_sub(1).max(1)),
            max_depth: max_depth.max(1),
        }
    }

    fn val_of(list: Shared<'_, ListNode>) -> Key {
        if list.is_null() {
            MAX_KEY
        } else {
            unsafe { list.deref() }.priority
        }
    }

    fn get_val(&self, i: usize, guard: &Guard) -> Key {
        Self::val_of(self.tree[i].list.load(Acquire, guard))
    }

    fn rand_leaf(&self, depth: usize, seed: &mut u64) -> usize {
        let depth = depth.max(1);
        let lower = 1usize << (depth - 1);
        let upper = 1usize << depth;
        let diff = (upper - lower) + 1;
        let idx = lower + (rng::next(seed) as usize % diff);
        idx.min(self.tree.len() - 1)
    }

    fn linear_search(&self, leaf: usize, priority: Key, guard: &Guard) -> usize {
        let mut last_index = leaf;
        let mut parent = leaf / 2;
        while parent != 0 {
            if self.get_val(parent, guard) < priority {
                return last_index;
            }
            last_index = parent;
            parent /= 2;
        }
        last_index
    }

    fn find_insert_point(&self, seed: &mut u64, priority: Key, guard: &Guard) -> usize {
        loop {
            let depth = self.depth.load(Relaxed);
            for _ in 0..SEARCH_THRESHOLD {
                let leaf = self.rand_leaf(depth, seed);
                if self.get_val(leaf, guard) >= priority {
                    return self.linear_search(leaf, priority, guard);
                }
            }
            if depth < self.max_depth {
                let _ =
                    self.depth
                        .compare_exchange(depth, depth + 1, Relaxed, Relaxed);
            }
        }
    }

    /// Inserts `priority`, threading `seed` through the random leaf
    /// sampler. Always succeeds.
    pub fn add(&self, priority: Key, seed: &mut u64) -> bool {
        let guard = &reclaim::pin();
        loop {
            let insertion_point = self.find_insert_point(seed, priority, guard);
            if insertion_point == ROOT {
                self.tree[ROOT].lock.lock();
                if self.get_val(ROOT, guard) >= priority {
                    let old = self.tree[ROOT].list.load(Acquire, guard);
                    let new_node = Owned::new(ListNode {
                        priority,
                        next: Atomic::from(old),
                    })
                    .into_shared(guard);
                    self.tree[ROOT].list.store(new_node, Release);
                    self.tree[ROOT].lock.unlock();
                    return true;
                }
                self.tree[ROOT].lock.unlock();
                continue;
            }

            let parent_point = insertion_point / 2;
            self.tree[parent_point].lock.lock();
            self.tree[insertion_point].lock.lock();
            let child_val = self.get_val(insertion_point, guard);
            let parent_val = self.get_val(parent_point, guard);
            if child_val >= priority && parent_val <= priority {
                let old = self.tree[insertion_point].list.load(Acquire, guard);
                let new_node = Owned::new(ListNode {
                    priority,
                    next: Atomic::from(old),
                })
                .into_shared(guard);
                self.tree[insertion_point].list.store(new_node, Release);
                self.tree[insertion_point].lock.unlock();
                self.tree[parent_point].lock.unlock();
                return true;
            }
            self.tree[parent_point].lock.unlock();
            self.tree[insertion_point].lock.unlock();
        }
    }

    /// Removes and returns the minimum priority, or `None` if empty.
    /// Linearizes under the root's lock.
    pub fn pop_min(&self) -> Option<Key> {
        let guard = &reclaim::pin();
        self.tree[ROOT].lock.lock();
        let old = self.tree[ROOT].list.load(Acquire, guard);
        if old.is_null() {
            self.tree[ROOT].lock.unlock();
            return None;
        }
        let old_ref = unsafe { old.deref() };
        let next = old_ref.next.load(Acquire, guard);
        self.tree[ROOT].list.store(next, Release);
        let priority = old_ref.priority;
        unsafe { guard.defer_destroy(old) };
        self.moundify(ROOT, guard);
        Some(priority)
    }

    /// Local heap-repair step: the caller must already hold `tree[i]`'s
    /// lock. Releases every lock it acquires along the way, including
    /// `i`'s, before returning.
    fn moundify(&self, i: usize, guard: &Guard) {
        let depth = self.depth.load(Relaxed);
        if is_leaf(depth, i) {
            self.tree[i].lock.unlock();
            return;
        }
        let left_index = i * 2;
        let right_index = i * 2 + 1;
        if right_index >= self.tree.len() {
            self.tree[i].lock.unlock();
            return;
        }

        self.tree[left_index].lock.lock();
        self.tree[right_index].lock.lock();
        let current = self.tree[i].list.load(Acquire, guard);
        let left = self.tree[left_index].list.load(Acquire, guard);
        let right = self.tree[right_index].list.load(Acquire, guard);
        let current_val = Self::val_of(current);
        let left_val = Self::val_of(left);
        let right_val = Self::val_of(right);

        if left_val <= right_val && left_val < current_val {
            self.tree[right_index].lock.unlock();
            self.tree[i].list.store(left, Release);
            self.tree[i].lock.unlock();
            self.tree[left_index].list.store(current, Release);
            self.moundify(left_index, guard);
        } else if right_val < left_val && right_val < current_val {
            self.tree[left_index].lock.unlock();
            self.tree[i].list.store(right, Release);
            self.tree[i].lock.unlock();
            self.tree[right_index].list.store(current, Release);
            self.moundify(right_index, guard);
        } else {
            self.tree[i].lock.unlock();
            self.tree[left_index].lock.unlock();
            self.tree[right_index].lock.unlock();
        }
    }
}

impl Drop for MoundQueue {
    fn drop(&mut self) {
        let guard = &reclaim::pin();
        for node in &self.tree {
            let mut curr = node.list.load(Acquire, guard);
            while !curr.is_null() {
                let next = unsafe { curr.deref() }.next.load(Acquire, guard);
                unsafe { drop(curr.into_owned()) };
                curr = next;
            }
        }
    }
}

unsafe impl Send for MoundQueue {}
unsafe impl Sync for MoundQueue {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_pops_are_ascending() {
        let pq = MoundQueue::new(64);
        let mut seed = 23u64;
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
        let pq = MoundQueue::new(16);
        assert_eq!(pq.pop_min(), None);
    }

    #[test]
    fn saturated_tiny_tree_never_rejects_an_insert() {
        // A 4-node tree (one root, two leaves) has far fewer nodes than
        // the 200 keys pushed through it. Since every node's list absorbs
        // an unbounded number of keys, `add` must keep succeeding anyway.
        let pq = MoundQueue::new(4);
        let mut seed = 99u64;
        for k in 0..200i64 {
            assert!(pq.add(k, &mut seed));
        }
        let mut popped = vec![];
        while let Some(k) = pq.pop_min() {
            popped.push(k);
        }
        assert_eq!(popped, (0..200).collect::<Vec<_>>());
    }

    #[test]
    fn concurrent_workload_preserves_total_count() {
        use std::collections::HashSet;
        use std::sync::Arc;
        use std::thread;

        let pq = Arc::new(MoundQueue::new(4096));
        let per_thread = 300;
        let threads = 6;
        let mut handles = vec![];
        for t in 0..threads {
            let pq = pq.clone();
            handles.push(thread::spawn(move || {
                let mut seed = (t as u64 + 1) * 31;
                for i in 0..per_thread {
                    pq.add((t * per_thread + i) as i64, &mut seed);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let mut seen = HashSet::new();
        let mut last = Key::MIN;
        while let Some(k) = pq.pop_min() {
            assert!(k >= last, "pop-min order violated: {k} after {last}");
            last = k;
            assert!(seen.insert(k));
        }
        assert_eq!(seen.len(), threads * per_thread);
    }
}
