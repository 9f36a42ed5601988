//! Plain sequential skip-list, the single-threaded back-end shared by
//! [`crate::flat_combining::fhsl_fc`] and [`crate::flat_combining::apq_server`].
//!
//! No atomics anywhere: a flat-combining server thread is the only
//! caller, so ordinary owned state is correct and cheaper than any of the
//! concurrent variants. Nodes live in an index-addressed arena exactly
//! like [`crate::skiplist::fhsl_tx`]'s back-end, for the same reason —
//! a skip list's multi-owner next pointers don't fit Rust's ownership
//! model without either an arena or unsafe raw pointers.

use cds_core::rng;
use cds_core::types::{Key, MAX_HEIGHT, MAX_KEY, MIN_KEY};

const NIL: usize = usize::MAX;
const HEAD: usize = 0;
const TAIL: usize = 1;

struct Node {
    key: Key,
    top_level: usize,
    next: Vec<usize>,
}

/// A sequential ordered set doubling as a priority queue (`pop_min`
/// removes the current minimum key).
pub(crate) struct SerialSkipList {
    arena: Vec<Node>,
    free: Vec<usize>,
    seed: u64,
    len: usize,
}

impl SerialSkipList {
    pub(crate) fn new(seed: u64) -> Self {
        let head = Node {
            key: MIN_KEY,
            top_level: MAX_HEIGHT - 1,
            next: vec![TAIL; MAX_HEIGHT],
        };
        let tail = Node {
            key: MAX_KEY,
            top_level: MAX_HEIGHT - 1,
            next: vec![NIL; MAX_HEIGHT],
        };
        Self {
            arena: vec![head, tail],
            free: Vec::new(),
            seed,
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    fn find(&self, key: Key, preds: &mut [usize]) -> Option<usize> {
        let mut pred = HEAD;
        let mut found = None;
        for level in (0..MAX_HEIGHT).rev() {
            let mut curr = self.arena[pred].next[level];
            while self.arena[curr].key < key {
                pred = curr;
                curr = self.arena[pred].next[level];
            }
            if found.is_none() && self.arena[curr].key == key {
                found = Some(curr);
            }
            preds[level] = pred;
        }
        found
    }

    pub(crate) fn contains(&self, key: Key) -> bool {
        let mut preds = [0usize; MAX_HEIGHT];
        self.find(key, &mut preds).is_some()
    }

    pub(crate) fn add(&mut self, key: Key) -> bool {
        let mut preds = [0usize; MAX_HEIGHT];
        if self.find(key, &mut preds).is_some() {
            return false;
        }
        let top_level = rng::random_level(&mut self.seed, MAX_HEIGHT);
        let mut next = vec![NIL; top_level + 1];
        for (level, slot) in next.iter_mut().enumerate() {
            *slot = self.arena[preds[level]].next[level];
        }
        let idx = match self.free.pop() {
            Some(idx) => {
                self.arena[idx] = Node {
                    key,
                    top_level,
                    next,
                };
                idx
            }
            None => {
                self.arena.push(Node {
                    key,
                    top_level,
                    next,
                });
                self.arena.len() - 1
            }
        };
        for (level, &pred) in preds.iter().enumerate().take(top_level + 1) {
            self.arena[pred].next[level] = idx;
        }
        self.len += 1;
        true
    }

    pub(crate) fn remove(&mut self, key: Key) -> bool {
        let mut preds = [0usize; MAX_HEIGHT];
        let victim = match self.find(key, &mut preds) {
            Some(idx) => idx,
            None => return false,
        };
        let top_level = self.arena[victim].top_level;
        for (level, &pred) in preds.iter().enumerate().take(top_level + 1) {
            self.arena[pred].next[level] = self.arena[victim].next[level];
        }
        self.free.push(victim);
        self.len -= 1;
        true
    }

    /// Removes and returns the smallest key. The minimum is always
    /// `head`'s immediate successor at every level it participates in,
    /// so no search is needed.
    pub(crate) fn pop_min(&mut self) -> Option<Key> {
        let first = self.arena[HEAD].next[0];
        if first == TAIL {
            return None;
        }
        let key = self.arena[first].key;
        let top_level = self.arena[first].top_level;
        for level in 0..=top_level {
            self.arena[HEAD].next[level] = self.arena[first].next[level];
        }
        self.free.push(first);
        self.len -= 1;
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    #[test]
    fn smoke() {
        let mut sl = SerialSkipList::new(1);
        assert!(sl.add(5));
        assert!(sl.add(1));
        assert!(!sl.add(5));
        assert!(sl.contains(1));
        assert_eq!(sl.pop_min(), Some(1));
        assert_eq!(sl.pop_min(), Some(5));
        assert_eq!(sl.pop_min(), None);
    }

    #[derive(Debug, Clone, Copy)]
    enum Op {
        Add(i64),
        Remove(i64),
        PopMin,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0i64..64).prop_map(Op::Add),
            (0i64..64).prop_map(Op::Remove),
            Just(Op::PopMin),
        ]
    }

    proptest! {
        /// Replays the same op sequence against a plain `BTreeSet` and
        /// checks membership and pop-min order agree after every step.
        #[test]
        fn matches_btreeset_reference(ops in prop::collection::vec(op(), 0..200)) {
            let mut sl = SerialSkipList::new(0xabcd);
            let mut model: BTreeSet<i64> = BTreeSet::new();
            for op in ops {
                match op {
                    Op::Add(k) => prop_assert_eq!(sl.add(k), model.insert(k)),
                    Op::Remove(k) => prop_assert_eq!(sl.remove(k), model.remove(&k)),
                    Op::PopMin => {
                        let expected = model.iter().next().copied();
                        if let Some(k) = expected {
                            model.remove(&k);
                        }
                        prop_assert_eq!(sl.pop_min(), expected);
                    }
                }
                prop_assert_eq!(sl.len(), model.len());
            }
        }
    }
}
