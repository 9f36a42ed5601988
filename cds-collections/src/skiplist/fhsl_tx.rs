//! Transactional skip list (`fhsl_tx`).
//!
//! The structure itself is the plain sequential skip-list algorithm — no
//! per-node atomics, no marking, no epochs — made concurrency-safe purely
//! by wrapping the whole thing behind a single [`ElidedLock`]. The
//! specification's fast path (a hardware transaction that elides the lock
//! entirely when there's no real contention) is the external elided-lock
//! collaborator; see [`cds_core::locks::ElidedLock`] for why that fast
//! path isn't modeled here.
//!
//! Nodes live in an arena (`Vec<Node>`) addressed by index rather than by
//! pointer, since a purely single-threaded-at-a-time structure has no use
//! for atomics or epoch reclamation; removed slots go on a free list and
//! are recycled by later inserts.

use cds_core::locks::ElidedLock;
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

struct Inner {
    arena: Vec<Node>,
    free: Vec<usize>,
    seed: u64,
    len: usize,
}

impl Inner {
    fn new(seed: u64) -> Self {
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

    fn contains(&self, key: Key) -> bool {
        let mut preds = [0usize; MAX_HEIGHT];
        self.find(key, &mut preds).is_some()
    }

    fn add(&mut self, key: Key) -> bool {
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

    fn remove(&mut self, key: Key) -> bool {
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
}

/// An ordered set whose entire state is guarded by one elided lock, rather
/// than using per-node synchronization.
pub struct TransactionalSkipList {
    inner: ElidedLock<Inner>,
}

impl Default for TransactionalSkipList {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionalSkipList {
    /// Creates an empty skip list, seeding the internal level sampler.
    pub fn new() -> Self {
        Self::with_seed(0x5eed)
    }

    /// Creates an empty skip list with an explicit PRNG seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            inner: ElidedLock::new(Inner::new(seed)),
        }
    }

    /// Returns `true` iff `key` is present.
    pub fn contains(&self, key: Key) -> bool {
        self.inner.lock().contains(key)
    }

    /// Inserts `key`. Returns `true` iff it was absent and is now present.
    pub fn add(&self, key: Key) -> bool {
        self.inner.lock().add(key)
    }

    /// Removes `key`. Returns `true` iff it was present and is now absent.
    pub fn remove(&self, key: Key) -> bool {
        self.inner.lock().remove(key)
    }

    /// Returns the number of keys currently present.
    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    /// Returns `true` iff the set is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

unsafe impl Send for TransactionalSkipList {}
unsafe impl Sync for TransactionalSkipList {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn smoke() {
        let sl = TransactionalSkipList::new();
        assert!(sl.add(5));
        assert!(sl.add(1));
        assert!(!sl.add(5));
        assert!(sl.contains(1));
        assert!(sl.remove(5));
        assert!(!sl.contains(5));
        assert_eq!(sl.len(), 1);
    }

    #[test]
    fn concurrent_add_remove_is_consistent() {
        let sl = Arc::new(TransactionalSkipList::new());
        let mut handles = vec![];
        for t in 0..8 {
            let sl = sl.clone();
            handles.push(thread::spawn(move || {
                for i in 0..200 {
                    let key = (t * 1000 + i) as i64;
                    assert!(sl.add(key));
                    assert!(sl.contains(key));
                    assert!(sl.remove(key));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(sl.len(), 0);
    }
}
