//! Base locking primitives shared by the lock-coupled and transactional
//! variants.
//!
//! Two flavors are provided: a bare [`Spinlock`] and an [`OwnerSpinlock`]
//! that additionally records which thread holds it (useful for the
//! heap-array priority queue's repair protocol, where a bucket's "tag"
//! doubles as both a lock owner and a transient state marker). Both are
//! cache-line aligned via [`crossbeam::utils::CachePadded`] to avoid false
//! sharing between adjacent buckets/nodes under contention.
//!
//! [`ElidedLock`] is the contract for the hardware-transactional elided
//! lock used by the transactional skip-list. The actual TSX fast path is
//! an external collaborator (out of scope here); this wraps a plain mutex
//! so the contract's observable behavior — mutual exclusion — holds.

use crossbeam::utils::CachePadded;
use parking_lot::{Mutex, MutexGuard};
use std::hint;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};

/// A cache-line-aligned test-and-test-and-set spinlock.
#[derive(Debug)]
pub struct Spinlock {
    locked: CachePadded<AtomicBool>,
}

impl Default for Spinlock {
    fn default() -> Self {
        Self::new()
    }
}

impl Spinlock {
    /// Creates a new, unlocked spinlock.
    pub fn new() -> Self {
        Self {
            locked: CachePadded::new(AtomicBool::new(false)),
        }
    }

    /// Returns `true` if the lock is currently held by someone.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Attempts to acquire the lock without spinning.
    pub fn try_lock(&self) -> bool {
        if self.locked.load(Ordering::Acquire) {
            return false;
        }
        !self.locked.swap(true, Ordering::Acquire)
    }

    /// Spins until the lock is acquired.
    pub fn lock(&self) {
        while !self.try_lock() {
            hint::spin_loop();
        }
    }

    /// Releases the lock.
    ///
    /// # Safety contract
    ///
    /// Callers must only call this while holding the lock; the type does
    /// not track ownership (see [`OwnerSpinlock`] for that).
    pub fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

/// A spinlock that records the owning thread, matching the source's
/// `owned_spinlock_t`. Used where the lock holder's identity needs to be
/// checked or asserted (the heap-array priority queue's bucket repair
/// protocol uses the bucket's tag field the same way).
#[derive(Debug)]
pub struct OwnerSpinlock {
    lock: Spinlock,
    owner: Mutex<Option<ThreadId>>,
}

impl Default for OwnerSpinlock {
    fn default() -> Self {
        Self::new()
    }
}

impl OwnerSpinlock {
    /// Creates a new, unowned spinlock.
    pub fn new() -> Self {
        Self {
            lock: Spinlock::new(),
            owner: Mutex::new(None),
        }
    }

    /// Attempts to acquire the lock, recording the caller as owner on
    /// success.
    pub fn try_lock(&self) -> bool {
        if !self.lock.try_lock() {
            return false;
        }
        *self.owner.lock() = Some(thread::current().id());
        true
    }

    /// Spins until the lock is acquired, then records the caller as owner.
    pub fn lock(&self) {
        self.lock.lock();
        *self.owner.lock() = Some(thread::current().id());
    }

    /// Releases the lock. Panics if the caller is not the recorded owner,
    /// matching the source's debug assertion.
    pub fn unlock(&self) {
        let mut owner = self.owner.lock();
        debug_assert_eq!(*owner, Some(thread::current().id()));
        *owner = None;
        drop(owner);
        self.lock.unlock();
    }
}

/// Contract for the hardware-transactional elided lock consumed by the
/// transactional skip-list (`fhsl_tx`).
///
/// Only the mutual-exclusion contract is modeled here: `lock`/`unlock`
/// bracket a critical section exactly like a mutex. A real elided-lock
/// collaborator additionally attempts a lock-free hardware-transactional
/// fast path before falling back to this slow path; that fast path is an
/// external performance concern out of scope for this library (see the
/// specification's non-goals).
pub struct ElidedLock<T> {
    inner: Mutex<T>,
}

impl<T> ElidedLock<T> {
    /// Wraps `value` behind the elided lock.
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Acquires the lock, blocking until it is free.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn spinlock_mutual_exclusion() {
        let lock = Arc::new(Spinlock::new());
        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut handles = vec![];
        for _ in 0..8 {
            let lock = lock.clone();
            let counter = counter.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    lock.lock();
                    let v = counter.load(Ordering::Relaxed);
                    counter.store(v + 1, Ordering::Relaxed);
                    lock.unlock();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::Relaxed), 8000);
    }

    #[test]
    fn owner_spinlock_tracks_owner() {
        let lock = OwnerSpinlock::new();
        lock.lock();
        lock.unlock();
    }

    #[test]
    fn elided_lock_serializes_access() {
        let lock = Arc::new(ElidedLock::new(0usize));
        let mut handles = vec![];
        for _ in 0..8 {
            let lock = lock.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    *lock.lock() += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(), 8000);
    }
}
