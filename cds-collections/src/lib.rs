//! Concurrent ordered-set and priority-queue data structures.
//!
//! A testbed for comparing concurrency strategies under one uniform API:
//! every structure exposes some subset of `contains`/`add`/`remove` (or
//! `pop_min` in place of `remove`), differing only in its internal
//! protocol and its ordering guarantees.
//!
//! - [`bst`] — lock-free external binary search tree.
//! - [`skiplist`] — lock-free, lock-coupled, and transactional skip
//!   lists.
//! - [`pq`] — priority queues: Shavit–Lotan, Lindén–Jonsson, spray-list,
//!   heap-array, and mound.
//! - [`flat_combining`] — flat-combining front-ends, including the
//!   two-tier asynchronous priority queue server.

pub mod bst;
pub mod flat_combining;
pub mod pq;
pub mod skiplist;

pub use bst::LockFreeBst;
pub use flat_combining::{ApqServer, FlatCombiningSkipList};
pub use pq::{HuntQueue, LindenJonssonQueue, MoundQueue, ShavitLotanQueue, SprayQueue};
pub use skiplist::{LockCoupledSkipList, LockFreeSkipList, TransactionalSkipList};
