//! Contract for the memory reclamation collaborator.
//!
//! The specification treats reclamation as an external, process-wide
//! collaborator: `alloc`, `free`, and `retire`. This module documents that
//! contract and provides the epoch-based implementation the rest of the
//! library builds on, via [`crossbeam::epoch`].
//!
//! - `alloc` corresponds to [`crossbeam::epoch::Owned::new`].
//! - `free` corresponds to dropping an [`Owned`] directly — legal only
//!   when the caller is certain no other thread can have observed the
//!   pointer, e.g. the loser of a publish race on a brand-new node.
//! - `retire` corresponds to [`Guard::defer_destroy`], which defers the
//!   actual free until every thread's epoch guarantees the pointer is
//!   unreachable.
//!
//! Every lock-free and lock-coupled structure in this crate pins an epoch
//! guard for the duration of a single operation and calls `defer_destroy`
//! exactly where the specification's reclaiming variant calls `retire`;
//! the `_leaky` variants skip that call and simply abandon the node.

pub use crossbeam::epoch::{self, Atomic, Guard, Owned, Shared};

/// Pins the current thread's epoch for the duration of one operation.
///
/// Thin wrapper kept so call sites read `reclaim::pin()` rather than
/// reaching past this module into `crossbeam::epoch` directly — mirrors
/// the specification's framing of reclamation as a named collaborator
/// rather than an incidental crossbeam detail.
pub fn pin() -> Guard {
    epoch::pin()
}
