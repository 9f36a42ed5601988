//! Ordered-set variants backed by a skip list.
//!
//! Three points on the lock-freedom/simplicity spectrum, from the most
//! concurrent (and most intricate) to the least:
//!
//! - [`fhsl_lf`] — fully lock-free, Harris/Michael marking.
//! - [`fhsl_b`] — lock-free reads, lock-coupled writes, plus the bulk
//!   transfer operations the asynchronous priority queue server needs.
//! - [`fhsl_tx`] — a plain sequential skip list behind a single elided
//!   lock.

pub mod fhsl_b;
pub mod fhsl_lf;
pub mod fhsl_tx;

pub use fhsl_b::LockCoupledSkipList;
pub use fhsl_lf::LockFreeSkipList;
pub use fhsl_tx::TransactionalSkipList;
