//! Core types and collaborators shared by every concurrent data structure
//! in the workspace.
//!
//! This crate contains the fundamentals every ordered-set and
//! priority-queue variant builds on:
//!
//! - Common error handling with [`Error`] and [`Result`]
//! - The shared [`Key`] type and sentinel values
//! - A thread-local xorshift PRNG and geometric skip-list level sampler
//!   ([`rng`])
//! - Base locking primitives ([`locks`]): a plain spinlock, an
//!   owner-tracking spinlock, and the elided-lock contract used by the
//!   transactional skip-list
//! - The memory reclamation contract ([`reclaim`]), backed by
//!   epoch-based reclamation
//!
//! # Example
//!
//! ```
//! use cds_core::{rng, Key, MAX_HEIGHT};
//!
//! let mut seed: u64 = 0xdead_beef;
//! let level = rng::random_skiplist_level(&mut seed);
//! assert!(level < MAX_HEIGHT);
//! let _k: Key = 42;
//! ```

pub mod error;
pub mod locks;
pub mod reclaim;
pub mod rng;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
