//! Error types for the concurrent data structure library
//!
//! This module defines the error types shared by every ordered-set and
//! priority-queue component in the library.

use thiserror::Error;

/// The main error type for concur-ds operations
#[derive(Error, Debug)]
pub enum Error {
    /// A fixed-capacity structure (heap, mound) ran out of room
    #[error("structure is at capacity: {0}")]
    Capacity(String),

    /// A caller-supplied configuration value was invalid
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An operation was attempted that the structure's contract forbids,
    /// e.g. `bulk_pop` on an `fhsl_b` while a concurrent remover is active
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

/// A specialized Result type for concur-ds operations
pub type Result<T> = std::result::Result<T, Error>;
