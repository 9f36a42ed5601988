//! Core types shared by every data structure in the library.

/// The key type every structure in this library orders and searches on.
///
/// All structures agree on 64-bit signed keys; [`MIN_KEY`] and [`MAX_KEY`]
/// are reserved sentinel values used for head/tail nodes and must never be
/// inserted by a caller.
pub type Key = i64;

/// Sentinel key for head nodes. Always compares less than every real key.
pub const MIN_KEY: Key = i64::MIN;

/// Sentinel key for tail nodes. Always compares greater than every real key.
pub const MAX_KEY: Key = i64::MAX;

/// Maximum skip-list height shared by every skip-list-based structure.
///
/// The bottom level is 0; a node's own height is its `toplevel`, 0-based,
/// and the node participates in levels `0..=toplevel`.
pub const MAX_HEIGHT: usize = 20;
