//! Flat-combining front-ends: client threads publish requests to
//! per-thread slots; a dedicated server thread drains them serially
//! against a single-owner back-end, trading per-operation synchronization
//! for one thread's undivided attention.

mod serial;

pub mod apq_server;
pub mod fhsl_fc;

pub use apq_server::ApqServer;
pub use fhsl_fc::FlatCombiningSkipList;
