//! Priority-queue variants: `add` plus `pop_min`, no arbitrary-key
//! removal (that restriction is explicit; see each module for its
//! linearizability and relaxed-consistency guarantees).

pub mod hunt_pq;
pub mod lj_pq;
pub mod mound_pq;
pub mod sl_pq;
pub mod spray_pq;

pub use hunt_pq::HuntQueue;
pub use lj_pq::LindenJonssonQueue;
pub use mound_pq::MoundQueue;
pub use sl_pq::ShavitLotanQueue;
pub use spray_pq::SprayQueue;
