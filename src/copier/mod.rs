//! Trade replication: change detection, correlation, and the copy loop.

pub mod correlate;
mod engine;
mod tracker;

pub use engine::{Copier, CopyStats, Replica};
pub use tracker::PositionTracker;
