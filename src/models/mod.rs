//! Data models for accounts, positions, signals, and copy outcomes.

mod account;
mod outcome;
mod position;
mod signal;

pub use account::{AccountProfile, SizingMode};
pub use outcome::{CopyOutcome, CopyStatus};
pub use position::{Position, Side, PRICE_TOLERANCE};
pub use signal::{Signal, SignalKind};
