//! Domain models for the pool engine.
//!
//! Amounts and prices are integer minor units with 6 implied decimals.

pub mod bet;
pub mod event_log;
pub mod pool;
pub mod price_snapshot;

// Re-export all models for convenient access
pub use bet::{Bet, NewBet};
pub use event_log::{EventKind, EventLogEntry, NewEvent};
pub use pool::{NewPool, Pool, PoolStatus, Side};
pub use price_snapshot::{PriceSnapshot, PriceTick, SnapshotKind};
