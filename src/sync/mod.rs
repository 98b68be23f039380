//! Synchronization services.
//!
//! [`SyncCoordinator`] owns the observable state and drives the engines:
//! [`BalanceSyncEngine`] (single-flight balance refresh),
//! [`HistorySyncEngine`] (sequential history pagination and merge) and
//! [`AllowanceCoordinator`] (per-key deduplicated allowance lookups).

mod allowance;
mod balance;
mod cancel;
mod coordinator;
mod history;

pub use allowance::AllowanceCoordinator;
pub use balance::{BalanceOutcome, BalanceSyncEngine};
pub use cancel::CancelToken;
pub use coordinator::SyncCoordinator;
pub use history::{HistoryCycle, HistoryEvent, HistorySyncEngine};
