//! Client-side synchronization layer for an ERC20-style token.
//!
//! Keeps a local view of a token's balance, transfer history and spender
//! allowances consistent with an authoritative remote ledger and a paginated
//! history indexer, tolerating network failure and concurrent refresh
//! requests. The crate orchestrates:
//!
//! - a unified sync-state machine mirroring chain-level notifications,
//! - single-flight balance refreshes ([`sync::BalanceSyncEngine`]),
//! - gap-free, dedup-safe history pagination ([`sync::HistorySyncEngine`]),
//! - allowance lookups deduplicated per (spender, block)
//!   ([`sync::AllowanceCoordinator`]),
//!
//! all driven by [`sync::SyncCoordinator`], which owns the observable state
//! and publishes it on latest-value watch channels: slow consumers see the
//! most recent value, never a stale backlog.
//!
//! The RPC transport, indexer endpoint and persistence engine are external
//! collaborators consumed through the [`ledger::RemoteLedgerClient`],
//! [`indexer::IndexedHistoryClient`], [`store::TransactionStore`] and
//! [`store::BalanceStore`] traits.

pub mod contract;
pub mod error;
pub mod indexer;
pub mod ledger;
pub mod store;
pub mod sync;
pub mod types;

pub use error::SyncError;
pub use ledger::RemoteLedgerClient;
pub use sync::SyncCoordinator;
pub use types::{BlockReference, SyncState, TokenTransfer, TransferKey};
