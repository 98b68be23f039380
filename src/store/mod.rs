//! Persistence contracts and bundled store implementations.
//!
//! The sync layer is written against the [`TransactionStore`] and
//! [`BalanceStore`] traits; embedders plug in whatever engine they have.
//! The crate ships an in-memory implementation for tests and non-durable
//! use, and a file-backed one for simple single-directory persistence.

mod file;
mod memory;

pub use file::{FileBalanceStore, FileTransactionStore};
pub use memory::{MemoryBalanceStore, MemoryTransactionStore};

use alloy_primitives::U256;
use async_trait::async_trait;

use crate::types::{TokenTransfer, TransferKey};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(String),
}

/// System of record for observed transfers.
#[async_trait]
pub trait TransactionStore: Send + Sync + 'static {
    /// Persist transfers, skipping identities already present. A confirmed
    /// transfer replaces a pending row with the same identity. Returns the
    /// number of rows inserted or confirmed, so callers can tell whether the
    /// visible set changed.
    async fn put_transfers(&self, transfers: &[TokenTransfer]) -> Result<usize, StoreError>;

    /// Read transfers ordered by descending transfer key, starting strictly
    /// below `from_key` when given, up to `limit` rows.
    async fn transfers(
        &self,
        from_key: Option<TransferKey>,
        limit: Option<usize>,
    ) -> Result<Vec<TokenTransfer>, StoreError>;

    /// Transfers that have no confirming block yet.
    async fn pending_transfers(&self) -> Result<Vec<TokenTransfer>, StoreError>;

    /// Highest confirmed block number present, `None` for an empty store.
    async fn confirmed_tip(&self) -> Result<Option<u64>, StoreError>;
}

/// Persistence for the last synced balance.
#[async_trait]
pub trait BalanceStore: Send + Sync + 'static {
    async fn balance(&self) -> Result<Option<U256>, StoreError>;
    async fn put_balance(&self, balance: U256) -> Result<(), StoreError>;
}
