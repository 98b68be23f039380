//! Error taxonomy for the sync layer.
//!
//! Remote-call failures surface as `SyncState::NotSynced` on the relevant
//! state stream; imperative calls propagate `SyncError` to their caller. The
//! core schedules no retries of its own: the next externally triggered sync
//! cycle is the retry.

use crate::indexer::IndexerError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Transport failure or timeout talking to the remote ledger.
    #[error("network error: {0}")]
    Network(String),

    /// Non-OK response from the ledger.
    #[error("remote status error: {0}")]
    RemoteStatus(String),

    /// Malformed contract-call result.
    #[error("decode error: {0}")]
    Decode(String),

    /// Operation invalidated by `stop()`.
    #[error("operation cancelled")]
    Cancelled,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("indexer error: {0}")]
    Indexer(#[from] IndexerError),
}
