//! Account-history indexer integration.
//!
//! The indexer is a paginated HTTP service returning transfer events for an
//! address in ascending block order, with a page size bound the server
//! enforces. [`HttpHistoryClient`] talks to an etherscan-style endpoint;
//! [`IndexedHistoryClient`] is the seam tests and alternative backends
//! implement.

mod client;
mod types;

pub use client::{HistoryAction, HttpHistoryClient, IndexedHistoryClient};
pub use types::{HistoryEnvelope, IndexerError, RawTransferRecord};
