//! Paginated transfer-history synchronization.
//!
//! One cycle pulls everything past the store's confirmed tip from the
//! indexer, page by page, and merges it into the store. Pages are fetched
//! sequentially so the cursor stays correct, and the merge is dedup-safe, so
//! an aborted cycle can always be retried from the same starting point.

use std::sync::Arc;

use alloy_primitives::Address;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::cancel::CancelToken;
use crate::error::SyncError;
use crate::indexer::IndexedHistoryClient;
use crate::store::TransactionStore;
use crate::types::{TokenTransfer, TransferKey};

/// Outcome of a completed history cycle.
pub struct HistoryCycle {
	/// Full transfer set after the merge, descending key order.
	pub transfers: Vec<TokenTransfer>,
	/// Rows inserted or confirmed during this cycle.
	pub changed: usize,
}

/// Events reported to the coordinator run loop.
pub enum HistoryEvent {
	Started,
	Completed(HistoryCycle),
	Failed(Arc<SyncError>),
}

/// Pulls a gap-free transfer history from the indexer into the store.
pub struct HistorySyncEngine<I, S> {
	indexer: Arc<I>,
	store: Arc<S>,
	address: Address,
	cycle_lock: Mutex<()>,
}

impl<I, S> HistorySyncEngine<I, S>
where
	I: IndexedHistoryClient,
	S: TransactionStore,
{
	pub fn new(indexer: Arc<I>, store: Arc<S>, address: Address) -> Self {
		Self {
			indexer,
			store,
			address,
			cycle_lock: Mutex::new(()),
		}
	}

	/// Run one sync cycle. Returns `Ok(None)` when another cycle is already
	/// running and this request was absorbed by it.
	pub async fn run_cycle(&self, cancel: &CancelToken) -> Result<Option<HistoryCycle>, SyncError> {
		let Ok(_guard) = self.cycle_lock.try_lock() else {
			debug!("history cycle already running, absorbing trigger");
			return Ok(None);
		};

		let cursor = self.store.confirmed_tip().await?.unwrap_or(0);
		let mut start_block = cursor + 1;
		let mut changed = 0;

		loop {
			debug!(start_block, "fetching history page");
			let page = tokio::select! {
				_ = cancel.cancelled() => return Err(SyncError::Cancelled),
				page = self.indexer.transfer_page(self.address, start_block) => page?,
			};

			let page_len = page.len();
			let last_block = page.last().and_then(|transfer| transfer.block_number);
			let page_changed = self.store.put_transfers(&page).await?;
			changed += page_changed;

			if page_len < self.indexer.page_limit() {
				break;
			}

			// A full page means more events may follow. Restart from the
			// last block seen so events cut off at the page boundary are not
			// lost; the store dedups the overlap. A full page that changed
			// nothing means the whole block is already persisted, so step
			// past it.
			let Some(last_block) = last_block else { break };
			start_block = if page_changed == 0 {
				last_block + 1
			} else {
				last_block
			};
		}

		let transfers = self.store.transfers(None, None).await?;
		info!(total = transfers.len(), changed, "history sync cycle complete");
		Ok(Some(HistoryCycle { transfers, changed }))
	}

	/// Cursor-based read of the persisted history, descending key order.
	/// Stable while a sync is running because it reads the store, not
	/// in-flight pages.
	pub async fn transactions(
		&self,
		from_key: Option<TransferKey>,
		limit: Option<usize>,
	) -> Result<Vec<TokenTransfer>, SyncError> {
		Ok(self.store.transfers(from_key, limit).await?)
	}

	/// Transfers observed in the store with no block confirmation yet.
	pub async fn pending_transactions(&self) -> Result<Vec<TokenTransfer>, SyncError> {
		Ok(self.store.pending_transfers().await?)
	}
}
