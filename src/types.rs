//! Core domain types shared across the sync layer.

use std::sync::Arc;

use alloy_primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Block reference used to pin a read-only query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockReference {
	/// The most recent block known to the remote ledger.
	Latest,
	/// A specific historical block height.
	Number(u64),
}

impl BlockReference {
	/// Render the reference the way JSON-RPC endpoints expect it.
	pub fn as_param(&self) -> String {
		match self {
			BlockReference::Latest => "latest".to_string(),
			BlockReference::Number(height) => format!("0x{height:x}"),
		}
	}
}

/// Synchronization state of a tracked stream.
///
/// Three independent instances exist: the chain-level state consumed from the
/// remote ledger, and the balance-level and transaction-level states owned by
/// the coordinator. Within a sync cycle `Syncing` always precedes `Synced` or
/// `NotSynced`.
#[derive(Debug, Clone)]
pub enum SyncState {
	/// Synchronization failed or has not caught up; carries the causing error.
	NotSynced(Arc<SyncError>),
	/// Synchronization is in progress.
	Syncing,
	/// The local view is consistent with the remote ledger.
	Synced,
}

impl SyncState {
	pub fn is_synced(&self) -> bool {
		matches!(self, SyncState::Synced)
	}

	pub fn is_syncing(&self) -> bool {
		matches!(self, SyncState::Syncing)
	}

	pub fn is_not_synced(&self) -> bool {
		matches!(self, SyncState::NotSynced(_))
	}

	/// The error carried by a `NotSynced` state, if any.
	pub fn error(&self) -> Option<&Arc<SyncError>> {
		match self {
			SyncState::NotSynced(error) => Some(error),
			_ => None,
		}
	}
}

/// Identity of a ledger-level transfer event.
///
/// A single on-chain transaction may carry several token-transfer log
/// entries; each is a distinct event identified by `(hash, log_index)`.
pub type TransferIdentity = (B256, u64);

/// A token transfer event observed on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTransfer {
	/// Hash of the enclosing transaction.
	pub hash: B256,
	/// Confirming block, `None` while the transfer is still pending.
	pub block_number: Option<u64>,
	/// Timestamp of the confirming block.
	pub timestamp: DateTime<Utc>,
	pub from: Address,
	pub to: Address,
	pub value: U256,
	/// Position of the transaction within its block.
	pub transaction_index: u64,
	/// Position of the transfer log entry within its transaction.
	pub log_index: u64,
}

impl TokenTransfer {
	pub fn identity(&self) -> TransferIdentity {
		(self.hash, self.log_index)
	}

	pub fn is_pending(&self) -> bool {
		self.block_number.is_none()
	}

	/// Ordering key for this transfer. Pending rows sort above every
	/// confirmed row so they lead a descending read.
	pub fn sort_key(&self) -> TransferKey {
		TransferKey {
			block_number: self.block_number.unwrap_or(u64::MAX),
			transaction_index: self.transaction_index,
			log_index: self.log_index,
		}
	}
}

/// Composite ordering key (block number, transaction index, log index) used
/// for stable pagination cursors.
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TransferKey {
	pub block_number: u64,
	pub transaction_index: u64,
	pub log_index: u64,
}
