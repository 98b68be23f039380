//! Contract consumed from the remote ledger RPC client.

use alloy_primitives::{Address, Bytes};
use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::SyncError;
use crate::types::{BlockReference, SyncState};

/// Read-only view of the authoritative remote ledger.
///
/// Implementations wrap whatever RPC transport the embedder uses. The sync
/// layer only performs read-only contract calls and observes chain-level sync
/// notifications; it never submits transactions.
#[async_trait]
pub trait RemoteLedgerClient: Send + Sync + 'static {
	/// Stream of chain-level sync state notifications. The stream ends when
	/// the client shuts down.
	fn chain_sync_states(&self) -> BoxStream<'static, SyncState>;

	/// Execute a read-only contract call pinned to `block`.
	async fn call_contract(
		&self,
		contract: Address,
		data: Bytes,
		block: BlockReference,
	) -> Result<Bytes, SyncError>;

	/// The account whose balance and history this client tracks.
	fn receive_address(&self) -> Address;
}
