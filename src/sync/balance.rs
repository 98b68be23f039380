//! Single-flight balance refresh against the remote ledger.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use alloy_primitives::{Address, U256};
use tokio::sync::mpsc;
use tracing::debug;

use super::cancel::CancelToken;
use crate::contract;
use crate::error::SyncError;
use crate::ledger::RemoteLedgerClient;
use crate::types::BlockReference;

/// Result of one balance refresh, delivered on the engine's outcome channel.
pub type BalanceOutcome = Result<U256, Arc<SyncError>>;

/// Fetches the tracked account's token balance at the latest block.
///
/// The engine is single-flight: while a refresh is in the air, further
/// `sync()` calls are absorbed and the in-flight result serves every
/// trigger. Outcomes are reported on an mpsc channel whose sole subscriber
/// is the coordinator run loop; no retry is scheduled here, the next
/// external trigger is the retry.
pub struct BalanceSyncEngine<L> {
    ledger: Arc<L>,
    token: Address,
    owner: Address,
    in_flight: Arc<AtomicBool>,
    outcome_tx: mpsc::Sender<BalanceOutcome>,
    cancel: CancelToken,
}

impl<L: RemoteLedgerClient> BalanceSyncEngine<L> {
    pub fn new(
        ledger: Arc<L>,
        token: Address,
        owner: Address,
        outcome_tx: mpsc::Sender<BalanceOutcome>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            ledger,
            token,
            owner,
            in_flight: Arc::new(AtomicBool::new(false)),
            outcome_tx,
            cancel,
        }
    }

    /// Request a balance refresh. A no-op while another refresh is in flight.
    pub fn sync(&self) {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("balance refresh already in flight, absorbing trigger");
            return;
        }

        let ledger = Arc::clone(&self.ledger);
        let token = self.token;
        let owner = self.owner;
        let in_flight = Arc::clone(&self.in_flight);
        let outcome_tx = self.outcome_tx.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let fetch = async {
                let data = contract::encode_balance_of(owner);
                let raw = ledger
                    .call_contract(token, data, BlockReference::Latest)
                    .await?;
                contract::decode_uint(&raw)
            };

            let outcome = tokio::select! {
                _ = cancel.cancelled() => Err(SyncError::Cancelled),
                result = fetch => result,
            };

            in_flight.store(false, Ordering::Release);

            if matches!(outcome, Err(SyncError::Cancelled)) {
                debug!("balance refresh cancelled");
                return;
            }
            let _ = outcome_tx.send(outcome.map_err(Arc::new)).await;
        });
    }
}
