//! Allowance lookups deduplicated per (spender, block reference).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use alloy_primitives::{Address, Bytes, U256};
use tracing::debug;

use crate::contract;
use crate::error::SyncError;
use crate::ledger::RemoteLedgerClient;
use crate::types::BlockReference;

type AllowanceKey = (Address, BlockReference);

/// Thin cache over the ledger's `allowance` view.
///
/// A value pinned to a historical block never changes, so it is cached
/// indefinitely. `Latest` is inherently time-varying and always re-fetched;
/// the per-key lock still collapses concurrent callers onto one remote call
/// at a time.
pub struct AllowanceCoordinator<L> {
    ledger: Arc<L>,
    token: Address,
    owner: Address,
    cache: Mutex<HashMap<AllowanceKey, U256>>,
    flights: Mutex<HashMap<AllowanceKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl<L: RemoteLedgerClient> AllowanceCoordinator<L> {
    pub fn new(ledger: Arc<L>, token: Address, owner: Address) -> Self {
        Self {
            ledger,
            token,
            owner,
            cache: Mutex::new(HashMap::new()),
            flights: Mutex::new(HashMap::new()),
        }
    }

    fn flight_lock(&self, key: AllowanceKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut flights = self.flights.lock().unwrap();
        Arc::clone(flights.entry(key).or_default())
    }

    /// Allowance granted by the tracked account to `spender` at `block`.
    pub async fn allowance(
        &self,
        spender: Address,
        block: BlockReference,
    ) -> Result<U256, SyncError> {
        let key = (spender, block);
        let cacheable = matches!(block, BlockReference::Number(_));

        if cacheable {
            if let Some(value) = self.cache.lock().unwrap().get(&key) {
                debug!(%spender, ?block, "allowance served from cache");
                return Ok(*value);
            }
        }

        let lock = self.flight_lock(key);
        let _flight = lock.lock().await;

        // A caller we waited behind may have filled the cache.
        if cacheable {
            if let Some(value) = self.cache.lock().unwrap().get(&key) {
                return Ok(*value);
            }
        }

        let data = contract::encode_allowance(self.owner, spender);
        let raw = self.ledger.call_contract(self.token, data, block).await?;
        let value = contract::decode_uint(&raw)?;

        if cacheable {
            self.cache.lock().unwrap().insert(key, value);
        }
        Ok(value)
    }

    /// Calldata for `approve(spender, amount)`. Pure; no remote interaction.
    pub fn build_approve_data(&self, spender: Address, amount: U256) -> Bytes {
        contract::encode_approve(spender, amount)
    }

    /// Calldata for `transfer(to, value)`. Pure; no remote interaction.
    pub fn build_transfer_data(&self, to: Address, value: U256) -> Bytes {
        contract::encode_transfer(to, value)
    }
}
