//! In-memory store implementations.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use alloy_primitives::{B256, U256};
use async_trait::async_trait;

use super::{BalanceStore, StoreError, TransactionStore};
use crate::types::{TokenTransfer, TransferIdentity, TransferKey};

/// Internal map key: the public cursor key plus the transaction hash as a
/// tiebreaker. Distinct pending rows share a `TransferKey` (block number
/// saturates while unconfirmed), so the cursor key alone is not unique.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct RowKey {
    sort: TransferKey,
    hash: B256,
}

impl RowKey {
    fn of(transfer: &TokenTransfer) -> Self {
        Self {
            sort: transfer.sort_key(),
            hash: transfer.hash,
        }
    }
}

#[derive(Default)]
pub struct MemoryTransactionStore {
    inner: Mutex<TransferTable>,
}

#[derive(Default)]
struct TransferTable {
    rows: BTreeMap<RowKey, TokenTransfer>,
    identities: HashMap<TransferIdentity, RowKey>,
}

impl MemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for MemoryTransactionStore {
    async fn put_transfers(&self, transfers: &[TokenTransfer]) -> Result<usize, StoreError> {
        let mut table = self.inner.lock().unwrap();
        let mut changed = 0;

        for transfer in transfers {
            let key = RowKey::of(transfer);
            match table.identities.get(&transfer.identity()).copied() {
                None => {
                    table.identities.insert(transfer.identity(), key);
                    table.rows.insert(key, transfer.clone());
                    changed += 1;
                }
                Some(existing_key) => {
                    // A confirmation moves the row from its pending slot to
                    // its final position; anything else is a duplicate.
                    let existing_pending = table
                        .rows
                        .get(&existing_key)
                        .map(|row| row.is_pending())
                        .unwrap_or(false);
                    if existing_pending && !transfer.is_pending() {
                        table.rows.remove(&existing_key);
                        table.identities.insert(transfer.identity(), key);
                        table.rows.insert(key, transfer.clone());
                        changed += 1;
                    }
                }
            }
        }

        Ok(changed)
    }

    async fn transfers(
        &self,
        from_key: Option<TransferKey>,
        limit: Option<usize>,
    ) -> Result<Vec<TokenTransfer>, StoreError> {
        let table = self.inner.lock().unwrap();
        let rows = table
            .rows
            .iter()
            .rev()
            .filter(|(key, _)| from_key.map(|from| key.sort < from).unwrap_or(true))
            .map(|(_, row)| row.clone());

        Ok(match limit {
            Some(limit) => rows.take(limit).collect(),
            None => rows.collect(),
        })
    }

    async fn pending_transfers(&self) -> Result<Vec<TokenTransfer>, StoreError> {
        let table = self.inner.lock().unwrap();
        Ok(table
            .rows
            .values()
            .rev()
            .filter(|row| row.is_pending())
            .cloned()
            .collect())
    }

    async fn confirmed_tip(&self) -> Result<Option<u64>, StoreError> {
        let table = self.inner.lock().unwrap();
        Ok(table.rows.values().filter_map(|row| row.block_number).max())
    }
}

#[derive(Default)]
pub struct MemoryBalanceStore {
    inner: Mutex<Option<U256>>,
}

impl MemoryBalanceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BalanceStore for MemoryBalanceStore {
    async fn balance(&self) -> Result<Option<U256>, StoreError> {
        Ok(*self.inner.lock().unwrap())
    }

    async fn put_balance(&self, balance: U256) -> Result<(), StoreError> {
        *self.inner.lock().unwrap() = Some(balance);
        Ok(())
    }
}
