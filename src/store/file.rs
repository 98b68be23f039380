//! File-backed store implementations.
//!
//! Rows live in a JSON file next to a `.meta.json` recording the write time
//! and confirmed tip. Writes go through load-merge-save; the history engine
//! is the only writer and runs its pages sequentially, so no file locking is
//! needed.

use std::collections::HashMap;
use std::path::PathBuf;

use alloy_primitives::U256;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{BalanceStore, StoreError, TransactionStore};
use crate::types::{TokenTransfer, TransferIdentity, TransferKey};

pub struct FileTransactionStore {
    data_dir: PathBuf,
}

impl FileTransactionStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    fn rows_path(&self) -> PathBuf {
        self.data_dir.join("transfers.json")
    }

    fn meta_path(&self) -> PathBuf {
        self.data_dir.join("transfers.meta.json")
    }

    async fn load_rows(&self) -> Result<Vec<TokenTransfer>, StoreError> {
        if !self.rows_path().exists() {
            return Ok(Vec::new());
        }
        let content = tokio::fs::read_to_string(self.rows_path()).await?;
        serde_json::from_str(&content)
            .map_err(|e| StoreError::Serde(format!("failed to parse transfer rows: {e}")))
    }

    async fn save_rows(&self, rows: &[TokenTransfer]) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.data_dir).await?;

        let content = serde_json::to_string_pretty(rows)
            .map_err(|e| StoreError::Serde(format!("failed to serialize transfer rows: {e}")))?;
        tokio::fs::write(self.rows_path(), content).await?;

        let meta = serde_json::json!({
            "written_at": Utc::now().to_rfc3339(),
            "confirmed_tip": rows.iter().filter_map(|row| row.block_number).max(),
            "rows": rows.len(),
        });
        let meta_content = serde_json::to_string_pretty(&meta)
            .map_err(|e| StoreError::Serde(format!("failed to serialize metadata: {e}")))?;
        tokio::fs::write(self.meta_path(), meta_content).await?;

        Ok(())
    }
}

#[async_trait]
impl TransactionStore for FileTransactionStore {
    async fn put_transfers(&self, transfers: &[TokenTransfer]) -> Result<usize, StoreError> {
        let mut rows = self.load_rows().await?;
        let mut by_identity: HashMap<TransferIdentity, usize> = rows
            .iter()
            .enumerate()
            .map(|(i, row)| (row.identity(), i))
            .collect();

        let mut changed = 0;
        for transfer in transfers {
            match by_identity.get(&transfer.identity()).copied() {
                None => {
                    by_identity.insert(transfer.identity(), rows.len());
                    rows.push(transfer.clone());
                    changed += 1;
                }
                Some(i) => {
                    if rows[i].is_pending() && !transfer.is_pending() {
                        rows[i] = transfer.clone();
                        changed += 1;
                    }
                }
            }
        }

        if changed > 0 {
            rows.sort_by_key(|row| row.sort_key());
            self.save_rows(&rows).await?;
            info!(changed, total = rows.len(), path = ?self.rows_path(), "persisted transfers");
        }
        Ok(changed)
    }

    async fn transfers(
        &self,
        from_key: Option<TransferKey>,
        limit: Option<usize>,
    ) -> Result<Vec<TokenTransfer>, StoreError> {
        let rows = self.load_rows().await?;
        let selected = rows
            .into_iter()
            .rev()
            .filter(|row| from_key.map(|from| row.sort_key() < from).unwrap_or(true));

        Ok(match limit {
            Some(limit) => selected.take(limit).collect(),
            None => selected.collect(),
        })
    }

    async fn pending_transfers(&self) -> Result<Vec<TokenTransfer>, StoreError> {
        let rows = self.load_rows().await?;
        Ok(rows.into_iter().rev().filter(|row| row.is_pending()).collect())
    }

    async fn confirmed_tip(&self) -> Result<Option<u64>, StoreError> {
        let rows = self.load_rows().await?;
        Ok(rows.iter().filter_map(|row| row.block_number).max())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct BalanceRecord {
    balance: U256,
    written_at: DateTime<Utc>,
}

pub struct FileBalanceStore {
    data_dir: PathBuf,
}

impl FileBalanceStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    fn path(&self) -> PathBuf {
        self.data_dir.join("balance.json")
    }
}

#[async_trait]
impl BalanceStore for FileBalanceStore {
    async fn balance(&self) -> Result<Option<U256>, StoreError> {
        if !self.path().exists() {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(self.path()).await?;
        let record: BalanceRecord = serde_json::from_str(&content)
            .map_err(|e| StoreError::Serde(format!("failed to parse balance record: {e}")))?;
        Ok(Some(record.balance))
    }

    async fn put_balance(&self, balance: U256) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        let record = BalanceRecord {
            balance,
            written_at: Utc::now(),
        };
        let content = serde_json::to_string_pretty(&record)
            .map_err(|e| StoreError::Serde(format!("failed to serialize balance record: {e}")))?;
        tokio::fs::write(self.path(), content).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, B256};
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU64, Ordering};

    static DIR_SEQ: AtomicU64 = AtomicU64::new(0);

    fn temp_dir(tag: &str) -> PathBuf {
        let seq = DIR_SEQ.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!(
            "token-state-sync-{tag}-{}-{seq}",
            std::process::id()
        ))
    }

    fn transfer(tag: u8, block: u64) -> TokenTransfer {
        TokenTransfer {
            hash: B256::from([tag; 32]),
            block_number: Some(block),
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            from: Address::from([0x01; 20]),
            to: Address::from([0x02; 20]),
            value: U256::from(7u64),
            transaction_index: 0,
            log_index: 0,
        }
    }

    #[tokio::test]
    async fn transfers_survive_reopen() {
        let dir = temp_dir("transfers");
        {
            let store = FileTransactionStore::new(dir.clone());
            store
                .put_transfers(&[transfer(1, 100), transfer(2, 105)])
                .await
                .unwrap();
        }

        let store = FileTransactionStore::new(dir.clone());
        let rows = store.transfers(None, None).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].block_number, Some(105));
        assert_eq!(store.confirmed_tip().await.unwrap(), Some(105));

        // Re-inserting the same rows must not duplicate them.
        assert_eq!(store.put_transfers(&[transfer(1, 100)]).await.unwrap(), 0);

        tokio::fs::remove_dir_all(dir).await.unwrap();
    }

    #[tokio::test]
    async fn balance_survives_reopen() {
        let dir = temp_dir("balance");
        {
            let store = FileBalanceStore::new(dir.clone());
            assert_eq!(store.balance().await.unwrap(), None);
            store.put_balance(U256::from(1_000u64)).await.unwrap();
        }

        let store = FileBalanceStore::new(dir.clone());
        assert_eq!(store.balance().await.unwrap(), Some(U256::from(1_000u64)));

        tokio::fs::remove_dir_all(dir).await.unwrap();
    }
}
