//! Wire types for the account-history indexer.

use alloy_primitives::{Address, B256, U256};
use chrono::TimeZone;
use serde::{Deserialize, Serialize};

use crate::types::TokenTransfer;

/// JSON envelope wrapping every indexer response.
///
/// `result` holds the record list on success; on failure the indexer puts a
/// diagnostic string there instead, so it is kept raw until the status has
/// been checked.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEnvelope {
    pub status: String,
    pub message: String,
    #[serde(default)]
    pub result: serde_json::Value,
}

impl HistoryEnvelope {
    pub fn is_ok(&self) -> bool {
        self.status == "1"
    }

    /// Extract the transfer records, treating a non-OK status as a fetch
    /// failure rather than an empty result.
    pub fn records(self) -> Result<Vec<RawTransferRecord>, IndexerError> {
        if !self.is_ok() {
            return Err(IndexerError::Status {
                status: self.status,
                message: self.message,
            });
        }
        serde_json::from_value(self.result).map_err(IndexerError::Json)
    }
}

/// One transfer row as serialized by the indexer. Every field arrives as a
/// decimal or hex string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransferRecord {
    pub hash: String,
    pub block_number: String,
    pub time_stamp: String,
    pub from: String,
    pub to: String,
    pub value: String,
    pub transaction_index: String,
    pub log_index: String,
}

impl RawTransferRecord {
    /// Convert the wire row into a domain transfer. Indexer rows are always
    /// confirmed, so the block number is mandatory.
    pub fn into_transfer(self) -> Result<TokenTransfer, IndexerError> {
        let hash: B256 = self
            .hash
            .parse()
            .map_err(|_| IndexerError::Decode(format!("invalid transaction hash {:?}", self.hash)))?;
        let from: Address = self
            .from
            .parse()
            .map_err(|_| IndexerError::Decode(format!("invalid from address {:?}", self.from)))?;
        let to: Address = self
            .to
            .parse()
            .map_err(|_| IndexerError::Decode(format!("invalid to address {:?}", self.to)))?;
        let value = U256::from_str_radix(&self.value, 10)
            .map_err(|_| IndexerError::Decode(format!("invalid transfer value {:?}", self.value)))?;

        let block_number = parse_u64(&self.block_number, "blockNumber")?;
        let transaction_index = parse_u64(&self.transaction_index, "transactionIndex")?;
        let log_index = parse_u64(&self.log_index, "logIndex")?;

        let secs = parse_u64(&self.time_stamp, "timeStamp")?;
        let timestamp = chrono::Utc
            .timestamp_opt(secs as i64, 0)
            .single()
            .ok_or_else(|| IndexerError::Decode(format!("timestamp {secs} out of range")))?;

        Ok(TokenTransfer {
            hash,
            block_number: Some(block_number),
            timestamp,
            from,
            to,
            value,
            transaction_index,
            log_index,
        })
    }
}

fn parse_u64(raw: &str, field: &str) -> Result<u64, IndexerError> {
    raw.parse::<u64>()
        .map_err(|_| IndexerError::Decode(format!("invalid {field} {raw:?}")))
}

/// Errors from the indexer transport and payload handling.
#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The indexer answered with a non-OK status envelope.
    #[error("indexer returned status {status}: {message}")]
    Status { status: String, message: String },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed record: {0}")]
    Decode(String),
}
