//! HTTP client for an etherscan-style account-history indexer.

use std::time::Duration;

use alloy_primitives::Address;
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::types::{HistoryEnvelope, IndexerError};
use crate::types::TokenTransfer;

/// Default page size requested from the indexer. The server may enforce a
/// smaller bound; what matters to the sync loop is that both sides agree on
/// what a full page looks like.
pub const DEFAULT_PAGE_LIMIT: usize = 1000;

/// Which account-history listing the indexer should serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryAction {
	/// ERC20 transfer events (`action=tokentx`).
	TokenTransfers,
	/// Plain account transactions (`action=txlist`).
	Transactions,
}

impl HistoryAction {
	fn as_param(self) -> &'static str {
		match self {
			HistoryAction::TokenTransfers => "tokentx",
			HistoryAction::Transactions => "txlist",
		}
	}
}

/// Paginated view over an account's transfer history.
#[async_trait]
pub trait IndexedHistoryClient: Send + Sync + 'static {
	/// Fetch one page of transfers for `address`, ascending by block number,
	/// starting at `start_block`.
	async fn transfer_page(
		&self,
		address: Address,
		start_block: u64,
	) -> Result<Vec<TokenTransfer>, IndexerError>;

	/// Page size bound in effect. A page shorter than this bound is the last
	/// page of the current cycle.
	fn page_limit(&self) -> usize;
}

/// Indexer client over a plain HTTP GET API.
#[derive(Clone)]
pub struct HttpHistoryClient {
	http_client: Client,
	base_url: String,
	api_key: String,
	contract: Address,
	action: HistoryAction,
	page_limit: usize,
}

impl HttpHistoryClient {
	pub fn new(base_url: String, api_key: String, contract: Address) -> Self {
		let http_client = Client::builder()
			.timeout(Duration::from_secs(30))
			.build()
			.expect("default TLS backend unavailable");

		Self {
			http_client,
			base_url,
			api_key,
			contract,
			action: HistoryAction::TokenTransfers,
			page_limit: DEFAULT_PAGE_LIMIT,
		}
	}

	pub fn with_action(mut self, action: HistoryAction) -> Self {
		self.action = action;
		self
	}

	pub fn with_page_limit(mut self, page_limit: usize) -> Self {
		self.page_limit = page_limit;
		self
	}
}

#[async_trait]
impl IndexedHistoryClient for HttpHistoryClient {
	async fn transfer_page(
		&self,
		address: Address,
		start_block: u64,
	) -> Result<Vec<TokenTransfer>, IndexerError> {
		debug!(%address, start_block, action = self.action.as_param(), "fetching history page");

		let query: [(&str, String); 10] = [
			("module", "account".to_string()),
			("action", self.action.as_param().to_string()),
			("address", address.to_string()),
			("contractaddress", self.contract.to_string()),
			("startblock", start_block.to_string()),
			("endblock", u64::MAX.to_string()),
			("page", "1".to_string()),
			("offset", self.page_limit.to_string()),
			("sort", "asc".to_string()),
			("apikey", self.api_key.clone()),
		];

		let response = self
			.http_client
			.get(&self.base_url)
			.query(&query)
			.send()
			.await?;

		if !response.status().is_success() {
			return Err(IndexerError::Status {
				status: response.status().to_string(),
				message: "http request failed".to_string(),
			});
		}

		let envelope: HistoryEnvelope = response.json().await?;
		let records = envelope.records()?;
		debug!(count = records.len(), "history page received");

		records.into_iter().map(|record| record.into_transfer()).collect()
	}

	fn page_limit(&self) -> usize {
		self.page_limit
	}
}
