//! End-to-end tests for the sync coordinator over in-memory mock clients.
//!
//! The mocks implement the same traits a production embedder would: a ledger
//! whose chain stream and contract-call results are scripted per test, and
//! an indexer serving queued pages.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy_primitives::{Address, B256, Bytes, U256};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::{mpsc, watch};

use token_state_sync::SyncError;
use token_state_sync::contract::{ALLOWANCE_SELECTOR, BALANCE_OF_SELECTOR};
use token_state_sync::indexer::{IndexedHistoryClient, IndexerError};
use token_state_sync::ledger::RemoteLedgerClient;
use token_state_sync::store::{MemoryBalanceStore, MemoryTransactionStore, TransactionStore};
use token_state_sync::sync::{
    AllowanceCoordinator, BalanceSyncEngine, CancelToken, HistorySyncEngine, SyncCoordinator,
};
use token_state_sync::types::{BlockReference, SyncState, TokenTransfer};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn token() -> Address {
    Address::from([0x70; 20])
}

fn owner() -> Address {
    Address::from([0x0e; 20])
}

fn transfer(tag: u8, block: u64, log_index: u64) -> TokenTransfer {
    TokenTransfer {
        hash: B256::from([tag; 32]),
        block_number: Some(block),
        timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        from: Address::from([0x0a; 20]),
        to: owner(),
        value: U256::from(10u64),
        transaction_index: 0,
        log_index,
    }
}

fn pending_transfer(tag: u8) -> TokenTransfer {
    let mut row = transfer(tag, 0, 0);
    row.block_number = None;
    row
}

/// Scripted remote ledger: chain states arrive on a channel, contract calls
/// are answered from queues and counted.
struct MockLedger {
    owner: Address,
    chain_rx: Mutex<Option<mpsc::UnboundedReceiver<SyncState>>>,
    balances: Mutex<VecDeque<U256>>,
    allowance: U256,
    balance_calls: AtomicUsize,
    allowance_calls: AtomicUsize,
    delay: Duration,
}

impl MockLedger {
    fn new(owner: Address, delay: Duration) -> (Arc<Self>, mpsc::UnboundedSender<SyncState>) {
        let (chain_tx, chain_rx) = mpsc::unbounded_channel();
        let ledger = Arc::new(Self {
            owner,
            chain_rx: Mutex::new(Some(chain_rx)),
            balances: Mutex::new(VecDeque::new()),
            allowance: U256::from(777u64),
            balance_calls: AtomicUsize::new(0),
            allowance_calls: AtomicUsize::new(0),
            delay,
        });
        (ledger, chain_tx)
    }

    fn queue_balances(&self, values: &[u64]) {
        let mut balances = self.balances.lock().unwrap();
        balances.extend(values.iter().map(|v| U256::from(*v)));
    }

    fn balance_calls(&self) -> usize {
        self.balance_calls.load(Ordering::SeqCst)
    }

    fn allowance_calls(&self) -> usize {
        self.allowance_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteLedgerClient for MockLedger {
    fn chain_sync_states(&self) -> BoxStream<'static, SyncState> {
        let chain_rx = self
            .chain_rx
            .lock()
            .unwrap()
            .take()
            .expect("chain stream already taken");
        futures::stream::unfold(chain_rx, |mut rx| async move {
            rx.recv().await.map(|state| (state, rx))
        })
        .boxed()
    }

    async fn call_contract(
        &self,
        _contract: Address,
        data: Bytes,
        _block: BlockReference,
    ) -> Result<Bytes, SyncError> {
        let selector: [u8; 4] = data[..4].try_into().unwrap();
        let value = match selector {
            BALANCE_OF_SELECTOR => {
                self.balance_calls.fetch_add(1, Ordering::SeqCst);
                let mut balances = self.balances.lock().unwrap();
                // Keep the final scripted value around for repeat calls.
                if balances.len() > 1 {
                    balances.pop_front().unwrap()
                } else {
                    balances.front().copied().unwrap_or(U256::ZERO)
                }
            }
            ALLOWANCE_SELECTOR => {
                self.allowance_calls.fetch_add(1, Ordering::SeqCst);
                self.allowance
            }
            _ => return Err(SyncError::Decode("unexpected selector".to_string())),
        };
        // Calls are counted on entry so tests can observe an in-flight fetch.
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(Bytes::from(value.to_be_bytes::<32>().to_vec()))
    }

    fn receive_address(&self) -> Address {
        self.owner
    }
}

/// Indexer serving queued page results in order; an exhausted queue serves
/// empty (short) pages.
struct MockIndexer {
    pages: Mutex<VecDeque<Result<Vec<TokenTransfer>, IndexerError>>>,
    page_limit: usize,
    calls: AtomicUsize,
}

impl MockIndexer {
    fn new(page_limit: usize) -> Arc<Self> {
        Arc::new(Self {
            pages: Mutex::new(VecDeque::new()),
            page_limit,
            calls: AtomicUsize::new(0),
        })
    }

    fn queue_page(&self, page: Vec<TokenTransfer>) {
        self.pages.lock().unwrap().push_back(Ok(page));
    }

    fn queue_failure(&self) {
        self.pages.lock().unwrap().push_back(Err(IndexerError::Status {
            status: "0".to_string(),
            message: "NOTOK".to_string(),
        }));
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IndexedHistoryClient for MockIndexer {
    async fn transfer_page(
        &self,
        _address: Address,
        _start_block: u64,
    ) -> Result<Vec<TokenTransfer>, IndexerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    fn page_limit(&self) -> usize {
        self.page_limit
    }
}

struct Harness {
    coordinator: SyncCoordinator<MockLedger, MockIndexer, MemoryTransactionStore, MemoryBalanceStore>,
    ledger: Arc<MockLedger>,
    indexer: Arc<MockIndexer>,
    chain_tx: mpsc::UnboundedSender<SyncState>,
}

fn harness(delay: Duration) -> Harness {
    init_tracing();
    let (ledger, chain_tx) = MockLedger::new(owner(), delay);
    let indexer = MockIndexer::new(3);
    let coordinator = SyncCoordinator::new(
        Arc::clone(&ledger),
        Arc::clone(&indexer),
        Arc::new(MemoryTransactionStore::new()),
        Arc::new(MemoryBalanceStore::new()),
        token(),
    );
    Harness {
        coordinator,
        ledger,
        indexer,
        chain_tx,
    }
}

async fn wait_until<T, F>(rx: &mut watch::Receiver<T>, pred: F)
where
    F: Fn(&T) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if pred(&rx.borrow_and_update()) {
                return;
            }
            rx.changed().await.expect("watch channel closed");
        }
    })
    .await
    .expect("timed out waiting for condition");
}

async fn wait_for<F>(pred: F)
where
    F: Fn() -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !pred() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for condition");
}

#[tokio::test]
async fn end_to_end_balance_follows_chain_and_history() {
    let h = harness(Duration::ZERO);
    // One value per expected fetch: initial history cycle, chain trigger,
    // then the post-history refresh.
    h.ledger.queue_balances(&[1000, 1000, 1500]);
    h.coordinator.start();

    let mut balance_rx = h.coordinator.balance_stream();
    let mut state_rx = h.coordinator.sync_state_stream();
    let mut tx_state_rx = h.coordinator.transactions_sync_state_stream();
    let mut transfers_rx = h.coordinator.transactions_stream();

    // The initial (empty) history cycle completes and settles the balance.
    wait_until(&mut tx_state_rx, |s| s.is_synced()).await;
    wait_until(&mut balance_rx, |b| *b == Some(U256::from(1000u64))).await;

    h.chain_tx.send(SyncState::Synced).unwrap();
    wait_until(&mut state_rx, |s| s.is_synced()).await;
    assert_eq!(h.coordinator.balance(), Some(U256::from(1000u64)));

    // Two new transfer events arrive at the indexer; their discovery must
    // re-check the balance.
    h.indexer.queue_page(vec![transfer(1, 100, 0), transfer(2, 101, 0)]);
    h.coordinator.refresh_history().await;

    wait_until(&mut transfers_rx, |t| t.len() == 2).await;
    wait_until(&mut balance_rx, |b| *b == Some(U256::from(1500u64))).await;
    wait_until(&mut state_rx, |s| s.is_synced()).await;

    let rows = h.coordinator.get_transactions(None, Some(10)).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].block_number, Some(101));

    h.coordinator.stop();
}

#[tokio::test]
async fn not_synced_to_synced_passes_through_syncing() {
    let h = harness(Duration::from_millis(150));
    h.ledger.queue_balances(&[500]);
    h.coordinator.start();

    let mut state_rx = h.coordinator.sync_state_stream();
    // Let the start-time refresh settle so it cannot interleave below.
    wait_until(&mut state_rx, |s| s.is_synced()).await;

    h.chain_tx
        .send(SyncState::NotSynced(Arc::new(SyncError::Network(
            "ledger unreachable".to_string(),
        ))))
        .unwrap();
    wait_until(&mut state_rx, |s| s.is_not_synced()).await;

    h.chain_tx.send(SyncState::Synced).unwrap();
    // The balance fetch is still in the air, so the mirrored state must sit
    // in Syncing before it may report Synced.
    wait_until(&mut state_rx, |s| s.is_syncing()).await;
    wait_until(&mut state_rx, |s| s.is_synced()).await;

    h.coordinator.stop();
}

#[tokio::test]
async fn balance_result_landing_after_not_synced_is_discarded() {
    let h = harness(Duration::from_millis(300));
    h.ledger.queue_balances(&[800]);
    h.coordinator.start();

    let mut state_rx = h.coordinator.sync_state_stream();
    // The start-time history cycle kicks a balance fetch; fail the chain
    // while that fetch is still in the air.
    wait_for(|| h.ledger.balance_calls() == 1).await;
    h.chain_tx
        .send(SyncState::NotSynced(Arc::new(SyncError::Network(
            "ledger unreachable".to_string(),
        ))))
        .unwrap();
    wait_until(&mut state_rx, |s| s.is_not_synced()).await;

    // The fetch resolves here; its stale result must not move the state to
    // Synced or publish a balance over the failure.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(h.coordinator.sync_state().is_not_synced());
    assert_eq!(h.coordinator.balance(), None);

    h.coordinator.stop();
}

#[tokio::test]
async fn balance_sync_is_single_flight() {
    init_tracing();
    let (ledger, _chain_tx) = MockLedger::new(owner(), Duration::from_millis(100));
    ledger.queue_balances(&[42]);
    let (outcome_tx, mut outcome_rx) = mpsc::channel(4);
    let engine = BalanceSyncEngine::new(
        Arc::clone(&ledger),
        token(),
        owner(),
        outcome_tx,
        CancelToken::new(),
    );

    engine.sync();
    engine.sync(); // absorbed by the in-flight refresh

    let outcome = tokio::time::timeout(Duration::from_secs(2), outcome_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.unwrap(), U256::from(42u64));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(ledger.balance_calls(), 1);
    assert!(outcome_rx.try_recv().is_err());
}

#[tokio::test]
async fn overlapping_pages_merge_without_duplicates() {
    init_tracing();
    let indexer = MockIndexer::new(3);
    let store = Arc::new(MemoryTransactionStore::new());
    // Page B restarts at page A's last block, repeating one identity.
    indexer.queue_page(vec![transfer(1, 100, 0), transfer(2, 105, 0), transfer(3, 110, 0)]);
    indexer.queue_page(vec![transfer(3, 110, 0), transfer(4, 115, 0), transfer(5, 120, 0)]);
    indexer.queue_page(vec![transfer(6, 125, 0)]); // short page ends the cycle

    let engine = HistorySyncEngine::new(Arc::clone(&indexer), Arc::clone(&store), owner());
    let cycle = engine
        .run_cycle(&CancelToken::new())
        .await
        .unwrap()
        .expect("cycle should run");

    assert_eq!(cycle.changed, 6);
    assert_eq!(cycle.transfers.len(), 6);
    let mut identities: Vec<_> = cycle.transfers.iter().map(|t| t.identity()).collect();
    identities.sort();
    identities.dedup();
    assert_eq!(identities.len(), 6);
    assert_eq!(indexer.calls(), 3);
    assert_eq!(store.confirmed_tip().await.unwrap(), Some(125));
}

#[tokio::test]
async fn historical_allowance_is_cached_latest_is_not() {
    init_tracing();
    let (ledger, _chain_tx) = MockLedger::new(owner(), Duration::ZERO);
    let allowances = AllowanceCoordinator::new(Arc::clone(&ledger), token(), owner());
    let spender = Address::from([0x5e; 20]);

    let first = allowances
        .allowance(spender, BlockReference::Number(12_345_678))
        .await
        .unwrap();
    let second = allowances
        .allowance(spender, BlockReference::Number(12_345_678))
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(ledger.allowance_calls(), 1);

    allowances
        .allowance(spender, BlockReference::Latest)
        .await
        .unwrap();
    allowances
        .allowance(spender, BlockReference::Latest)
        .await
        .unwrap();
    assert_eq!(ledger.allowance_calls(), 3);
}

#[tokio::test]
async fn stop_discards_inflight_completion() {
    let h = harness(Duration::from_millis(200));
    h.ledger.queue_balances(&[999]);
    h.coordinator.start();

    h.chain_tx.send(SyncState::Synced).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await; // let the fetch take off
    h.coordinator.stop();

    // The fetch would have resolved by now; its completion must not land.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.coordinator.balance(), None);
    assert!(!h.coordinator.sync_state().is_synced());
}

#[tokio::test]
async fn history_failure_surfaces_not_synced_and_retries_cleanly() {
    let h = harness(Duration::ZERO);
    h.indexer.queue_failure();
    h.coordinator.start();

    let mut tx_state_rx = h.coordinator.transactions_sync_state_stream();
    wait_until(&mut tx_state_rx, |s| s.is_not_synced()).await;

    // The next trigger retries from the same cursor and succeeds.
    h.indexer.queue_page(vec![transfer(1, 100, 0)]);
    h.coordinator.refresh_history().await;
    wait_until(&mut tx_state_rx, |s| s.is_synced()).await;

    assert_eq!(
        h.coordinator.get_transactions(None, None).await.unwrap().len(),
        1
    );
    h.coordinator.stop();
}

#[tokio::test]
async fn pending_transfer_confirms_on_next_cycle() {
    let h = harness(Duration::ZERO);
    // A locally submitted transfer is in the store without confirmation.
    h.coordinator
        .transaction_store()
        .put_transfers(&[pending_transfer(9)])
        .await
        .unwrap();
    assert_eq!(h.coordinator.get_pending_transactions().await.unwrap().len(), 1);

    // The indexer reports the same identity confirmed at block 140.
    h.indexer.queue_page(vec![transfer(9, 140, 0)]);
    h.coordinator.start();

    let mut transfers_rx = h.coordinator.transactions_stream();
    wait_until(&mut transfers_rx, |t| {
        t.len() == 1 && t[0].block_number == Some(140)
    })
    .await;
    assert!(h.coordinator.get_pending_transactions().await.unwrap().is_empty());

    h.coordinator.stop();
}

#[tokio::test]
async fn start_is_idempotent_and_payload_builders_are_pure() {
    let h = harness(Duration::ZERO);
    let spender = Address::from([0x5e; 20]);

    let approve = h
        .coordinator
        .build_approve_transaction_data(spender, U256::from(9u64));
    assert_eq!(approve.len(), 68);
    let transfer_data = h
        .coordinator
        .build_transfer_transaction_data(spender, U256::from(9u64));
    assert_eq!(transfer_data.len(), 68);
    // Builders never touch the ledger, started or not.
    assert_eq!(h.ledger.balance_calls() + h.ledger.allowance_calls(), 0);

    h.coordinator.start();
    h.coordinator.start(); // second start is a no-op
    h.coordinator.stop();
    h.coordinator.stop(); // as is a second stop
}
