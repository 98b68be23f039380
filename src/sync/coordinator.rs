//! The sync coordinator: owns the unified sync-state machine and drives the
//! balance and history engines.
//!
//! The coordinator's run loop is the single writer of all observable state:
//! the balance-level and transaction-level `SyncState` watches, the balance
//! watch and the transfer-set watch. Engines never touch that state; they
//! report over mpsc channels the run loop consumes. Watch channels give the
//! published streams latest-value semantics: a slow consumer sees the most
//! recent value, rapid intermediate transitions may collapse.

use std::sync::{Arc, Mutex};

use alloy_primitives::{Address, Bytes, U256};
use futures::stream::BoxStream;
use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::allowance::AllowanceCoordinator;
use super::balance::{BalanceOutcome, BalanceSyncEngine};
use super::cancel::CancelToken;
use super::history::{HistoryEvent, HistorySyncEngine};
use crate::error::SyncError;
use crate::indexer::IndexedHistoryClient;
use crate::ledger::RemoteLedgerClient;
use crate::store::{BalanceStore, TransactionStore};
use crate::types::{BlockReference, SyncState, TokenTransfer, TransferKey};

const CHANNEL_CAPACITY: usize = 16;

/// Commands accepted by the run loop while the coordinator is started.
enum Command {
    RefreshBalance,
    RefreshHistory,
}

struct Watches {
    state: watch::Sender<SyncState>,
    tx_state: watch::Sender<SyncState>,
    balance: watch::Sender<Option<U256>>,
    transfers: watch::Sender<Vec<TokenTransfer>>,
}

struct Running {
    commands: mpsc::Sender<Command>,
    cancel: CancelToken,
    run_task: JoinHandle<()>,
}

/// Keeps the local view of a token account consistent with the remote
/// ledger and the history indexer.
pub struct SyncCoordinator<L, I, S, B> {
    ledger: Arc<L>,
    tx_store: Arc<S>,
    balance_store: Arc<B>,
    history: Arc<HistorySyncEngine<I, S>>,
    allowances: AllowanceCoordinator<L>,
    token: Address,
    owner: Address,
    watches: Arc<Watches>,
    running: Mutex<Option<Running>>,
}

impl<L, I, S, B> SyncCoordinator<L, I, S, B>
where
    L: RemoteLedgerClient,
    I: IndexedHistoryClient,
    S: TransactionStore,
    B: BalanceStore,
{
    pub fn new(
        ledger: Arc<L>,
        indexer: Arc<I>,
        tx_store: Arc<S>,
        balance_store: Arc<B>,
        token: Address,
    ) -> Self {
        let owner = ledger.receive_address();
        let history = Arc::new(HistorySyncEngine::new(
            indexer,
            Arc::clone(&tx_store),
            owner,
        ));
        let allowances = AllowanceCoordinator::new(Arc::clone(&ledger), token, owner);
        let watches = Arc::new(Watches {
            state: watch::Sender::new(SyncState::Syncing),
            tx_state: watch::Sender::new(SyncState::Syncing),
            balance: watch::Sender::new(None),
            transfers: watch::Sender::new(Vec::new()),
        });

        Self {
            ledger,
            tx_store,
            balance_store,
            history,
            allowances,
            token,
            owner,
            watches,
            running: Mutex::new(None),
        }
    }

    /// Begin synchronization: subscribe to chain-level notifications, kick a
    /// history cycle and start serving triggers. Idempotent while running.
    pub fn start(&self) {
        let mut running = self.running.lock().unwrap();
        if running.is_some() {
            debug!("sync already started");
            return;
        }
        info!(owner = %self.owner, token = %self.token, "starting token sync");

        let cancel = CancelToken::new();
        let (command_tx, command_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (outcome_tx, outcome_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (history_tx, history_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let balance_engine = BalanceSyncEngine::new(
            Arc::clone(&self.ledger),
            self.token,
            self.owner,
            outcome_tx,
            cancel.clone(),
        );

        let ctx = RunContext {
            watches: Arc::clone(&self.watches),
            balance_engine,
            history_engine: Arc::clone(&self.history),
            balance_store: Arc::clone(&self.balance_store),
            cancel: cancel.clone(),
            history_tx,
        };
        let run_task = tokio::spawn(run_loop(
            ctx,
            self.ledger.chain_sync_states(),
            command_rx,
            outcome_rx,
            history_rx,
        ));

        *running = Some(Running {
            commands: command_tx,
            cancel,
            run_task,
        });
    }

    /// Cancel all in-flight work and detach from the chain notification
    /// source. No state transition happens after this returns until
    /// `start()` is called again. Stale completions of calls that were in
    /// the air land on dead channels and are discarded.
    pub fn stop(&self) {
        let Some(running) = self.running.lock().unwrap().take() else {
            return;
        };
        info!("stopping token sync");
        running.cancel.cancel();
        running.run_task.abort();
    }

    pub fn sync_state(&self) -> SyncState {
        self.watches.state.borrow().clone()
    }

    /// Latest-value stream of the balance-level sync state.
    pub fn sync_state_stream(&self) -> watch::Receiver<SyncState> {
        self.watches.state.subscribe()
    }

    pub fn transactions_sync_state(&self) -> SyncState {
        self.watches.tx_state.borrow().clone()
    }

    /// Latest-value stream of the transaction-level sync state.
    pub fn transactions_sync_state_stream(&self) -> watch::Receiver<SyncState> {
        self.watches.tx_state.subscribe()
    }

    /// Last synced balance, `None` until the first successful sync.
    pub fn balance(&self) -> Option<U256> {
        *self.watches.balance.borrow()
    }

    pub fn balance_stream(&self) -> watch::Receiver<Option<U256>> {
        self.watches.balance.subscribe()
    }

    /// Latest-value stream of the full merged transfer set.
    pub fn transactions_stream(&self) -> watch::Receiver<Vec<TokenTransfer>> {
        self.watches.transfers.subscribe()
    }

    /// Ask the run loop for a balance refresh. A no-op while stopped or
    /// while a refresh is already in flight.
    pub async fn refresh_balance(&self) {
        if let Some(commands) = self.command_sender() {
            let _ = commands.send(Command::RefreshBalance).await;
        }
    }

    /// Ask the run loop for a history cycle. A no-op while stopped; absorbed
    /// by a cycle already in flight.
    pub async fn refresh_history(&self) {
        if let Some(commands) = self.command_sender() {
            let _ = commands.send(Command::RefreshHistory).await;
        }
    }

    fn command_sender(&self) -> Option<mpsc::Sender<Command>> {
        self.running
            .lock()
            .unwrap()
            .as_ref()
            .map(|running| running.commands.clone())
    }

    /// Allowance granted to `spender` at `block`, deduplicated and cached
    /// per (spender, block) for historical heights.
    pub async fn get_allowance(
        &self,
        spender: Address,
        block: BlockReference,
    ) -> Result<U256, SyncError> {
        self.allowances.allowance(spender, block).await
    }

    pub fn build_approve_transaction_data(&self, spender: Address, amount: U256) -> Bytes {
        self.allowances.build_approve_data(spender, amount)
    }

    pub fn build_transfer_transaction_data(&self, to: Address, value: U256) -> Bytes {
        self.allowances.build_transfer_data(to, value)
    }

    /// Cursor-based read of the persisted history, descending key order.
    pub async fn get_transactions(
        &self,
        from_key: Option<TransferKey>,
        limit: Option<usize>,
    ) -> Result<Vec<TokenTransfer>, SyncError> {
        self.history.transactions(from_key, limit).await
    }

    /// Transfers with no block confirmation yet.
    pub async fn get_pending_transactions(&self) -> Result<Vec<TokenTransfer>, SyncError> {
        self.history.pending_transactions().await
    }

    /// The account this coordinator tracks.
    pub fn owner(&self) -> Address {
        self.owner
    }

    /// Direct store access for embedders that page outside the coordinator.
    pub fn transaction_store(&self) -> &Arc<S> {
        &self.tx_store
    }
}

impl<L, I, S, B> Drop for SyncCoordinator<L, I, S, B> {
    fn drop(&mut self) {
        if let Ok(mut running) = self.running.lock() {
            if let Some(running) = running.take() {
                running.cancel.cancel();
                running.run_task.abort();
            }
        }
    }
}

/// Everything the run loop's handlers need; dropped wholesale on `stop()`.
struct RunContext<L, I, S, B> {
    watches: Arc<Watches>,
    balance_engine: BalanceSyncEngine<L>,
    history_engine: Arc<HistorySyncEngine<I, S>>,
    balance_store: Arc<B>,
    cancel: CancelToken,
    history_tx: mpsc::Sender<HistoryEvent>,
}

async fn run_loop<L, I, S, B>(
    ctx: RunContext<L, I, S, B>,
    mut chain_states: BoxStream<'static, SyncState>,
    mut command_rx: mpsc::Receiver<Command>,
    mut outcome_rx: mpsc::Receiver<BalanceOutcome>,
    mut history_rx: mpsc::Receiver<HistoryEvent>,
) where
    L: RemoteLedgerClient,
    I: IndexedHistoryClient,
    S: TransactionStore,
    B: BalanceStore,
{
    // Seed the balance watch from the last persisted value so consumers
    // have something to show before the first refresh lands.
    match ctx.balance_store.balance().await {
        Ok(Some(balance)) => {
            ctx.watches.balance.send_replace(Some(balance));
        }
        Ok(None) => {}
        Err(e) => warn!("failed to read persisted balance: {e}"),
    }

    ctx.spawn_history_cycle();

    loop {
        tokio::select! {
            chain_state = chain_states.next() => {
                let Some(chain_state) = chain_state else {
                    info!("chain sync stream ended");
                    break;
                };
                ctx.on_chain_state(chain_state);
            }
            Some(outcome) = outcome_rx.recv() => {
                ctx.on_balance_outcome(outcome).await;
            }
            Some(event) = history_rx.recv() => {
                ctx.on_history_event(event);
            }
            command = command_rx.recv() => {
                let Some(command) = command else { break };
                match command {
                    Command::RefreshBalance => {
                        ctx.watches.state.send_replace(SyncState::Syncing);
                        ctx.balance_engine.sync();
                    }
                    Command::RefreshHistory => ctx.spawn_history_cycle(),
                }
            }
        }
    }
}

impl<L, I, S, B> RunContext<L, I, S, B>
where
    L: RemoteLedgerClient,
    I: IndexedHistoryClient,
    S: TransactionStore,
    B: BalanceStore,
{
    /// Mirror the authoritative chain-level state; a caught-up chain is the
    /// trigger for a local balance re-check.
    fn on_chain_state(&self, chain_state: SyncState) {
        match chain_state {
            SyncState::NotSynced(e) => {
                warn!("chain reports not synced: {e}");
                self.watches.state.send_replace(SyncState::NotSynced(e));
            }
            SyncState::Syncing => {
                self.watches.state.send_replace(SyncState::Syncing);
            }
            SyncState::Synced => {
                self.watches.state.send_replace(SyncState::Syncing);
                self.balance_engine.sync();
            }
        }
    }

    async fn on_balance_outcome(&self, outcome: BalanceOutcome) {
        match outcome {
            Ok(balance) => {
                // A chain-level NotSynced that arrived while this fetch was
                // in the air supersedes its result; applying it would jump
                // the state straight from NotSynced to Synced.
                if self.watches.state.borrow().is_not_synced() {
                    debug!("discarding balance result that landed after a not-synced report");
                    return;
                }
                if let Err(e) = self.balance_store.put_balance(balance).await {
                    warn!("failed to persist balance: {e}");
                }
                info!(%balance, "balance synced");
                self.watches.balance.send_replace(Some(balance));
                self.watches.state.send_replace(SyncState::Synced);
            }
            Err(e) => {
                error!("balance sync failed: {e}");
                self.watches.state.send_replace(SyncState::NotSynced(e));
            }
        }
    }

    fn on_history_event(&self, event: HistoryEvent) {
        match event {
            HistoryEvent::Started => {
                self.watches.tx_state.send_replace(SyncState::Syncing);
            }
            HistoryEvent::Completed(cycle) => {
                info!(
                    total = cycle.transfers.len(),
                    changed = cycle.changed,
                    "transaction history synced"
                );
                self.watches.transfers.send_replace(cycle.transfers);
                self.watches.tx_state.send_replace(SyncState::Synced);
                // Transfer activity may have moved the balance.
                self.watches.state.send_replace(SyncState::Syncing);
                self.balance_engine.sync();
            }
            HistoryEvent::Failed(e) => {
                error!("transaction history sync failed: {e}");
                self.watches.tx_state.send_replace(SyncState::NotSynced(e));
            }
        }
    }

    fn spawn_history_cycle(&self) {
        let engine = Arc::clone(&self.history_engine);
        let events = self.history_tx.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            if events.send(HistoryEvent::Started).await.is_err() {
                return;
            }
            let event = match engine.run_cycle(&cancel).await {
                Ok(Some(cycle)) => HistoryEvent::Completed(cycle),
                // Absorbed by a cycle already in flight; that cycle reports.
                Ok(None) => return,
                Err(SyncError::Cancelled) => return,
                Err(e) => HistoryEvent::Failed(Arc::new(e)),
            };
            let _ = events.send(event).await;
        });
    }
}
