use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use shared::{
    domain::{
        ConnectionState, ContractDeployment, DraftEntry, Inclusion, Memo, MemoNotification, TxHash,
    },
    error::SessionError,
    protocol::WalletMethod,
};
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

mod rpc;
pub use rpc::{RpcCoffeeContract, RpcWallet};

pub type SessionResult<T> = std::result::Result<T, SessionError>;

const SESSION_EVENT_CAPACITY: usize = 1024;

/// Browser-style wallet capability: account discovery plus a signer bound to
/// one deployed contract.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    async fn accounts(&self, method: WalletMethod) -> SessionResult<Vec<Address>>;
    fn bind_contract(
        &self,
        deployment: &ContractDeployment,
    ) -> SessionResult<Arc<dyn CoffeeContract>>;
}

pub struct MissingWalletProvider;

#[async_trait]
impl WalletProvider for MissingWalletProvider {
    async fn accounts(&self, _method: WalletMethod) -> SessionResult<Vec<Address>> {
        Err(SessionError::provider_absent())
    }

    fn bind_contract(
        &self,
        _deployment: &ContractDeployment,
    ) -> SessionResult<Arc<dyn CoffeeContract>> {
        Err(SessionError::provider_absent())
    }
}

#[async_trait]
pub trait CoffeeContract: Send + Sync {
    /// Submits `buyCoffee` with `value` attached. Resolves once the
    /// transaction is accepted, not once it is mined.
    async fn buy_coffee(&self, name: &str, message: &str, value: U256) -> SessionResult<TxHash>;
    async fn wait_for_inclusion(&self, tx_hash: TxHash) -> SessionResult<Inclusion>;
    async fn get_memos(&self) -> SessionResult<Vec<Memo>>;
    async fn withdraw_tips(&self) -> SessionResult<TxHash>;
    /// Bounded stream of `NewMemo` payloads. The producer waits for room
    /// rather than dropping, and stops once the receiver is dropped.
    async fn subscribe_new_memos(&self) -> SessionResult<mpsc::Receiver<MemoNotification>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Probe,
    Connect,
    SubmitPayment,
    RefreshMemos,
    Withdraw,
    Subscribe,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Probe => "probe",
            Self::Connect => "connect",
            Self::SubmitPayment => "submit_payment",
            Self::RefreshMemos => "refresh_memos",
            Self::Withdraw => "withdraw",
            Self::Subscribe => "subscribe",
        }
    }
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    ConnectionChanged(ConnectionState),
    DraftChanged(DraftEntry),
    MemoLogReplaced(Vec<Memo>),
    MemoAppended(Memo),
    PaymentSubmitted(TxHash),
    PaymentConfirmed(Inclusion),
    WithdrawalConfirmed(Inclusion),
    OperationFailed {
        operation: Operation,
        error: SessionError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub connection: ConnectionState,
    pub draft: DraftEntry,
    pub memos: Vec<Memo>,
    pub submission_in_flight: bool,
}

#[derive(Default)]
struct SessionState {
    connection: ConnectionState,
    draft: DraftEntry,
    memos: Vec<Memo>,
    notification_seq: u64,
    refreshes_in_flight: usize,
    /// Notified memos kept while a history fetch is running, keyed by
    /// `notification_seq`.
    notified_during_refresh: Vec<(u64, Memo)>,
}

impl SessionState {
    fn push_notified(&mut self, memo: Memo) {
        self.notification_seq += 1;
        if self.refreshes_in_flight > 0 {
            self.notified_during_refresh
                .push((self.notification_seq, memo.clone()));
        }
        self.memos.push(memo);
    }

    fn begin_refresh(&mut self) -> u64 {
        self.refreshes_in_flight += 1;
        self.notification_seq
    }

    fn end_refresh(&mut self) {
        self.refreshes_in_flight = self.refreshes_in_flight.saturating_sub(1);
        if self.refreshes_in_flight == 0 {
            self.notified_during_refresh.clear();
        }
    }

    /// Replaces the log with `fetched`, then re-appends memos notified after
    /// `mark` that the fetched history does not contain yet.
    fn replace_history(&mut self, mut fetched: Vec<Memo>, mark: u64) -> Vec<Memo> {
        let mut matched = vec![false; fetched.len()];
        let mut missing = Vec::new();
        for (_, memo) in self
            .notified_during_refresh
            .iter()
            .filter(|(seq, _)| *seq > mark)
        {
            let found = fetched
                .iter()
                .zip(matched.iter_mut())
                .find(|(candidate, taken)| !**taken && *candidate == memo);
            match found {
                Some((_, taken)) => *taken = true,
                None => missing.push(memo.clone()),
            }
        }
        fetched.extend(missing);
        self.memos = fetched.clone();
        fetched
    }
}

/// Clears the in-flight flag even if the submitting future is dropped.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SessionController {
    wallet: Arc<dyn WalletProvider>,
    deployment: ContractDeployment,
    inner: Mutex<SessionState>,
    submission_in_flight: AtomicBool,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionController {
    pub fn new(wallet: Arc<dyn WalletProvider>, deployment: ContractDeployment) -> Arc<Self> {
        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        Arc::new(Self {
            wallet,
            deployment,
            inner: Mutex::new(SessionState::default()),
            submission_in_flight: AtomicBool::new(false),
            events,
        })
    }

    pub fn without_wallet(deployment: ContractDeployment) -> Arc<Self> {
        Self::new(Arc::new(MissingWalletProvider), deployment)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let guard = self.inner.lock().await;
        SessionSnapshot {
            connection: guard.connection,
            draft: guard.draft.clone(),
            memos: guard.memos.clone(),
            submission_in_flight: self.submission_in_flight.load(Ordering::Acquire),
        }
    }

    pub async fn connection(&self) -> ConnectionState {
        self.inner.lock().await.connection
    }

    pub async fn draft(&self) -> DraftEntry {
        self.inner.lock().await.draft.clone()
    }

    pub async fn memos(&self) -> Vec<Memo> {
        self.inner.lock().await.memos.clone()
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn report_failure(&self, operation: Operation, error: SessionError) -> SessionError {
        warn!(
            operation = operation.as_str(),
            kind = ?error.kind(),
            "session: {}",
            error.message
        );
        self.emit(SessionEvent::OperationFailed {
            operation,
            error: error.clone(),
        });
        error
    }

    /// Records the first connected address; later calls keep the first one.
    async fn mark_connected(&self, address: Address) -> Address {
        let mut guard = self.inner.lock().await;
        if let ConnectionState::Connected(existing) = guard.connection {
            return existing;
        }
        guard.connection = ConnectionState::Connected(address);
        drop(guard);

        info!("session: wallet connected account={address}");
        self.emit(SessionEvent::ConnectionChanged(ConnectionState::Connected(
            address,
        )));
        address
    }

    /// Silently checks for an already authorized account. Failures are logged
    /// and returned but never broadcast.
    pub async fn probe_connection(&self) -> SessionResult<ConnectionState> {
        let accounts = match self.wallet.accounts(WalletMethod::ListAccounts).await {
            Ok(accounts) => accounts,
            Err(err) => {
                info!(
                    operation = Operation::Probe.as_str(),
                    kind = ?err.kind(),
                    "session: connection probe failed: {}",
                    err.message
                );
                return Err(err);
            }
        };
        debug!(accounts = accounts.len(), "session: probed authorized accounts");

        match accounts.first() {
            Some(address) => {
                let address = self.mark_connected(*address).await;
                Ok(ConnectionState::Connected(address))
            }
            None => {
                info!("session: no authorized account yet; waiting for explicit connect");
                Ok(self.connection().await)
            }
        }
    }

    pub async fn request_connection(&self) -> SessionResult<Address> {
        if let Some(address) = self.connection().await.address() {
            debug!("session: already connected account={address}");
            return Ok(address);
        }

        let accounts = self
            .wallet
            .accounts(WalletMethod::RequestAccounts)
            .await
            .map_err(|err| self.report_failure(Operation::Connect, err))?;

        let Some(address) = accounts.first().copied() else {
            return Err(self.report_failure(
                Operation::Connect,
                SessionError::rejected("wallet authorized no accounts"),
            ));
        };

        Ok(self.mark_connected(address).await)
    }

    pub async fn set_draft_name(&self, name: impl Into<String>) {
        let draft = {
            let mut guard = self.inner.lock().await;
            guard.draft.name = name.into();
            guard.draft.clone()
        };
        self.emit(SessionEvent::DraftChanged(draft));
    }

    pub async fn set_draft_message(&self, message: impl Into<String>) {
        let draft = {
            let mut guard = self.inner.lock().await;
            guard.draft.message = message.into();
            guard.draft.clone()
        };
        self.emit(SessionEvent::DraftChanged(draft));
    }

    /// Buys a coffee with the current draft and waits for the transaction to
    /// be mined. The draft is cleared only on confirmed inclusion; the new
    /// memo itself arrives later through the notification stream.
    pub async fn submit_payment(&self) -> SessionResult<Inclusion> {
        let draft = {
            let guard = self.inner.lock().await;
            if !guard.connection.is_connected() {
                return Err(self.report_failure(
                    Operation::SubmitPayment,
                    SessionError::invalid_state("connect a wallet before buying a coffee"),
                ));
            }
            guard.draft.clone()
        };

        let Some(_in_flight) = InFlightGuard::acquire(&self.submission_in_flight) else {
            return Err(self.report_failure(
                Operation::SubmitPayment,
                SessionError::invalid_state("a coffee purchase is already in flight"),
            ));
        };

        let inclusion = self
            .send_payment(&draft)
            .await
            .map_err(|err| self.report_failure(Operation::SubmitPayment, err))?;

        {
            let mut guard = self.inner.lock().await;
            guard.draft = DraftEntry::default();
        }
        self.emit(SessionEvent::DraftChanged(DraftEntry::default()));
        self.emit(SessionEvent::PaymentConfirmed(inclusion));
        Ok(inclusion)
    }

    async fn send_payment(&self, draft: &DraftEntry) -> SessionResult<Inclusion> {
        let contract = self.wallet.bind_contract(&self.deployment)?;
        let (name, message) = draft.resolved();

        info!("session: buying coffee name={name:?}");
        let tx_hash = contract
            .buy_coffee(&name, &message, self.deployment.tip_value)
            .await?;
        self.emit(SessionEvent::PaymentSubmitted(tx_hash));
        info!("session: payment accepted tx={tx_hash}; waiting for inclusion");

        let inclusion = contract.wait_for_inclusion(tx_hash).await?;
        info!(
            block = ?inclusion.block_number,
            "session: coffee purchased tx={tx_hash}"
        );
        Ok(inclusion)
    }

    /// Replaces the memo log with the contract's full history. Memos notified
    /// while the fetch was running survive the replace when the fetched
    /// history does not include them yet.
    pub async fn refresh_memo_log(&self) -> SessionResult<usize> {
        let mark = self.inner.lock().await.begin_refresh();
        let fetched = self.fetch_memos().await;

        let mut guard = self.inner.lock().await;
        let result = fetched.map(|memos| {
            let fetched_count = memos.len();
            let memos = guard.replace_history(memos, mark);
            (fetched_count, memos)
        });
        guard.end_refresh();
        drop(guard);

        let (fetched_count, memos) =
            result.map_err(|err| self.report_failure(Operation::RefreshMemos, err))?;
        info!(
            count = fetched_count,
            kept = memos.len() - fetched_count,
            "session: fetched memo history"
        );
        let count = memos.len();
        self.emit(SessionEvent::MemoLogReplaced(memos));
        Ok(count)
    }

    async fn fetch_memos(&self) -> SessionResult<Vec<Memo>> {
        let contract = self.wallet.bind_contract(&self.deployment)?;
        contract.get_memos().await
    }

    /// Sends every collected tip to the contract owner. Authorization is the
    /// contract's job; unauthorized callers surface as `Rejected`.
    pub async fn withdraw_all(&self) -> SessionResult<Inclusion> {
        let inclusion = self
            .send_withdrawal()
            .await
            .map_err(|err| self.report_failure(Operation::Withdraw, err))?;
        self.emit(SessionEvent::WithdrawalConfirmed(inclusion));
        Ok(inclusion)
    }

    async fn send_withdrawal(&self) -> SessionResult<Inclusion> {
        let contract = self.wallet.bind_contract(&self.deployment)?;
        info!("session: withdrawing tips to contract owner");
        let tx_hash = contract.withdraw_tips().await?;
        let inclusion = contract.wait_for_inclusion(tx_hash).await?;
        info!("session: tips withdrawn tx={tx_hash}");
        Ok(inclusion)
    }

    /// Appends one memo built from a pushed notification. No deduplication.
    pub async fn apply_notification(&self, notification: MemoNotification) -> Memo {
        let memo = Memo::from(notification);
        self.inner.lock().await.push_notified(memo.clone());
        self.emit(SessionEvent::MemoAppended(memo.clone()));
        memo
    }

    async fn append_if_live(&self, live: &AtomicBool, notification: MemoNotification) -> bool {
        let memo = Memo::from(notification);
        {
            let mut guard = self.inner.lock().await;
            if !live.load(Ordering::Acquire) {
                return false;
            }
            guard.push_notified(memo.clone());
        }
        self.emit(SessionEvent::MemoAppended(memo));
        true
    }

    /// Registers for `NewMemo` notifications. The returned handle must be
    /// closed when the view goes away.
    pub async fn watch_memos(self: &Arc<Self>) -> SessionResult<MemoSubscription> {
        let contract = self
            .wallet
            .bind_contract(&self.deployment)
            .map_err(|err| self.report_failure(Operation::Subscribe, err))?;
        let mut notifications = contract
            .subscribe_new_memos()
            .await
            .map_err(|err| self.report_failure(Operation::Subscribe, err))?;

        let live = Arc::new(AtomicBool::new(true));
        let task_live = Arc::clone(&live);
        let controller = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some(notification) = notifications.recv().await {
                info!(
                    sender = %notification.sender,
                    timestamp = notification.timestamp_seconds,
                    "session: memo received"
                );
                if !controller.append_if_live(&task_live, notification).await {
                    return;
                }
            }
            debug!("session: memo stream closed by contract");
        });

        info!("session: listening for new memos");
        Ok(MemoSubscription {
            controller: Arc::clone(self),
            live,
            task: Some(task),
        })
    }

    /// Page-load sequence: probe, history fetch and subscription run
    /// concurrently and do not wait on each other's outcome.
    pub async fn start(self: &Arc<Self>) -> MemoSubscription {
        let (probe, refresh, subscription) = futures::join!(
            self.probe_connection(),
            self.refresh_memo_log(),
            self.watch_memos()
        );

        if let Err(err) = probe {
            debug!(kind = ?err.kind(), "session: startup probe left session disconnected");
        }
        if let Err(err) = refresh {
            debug!(kind = ?err.kind(), "session: startup history fetch skipped");
        }

        subscription.unwrap_or_else(|_| MemoSubscription::inactive(Arc::clone(self)))
    }
}

/// Scoped registration against the memo notification stream.
pub struct MemoSubscription {
    controller: Arc<SessionController>,
    live: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl MemoSubscription {
    fn inactive(controller: Arc<SessionController>) -> Self {
        Self {
            controller,
            live: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.live.load(Ordering::Acquire)
            && self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stops the listener. Once this returns no further memo is appended,
    /// including one whose delivery raced the close.
    pub async fn close(mut self) {
        {
            let _guard = self.controller.inner.lock().await;
            self.live.store(false, Ordering::Release);
        }
        if let Some(task) = self.task.take() {
            task.abort();
            info!("session: memo subscription closed");
        }
    }
}

impl Drop for MemoSubscription {
    fn drop(&mut self) {
        self.live.store(false, Ordering::Release);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
