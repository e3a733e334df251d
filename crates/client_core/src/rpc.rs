//! Wallet and contract adapters backed by an alloy JSON-RPC provider.

use std::{sync::Arc, time::Duration};

use alloy_network::ReceiptResponse;
use alloy_primitives::{Address, U256};
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_rpc_client::RpcClient;
use alloy_rpc_types_eth::{Filter, Log};
use alloy_transport::{utils::guess_local_url, TransportError};
use alloy_transport_http::Http;
use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use reqwest::Client;
use shared::{
    contract::{decode_new_memo, BuyMeACoffee, BuyMeACoffee::BuyMeACoffeeInstance},
    domain::{ContractDeployment, Inclusion, Memo, MemoNotification, TxHash},
    error::{ErrorKind, SessionError},
    protocol::{error_code_kind, WalletMethod},
};
use tokio::{sync::mpsc, time::sleep};
use tracing::{debug, info, warn};
use url::Url;

use crate::{CoffeeContract, SessionResult, WalletProvider};

const MEMO_CHANNEL_CAPACITY: usize = 256;

type LogStream = BoxStream<'static, Vec<Log>>;

/// Error objects keep the code-based classification; anything that never
/// reached the node, or came back unreadable, is transient.
fn transport_error(method: &str, err: TransportError) -> SessionError {
    match err.as_error_resp() {
        Some(payload) => SessionError::new(
            error_code_kind(payload.code),
            format!("{method} failed (code {}): {}", payload.code, payload.message),
        ),
        None => SessionError::transient(format!("{method} request failed: {err}")),
    }
}

fn contract_error(function: &str, err: alloy_contract::Error) -> SessionError {
    match err {
        alloy_contract::Error::TransportError(err) => transport_error(function, err),
        other => SessionError::transient(format!("{function} failed: {other}")),
    }
}

/// Wallet reached through a node that manages its own accounts.
pub struct RpcWallet {
    provider: DynProvider,
}

impl RpcWallet {
    pub fn new(endpoint: Url) -> Self {
        Self::with_http_client(Client::new(), endpoint)
    }

    pub fn with_http_client(http: Client, endpoint: Url) -> Self {
        let is_local = guess_local_url(endpoint.as_str());
        let client = RpcClient::new(Http::with_client(http, endpoint), is_local);
        // The node signs and fills `eth_sendTransaction` itself.
        let provider = ProviderBuilder::new()
            .disable_recommended_fillers()
            .connect_client(client)
            .erased();
        Self::from_provider(provider)
    }

    pub fn from_provider(provider: DynProvider) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl WalletProvider for RpcWallet {
    async fn accounts(&self, method: WalletMethod) -> SessionResult<Vec<Address>> {
        self.provider
            .raw_request::<_, Vec<Address>>(method.as_str().into(), ())
            .await
            .map_err(|err| transport_error(method.as_str(), err))
    }

    fn bind_contract(
        &self,
        deployment: &ContractDeployment,
    ) -> SessionResult<Arc<dyn CoffeeContract>> {
        Ok(Arc::new(RpcCoffeeContract::new(
            self.provider.clone(),
            deployment.clone(),
        )))
    }
}

pub struct RpcCoffeeContract {
    contract: BuyMeACoffeeInstance<DynProvider>,
    deployment: ContractDeployment,
}

impl RpcCoffeeContract {
    pub fn new(provider: DynProvider, deployment: ContractDeployment) -> Self {
        Self {
            contract: BuyMeACoffee::new(deployment.address, provider),
            deployment,
        }
    }

    async fn signer(&self) -> SessionResult<Address> {
        let accounts = self
            .contract
            .provider()
            .get_accounts()
            .await
            .map_err(|err| transport_error(WalletMethod::ListAccounts.as_str(), err))?;
        accounts
            .first()
            .copied()
            .ok_or_else(|| SessionError::rejected("no authorized account to sign with"))
    }
}

#[async_trait]
impl CoffeeContract for RpcCoffeeContract {
    async fn buy_coffee(&self, name: &str, message: &str, value: U256) -> SessionResult<TxHash> {
        let from = self.signer().await?;
        let pending = self
            .contract
            .buyCoffee(name.to_string(), message.to_string())
            .from(from)
            .value(value)
            .send()
            .await
            .map_err(|err| contract_error("buyCoffee", err))?;
        Ok(*pending.tx_hash())
    }

    /// Polls for the receipt until the node reports it. Transient failures
    /// are retried since the transaction is already in the node's hands.
    async fn wait_for_inclusion(&self, tx_hash: TxHash) -> SessionResult<Inclusion> {
        let provider = self.contract.provider();
        loop {
            match provider.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) if ReceiptResponse::status(&receipt) => {
                    return Ok(Inclusion {
                        tx_hash,
                        block_number: receipt.block_number,
                    });
                }
                Ok(Some(_)) => {
                    return Err(SessionError::rejected(format!(
                        "transaction {tx_hash} reverted"
                    )));
                }
                Ok(None) => debug!("rpc: tx={tx_hash} not mined yet"),
                Err(err) => {
                    let err = transport_error("eth_getTransactionReceipt", err);
                    if err.kind() != ErrorKind::Transient {
                        return Err(err);
                    }
                    warn!("rpc: receipt poll for tx={tx_hash} failed, retrying: {}", err.message);
                }
            }
            sleep(self.deployment.poll_interval).await;
        }
    }

    async fn get_memos(&self) -> SessionResult<Vec<Memo>> {
        let memos = self
            .contract
            .getMemos()
            .call()
            .await
            .map_err(|err| contract_error("getMemos", err))?;
        Ok(memos.into_iter().map(Memo::from).collect())
    }

    async fn withdraw_tips(&self) -> SessionResult<TxHash> {
        let from = self.signer().await?;
        let pending = self
            .contract
            .withdrawTips()
            .from(from)
            .send()
            .await
            .map_err(|err| contract_error("withdrawTips", err))?;
        Ok(*pending.tx_hash())
    }

    async fn subscribe_new_memos(&self) -> SessionResult<mpsc::Receiver<MemoNotification>> {
        let provider = self.contract.provider().clone();
        let filter = self.contract.NewMemo_filter().filter;
        let poll_interval = self.deployment.poll_interval;

        let head = provider
            .get_block_number()
            .await
            .map_err(|err| transport_error("eth_blockNumber", err))?;
        let logs = watch_memo_logs(&provider, &filter, poll_interval).await?;
        info!(
            "rpc: watching NewMemo logs contract={} after block {head}",
            self.deployment.address
        );

        let (sender, receiver) = mpsc::channel(MEMO_CHANNEL_CAPACITY);
        tokio::spawn(follow_new_memos(
            provider,
            filter,
            logs,
            LogPosition::end_of_block(head),
            sender,
            poll_interval,
        ));
        Ok(receiver)
    }
}

/// Position of a log on chain, used to drop logs that were already forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct LogPosition {
    block: u64,
    index: u64,
}

impl LogPosition {
    fn end_of_block(block: u64) -> Self {
        Self {
            block,
            index: u64::MAX,
        }
    }

    fn of(log: &Log) -> Option<Self> {
        Some(Self {
            block: log.block_number?,
            index: log.log_index?,
        })
    }
}

async fn watch_memo_logs(
    provider: &DynProvider,
    filter: &Filter,
    poll_interval: Duration,
) -> SessionResult<LogStream> {
    let poller = provider
        .watch_logs(filter)
        .await
        .map_err(|err| transport_error("eth_newFilter", err))?;
    Ok(poller
        .with_poll_interval(poll_interval)
        .with_channel_size(MEMO_CHANNEL_CAPACITY)
        .into_stream()
        .boxed())
}

/// Installs a fresh filter, then backfills everything mined since `cursor`
/// so the gap left by a lost filter is covered.
async fn resume_memo_logs(
    provider: &DynProvider,
    filter: &Filter,
    cursor: LogPosition,
    poll_interval: Duration,
) -> SessionResult<(LogStream, Vec<Log>)> {
    let logs = watch_memo_logs(provider, filter, poll_interval).await?;
    let backlog = provider
        .get_logs(&filter.clone().from_block(cursor.block))
        .await
        .map_err(|err| transport_error("eth_getLogs", err))?;
    Ok((logs, backlog))
}

/// Forwards decoded logs past `cursor`. Returns false once the receiver is gone.
async fn forward_logs(
    logs: Vec<Log>,
    cursor: &mut LogPosition,
    sender: &mpsc::Sender<MemoNotification>,
) -> bool {
    for log in logs.into_iter().filter(|log| !log.removed) {
        if let Some(position) = LogPosition::of(&log) {
            if position <= *cursor {
                debug!(block = position.block, index = position.index, "rpc: skipping seen log");
                continue;
            }
            *cursor = position;
        }
        match decode_new_memo(&log.inner) {
            Ok(notification) => {
                if sender.send(notification).await.is_err() {
                    return false;
                }
            }
            Err(err) => warn!("rpc: skipping undecodable NewMemo log: {}", err.message),
        }
    }
    true
}

/// Follows the log filter until the receiver is dropped. A filter the node
/// forgot ends the poller stream; it is then reinstalled from the last
/// forwarded position.
async fn follow_new_memos(
    provider: DynProvider,
    filter: Filter,
    mut logs: LogStream,
    mut cursor: LogPosition,
    sender: mpsc::Sender<MemoNotification>,
    poll_interval: Duration,
) {
    loop {
        let batch = tokio::select! {
            _ = sender.closed() => {
                debug!("rpc: memo receiver dropped; stopping log watch");
                return;
            }
            batch = logs.next() => batch,
        };

        if let Some(batch) = batch {
            if !forward_logs(batch, &mut cursor, &sender).await {
                return;
            }
            continue;
        }

        warn!("rpc: NewMemo log watch ended; reinstalling from block {}", cursor.block);
        loop {
            match resume_memo_logs(&provider, &filter, cursor, poll_interval).await {
                Ok((resumed, backlog)) => {
                    logs = resumed;
                    if !forward_logs(backlog, &mut cursor, &sender).await {
                        return;
                    }
                    break;
                }
                Err(err) => {
                    warn!("rpc: could not reinstall memo watch: {}", err.message);
                    tokio::select! {
                        _ = sender.closed() => return,
                        _ = sleep(poll_interval) => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/rpc_tests.rs"]
mod tests;
