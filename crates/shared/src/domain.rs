use alloy_primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MEMO_NAME: &str = "Default name";
pub const DEFAULT_MEMO_MESSAGE: &str = "Default message";

/// 0.001 ether in wei.
pub const COFFEE_PRICE_WEI: u64 = 1_000_000_000_000_000;

pub type TxHash = B256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "address", rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected(Address),
}

impl ConnectionState {
    pub fn address(&self) -> Option<Address> {
        match self {
            Self::Disconnected => None,
            Self::Connected(address) => Some(*address),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftEntry {
    pub name: String,
    pub message: String,
}

impl DraftEntry {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Returns the `(name, message)` pair that goes on chain, with empty
    /// fields replaced by the fixed defaults.
    pub fn resolved(&self) -> (String, String) {
        let name = if self.name.is_empty() {
            DEFAULT_MEMO_NAME.to_string()
        } else {
            self.name.clone()
        };
        let message = if self.message.is_empty() {
            DEFAULT_MEMO_MESSAGE.to_string()
        } else {
            self.message.clone()
        };
        (name, message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memo {
    pub sender: Address,
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub message: String,
}

/// Payload of a single `NewMemo` event as pushed by the contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoNotification {
    pub sender: Address,
    pub timestamp_seconds: u64,
    pub name: String,
    pub message: String,
}

impl From<MemoNotification> for Memo {
    fn from(value: MemoNotification) -> Self {
        Self {
            sender: value.sender,
            timestamp: timestamp_from_seconds(value.timestamp_seconds),
            name: value.name,
            message: value.message,
        }
    }
}

/// Converts on-chain UNIX seconds into an instant. Values past chrono's range
/// clamp to `DateTime::<Utc>::MAX_UTC`.
pub fn timestamp_from_seconds(seconds: u64) -> DateTime<Utc> {
    i64::try_from(seconds)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Fixed connection parameters for the deployed tip-jar contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractDeployment {
    pub address: Address,
    pub tip_value: U256,
    pub poll_interval: std::time::Duration,
}

impl ContractDeployment {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            tip_value: U256::from(COFFEE_PRICE_WEI),
            poll_interval: std::time::Duration::from_secs(4),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: std::time::Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inclusion {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
}
