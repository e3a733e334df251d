//! Wallet methods and JSON-RPC error classification shared by the adapters.

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// EIP-1193 account methods used by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletMethod {
    #[serde(rename = "eth_accounts")]
    ListAccounts,
    #[serde(rename = "eth_requestAccounts")]
    RequestAccounts,
}

impl WalletMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ListAccounts => "eth_accounts",
            Self::RequestAccounts => "eth_requestAccounts",
        }
    }
}

/// Provider-side disconnects and internal/limit errors are worth retrying;
/// everything else (user rejection, revert, unauthorized, lost filter) is
/// final for the request that produced it.
pub fn error_code_kind(code: i64) -> ErrorKind {
    match code {
        4900 | 4901 | -32603 | -32005 => ErrorKind::Transient,
        _ => ErrorKind::Rejected,
    }
}
