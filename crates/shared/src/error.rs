use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No wallet provider is available.
    ProviderAbsent,
    /// The user declined a prompt, or the remote call reverted or returned an error object.
    Rejected,
    /// Network, transport or decode failure.
    Transient,
    /// The operation is not valid in the current session state.
    InvalidState,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct SessionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl SessionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn provider_absent() -> Self {
        Self::new(ErrorKind::ProviderAbsent, "no wallet provider detected")
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Rejected, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<alloy_sol_types::Error> for SessionError {
    fn from(value: alloy_sol_types::Error) -> Self {
        Self::transient(format!("abi decode failed: {value}"))
    }
}
