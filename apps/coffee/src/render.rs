//! Text rendering of session state and events.

use client_core::{Operation, SessionEvent, SessionSnapshot};
use shared::{
    domain::{ConnectionState, Memo},
    error::{ErrorKind, SessionError},
};

pub fn memo_line(memo: &Memo) -> String {
    format!(
        "\"{}\"  From: {} at {} ({})",
        memo.message,
        memo.name,
        memo.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        memo.sender
    )
}

/// Memos are only shown to a connected session.
pub fn memo_list(snapshot: &SessionSnapshot) -> Vec<String> {
    if !snapshot.connection.is_connected() {
        return vec!["Connect your wallet to see the memos received.".to_string()];
    }
    if snapshot.memos.is_empty() {
        return vec!["No memos received yet.".to_string()];
    }

    let mut lines = vec![format!("Memos received ({}):", snapshot.memos.len())];
    lines.extend(snapshot.memos.iter().map(memo_line));
    lines
}

pub fn status_line(snapshot: &SessionSnapshot) -> String {
    let connection = match snapshot.connection {
        ConnectionState::Disconnected => "wallet not connected".to_string(),
        ConnectionState::Connected(address) => format!("connected as {address}"),
    };
    let pending = if snapshot.submission_in_flight {
        ", purchase pending"
    } else {
        ""
    };
    format!(
        "{connection}{pending}; draft name={:?} message={:?}",
        snapshot.draft.name, snapshot.draft.message
    )
}

pub fn failure_hint(error: &SessionError) -> &'static str {
    match error.kind() {
        ErrorKind::ProviderAbsent => "No wallet provider detected; set rpc_url and restart.",
        ErrorKind::Rejected => "The wallet or the contract refused the request.",
        ErrorKind::Transient => "Wallet node unreachable; check the network and retry.",
        ErrorKind::InvalidState => "Not possible right now.",
    }
}

/// Memo events stay silent while `connection` is disconnected, matching
/// `memo_list`.
pub fn event_line(event: &SessionEvent, connection: &ConnectionState) -> Option<String> {
    match event {
        SessionEvent::ConnectionChanged(ConnectionState::Connected(address)) => {
            Some(format!("Wallet connected: {address}"))
        }
        SessionEvent::ConnectionChanged(ConnectionState::Disconnected) => None,
        SessionEvent::DraftChanged(_) => None,
        SessionEvent::MemoLogReplaced(_) | SessionEvent::MemoAppended(_)
            if !connection.is_connected() =>
        {
            None
        }
        SessionEvent::MemoLogReplaced(memos) => {
            Some(format!("Fetched {} memo(s) from the contract.", memos.len()))
        }
        SessionEvent::MemoAppended(memo) => Some(format!("New memo: {}", memo_line(memo))),
        SessionEvent::PaymentSubmitted(tx_hash) => {
            Some(format!("Buying coffee... waiting for tx {tx_hash} to be mined."))
        }
        SessionEvent::PaymentConfirmed(_) => Some("Coffee purchased!".to_string()),
        SessionEvent::WithdrawalConfirmed(_) => Some("Tips sent to the owner.".to_string()),
        SessionEvent::OperationFailed { operation, error } => Some(format!(
            "{} failed: {} ({})",
            operation_label(*operation),
            failure_hint(error),
            error.message
        )),
    }
}

fn operation_label(operation: Operation) -> &'static str {
    match operation {
        Operation::Probe => "Wallet check",
        Operation::Connect => "Connect",
        Operation::SubmitPayment => "Buy coffee",
        Operation::RefreshMemos => "Fetching memos",
        Operation::Withdraw => "Withdraw",
        Operation::Subscribe => "Memo listener",
    }
}
