//! ABI of the deployed tip-jar contract and conversions into domain types.

use alloy_primitives::{address, Address, Log};
use alloy_sol_types::{sol, SolEvent};

use crate::{
    domain::{Memo, MemoNotification},
    error::SessionError,
};

pub const DEFAULT_CONTRACT_ADDRESS: Address = address!("0x37c564cf66128C01f2fD05B2ce3611Fca4ee89D1");

sol! {
    #[sol(rpc)]
    #[derive(Debug, PartialEq, Eq)]
    contract BuyMeACoffee {
        struct Memo {
            address from;
            uint256 timestamp;
            string name;
            string message;
        }

        event NewMemo(address indexed from, uint256 timestamp, string name, string message);

        function buyCoffee(string _name, string _message) external payable;
        function withdrawTips() external;
        function getMemos() external view returns (Memo[] memory);
    }
}

impl From<BuyMeACoffee::Memo> for Memo {
    fn from(value: BuyMeACoffee::Memo) -> Self {
        MemoNotification {
            sender: value.from,
            timestamp_seconds: value.timestamp.saturating_to::<u64>(),
            name: value.name,
            message: value.message,
        }
        .into()
    }
}

impl From<BuyMeACoffee::NewMemo> for MemoNotification {
    fn from(value: BuyMeACoffee::NewMemo) -> Self {
        Self {
            sender: value.from,
            timestamp_seconds: value.timestamp.saturating_to::<u64>(),
            name: value.name,
            message: value.message,
        }
    }
}

/// Decodes one `NewMemo` log returned by a filter poll or a log query.
pub fn decode_new_memo(log: &Log) -> Result<MemoNotification, SessionError> {
    let event = BuyMeACoffee::NewMemo::decode_log(log)?;
    Ok(event.data.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{LogData, B256, U256};

    #[test]
    fn decodes_new_memo_log_into_notification() {
        let sender = address!("0x00000000000000000000000000000000000000ab");
        let event = BuyMeACoffee::NewMemo {
            from: sender,
            timestamp: U256::from(1_700_000_000u64),
            name: "Al".into(),
            message: "Hi".into(),
        };
        let log = Log {
            address: DEFAULT_CONTRACT_ADDRESS,
            data: event.encode_log_data(),
        };

        let notification = decode_new_memo(&log).expect("decode");
        assert_eq!(
            notification,
            MemoNotification {
                sender,
                timestamp_seconds: 1_700_000_000,
                name: "Al".into(),
                message: "Hi".into(),
            }
        );
    }

    #[test]
    fn rejects_log_with_foreign_topic() {
        let log = Log {
            address: DEFAULT_CONTRACT_ADDRESS,
            data: LogData::new_unchecked(vec![B256::ZERO], Default::default()),
        };
        let err = decode_new_memo(&log).expect_err("foreign topic");
        assert_eq!(err.kind(), crate::error::ErrorKind::Transient);
    }
}
