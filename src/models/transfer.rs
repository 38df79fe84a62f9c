use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

/// A log entry as delivered by `eth_subscription` notifications
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: Option<String>,
    pub transaction_hash: Option<String>,
    pub log_index: Option<String>,
    #[serde(default)]
    pub removed: bool,
}

/// Named fields of a decoded `Transfer(address,address,uint256)` event plus its ambient fields
#[derive(Debug, Clone, PartialEq)]
pub struct TransferEvent {
    pub from: String,
    pub to: String,
    pub value: U256,
    pub transaction_hash: String,
    pub block_number: u64,
    pub log_index: Option<u64>,
}

/// A transfer ready to be appended; `id` and `timestamp` are assigned by the sink
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewTransfer {
    pub tx_hash: String,
    pub from_address: String,
    pub to_address: String,
    pub value: String, // Decimal string, full uint256 range
    pub block_number: u64,
    pub log_index: Option<u64>,
    pub token_address: String,
}

impl NewTransfer {
    /// Copy the event verbatim; only the amount is stringified
    pub fn from_event(event: TransferEvent, token_address: &str) -> Self {
        Self {
            tx_hash: event.transaction_hash,
            from_address: event.from,
            to_address: event.to,
            value: event.value.to_string(),
            block_number: event.block_number,
            log_index: event.log_index,
            token_address: token_address.to_string(),
        }
    }
}

/// A row of the `transfers` table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferRecord {
    pub id: i64,
    pub tx_hash: String,
    pub from_address: String,
    pub to_address: String,
    pub value: String,
    pub block_number: u64,
    pub log_index: Option<u64>,
    pub token_address: String,
    pub timestamp: String,
}
