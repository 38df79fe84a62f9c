use alloy_primitives::{hex, Address, B256, U256};
use std::str::FromStr;

use crate::blockchain::provider::TRANSFER_EVENT_SIGNATURE;
use crate::error::{ConfigError, DecodeError};
use crate::models::{RawLog, TransferEvent};

/// Turns raw subscription logs into transfer events
pub trait LogDecoder: Send + Sync {
    /// Contract whose logs this decoder accepts
    fn token_address(&self) -> String;

    fn decode(&self, log: &RawLog) -> Result<TransferEvent, DecodeError>;
}

/// Decodes `Transfer(address indexed from, address indexed to, uint256 value)` logs
/// emitted by one token contract.
///
/// No plausibility checks are applied to the decoded fields: zero-address
/// mints and burns, zero values and self-transfers pass through unchanged.
pub struct TransferDecoder {
    token_address: Address,
}

impl TransferDecoder {
    pub fn new(token_address: &str) -> Result<Self, ConfigError> {
        let parsed = Address::from_str(token_address.trim()).map_err(|_| ConfigError::InvalidValue {
            key: "watcher.token_address".to_string(),
            value: token_address.to_string(),
        })?;

        Ok(Self {
            token_address: parsed,
        })
    }

    /// Check if a log is a Transfer emitted by the watched token
    pub fn is_transfer_log(&self, log: &RawLog) -> bool {
        let from_token = Address::from_str(log.address.trim())
            .map(|address| address == self.token_address)
            .unwrap_or(false);

        from_token
            && log
                .topics
                .first()
                .map(|topic| topic.trim().eq_ignore_ascii_case(TRANSFER_EVENT_SIGNATURE))
                .unwrap_or(false)
    }

    fn decode_transfer(&self, log: &RawLog) -> Result<TransferEvent, DecodeError> {
        if !self.is_transfer_log(log) {
            return Err(DecodeError::UnexpectedLog(format!(
                "address={} topic0={}",
                log.address,
                log.topics.first().map(String::as_str).unwrap_or("<none>")
            )));
        }

        // ERC-20 Transfer has 3 topics: [signature, from, to]
        if log.topics.len() != 3 {
            return Err(DecodeError::TopicCount {
                expected: 3,
                got: log.topics.len(),
            });
        }

        let from = address_from_topic(&log.topics[1])?;
        let to = address_from_topic(&log.topics[2])?;
        let value = value_from_data(&log.data)?;

        let transaction_hash = log
            .transaction_hash
            .clone()
            .ok_or(DecodeError::MissingField("transactionHash"))?;
        let block_number = log
            .block_number
            .as_deref()
            .ok_or(DecodeError::MissingField("blockNumber"))
            .and_then(|value| parse_quantity("blockNumber", value))?;
        let log_index = log
            .log_index
            .as_deref()
            .map(|value| parse_quantity("logIndex", value))
            .transpose()?;

        Ok(TransferEvent {
            from,
            to,
            value,
            transaction_hash,
            block_number,
            log_index,
        })
    }
}

impl LogDecoder for TransferDecoder {
    /// Checksummed form of the watched token address
    fn token_address(&self) -> String {
        self.token_address.to_checksum(None)
    }

    fn decode(&self, log: &RawLog) -> Result<TransferEvent, DecodeError> {
        self.decode_transfer(log)
    }
}

/// Parse a JSON-RPC hex quantity such as `0x3e8`
pub fn parse_quantity(field: &'static str, value: &str) -> Result<u64, DecodeError> {
    let trimmed = value.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    u64::from_str_radix(digits, 16).map_err(|_| DecodeError::InvalidQuantity {
        field,
        value: value.to_string(),
    })
}

/// Indexed address topics are left-padded 32-byte words; the address is the low 20 bytes
fn address_from_topic(topic: &str) -> Result<String, DecodeError> {
    let word = B256::from_str(topic.trim()).map_err(|_| DecodeError::InvalidTopic(topic.to_string()))?;
    Ok(Address::from_word(word).to_checksum(None))
}

/// The non-indexed `value` is the first 32-byte word of the data field
fn value_from_data(data: &str) -> Result<U256, DecodeError> {
    let bytes = hex::decode(data.trim()).map_err(|e| DecodeError::InvalidData(e.to_string()))?;

    if bytes.len() < 32 {
        return Err(DecodeError::InvalidData(format!(
            "expected at least 32 bytes, got {}",
            bytes.len()
        )));
    }

    Ok(U256::from_be_slice(&bytes[..32]))
}
