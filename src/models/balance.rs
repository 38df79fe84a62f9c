use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;

/// Balance summary for one address, derived from stored transfers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AddressBalance {
    pub address: String,
    pub balance: String, // Signed decimal string: total_in - total_out
    pub total_in: String,
    pub total_out: String,
    pub total_transactions: u64,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CalculationError {
    #[error("Invalid decimal amount: {0}")]
    InvalidAmount(String),
    #[error("Sum overflows uint256 for {0}")]
    Overflow(String),
}

/// Running in/out totals for one address
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BalanceAccumulator {
    pub total_in: U256,
    pub total_out: U256,
    pub total_transactions: u64,
}

impl BalanceAccumulator {
    pub fn add_inflow(&mut self, amount: &str) -> Result<(), CalculationError> {
        let value = parse_amount(amount)?;
        self.total_in = self
            .total_in
            .checked_add(value)
            .ok_or_else(|| CalculationError::Overflow("total_in".to_string()))?;
        Ok(())
    }

    pub fn add_outflow(&mut self, amount: &str) -> Result<(), CalculationError> {
        let value = parse_amount(amount)?;
        self.total_out = self
            .total_out
            .checked_add(value)
            .ok_or_else(|| CalculationError::Overflow("total_out".to_string()))?;
        Ok(())
    }

    /// Compare net balances without materializing signed values
    pub fn cmp_balance(&self, other: &Self) -> Ordering {
        let (self_neg, self_mag) = signed_difference(self.total_in, self.total_out);
        let (other_neg, other_mag) = signed_difference(other.total_in, other.total_out);
        match (self_neg, other_neg) {
            (false, true) => Ordering::Greater,
            (true, false) => Ordering::Less,
            (false, false) => self_mag.cmp(&other_mag),
            (true, true) => other_mag.cmp(&self_mag),
        }
    }

    pub fn into_balance(self, address: String) -> AddressBalance {
        AddressBalance {
            address,
            balance: format_signed_difference(self.total_in, self.total_out),
            total_in: self.total_in.to_string(),
            total_out: self.total_out.to_string(),
            total_transactions: self.total_transactions,
        }
    }
}

fn parse_amount(amount: &str) -> Result<U256, CalculationError> {
    U256::from_str(amount.trim()).map_err(|_| CalculationError::InvalidAmount(amount.to_string()))
}

fn signed_difference(a: U256, b: U256) -> (bool, U256) {
    if a >= b {
        (false, a - b)
    } else {
        (true, b - a)
    }
}

/// `a - b` as a decimal string, with a leading `-` when negative
pub fn format_signed_difference(a: U256, b: U256) -> String {
    match signed_difference(a, b) {
        (false, magnitude) => magnitude.to_string(),
        (true, magnitude) => format!("-{}", magnitude),
    }
}
