pub mod transfer;
pub mod balance;

pub use transfer::{NewTransfer, RawLog, TransferEvent, TransferRecord};
pub use balance::{AddressBalance, BalanceAccumulator, CalculationError};
