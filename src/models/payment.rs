use crate::models::unix_time;
use chrono::{DateTime, Utc};
use ethers::types::{Address, U256};
use std::fmt;

/// Position of a log in the chain: block number, then index within the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogPosition {
    pub block_number: u64,
    pub log_index: u64,
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block_number, self.log_index)
    }
}

/// A decoded `PaymentReceived` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentEvent {
    pub payer: Address,
    pub amount: U256,
    pub new_expiration: U256,
    pub position: LogPosition,
}

impl PaymentEvent {
    /// Lower-case `0x` hex form of the payer, used as the credential key.
    pub fn payer_key(&self) -> String {
        address_key(&self.payer)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        unix_time(self.new_expiration)
    }
}

pub fn address_key(address: &Address) -> String {
    format!("{:#x}", address)
}
