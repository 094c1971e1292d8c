use crate::contracts::PaymentReceivedFilter;
use crate::error::{RelayError, RelayResult};
use crate::models::{LogPosition, PaymentEvent};
use ethers::{
    abi::RawLog,
    contract::EthEvent,
    types::{Log, H256},
};

/// Topic count of `PaymentReceived`: signature plus the indexed payer.
const PAYMENT_TOPICS: usize = 2;
/// Two non-indexed uint256 words: amount and new expiration.
const PAYMENT_DATA_LEN: usize = 64;

/// Turns raw contract logs into `PaymentEvent`s. Pure, no I/O.
#[derive(Debug, Clone)]
pub struct EventDecoder {
    signature: H256,
}

impl Default for EventDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDecoder {
    pub fn new() -> Self {
        Self {
            signature: PaymentReceivedFilter::signature(),
        }
    }

    pub fn signature(&self) -> H256 {
        self.signature
    }

    pub fn decode(&self, log: &Log) -> RelayResult<PaymentEvent> {
        let position = Self::position(log)?;

        match log.topics.first() {
            Some(topic) if *topic == self.signature => {}
            Some(topic) => {
                return Err(RelayError::Decode(format!(
                    "log {} has foreign event signature {:?}",
                    position, topic
                )))
            }
            None => {
                return Err(RelayError::Decode(format!(
                    "log {} has no topics",
                    position
                )))
            }
        }

        if log.topics.len() != PAYMENT_TOPICS {
            return Err(RelayError::Decode(format!(
                "log {} has {} topics, expected {}",
                position,
                log.topics.len(),
                PAYMENT_TOPICS
            )));
        }
        if log.data.len() != PAYMENT_DATA_LEN {
            return Err(RelayError::Decode(format!(
                "log {} carries {} data bytes, expected {}",
                position,
                log.data.len(),
                PAYMENT_DATA_LEN
            )));
        }

        let raw = RawLog {
            topics: log.topics.clone(),
            data: log.data.to_vec(),
        };
        let decoded = <PaymentReceivedFilter as EthEvent>::decode_log(&raw)
            .map_err(|e| RelayError::Decode(format!("log {}: {}", position, e)))?;

        Ok(PaymentEvent {
            payer: decoded.user,
            amount: decoded.amount,
            new_expiration: decoded.new_expiration_date,
            position,
        })
    }

    fn position(log: &Log) -> RelayResult<LogPosition> {
        let block_number = log
            .block_number
            .ok_or_else(|| RelayError::Decode("log without block number (pending?)".to_string()))?;
        let log_index = log
            .log_index
            .ok_or_else(|| RelayError::Decode("log without log index".to_string()))?;

        let log_index = u64::try_from(log_index).map_err(|_| {
            RelayError::Decode(format!(
                "log in block {} has out-of-range log index {}",
                block_number, log_index
            ))
        })?;

        Ok(LogPosition {
            block_number: block_number.as_u64(),
            log_index,
        })
    }
}
