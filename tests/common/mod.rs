#![allow(dead_code)]

use access_relay::contracts::PaymentReceivedFilter;
use access_relay::error::{RelayError, RelayResult};
use access_relay::models::CredentialRecord;
use access_relay::services::{ChainLogSource, CredentialStore, MemoryCredentialStore, UpsertOutcome};
use async_trait::async_trait;
use ethers::abi::{encode, Token};
use ethers::contract::EthEvent;
use ethers::types::{Address, Bytes, Log, H256, U256};
use ethers::utils::keccak256;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

pub const CONTRACT: &str = "0xcbD7cDEBC30E2673925304199b4c7545dafA425E";

pub fn contract() -> Address {
    Address::from_str(CONTRACT).unwrap()
}

pub fn address(hex: &str) -> Address {
    Address::from_str(hex).unwrap()
}

pub fn payment_log(payer: Address, block: u64, index: u64, amount: u64, expiration: u64) -> Log {
    Log {
        address: contract(),
        topics: vec![PaymentReceivedFilter::signature(), H256::from(payer)],
        data: Bytes::from(encode(&[
            Token::Uint(U256::from(amount)),
            Token::Uint(U256::from(expiration)),
        ])),
        block_number: Some(block.into()),
        log_index: Some(index.into()),
        ..Default::default()
    }
}

/// A `PriceUpdated(uint256)` log from the same contract.
pub fn price_updated_log(block: u64, index: u64, price: u64) -> Log {
    Log {
        address: contract(),
        topics: vec![H256::from(keccak256("PriceUpdated(uint256)"))],
        data: Bytes::from(encode(&[Token::Uint(U256::from(price))])),
        block_number: Some(block.into()),
        log_index: Some(index.into()),
        ..Default::default()
    }
}

/// Chain source driven by the test: settable head, canned logs, injectable failures.
#[derive(Default)]
pub struct ScriptedChain {
    head: AtomicU64,
    head_failures: AtomicU32,
    log_failures: AtomicU32,
    logs: Mutex<Vec<Log>>,
    log_requests: Mutex<Vec<(u64, u64)>>,
}

impl ScriptedChain {
    pub fn new(head: u64) -> Self {
        let chain = Self::default();
        chain.set_head(head);
        chain
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    /// Logs are served in insertion order, so tests control the node's ordering.
    pub fn push_log(&self, log: Log) {
        self.logs.lock().unwrap().push(log);
    }

    pub fn fail_next_heads(&self, n: u32) {
        self.head_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_log_fetches(&self, n: u32) {
        self.log_failures.store(n, Ordering::SeqCst);
    }

    pub fn log_requests(&self) -> Vec<(u64, u64)> {
        self.log_requests.lock().unwrap().clone()
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ChainLogSource for ScriptedChain {
    async fn current_head(&self) -> RelayResult<u64> {
        if Self::take_failure(&self.head_failures) {
            return Err(RelayError::Connectivity("connection refused".into()));
        }
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn get_logs(&self, address: Address, from_block: u64, to_block: u64) -> RelayResult<Vec<Log>> {
        assert!(from_block <= to_block, "inverted range {from_block}..={to_block}");
        self.log_requests.lock().unwrap().push((from_block, to_block));

        if Self::take_failure(&self.log_failures) {
            return Err(RelayError::RpcTimeout { operation: "eth_getLogs", secs: 10 });
        }

        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| log.address == address)
            .filter(|log| {
                let block = log.block_number.map(|n| n.as_u64()).unwrap_or(0);
                (from_block..=to_block).contains(&block)
            })
            .cloned()
            .collect())
    }
}

/// In-memory store whose listed upsert calls (1-based) fail.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryCredentialStore,
    calls: AtomicU64,
    failing_calls: Mutex<Vec<u64>>,
}

impl FlakyStore {
    pub fn failing_on(calls: &[u64]) -> Self {
        Self {
            failing_calls: Mutex::new(calls.to_vec()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialStore for FlakyStore {
    async fn find_by_address(&self, address: &str) -> RelayResult<Option<CredentialRecord>> {
        self.inner.find_by_address(address).await
    }

    async fn upsert(&self, address: &str, api_key: &str, expiry_date: U256) -> RelayResult<UpsertOutcome> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing_calls.lock().unwrap().contains(&call) {
            return Err(RelayError::Store("deadline exceeded".into()));
        }
        self.inner.upsert(address, api_key, expiry_date).await
    }
}
