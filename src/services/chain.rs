use crate::contracts::AccessPayment;
use crate::error::{RelayError, RelayResult};
use async_trait::async_trait;
use ethers::{
    prelude::*,
    providers::{Http, Provider},
    types::{Address, Filter, Log},
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Read side of the chain: head height and contract logs.
#[async_trait]
pub trait ChainLogSource: Send + Sync {
    async fn current_head(&self) -> RelayResult<u64>;

    async fn get_logs(&self, address: Address, from_block: u64, to_block: u64)
        -> RelayResult<Vec<Log>>;
}

pub struct EthereumLogSource {
    primary: Arc<Provider<Http>>,
    fallback: Option<Arc<Provider<Http>>>,
    timeout: Duration,
}

impl EthereumLogSource {
    pub fn new(rpc_url: &str, fallback_url: Option<&str>, timeout: Duration) -> RelayResult<Self> {
        let primary = Arc::new(Self::provider(rpc_url)?);

        let fallback = if let Some(url) = fallback_url {
            Some(Arc::new(Self::provider(url)?))
        } else {
            None
        };

        Ok(Self {
            primary,
            fallback,
            timeout,
        })
    }

    fn provider(url: &str) -> RelayResult<Provider<Http>> {
        Provider::<Http>::try_from(url)
            .map_err(|e| RelayError::ConfigError(format!("Invalid RPC URL {}: {}", url, e)))
    }

    /// Fails with a configuration error when no contract is deployed at `address`.
    pub async fn verify_contract(&self, address: Address) -> RelayResult<()> {
        let code = self
            .with_fallback("eth_getCode", |provider| async move {
                provider.get_code(address, None).await.map_err(RelayError::from)
            })
            .await?;

        if code.as_ref().is_empty() {
            return Err(RelayError::ConfigError(format!(
                "No contract deployed at {:#x}",
                address
            )));
        }

        tracing::info!(contract = %format!("{:#x}", address), "Payment contract found");
        Ok(())
    }

    /// Current access price, read from the contract's `price()` view.
    pub async fn contract_price(&self, address: Address) -> RelayResult<U256> {
        self.with_fallback("price", |provider| async move {
            AccessPayment::new(address, provider)
                .price()
                .call()
                .await
                .map_err(|e| RelayError::Connectivity(e.to_string()))
        })
        .await
    }

    /// Runs `call` on the primary endpoint, then once on the fallback if the
    /// primary failed. Each attempt is bounded by the RPC timeout.
    async fn with_fallback<T, F, Fut>(&self, operation: &'static str, call: F) -> RelayResult<T>
    where
        F: Fn(Arc<Provider<Http>>) -> Fut,
        Fut: Future<Output = RelayResult<T>>,
    {
        let primary = self.bounded(operation, call(self.primary.clone())).await;

        match (primary, &self.fallback) {
            (Ok(value), _) => Ok(value),
            (Err(e), Some(fallback)) => {
                tracing::warn!(error = %e, operation, "Primary RPC failed, trying fallback");
                self.bounded(operation, call(fallback.clone())).await
            }
            (Err(e), None) => Err(e),
        }
    }

    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> RelayResult<T>
    where
        F: Future<Output = RelayResult<T>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::RpcTimeout {
                operation,
                secs: self.timeout.as_secs(),
            }),
        }
    }
}

#[async_trait]
impl ChainLogSource for EthereumLogSource {
    async fn current_head(&self) -> RelayResult<u64> {
        self.with_fallback("eth_blockNumber", |provider| async move {
            provider.get_block_number().await.map_err(RelayError::from)
        })
        .await
        .map(|n| n.as_u64())
    }

    async fn get_logs(
        &self,
        address: Address,
        from_block: u64,
        to_block: u64,
    ) -> RelayResult<Vec<Log>> {
        if from_block > to_block {
            return Err(RelayError::InvalidRange {
                from: from_block,
                to: to_block,
            });
        }

        let filter = Filter::new()
            .address(address)
            .from_block(from_block)
            .to_block(to_block);

        self.with_fallback("eth_getLogs", |provider| {
            let filter = filter.clone();
            async move { provider.get_logs(&filter).await.map_err(RelayError::from) }
        })
        .await
    }
}
