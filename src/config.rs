use crate::services::BackoffPolicy;
use anyhow::{bail, Context, Result};
use ethers::types::Address;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Testnet,
    Production,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,

    // Chain
    pub rpc_url: String,
    pub rpc_fallback_url: Option<String>,
    pub contract_address: Address,
    pub start_block: Option<u64>,
    pub max_block_range: u64,

    // Credential store
    pub store_backend: StoreBackend,
    pub store_credentials_path: Option<PathBuf>,
    pub collection_name: String,

    // Timing
    pub poll_interval: Duration,
    pub retry_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_strategy: String,
    pub rpc_timeout: Duration,
    pub store_timeout: Duration,
}

/// Service credential for the credential store, read from a local JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreCredentials {
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub db: Option<i64>,
}

impl StoreCredentials {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read store credentials at {}", path.display()))?;
        let credentials: StoreCredentials = serde_json::from_str(&raw)
            .with_context(|| format!("Malformed store credentials in {}", path.display()))?;

        if !credentials.url.starts_with("redis://") && !credentials.url.starts_with("rediss://") {
            bail!("Store credential url must be a redis:// or rediss:// URL");
        }

        Ok(credentials)
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let config = Self {
            environment: Self::parse_environment(&var_or("ENVIRONMENT", "development"))?,

            rpc_url: lookup("RPC_URL").context("RPC_URL required")?,
            rpc_fallback_url: lookup("RPC_FALLBACK_URL"),
            contract_address: Self::parse_address(
                "CONTRACT_ADDRESS",
                &lookup("CONTRACT_ADDRESS").context("CONTRACT_ADDRESS required")?,
            )?,
            start_block: lookup("START_BLOCK")
                .map(|v| v.parse::<u64>().context("Invalid START_BLOCK"))
                .transpose()?,
            max_block_range: var_or("MAX_BLOCK_RANGE", "2000")
                .parse()
                .context("Invalid MAX_BLOCK_RANGE")?,

            store_backend: match var_or("STORE_BACKEND", "redis").to_lowercase().as_str() {
                "redis" => StoreBackend::Redis,
                "memory" => StoreBackend::Memory,
                other => bail!("Unknown STORE_BACKEND: {}", other),
            },
            store_credentials_path: lookup("STORE_CREDENTIALS_PATH").map(PathBuf::from),
            collection_name: var_or("COLLECTION_NAME", "collection api"),

            poll_interval: Self::parse_secs(&var_or("POLL_INTERVAL_SECS", "10"), "POLL_INTERVAL_SECS")?,
            retry_backoff: Self::parse_secs(&var_or("RETRY_BACKOFF_SECS", "5"), "RETRY_BACKOFF_SECS")?,
            max_backoff: Self::parse_secs(&var_or("MAX_BACKOFF_SECS", "60"), "MAX_BACKOFF_SECS")?,
            backoff_strategy: var_or("BACKOFF_STRATEGY", "exponential").to_lowercase(),
            rpc_timeout: Self::parse_secs(&var_or("RPC_TIMEOUT_SECS", "10"), "RPC_TIMEOUT_SECS")?,
            store_timeout: Self::parse_secs(&var_or("STORE_TIMEOUT_SECS", "10"), "STORE_TIMEOUT_SECS")?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        match self.backoff_strategy.as_str() {
            "fixed" => BackoffPolicy::Fixed(self.retry_backoff),
            _ => BackoffPolicy::Exponential {
                initial: self.retry_backoff,
                max: self.max_backoff,
            },
        }
    }

    pub fn load_store_credentials(&self) -> Result<StoreCredentials> {
        let path = self
            .store_credentials_path
            .as_deref()
            .context("STORE_CREDENTIALS_PATH required for the redis store backend")?;
        StoreCredentials::load(path)
    }

    fn parse_environment(env: &str) -> Result<Environment> {
        match env.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "testnet" | "test" => Ok(Environment::Testnet),
            "production" | "prod" => Ok(Environment::Production),
            _ => bail!("Unknown environment: {}", env),
        }
    }

    fn parse_address(var: &str, value: &str) -> Result<Address> {
        Address::from_str(value).with_context(|| format!("Invalid address for {}", var))
    }

    fn parse_secs(value: &str, var: &str) -> Result<Duration> {
        let secs: u64 = value.parse().with_context(|| format!("Invalid {}", var))?;
        Ok(Duration::from_secs(secs))
    }

    fn validate(&self) -> Result<()> {
        if !self.rpc_url.starts_with("http") {
            bail!("RPC_URL must be HTTP(S) URL");
        }
        if let Some(fallback) = &self.rpc_fallback_url {
            if !fallback.starts_with("http") {
                bail!("RPC_FALLBACK_URL must be HTTP(S) URL");
            }
        }
        if self.contract_address.is_zero() {
            bail!("CONTRACT_ADDRESS must not be the zero address");
        }

        if self.poll_interval.is_zero() {
            bail!("POLL_INTERVAL_SECS must be greater than zero");
        }
        if self.retry_backoff.is_zero() || self.retry_backoff >= self.poll_interval {
            bail!("RETRY_BACKOFF_SECS must be non-zero and shorter than POLL_INTERVAL_SECS");
        }
        if self.max_backoff < self.retry_backoff {
            bail!("MAX_BACKOFF_SECS must be at least RETRY_BACKOFF_SECS");
        }
        if !matches!(self.backoff_strategy.as_str(), "fixed" | "exponential") {
            bail!("Unknown BACKOFF_STRATEGY: {}", self.backoff_strategy);
        }
        if self.rpc_timeout.is_zero() || self.store_timeout.is_zero() {
            bail!("RPC_TIMEOUT_SECS and STORE_TIMEOUT_SECS must be greater than zero");
        }
        if self.max_block_range == 0 {
            bail!("MAX_BLOCK_RANGE must be greater than zero");
        }

        match self.store_backend {
            StoreBackend::Redis if self.store_credentials_path.is_none() => {
                bail!("STORE_CREDENTIALS_PATH required for the redis store backend");
            }
            StoreBackend::Memory if self.environment == Environment::Production => {
                bail!("The memory store backend is not allowed in production");
            }
            _ => {}
        }

        tracing::info!(
            "Configuration validated for {:?} environment",
            self.environment
        );

        Ok(())
    }
}
