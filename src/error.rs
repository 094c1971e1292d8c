use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("RPC connectivity error: {0}")]
    Connectivity(String),

    #[error("RPC error: {0}")]
    RpcError(#[from] ethers::providers::ProviderError),

    #[error("RPC call {operation} timed out after {secs}s")]
    RpcTimeout { operation: &'static str, secs: u64 },

    #[error("Store call {operation} timed out after {secs}s")]
    StoreTimeout { operation: &'static str, secs: u64 },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid block range: {from}..={to}")]
    InvalidRange { from: u64, to: u64 },
}

impl RelayError {
    /// Stable label used as the `error_kind` field in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Connectivity(_)
            | RelayError::RpcError(_)
            | RelayError::RpcTimeout { .. } => "connectivity",
            RelayError::Decode(_) => "decode",
            RelayError::Store(_) | RelayError::RedisError(_) | RelayError::StoreTimeout { .. } => {
                "store"
            }
            RelayError::ConfigError(_) => "configuration",
            RelayError::InvalidRange { .. } => "invalid_range",
        }
    }

    /// Transient errors are absorbed by the poll loop's backoff cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), "connectivity" | "store")
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
