pub mod backoff;
pub mod chain;
pub mod credentials;
pub mod decoder;
pub mod poller;
pub mod watermark;

pub use backoff::{retry_transient, BackoffPolicy};
pub use chain::{ChainLogSource, EthereumLogSource};
pub use credentials::{CredentialStore, MemoryCredentialStore, RedisCredentialStore, UpsertOutcome};
pub use decoder::EventDecoder;
pub use poller::{CycleReport, PaymentPoller, PollerSettings, PollerStats};
pub use watermark::WatermarkTracker;
