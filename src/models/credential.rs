use chrono::{DateTime, Utc};
use ethers::types::U256;
use rand::{rngs::OsRng, RngCore};

/// Bytes of entropy in a freshly issued API key.
pub const API_KEY_BYTES: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub address: String,
    pub api_key: String,
    pub expiry_date: U256,
}

impl CredentialRecord {
    /// Expiry as a wall-clock time, when it fits a Unix timestamp.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        unix_time(self.expiry_date)
    }
}

/// Wall-clock reading of an on-chain timestamp, when it fits.
pub fn unix_time(secs: U256) -> Option<DateTime<Utc>> {
    if secs > U256::from(i64::MAX as u64) {
        return None;
    }
    DateTime::<Utc>::from_timestamp(secs.as_u64() as i64, 0)
}

/// Hex-encoded key drawn from the OS random source.
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; API_KEY_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
