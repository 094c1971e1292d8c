use crate::config::StoreCredentials;
use crate::error::{RelayError, RelayResult};
use crate::models::CredentialRecord;
use async_trait::async_trait;
use ethers::types::U256;
use redis::{aio::ConnectionManager, AsyncCommands, IntoConnectionInfo, RedisResult};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Off-chain access records, one per payer address.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_address(&self, address: &str) -> RelayResult<Option<CredentialRecord>>;

    /// Replaces key and expiry of the record for `address`, creating it if absent.
    async fn upsert(
        &self,
        address: &str,
        api_key: &str,
        expiry_date: U256,
    ) -> RelayResult<UpsertOutcome>;
}

/// Redis-backed collection of credential documents.
///
/// Each document is a hash at `<collection>:doc:<id>` with the fields
/// `address`, `api_key` and `expiry_date`; `<collection>:address:<address>`
/// points at the document id so lookups by address stay a single read.
pub struct RedisCredentialStore {
    conn: ConnectionManager,
    collection: String,
    timeout: Duration,
}

impl RedisCredentialStore {
    pub async fn connect(
        credentials: &StoreCredentials,
        collection: &str,
        timeout: Duration,
    ) -> RelayResult<Self> {
        let mut info = credentials
            .url
            .as_str()
            .into_connection_info()
            .map_err(|e| RelayError::ConfigError(format!("Invalid store URL: {}", e)))?;
        if let Some(username) = &credentials.username {
            info.redis.username = Some(username.clone());
        }
        if let Some(password) = &credentials.password {
            info.redis.password = Some(password.clone());
        }
        if let Some(db) = credentials.db {
            info.redis.db = db;
        }

        let client = redis::Client::open(info)
            .map_err(|e| RelayError::ConfigError(format!("Invalid store credentials: {}", e)))?;

        let conn = match tokio::time::timeout(timeout, client.get_connection_manager()).await {
            Ok(conn) => conn?,
            Err(_) => {
                return Err(RelayError::StoreTimeout {
                    operation: "connect",
                    secs: timeout.as_secs(),
                })
            }
        };

        tracing::info!(collection, "Credential store connected");

        Ok(Self {
            conn,
            collection: collection.to_string(),
            timeout,
        })
    }

    fn document_key(&self, id: &str) -> String {
        format!("{}:doc:{}", self.collection, id)
    }

    fn index_key(&self, address: &str) -> String {
        format!("{}:address:{}", self.collection, address)
    }

    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> RelayResult<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(RelayError::from),
            Err(_) => Err(RelayError::StoreTimeout {
                operation,
                secs: self.timeout.as_secs(),
            }),
        }
    }

    async fn find_document(&self, address: &str) -> RelayResult<Option<(String, CredentialRecord)>> {
        let mut conn = self.conn.clone();

        let id: Option<String> = self
            .bounded("index lookup", conn.get::<_, Option<String>>(self.index_key(address)))
            .await?;
        let Some(id) = id else {
            return Ok(None);
        };

        let fields: HashMap<String, String> = self
            .bounded("document read", conn.hgetall::<_, HashMap<String, String>>(self.document_key(&id)))
            .await?;
        if fields.is_empty() {
            tracing::warn!(address, document = %id, "Address index points at a missing document");
            return Ok(None);
        }

        let record = Self::parse_document(address, &fields)?;
        Ok(Some((id, record)))
    }

    fn parse_document(address: &str, fields: &HashMap<String, String>) -> RelayResult<CredentialRecord> {
        let field = |name: &str| {
            fields
                .get(name)
                .cloned()
                .ok_or_else(|| RelayError::Store(format!("document for {} lacks {}", address, name)))
        };

        let expiry_date = U256::from_dec_str(&field("expiry_date")?)
            .map_err(|e| RelayError::Store(format!("bad expiry_date for {}: {}", address, e)))?;

        Ok(CredentialRecord {
            address: field("address")?,
            api_key: field("api_key")?,
            expiry_date,
        })
    }
}

#[async_trait]
impl CredentialStore for RedisCredentialStore {
    async fn find_by_address(&self, address: &str) -> RelayResult<Option<CredentialRecord>> {
        Ok(self.find_document(address).await?.map(|(_, record)| record))
    }

    async fn upsert(
        &self,
        address: &str,
        api_key: &str,
        expiry_date: U256,
    ) -> RelayResult<UpsertOutcome> {
        let mut conn = self.conn.clone();
        let expiry = expiry_date.to_string();

        match self.find_document(address).await? {
            Some((id, _)) => {
                let fields = [("api_key", api_key), ("expiry_date", expiry.as_str())];
                self.bounded(
                    "document update",
                    conn.hset_multiple::<_, _, _, ()>(self.document_key(&id), &fields[..]),
                )
                .await?;
                Ok(UpsertOutcome::Updated)
            }
            None => {
                let id = Uuid::new_v4().to_string();
                let fields = [
                    ("address", address),
                    ("api_key", api_key),
                    ("expiry_date", expiry.as_str()),
                ];
                let mut pipe = redis::pipe();
                pipe.atomic()
                    .hset_multiple(self.document_key(&id), &fields[..])
                    .ignore()
                    .set(self.index_key(address), &id)
                    .ignore();
                self.bounded("document insert", pipe.query_async::<_, ()>(&mut conn))
                    .await?;
                Ok(UpsertOutcome::Inserted)
            }
        }
    }
}

/// Process-local store for dry runs and tests. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryCredentialStore {
    records: RwLock<HashMap<String, CredentialRecord>>,
    writes: AtomicU64,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Number of upserts applied since creation.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_by_address(&self, address: &str) -> RelayResult<Option<CredentialRecord>> {
        Ok(self.records.read().await.get(address).cloned())
    }

    async fn upsert(
        &self,
        address: &str,
        api_key: &str,
        expiry_date: U256,
    ) -> RelayResult<UpsertOutcome> {
        let mut records = self.records.write().await;
        self.writes.fetch_add(1, Ordering::SeqCst);

        match records.get_mut(address) {
            Some(record) => {
                record.api_key = api_key.to_string();
                record.expiry_date = expiry_date;
                Ok(UpsertOutcome::Updated)
            }
            None => {
                records.insert(
                    address.to_string(),
                    CredentialRecord {
                        address: address.to_string(),
                        api_key: api_key.to_string(),
                        expiry_date,
                    },
                );
                Ok(UpsertOutcome::Inserted)
            }
        }
    }
}
