//! Session store backends
//!
//! Stores hold one opaque blob per shard and return it byte-for-byte. They
//! never look inside the blob; typing happens one layer up in
//! [`SessionCache`](super::SessionCache).

use crate::error::DispatchError;
use async_nats::jetstream::{self, kv};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tracing::info;

/// Durable key/value store with one record per shard.
///
/// Writes for different shards never interact; writes for the same shard
/// are last-write-wins.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, shard_id: u64) -> Result<Option<Bytes>, DispatchError>;

    async fn put(&self, shard_id: u64, blob: Bytes) -> Result<(), DispatchError>;
}

/// In-process store used in local mode and tests
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: DashMap<u64, Bytes>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, shard_id: u64) -> Result<Option<Bytes>, DispatchError> {
        Ok(self.sessions.get(&shard_id).map(|blob| blob.clone()))
    }

    async fn put(&self, shard_id: u64, blob: Bytes) -> Result<(), DispatchError> {
        self.sessions.insert(shard_id, blob);
        Ok(())
    }
}

/// JetStream key/value bucket store
///
/// The bucket keeps a single revision per key, so a put replaces any stale
/// session for that shard instead of merging with it.
pub struct KvSessionStore {
    store: kv::Store,
}

impl KvSessionStore {
    /// Open the bucket, creating it on first use
    pub async fn open(js: &jetstream::Context, bucket: &str) -> Result<Self, DispatchError> {
        let store = match js.get_key_value(bucket).await {
            Ok(store) => store,
            Err(_) => {
                info!(bucket, "Creating session bucket");
                js.create_key_value(kv::Config {
                    bucket: bucket.to_string(),
                    description: "Resumable gateway shard sessions".to_string(),
                    history: 1,
                    ..Default::default()
                })
                .await
                .map_err(|e| DispatchError::SubscribeFailed {
                    target: bucket.to_string(),
                    source: Box::new(e),
                })?
            }
        };

        Ok(Self { store })
    }

    fn key(shard_id: u64) -> String {
        format!("shard-{shard_id}")
    }
}

#[async_trait]
impl SessionStore for KvSessionStore {
    async fn get(&self, shard_id: u64) -> Result<Option<Bytes>, DispatchError> {
        self.store
            .get(Self::key(shard_id))
            .await
            .map_err(|e| DispatchError::SessionStore {
                operation: "get",
                shard_id,
                source: Box::new(e),
            })
    }

    async fn put(&self, shard_id: u64, blob: Bytes) -> Result<(), DispatchError> {
        self.store
            .put(Self::key(shard_id), blob)
            .await
            .map(|_revision| ())
            .map_err(|e| DispatchError::SessionStore {
                operation: "put",
                shard_id,
                source: Box::new(e),
            })
    }
}
