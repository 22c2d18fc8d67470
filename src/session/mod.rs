//! Shard session cache
//!
//! Lets a restarting shard resume its previous gateway session instead of
//! identifying from scratch. Every failure on this path degrades to "no
//! session", which costs a fresh identify but never stops the gateway.

mod store;

pub use store::{KvSessionStore, MemorySessionStore, SessionStore};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Resumable state of one shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardSession {
    pub shard_id: u64,
    pub session_id: String,
    pub sequence: u64,
    pub resume_url: String,
}

/// Typed view over a [`SessionStore`]
#[derive(Clone)]
pub struct SessionCache {
    store: Arc<dyn SessionStore>,
}

impl SessionCache {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Read the stored session for a shard.
    ///
    /// Store errors, undecodable blobs and blobs recorded for another shard
    /// all come back as `None`.
    pub async fn load(&self, shard_id: u64) -> Option<ShardSession> {
        let blob = match self.store.get(shard_id).await {
            Ok(Some(blob)) => blob,
            Ok(None) => {
                debug!(shard_id, "No stored session");
                return None;
            }
            Err(e) => {
                warn!(shard_id, error = %e, "Session read failed, identifying fresh");
                return None;
            }
        };

        match serde_json::from_slice::<ShardSession>(&blob) {
            Ok(session) if session.shard_id == shard_id => Some(session),
            Ok(session) => {
                warn!(
                    shard_id,
                    stored_shard_id = session.shard_id,
                    "Stored session belongs to another shard, ignoring"
                );
                None
            }
            Err(e) => {
                warn!(shard_id, error = %e, "Stored session is malformed, ignoring");
                None
            }
        }
    }

    /// Persist a session snapshot. Returns whether the write succeeded.
    pub async fn persist(&self, session: &ShardSession) -> bool {
        let blob = match serde_json::to_vec(session) {
            Ok(blob) => Bytes::from(blob),
            Err(e) => {
                warn!(shard_id = session.shard_id, error = %e, "Failed to encode session");
                return false;
            }
        };

        match self.store.put(session.shard_id, blob).await {
            Ok(()) => {
                debug!(
                    shard_id = session.shard_id,
                    sequence = session.sequence,
                    "Session persisted"
                );
                true
            }
            Err(e) => {
                warn!(shard_id = session.shard_id, error = %e, "Session write failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DispatchError;
    use async_trait::async_trait;

    struct UnavailableStore;

    #[async_trait]
    impl SessionStore for UnavailableStore {
        async fn get(&self, shard_id: u64) -> Result<Option<Bytes>, DispatchError> {
            Err(DispatchError::SessionStore {
                operation: "get",
                shard_id,
                source: "connection refused".into(),
            })
        }

        async fn put(&self, shard_id: u64, _blob: Bytes) -> Result<(), DispatchError> {
            Err(DispatchError::SessionStore {
                operation: "put",
                shard_id,
                source: "connection refused".into(),
            })
        }
    }

    fn session(shard_id: u64, sequence: u64) -> ShardSession {
        ShardSession {
            shard_id,
            session_id: format!("session-{shard_id}"),
            sequence,
            resume_url: "wss://gateway-us-east1-b.discord.gg".to_string(),
        }
    }

    #[tokio::test]
    async fn persisted_session_round_trips() {
        let cache = SessionCache::new(Arc::new(MemorySessionStore::new()));
        let stored = session(3, 42);

        assert!(cache.persist(&stored).await);
        assert_eq!(cache.load(3).await, Some(stored));
    }

    #[tokio::test]
    async fn writes_for_one_shard_leave_others_untouched() {
        let cache = SessionCache::new(Arc::new(MemorySessionStore::new()));
        let first = session(1, 10);
        cache.persist(&first).await;

        cache.persist(&session(2, 99)).await;
        cache.persist(&session(2, 100)).await;

        assert_eq!(cache.load(1).await, Some(first));
        assert_eq!(cache.load(2).await.map(|s| s.sequence), Some(100));
    }

    #[tokio::test]
    async fn unavailable_store_degrades_to_no_session() {
        let cache = SessionCache::new(Arc::new(UnavailableStore));

        assert_eq!(cache.load(0).await, None);
        assert!(!cache.persist(&session(0, 1)).await);
    }

    #[tokio::test]
    async fn malformed_or_foreign_blobs_are_ignored() {
        let store = Arc::new(MemorySessionStore::new());
        store.put(0, Bytes::from_static(b"not json")).await.unwrap();
        let foreign = serde_json::to_vec(&session(9, 1)).unwrap();
        store.put(1, Bytes::from(foreign)).await.unwrap();

        let cache = SessionCache::new(store);
        assert_eq!(cache.load(0).await, None);
        assert_eq!(cache.load(1).await, None);
    }

    #[test]
    fn session_wire_format_is_camel_case() {
        let json = serde_json::to_value(session(2, 7)).unwrap();
        assert_eq!(json["shardId"], 2);
        assert_eq!(json["sessionId"], "session-2");
        assert_eq!(json["sequence"], 7);
        assert!(json["resumeUrl"].is_string());
    }
}
