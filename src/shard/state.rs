//! Shard state tracking
//!
//! Shared, lock-free-per-shard view of the pool used by the event loops,
//! the health endpoints and the metrics gauges.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Health status for a shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardHealth {
    /// Identifying with a fresh session
    Connecting,
    /// Resuming a stored session
    Resuming,
    /// Ready and receiving events
    Ready,
    /// Connection dropped; the shard reconnects on its own
    Disconnected,
    /// Circuit breaker tripped or reconnect failed
    Dead,
}

impl ShardHealth {
    /// Returns true if the shard is healthy
    pub fn is_healthy(&self) -> bool {
        matches!(self, ShardHealth::Ready | ShardHealth::Resuming)
    }

    /// Returns true if the shard is ready to receive events
    pub fn is_ready(&self) -> bool {
        matches!(self, ShardHealth::Ready)
    }
}

#[derive(Debug)]
struct ShardEntry {
    health: ShardHealth,
    guilds: u64,
    session_id: Option<String>,
    events_received: AtomicU64,
    events_published: AtomicU64,
    publish_failures: AtomicU64,
    sessions_persisted: AtomicU64,
    last_heartbeat: Option<Instant>,
    connected_at: Option<Instant>,
}

impl Default for ShardEntry {
    fn default() -> Self {
        Self {
            health: ShardHealth::Connecting,
            guilds: 0,
            session_id: None,
            events_received: AtomicU64::new(0),
            events_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            sessions_persisted: AtomicU64::new(0),
            last_heartbeat: None,
            connected_at: None,
        }
    }
}

/// Per-shard view returned to the readiness endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardSnapshot {
    pub shard_id: u64,
    pub health: ShardHealth,
    pub guilds: u64,
    pub has_session: bool,
    pub events_received: u64,
    pub events_published: u64,
}

/// Shared state across all shards in a pool
#[derive(Debug, Clone)]
pub struct ShardState {
    inner: Arc<ShardStateInner>,
}

#[derive(Debug)]
struct ShardStateInner {
    pool_id: u64,
    shards: DashMap<u64, ShardEntry>,
    total_shards: u64,
}

impl ShardState {
    pub fn new(pool_id: u64, shard_ids: impl Iterator<Item = u64>, total_shards: u64) -> Self {
        let shards = DashMap::new();
        for shard_id in shard_ids {
            shards.insert(shard_id, ShardEntry::default());
        }

        Self {
            inner: Arc::new(ShardStateInner {
                pool_id,
                shards,
                total_shards,
            }),
        }
    }

    pub fn pool_id(&self) -> u64 {
        self.inner.pool_id
    }

    pub fn total_shards(&self) -> u64 {
        self.inner.total_shards
    }

    pub fn set_health(&self, shard_id: u64, health: ShardHealth) {
        if let Some(mut entry) = self.inner.shards.get_mut(&shard_id) {
            entry.health = health;
            if health == ShardHealth::Ready && entry.connected_at.is_none() {
                entry.connected_at = Some(Instant::now());
            }
        }
    }

    pub fn health(&self, shard_id: u64) -> Option<ShardHealth> {
        self.inner.shards.get(&shard_id).map(|e| e.health)
    }

    /// Remember the live session id of a shard
    pub fn set_session(&self, shard_id: u64, session_id: Option<String>) {
        if let Some(mut entry) = self.inner.shards.get_mut(&shard_id) {
            entry.session_id = session_id;
        }
    }

    pub fn session_id(&self, shard_id: u64) -> Option<String> {
        self.inner
            .shards
            .get(&shard_id)
            .and_then(|e| e.session_id.clone())
    }

    pub fn set_guilds(&self, shard_id: u64, count: u64) {
        if let Some(mut entry) = self.inner.shards.get_mut(&shard_id) {
            entry.guilds = count;
        }
    }

    pub fn record_event(&self, shard_id: u64) {
        if let Some(entry) = self.inner.shards.get(&shard_id) {
            entry.events_received.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record the result of handing one envelope to the publisher
    pub fn record_publish(&self, shard_id: u64, accepted: bool) {
        if let Some(entry) = self.inner.shards.get(&shard_id) {
            let counter = if accepted {
                &entry.events_published
            } else {
                &entry.publish_failures
            };
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_session_persisted(&self, shard_id: u64) {
        if let Some(entry) = self.inner.shards.get(&shard_id) {
            entry.sessions_persisted.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn sessions_persisted(&self, shard_id: u64) -> u64 {
        self.inner
            .shards
            .get(&shard_id)
            .map_or(0, |e| e.sessions_persisted.load(Ordering::Relaxed))
    }

    pub fn record_heartbeat(&self, shard_id: u64) {
        if let Some(mut entry) = self.inner.shards.get_mut(&shard_id) {
            entry.last_heartbeat = Some(Instant::now());
        }
    }

    /// Time since the last heartbeat ack, if any arrived
    pub fn heartbeat_age(&self, shard_id: u64) -> Option<std::time::Duration> {
        self.inner
            .shards
            .get(&shard_id)
            .and_then(|e| e.last_heartbeat)
            .map(|at| at.elapsed())
    }

    pub fn total_events_received(&self) -> u64 {
        self.inner
            .shards
            .iter()
            .map(|e| e.events_received.load(Ordering::Relaxed))
            .sum()
    }

    pub fn total_events_published(&self) -> u64 {
        self.inner
            .shards
            .iter()
            .map(|e| e.events_published.load(Ordering::Relaxed))
            .sum()
    }

    pub fn total_publish_failures(&self) -> u64 {
        self.inner
            .shards
            .iter()
            .map(|e| e.publish_failures.load(Ordering::Relaxed))
            .sum()
    }

    pub fn total_guilds(&self) -> u64 {
        self.inner.shards.iter().map(|e| e.guilds).sum()
    }

    pub fn ready_shards(&self) -> usize {
        self.inner
            .shards
            .iter()
            .filter(|e| e.health.is_ready())
            .count()
    }

    /// Shards that are ready or resuming
    pub fn healthy_shards(&self) -> usize {
        self.inner
            .shards
            .iter()
            .filter(|e| e.health.is_healthy())
            .count()
    }

    pub fn shard_count(&self) -> usize {
        self.inner.shards.len()
    }

    /// At least one shard ready
    pub fn is_ready(&self) -> bool {
        self.ready_shards() > 0
    }

    /// Per-shard snapshot ordered by shard id
    pub fn snapshot(&self) -> Vec<ShardSnapshot> {
        let mut shards: Vec<ShardSnapshot> = self
            .inner
            .shards
            .iter()
            .map(|e| ShardSnapshot {
                shard_id: *e.key(),
                health: e.health,
                guilds: e.guilds,
                has_session: e.session_id.is_some(),
                events_received: e.events_received.load(Ordering::Relaxed),
                events_published: e.events_published.load(Ordering::Relaxed),
            })
            .collect();
        shards.sort_by_key(|s| s.shard_id);
        shards
    }
}
