//! Per-(entry, actor) cooldown records
//!
//! Records live outside the registry so entries stay immutable. Expired
//! records are evicted when they are next looked up; there is no sweeper.

use dashmap::DashMap;

type CooldownKey = (String, u64);

/// Last-write-wins map of cooldown expiry times in unix milliseconds
#[derive(Debug, Default)]
pub struct CooldownStore {
    records: DashMap<CooldownKey, u64>,
}

impl CooldownStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Milliseconds left on the cooldown of `(entry_id, actor_id)` at `now`.
    ///
    /// Returns `None` when there is no record or it has passed, evicting the
    /// stale record in the latter case.
    pub fn remaining(&self, entry_id: &str, actor_id: u64, now: u64) -> Option<u64> {
        let key = (entry_id.to_string(), actor_id);
        if self.records.remove_if(&key, |_, expires_at| *expires_at <= now).is_some() {
            return None;
        }
        self.records
            .get(&key)
            .map(|expires_at| expires_at.value().saturating_sub(now))
    }

    /// Start or refresh a cooldown expiring at `expires_at`
    pub fn record(&self, entry_id: &str, actor_id: u64, expires_at: u64) {
        self.records.insert((entry_id.to_string(), actor_id), expires_at);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
