//! Component instance state
//!
//! A component instance is one custom id on one posted message. Its
//! creation time is the message's snowflake timestamp, so a timeout can be
//! checked at interaction time without having seen the message being sent.
//!
//! Only spent single-use instances are stored. A timed record is dropped once
//! its timeout has passed, since the timeout alone rejects it from then on.
//! An untimed record is kept for [`SPENT_RETENTION_MS`] after its message was
//! posted; past that the instance is accepted again.

use crate::interaction::ComponentMessage;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// How long a spent component without a timeout stays spent (7 days)
pub const SPENT_RETENTION_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Records written between two full sweeps of stale records
const SWEEP_EVERY: u64 = 1024;

/// Identity of one component instance
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComponentKey {
    pub message_id: u64,
    pub custom_id: String,
}

/// Lifetime of one component instance, in unix milliseconds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentState {
    pub custom_id: String,
    pub created_at: u64,
    /// `None` means the component never expires on its own
    pub expires_at: Option<u64>,
    /// Single-use instance whose handler already succeeded
    pub spent: bool,
}

impl ComponentState {
    fn new(message: ComponentMessage, custom_id: &str, timeout_secs: Option<u64>) -> Self {
        Self {
            custom_id: custom_id.to_string(),
            created_at: message.created_at,
            expires_at: timeout_secs
                .map(|secs| message.created_at.saturating_add(secs.saturating_mul(1000))),
            spent: false,
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.spent || self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Whether dropping the stored record can no longer change a decision
    fn is_stale(&self, now: u64) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= now,
            None => self.created_at.saturating_add(SPENT_RETENTION_MS) <= now,
        }
    }
}

#[derive(Debug, Default)]
pub struct ComponentStore {
    spent: DashMap<ComponentKey, ComponentState>,
    writes: AtomicU64,
}

impl ComponentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// State of the instance at `now`.
    ///
    /// Expiry is recomputed from the message time; a stale spent record is
    /// removed on the way.
    pub fn state(
        &self,
        message: ComponentMessage,
        custom_id: &str,
        timeout_secs: Option<u64>,
        now: u64,
    ) -> ComponentState {
        let key = ComponentKey {
            message_id: message.id,
            custom_id: custom_id.to_string(),
        };
        let mut state = ComponentState::new(message, custom_id, timeout_secs);

        self.spent.remove_if(&key, |_, record| record.is_stale(now));
        if self.spent.contains_key(&key) {
            state.spent = true;
        }
        state
    }

    /// Mark a single-use instance as spent
    pub fn consume(
        &self,
        message: ComponentMessage,
        custom_id: &str,
        timeout_secs: Option<u64>,
        now: u64,
    ) {
        let mut state = ComponentState::new(message, custom_id, timeout_secs);
        if state.is_stale(now) {
            return;
        }
        state.spent = true;
        self.spent.insert(
            ComponentKey {
                message_id: message.id,
                custom_id: custom_id.to_string(),
            },
            state,
        );

        if self.writes.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.evict_stale(now);
        }
    }

    /// Drop every record that can no longer affect a decision at `now`
    pub fn evict_stale(&self, now: u64) {
        self.spent.retain(|_, record| !record.is_stale(now));
    }

    pub fn len(&self) -> usize {
        self.spent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spent.is_empty()
    }
}
