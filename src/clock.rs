//! Wall-clock abstraction
//!
//! Cooldowns and component timeouts compare against unix-millisecond
//! timestamps, the same unit Discord snowflakes encode. The router reads the
//! time through [`Clock`] so tests can drive it explicitly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Discord epoch (2015-01-01T00:00:00Z) in unix milliseconds
pub const DISCORD_EPOCH_MS: u64 = 1_420_070_400_000;

/// Source of the current time in unix milliseconds
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// System wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }
}

/// Manually advanced clock for deterministic tests and replays
#[derive(Debug, Default, Clone)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_millis: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_millis)),
        }
    }

    pub fn set_millis(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn set_secs(&self, secs: u64) {
        self.set_millis(secs * 1000);
    }

    pub fn advance_secs(&self, secs: u64) {
        self.now.fetch_add(secs * 1000, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Creation time of a Discord snowflake in unix milliseconds
pub fn snowflake_millis(id: u64) -> u64 {
    (id >> 22) + DISCORD_EPOCH_MS
}
