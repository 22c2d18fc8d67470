//! Shard management module
//!
//! One pool per gateway process; each pool owns `SHARDS_PER_POOL` shards.

mod pool;
mod state;

pub use pool::{shard_range, ShardPool, SHARDS_PER_POOL};
pub use state::{ShardHealth, ShardSnapshot, ShardState};
