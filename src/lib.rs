//! Gateway-to-handler dispatch bridge
//!
//! Two processes share this library:
//! - `ani-gateway` owns the sharded Discord gateway connection, caches
//!   resumable shard sessions and publishes every dispatch to NATS JetStream
//! - `ani-handler` consumes those dispatches under a shared consumer group and
//!   routes interactions to registered handlers under cooldown, toggle and
//!   timeout rules
//!
//! Either side can restart, deploy or scale without the other noticing
//! beyond a delay.

pub mod api;
pub mod broker;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod health;
pub mod interaction;
pub mod metrics;
pub mod registry;
pub mod router;
pub mod session;
pub mod shard;
pub mod telemetry;

pub use error::{DispatchError, HandlerError, ValidationError};
