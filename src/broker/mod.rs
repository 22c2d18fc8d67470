//! Broker bridge over NATS JetStream
//!
//! The gateway process publishes [`DispatchEnvelope`]s on two channels and
//! the handler process consumes them through a durable consumer shared by
//! every handler instance.
//!
//! ```text
//! shard pool ─▶ DispatchPublisher ─▶ GATEWAY stream ─▶ DispatchSubscriber ─▶ EventBus
//!                                  gateway.dispatch
//!                                  gateway.deploy
//! ```

pub mod envelope;
pub mod memory;
pub mod publisher;
pub mod subscriber;

pub use envelope::{DispatchBody, DispatchEnvelope};
pub use memory::{AckLog, MemoryBroker, MemoryInbox};
pub use publisher::{DispatchPublisher, NatsTransport, Transport};
pub use subscriber::{jetstream_deliveries, Acker, Delivery, DeliveryOutcome, DispatchSubscriber};

use crate::error::DispatchError;
use async_nats::jetstream::stream::{Config, RetentionPolicy, StorageType, Stream};
use async_nats::jetstream::Context as JsContext;
use std::fmt;
use std::time::Duration;
use tracing::info;

/// JetStream stream carrying both channels
pub const STREAM: &str = "GATEWAY";

/// Header used for broker-side de-duplication of redelivered publishes
pub const MESSAGE_ID_HEADER: &str = "Nats-Msg-Id";

/// Interaction tokens expire after 15 minutes; older dispatches are useless
const STREAM_MAX_AGE: Duration = Duration::from_secs(15 * 60);

/// Named pub/sub channels between the gateway and handler processes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Inbound gateway dispatch events
    Dispatch,
    /// Out-of-band control: redeploy command definitions
    Deploy,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Dispatch, Channel::Deploy];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Dispatch => "dispatch",
            Self::Deploy => "deploy",
        }
    }

    /// JetStream subject for this channel
    pub fn subject(&self) -> &'static str {
        match self {
            Self::Dispatch => "gateway.dispatch",
            Self::Deploy => "gateway.deploy",
        }
    }

    pub fn from_subject(subject: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.subject() == subject)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ensure the GATEWAY stream exists with the expected configuration
///
/// File storage keeps dispatches buffered while no handler is running.
pub async fn ensure_stream(js: &JsContext) -> Result<Stream, DispatchError> {
    let config = Config {
        name: STREAM.to_string(),
        subjects: Channel::ALL
            .iter()
            .map(|c| c.subject().to_string())
            .collect(),
        retention: RetentionPolicy::Limits,
        max_age: STREAM_MAX_AGE,
        storage: StorageType::File,
        ..Default::default()
    };

    let stream = js
        .get_or_create_stream(config)
        .await
        .map_err(|e| DispatchError::SubscribeFailed {
            target: STREAM.to_string(),
            source: Box::new(e),
        })?;

    info!(stream = STREAM, "GATEWAY stream configured");
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subjects_map_back_to_channels() {
        for channel in Channel::ALL {
            assert_eq!(Channel::from_subject(channel.subject()), Some(channel));
        }
        assert_eq!(Channel::from_subject("commands.interaction"), None);
    }

    #[test]
    fn channel_names_are_fixed() {
        assert_eq!(Channel::Dispatch.to_string(), "dispatch");
        assert_eq!(Channel::Deploy.to_string(), "deploy");
    }
}
