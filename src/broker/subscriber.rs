//! Dispatch subscriber
//!
//! Runs inside the handler process. Every delivery is decoded, emitted on
//! the local [`EventBus`] and only then acknowledged. Malformed envelopes are
//! acknowledged as well, since redelivering them can never succeed.
//!
//! Acks are best-effort: they are dispatched on a spawned task and the hot
//! path does not wait for the broker to confirm them. A lost ack means a
//! redelivery, which the recently-processed window and the router's
//! cooldown/toggle state absorb.

use super::{Channel, ensure_stream, MESSAGE_ID_HEADER};
use crate::error::DispatchError;
use crate::events::{decode, EventBus};
use crate::metrics::DispatchMetrics;
use async_nats::jetstream::consumer::{pull, AckPolicy};
use async_nats::jetstream::{self, Context as JsContext};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Number of recently processed message ids remembered for duplicate detection
pub const RECENT_WINDOW: usize = 1024;

/// How long the broker waits for an ack before redelivering
const ACK_WAIT: Duration = Duration::from_secs(30);

/// Acknowledgment handle for one delivery.
///
/// `ack` consumes the handle, so a delivery can be acknowledged at most once.
#[async_trait]
pub trait Acker: Send {
    async fn ack(self: Box<Self>) -> Result<(), DispatchError>;
}

/// A message received from the broker
pub struct Delivery {
    pub channel: Channel,
    pub message_id: String,
    pub payload: Bytes,
    acker: Box<dyn Acker>,
}

impl Delivery {
    pub fn new(
        channel: Channel,
        message_id: impl Into<String>,
        payload: Bytes,
        acker: Box<dyn Acker>,
    ) -> Self {
        Self {
            channel,
            message_id: message_id.into(),
            payload,
            acker,
        }
    }
}

/// What the subscriber did with a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Decoded and emitted to local listeners
    Emitted,
    /// Already processed recently; acknowledged without re-emitting
    Duplicate,
    /// Could not be decoded; acknowledged and dropped
    Malformed,
}

impl DeliveryOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Emitted => "emitted",
            Self::Duplicate => "duplicate",
            Self::Malformed => "malformed",
        }
    }
}

/// Bounded FIFO set of message ids
struct RecentIds {
    order: VecDeque<String>,
    ids: HashSet<String>,
    capacity: usize,
}

impl RecentIds {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    fn insert(&mut self, id: String) {
        if self.capacity == 0 || !self.ids.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }
}

/// Consumer of the `dispatch` and `deploy` channels
pub struct DispatchSubscriber {
    bus: Arc<EventBus>,
    metrics: DispatchMetrics,
    recent: RecentIds,
}

impl DispatchSubscriber {
    pub fn new(bus: Arc<EventBus>, metrics: DispatchMetrics) -> Self {
        Self {
            bus,
            metrics,
            recent: RecentIds::new(RECENT_WINDOW),
        }
    }

    /// Process deliveries until the source ends
    pub async fn run(mut self, mut deliveries: BoxStream<'static, Delivery>) {
        info!("Dispatch subscriber running");
        while let Some(delivery) = deliveries.next().await {
            self.handle(delivery).await;
        }
        info!("Dispatch subscriber stream ended");
    }

    /// Decode, emit and acknowledge one delivery
    pub async fn handle(&mut self, delivery: Delivery) -> DeliveryOutcome {
        let Delivery {
            channel,
            message_id,
            payload,
            acker,
        } = delivery;

        self.metrics.record_delivery(channel.name());

        let outcome = if self.recent.contains(&message_id) {
            debug!(%channel, %message_id, "Duplicate delivery, skipping emit");
            DeliveryOutcome::Duplicate
        } else {
            let outcome = match decode(channel, &payload) {
                Ok(event) => {
                    let listeners = self.bus.emit(&event).await;
                    debug!(%channel, %message_id, kind = ?event.kind(), listeners, "Envelope emitted");
                    DeliveryOutcome::Emitted
                }
                Err(e) => {
                    warn!(%channel, %message_id, error = %e, "Dropping malformed envelope");
                    DeliveryOutcome::Malformed
                }
            };
            self.recent.insert(message_id.clone());
            outcome
        };

        self.metrics.record_delivery_outcome(outcome.label());
        spawn_ack(message_id, acker, self.metrics.clone());
        outcome
    }
}

fn spawn_ack(message_id: String, acker: Box<dyn Acker>, metrics: DispatchMetrics) {
    tokio::spawn(async move {
        if let Err(e) = acker.ack().await {
            metrics.record_error(e.error_type_label());
            warn!(%message_id, error = %e, "Ack failed, broker will redeliver");
        }
    });
}

struct JetStreamAck {
    message: jetstream::Message,
    message_id: String,
}

#[async_trait]
impl Acker for JetStreamAck {
    async fn ack(self: Box<Self>) -> Result<(), DispatchError> {
        let Self {
            message,
            message_id,
        } = *self;
        message
            .ack()
            .await
            .map_err(|source| DispatchError::AckFailed { message_id, source })
    }
}

/// Attach the durable consumer `group` to the GATEWAY stream and expose its
/// messages as deliveries.
///
/// Every handler instance uses the same `group`, so JetStream load-balances
/// messages between them instead of duplicating them.
pub async fn jetstream_deliveries(
    js: &JsContext,
    group: &str,
) -> Result<BoxStream<'static, Delivery>, DispatchError> {
    let stream = ensure_stream(js).await?;

    let consumer = stream
        .get_or_create_consumer(
            group,
            pull::Config {
                durable_name: Some(group.to_string()),
                ack_policy: AckPolicy::Explicit,
                ack_wait: ACK_WAIT,
                ..Default::default()
            },
        )
        .await
        .map_err(|e| DispatchError::SubscribeFailed {
            target: group.to_string(),
            source: Box::new(e),
        })?;

    let messages = consumer
        .messages()
        .await
        .map_err(|e| DispatchError::SubscribeFailed {
            target: group.to_string(),
            source: Box::new(e),
        })?;

    info!(group, "Subscribed to dispatch and deploy channels");

    Ok(messages
        .filter_map(|item| async move {
            match item {
                Ok(message) => into_delivery(message),
                Err(e) => {
                    warn!(error = %e, "Error receiving from consumer");
                    None
                }
            }
        })
        .boxed())
}

fn into_delivery(message: jetstream::Message) -> Option<Delivery> {
    let message_id = message
        .headers
        .as_ref()
        .and_then(|headers| headers.get(MESSAGE_ID_HEADER))
        .map(|value| value.as_str().to_string())
        .or_else(|| {
            message
                .info()
                .ok()
                .map(|info| format!("seq-{}", info.stream_sequence))
        })
        .unwrap_or_default();

    let Some(channel) = Channel::from_subject(message.subject.as_str()) else {
        warn!(subject = %message.subject, %message_id, "Message on unknown subject, dropping");
        spawn_ack(
            message_id.clone(),
            Box::new(JetStreamAck {
                message,
                message_id,
            }),
            DispatchMetrics::noop(),
        );
        return None;
    };

    let payload = message.payload.clone();
    Some(Delivery::new(
        channel,
        message_id.clone(),
        payload,
        Box::new(JetStreamAck {
            message,
            message_id,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_ids_evict_oldest_beyond_capacity() {
        let mut recent = RecentIds::new(2);
        recent.insert("a".to_string());
        recent.insert("b".to_string());
        recent.insert("a".to_string());
        assert!(recent.contains("a"));

        recent.insert("c".to_string());
        assert!(!recent.contains("a"));
        assert!(recent.contains("b"));
        assert!(recent.contains("c"));
    }

    #[test]
    fn outcome_labels_are_stable() {
        assert_eq!(DeliveryOutcome::Emitted.label(), "emitted");
        assert_eq!(DeliveryOutcome::Duplicate.label(), "duplicate");
        assert_eq!(DeliveryOutcome::Malformed.label(), "malformed");
    }
}
