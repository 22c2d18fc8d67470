//! Dispatch publisher
//!
//! Runs inside the connection-owning process. Publishing is fire-and-forget:
//! failures are counted and logged, never retried here, and the shard event
//! loop never waits for a subscriber.

use super::envelope::DispatchEnvelope;
use super::{Channel, MESSAGE_ID_HEADER};
use crate::error::DispatchError;
use crate::metrics::DispatchMetrics;
use async_nats::connection::State;
use async_nats::jetstream::{self, Context as JsContext};
use async_nats::{Client, HeaderMap};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Transport capability underneath the publisher
#[async_trait]
pub trait Transport: Send + Sync {
    /// Hand the envelope to the broker.
    ///
    /// Returning `Ok` means the broker client accepted the message, not that
    /// the broker persisted it.
    async fn send(&self, envelope: DispatchEnvelope) -> Result<(), DispatchError>;

    fn is_connected(&self) -> bool {
        true
    }
}

/// JetStream transport
pub struct NatsTransport {
    client: Client,
    jetstream: JsContext,
    metrics: DispatchMetrics,
}

impl NatsTransport {
    /// Connect to NATS server
    pub async fn connect(servers: &str, metrics: DispatchMetrics) -> Result<Arc<Self>, DispatchError> {
        info!(servers, "Connecting to NATS");

        let client = async_nats::connect(servers)
            .await
            .map_err(|e| DispatchError::ConnectionFailed(Box::new(e)))?;

        let jetstream = jetstream::new(client.clone());

        info!("Connected to NATS JetStream");

        Ok(Arc::new(Self {
            client,
            jetstream,
            metrics,
        }))
    }

    pub fn jetstream(&self) -> &JsContext {
        &self.jetstream
    }

    /// Flush buffered publishes before shutdown
    pub async fn close(&self) {
        info!("Closing NATS connection");
        if let Err(e) = self.client.flush().await {
            warn!(error = %e, "Failed to flush NATS client");
        }
    }
}

#[async_trait]
impl Transport for NatsTransport {
    async fn send(&self, envelope: DispatchEnvelope) -> Result<(), DispatchError> {
        let subject = envelope.subject();
        let mut headers = HeaderMap::new();
        headers.insert(MESSAGE_ID_HEADER, envelope.message_id.as_str());

        let ack = self
            .jetstream
            .publish_with_headers(subject, headers, envelope.payload)
            .await
            .map_err(|e| DispatchError::PublishFailed {
                subject: subject.to_string(),
                source: Box::new(e),
            })?;

        // The broker ack is observed off the hot path
        let message_id = envelope.message_id;
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            match ack.await {
                Ok(ack) => {
                    debug!(
                        subject,
                        stream = %ack.stream,
                        seq = ack.sequence,
                        duplicate = ack.duplicate,
                        "Envelope persisted"
                    );
                }
                Err(e) => {
                    metrics.record_publish_ack_failure(subject);
                    warn!(subject, %message_id, error = %e, "Broker did not confirm envelope");
                }
            }
        });

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.client.connection_state() == State::Connected
    }
}

/// Publisher for gateway dispatches and control signals
pub struct DispatchPublisher {
    transport: Arc<dyn Transport>,
    messages_published: AtomicU64,
    publish_failures: AtomicU64,
}

impl DispatchPublisher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            messages_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
        }
    }

    /// Check if the underlying transport is connected
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Get total messages published
    pub fn messages_published(&self) -> u64 {
        self.messages_published.load(Ordering::Relaxed)
    }

    /// Get total publish failures
    pub fn publish_failures(&self) -> u64 {
        self.publish_failures.load(Ordering::Relaxed)
    }

    /// Publish `data` on `channel` for `shard_id`.
    ///
    /// Returns whether the transport accepted the envelope. Callers use the
    /// result for bookkeeping only; there is nothing to retry.
    pub async fn publish(&self, channel: Channel, shard_id: u64, data: &serde_json::Value) -> bool {
        let envelope = match channel {
            Channel::Dispatch => match DispatchEnvelope::dispatch(shard_id, data) {
                Ok(envelope) => envelope,
                Err(e) => {
                    self.publish_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(shard_id, %channel, error = %e, "Failed to encode envelope");
                    return false;
                }
            },
            Channel::Deploy => DispatchEnvelope::deploy(shard_id),
        };

        debug!(
            shard_id,
            %channel,
            message_id = %envelope.message_id,
            "Publishing envelope"
        );

        match self.transport.send(envelope).await {
            Ok(()) => {
                self.messages_published.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                self.publish_failures.fetch_add(1, Ordering::Relaxed);
                warn!(shard_id, %channel, error = %e, "Failed to publish envelope");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use futures::StreamExt;
    use serde_json::json;

    struct DownTransport;

    #[async_trait]
    impl Transport for DownTransport {
        async fn send(&self, envelope: DispatchEnvelope) -> Result<(), DispatchError> {
            Err(DispatchError::PublishFailed {
                subject: envelope.subject().to_string(),
                source: "no responders".into(),
            })
        }

        fn is_connected(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn publish_failures_are_counted_not_returned() {
        let publisher = DispatchPublisher::new(Arc::new(DownTransport));

        assert!(!publisher.publish(Channel::Dispatch, 0, &json!({"t": "READY"})).await);
        assert!(!publisher.publish(Channel::Deploy, 0, &json!({})).await);

        assert_eq!(publisher.publish_failures(), 2);
        assert_eq!(publisher.messages_published(), 0);
        assert!(!publisher.is_connected());
    }

    #[tokio::test]
    async fn publish_routes_channels_to_their_subjects() {
        let (broker, inbox, _acks) = MemoryBroker::new();
        let publisher = DispatchPublisher::new(Arc::new(broker));

        assert!(publisher.publish(Channel::Dispatch, 7, &json!({"t": "GUILD_CREATE"})).await);
        assert!(publisher.publish(Channel::Deploy, 0, &json!(null)).await);
        assert_eq!(publisher.messages_published(), 2);
        drop(publisher);

        let deliveries: Vec<_> = inbox.into_stream().collect().await;
        assert_eq!(deliveries.len(), 2);
        assert_eq!(deliveries[0].channel, Channel::Dispatch);
        assert_eq!(deliveries[1].channel, Channel::Deploy);
        assert_eq!(&deliveries[1].payload[..], b"{}");

        let body: serde_json::Value = serde_json::from_slice(&deliveries[0].payload).unwrap();
        assert_eq!(body["shardId"], 7);
    }
}
