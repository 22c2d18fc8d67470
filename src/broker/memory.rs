//! In-process broker
//!
//! Channel-backed stand-in for JetStream with the same delivery and ack
//! surface. Acknowledged message ids are reported on an [`AckLog`].

use super::envelope::DispatchEnvelope;
use super::publisher::Transport;
use super::subscriber::{Acker, Delivery};
use super::Channel;
use crate::error::DispatchError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::mpsc;

/// Publishing half; also lets callers inject raw or redelivered messages
pub struct MemoryBroker {
    deliveries: mpsc::UnboundedSender<Delivery>,
    acks: mpsc::UnboundedSender<String>,
}

/// Consuming half, handed to the subscriber
pub struct MemoryInbox {
    deliveries: mpsc::UnboundedReceiver<Delivery>,
}

/// Message ids in the order they were acknowledged
pub struct AckLog {
    acks: mpsc::UnboundedReceiver<String>,
}

struct MemoryAck {
    message_id: String,
    acks: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl Acker for MemoryAck {
    async fn ack(self: Box<Self>) -> Result<(), DispatchError> {
        self.acks
            .send(self.message_id.clone())
            .map_err(|e| DispatchError::AckFailed {
                message_id: self.message_id.clone(),
                source: Box::new(e),
            })
    }
}

impl MemoryBroker {
    pub fn new() -> (Self, MemoryInbox, AckLog) {
        let (deliveries_tx, deliveries_rx) = mpsc::unbounded_channel();
        let (acks_tx, acks_rx) = mpsc::unbounded_channel();

        (
            Self {
                deliveries: deliveries_tx,
                acks: acks_tx,
            },
            MemoryInbox {
                deliveries: deliveries_rx,
            },
            AckLog { acks: acks_rx },
        )
    }

    /// Enqueue a message as the broker would deliver it.
    ///
    /// Re-injecting a message id that was already delivered models a
    /// broker redelivery.
    pub fn inject(&self, channel: Channel, message_id: &str, payload: Bytes) -> bool {
        let acker = Box::new(MemoryAck {
            message_id: message_id.to_string(),
            acks: self.acks.clone(),
        });
        self.deliveries
            .send(Delivery::new(channel, message_id, payload, acker))
            .is_ok()
    }
}

#[async_trait]
impl Transport for MemoryBroker {
    async fn send(&self, envelope: DispatchEnvelope) -> Result<(), DispatchError> {
        if self.inject(envelope.channel, &envelope.message_id, envelope.payload) {
            Ok(())
        } else {
            Err(DispatchError::PublishFailed {
                subject: envelope.channel.subject().to_string(),
                source: "in-memory inbox closed".into(),
            })
        }
    }
}

impl MemoryInbox {
    pub fn into_stream(self) -> BoxStream<'static, Delivery> {
        stream::unfold(self.deliveries, |mut rx| async move {
            rx.recv().await.map(|delivery| (delivery, rx))
        })
        .boxed()
    }
}

impl AckLog {
    /// Wait for the next acknowledged message id
    pub async fn next(&mut self) -> Option<String> {
        self.acks.recv().await
    }

    /// Message ids acknowledged so far, without waiting
    pub fn drain(&mut self) -> Vec<String> {
        let mut ids = Vec::new();
        while let Ok(id) = self.acks.try_recv() {
            ids.push(id);
        }
        ids
    }
}
