//! Envelope wire format
//!
//! `dispatch` bodies are `{ "shardId": <int>, "data": <raw gateway payload> }`,
//! `deploy` bodies are `{}`. The message id travels in the
//! [`MESSAGE_ID_HEADER`](super::MESSAGE_ID_HEADER) header, not in the body.

use super::Channel;
use crate::error::DispatchError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body of a `dispatch` message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchBody {
    pub shard_id: u64,
    pub data: serde_json::Value,
}

/// Body of a `deploy` message (trigger only)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeployBody {}

/// One unit of transport between publisher and subscriber
#[derive(Debug, Clone)]
pub struct DispatchEnvelope {
    pub channel: Channel,
    pub shard_id: u64,
    pub message_id: String,
    pub payload: Bytes,
}

impl DispatchEnvelope {
    /// Wrap a raw gateway payload received on `shard_id`
    pub fn dispatch(shard_id: u64, data: &serde_json::Value) -> Result<Self, DispatchError> {
        let body = DispatchBody {
            shard_id,
            data: data.clone(),
        };
        let payload = serde_json::to_vec(&body).map_err(|source| {
            DispatchError::SerializationFailed {
                context: format!("dispatch envelope on shard {shard_id}"),
                source,
            }
        })?;

        Ok(Self {
            channel: Channel::Dispatch,
            shard_id,
            message_id: Uuid::new_v4().to_string(),
            payload: Bytes::from(payload),
        })
    }

    /// Deploy trigger; the shard id only tags logs
    pub fn deploy(shard_id: u64) -> Self {
        Self {
            channel: Channel::Deploy,
            shard_id,
            message_id: Uuid::new_v4().to_string(),
            payload: Bytes::from_static(b"{}"),
        }
    }

    pub fn subject(&self) -> &'static str {
        self.channel.subject()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dispatch_envelope_wraps_raw_payload() {
        let raw = json!({"op": 0, "t": "MESSAGE_CREATE", "s": 12, "d": {"id": "1"}});
        let envelope = DispatchEnvelope::dispatch(3, &raw).unwrap();

        assert_eq!(envelope.channel, Channel::Dispatch);
        assert_eq!(envelope.subject(), "gateway.dispatch");

        let body: serde_json::Value = serde_json::from_slice(&envelope.payload).unwrap();
        assert_eq!(body, json!({"shardId": 3, "data": raw}));
    }

    #[test]
    fn deploy_envelope_is_an_empty_object() {
        let envelope = DispatchEnvelope::deploy(0);
        assert_eq!(envelope.subject(), "gateway.deploy");
        assert_eq!(&envelope.payload[..], b"{}");
        assert!(serde_json::from_slice::<DeployBody>(&envelope.payload).is_ok());
    }

    #[test]
    fn message_ids_are_unique() {
        let a = DispatchEnvelope::deploy(0);
        let b = DispatchEnvelope::deploy(0);
        assert_ne!(a.message_id, b.message_id);
        assert!(Uuid::parse_str(&a.message_id).is_ok());
    }
}
