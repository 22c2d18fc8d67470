//! Local events
//!
//! Envelopes from the broker are decoded into [`LocalEvent`]s, each tagged
//! with a fixed [`EventKind`], and fanned out to listeners on the
//! [`EventBus`].

pub mod bus;

pub use bus::{EventBus, Listener};

use crate::broker::envelope::{DeployBody, DispatchBody};
use crate::broker::Channel;
use crate::error::DispatchError;
use serde::Deserialize;
use twilight_model::application::interaction::Interaction;
use twilight_model::channel::Message;

/// Discriminant used to register listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    InteractionCreate,
    MessageCreate,
    /// Any other dispatch event
    Other,
    /// Command redeploy trigger
    Deploy,
}

/// A gateway dispatch event with its typed payload
#[derive(Debug, Clone)]
pub enum DispatchEvent {
    InteractionCreate(Box<Interaction>),
    MessageCreate(Box<Message>),
    Other { name: String, data: serde_json::Value },
}

impl DispatchEvent {
    /// Gateway event name, e.g. `INTERACTION_CREATE`
    pub fn name(&self) -> &str {
        match self {
            Self::InteractionCreate(_) => "INTERACTION_CREATE",
            Self::MessageCreate(_) => "MESSAGE_CREATE",
            Self::Other { name, .. } => name,
        }
    }
}

/// Event emitted on the local bus
#[derive(Debug, Clone)]
pub enum LocalEvent {
    Dispatch { shard_id: u64, event: DispatchEvent },
    Deploy,
}

impl LocalEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Dispatch { event, .. } => match event {
                DispatchEvent::InteractionCreate(_) => EventKind::InteractionCreate,
                DispatchEvent::MessageCreate(_) => EventKind::MessageCreate,
                DispatchEvent::Other { .. } => EventKind::Other,
            },
            Self::Deploy => EventKind::Deploy,
        }
    }

    pub fn shard_id(&self) -> Option<u64> {
        match self {
            Self::Dispatch { shard_id, .. } => Some(*shard_id),
            Self::Deploy => None,
        }
    }
}

/// Raw gateway payload inside a dispatch body
#[derive(Debug, Deserialize)]
struct RawDispatch {
    t: Option<String>,
    #[serde(default)]
    d: serde_json::Value,
}

/// Decode an envelope body received on `channel`
pub fn decode(channel: Channel, payload: &[u8]) -> Result<LocalEvent, DispatchError> {
    let malformed = |reason: String| DispatchError::Decode {
        channel: channel.name().to_string(),
        reason,
    };

    match channel {
        Channel::Deploy => {
            serde_json::from_slice::<DeployBody>(payload).map_err(|e| malformed(e.to_string()))?;
            Ok(LocalEvent::Deploy)
        }
        Channel::Dispatch => {
            let body: DispatchBody =
                serde_json::from_slice(payload).map_err(|e| malformed(e.to_string()))?;
            let raw: RawDispatch =
                serde_json::from_value(body.data).map_err(|e| malformed(e.to_string()))?;
            let name = raw
                .t
                .ok_or_else(|| malformed("dispatch payload has no event name".to_string()))?;

            let event = match name.as_str() {
                "INTERACTION_CREATE" => DispatchEvent::InteractionCreate(Box::new(
                    serde_json::from_value(raw.d).map_err(|e| malformed(e.to_string()))?,
                )),
                "MESSAGE_CREATE" => DispatchEvent::MessageCreate(Box::new(
                    serde_json::from_value(raw.d).map_err(|e| malformed(e.to_string()))?,
                )),
                _ => DispatchEvent::Other { name, data: raw.d },
            };

            Ok(LocalEvent::Dispatch {
                shard_id: body.shard_id,
                event,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn decodes_untyped_dispatch_as_other() {
        let payload = body(json!({
            "shardId": 2,
            "data": {"op": 0, "t": "GUILD_DELETE", "s": 5, "d": {"id": "1", "unavailable": false}}
        }));

        let event = decode(Channel::Dispatch, &payload).unwrap();
        assert_eq!(event.kind(), EventKind::Other);
        assert_eq!(event.shard_id(), Some(2));
        match event {
            LocalEvent::Dispatch {
                event: DispatchEvent::Other { name, data },
                ..
            } => {
                assert_eq!(name, "GUILD_DELETE");
                assert_eq!(data["id"], "1");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn decodes_deploy_trigger() {
        let event = decode(Channel::Deploy, b"{}").unwrap();
        assert_eq!(event.kind(), EventKind::Deploy);
        assert_eq!(event.shard_id(), None);
    }

    #[test]
    fn rejects_malformed_bodies() {
        assert!(decode(Channel::Dispatch, b"not json").is_err());
        assert!(decode(Channel::Deploy, b"[1, 2").is_err());

        let missing_name = body(json!({"shardId": 0, "data": {"op": 0, "d": {}}}));
        let err = decode(Channel::Dispatch, &missing_name).unwrap_err();
        assert_eq!(err.error_type_label(), "decode");

        let missing_shard = body(json!({"data": {"t": "READY", "d": {}}}));
        assert!(decode(Channel::Dispatch, &missing_shard).is_err());
    }

    #[test]
    fn typed_payloads_must_match_their_schema() {
        let payload = body(json!({
            "shardId": 0,
            "data": {"op": 0, "t": "INTERACTION_CREATE", "s": 1, "d": {"id": "not-a-snowflake"}}
        }));

        let err = decode(Channel::Dispatch, &payload).unwrap_err();
        assert!(matches!(err, DispatchError::Decode { .. }));
    }
}
