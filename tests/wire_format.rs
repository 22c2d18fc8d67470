//! Wire format conformance tests
//!
//! The gateway and handler processes are deployed independently, so the
//! envelope layout is a contract between releases. These tests pin the
//! subjects, headers and body shapes both sides rely on.
//!
//! ## Contract
//!
//! | channel    | subject            | body                                   |
//! |------------|--------------------|----------------------------------------|
//! | `dispatch` | `gateway.dispatch` | `{"shardId": <int>, "data": <payload>}` |
//! | `deploy`   | `gateway.deploy`   | `{}`                                   |

use ani_dispatch::broker::{Channel, DispatchEnvelope, MESSAGE_ID_HEADER, STREAM};
use ani_dispatch::events::{decode, EventKind, LocalEvent};
use serde_json::{json, Value};

/// A READY dispatch exactly as the gateway receives it from Discord
fn ready_payload() -> Value {
    json!({
        "op": 0,
        "t": "READY",
        "s": 1,
        "d": {
            "v": 10,
            "session_id": "f1a2b3c4d5e6",
            "resume_gateway_url": "wss://gateway-us-east1-b.discord.gg",
            "shard": [2, 4]
        }
    })
}

#[test]
fn stream_and_header_names_are_stable() {
    assert_eq!(STREAM, "GATEWAY");
    assert_eq!(MESSAGE_ID_HEADER, "Nats-Msg-Id");
    assert_eq!(Channel::Dispatch.subject(), "gateway.dispatch");
    assert_eq!(Channel::Deploy.subject(), "gateway.deploy");
}

#[test]
fn dispatch_body_carries_the_raw_payload_untouched() {
    let raw = ready_payload();
    let envelope = DispatchEnvelope::dispatch(2, &raw).unwrap();

    let body: Value = serde_json::from_slice(&envelope.payload).unwrap();
    let mut fields: Vec<&String> = body.as_object().unwrap().keys().collect();
    fields.sort();
    assert_eq!(fields, vec!["data", "shardId"]);
    assert_eq!(body["shardId"], 2);
    assert_eq!(body["data"], raw);
    assert_eq!(envelope.shard_id, 2);
}

#[test]
fn deploy_body_is_an_empty_object() {
    let envelope = DispatchEnvelope::deploy(0);
    assert_eq!(envelope.channel, Channel::Deploy);
    let body: Value = serde_json::from_slice(&envelope.payload).unwrap();
    assert_eq!(body, json!({}));
}

#[test]
fn bodies_from_other_producers_decode() {
    // Extra fields are tolerated so newer producers stay readable
    let body = json!({
        "shardId": 5,
        "data": {"op": 0, "t": "MESSAGE_REACTION_ADD", "s": 88, "d": {"emoji": {"name": "x"}}},
        "producer": "gateway-next"
    });
    let event = decode(Channel::Dispatch, &serde_json::to_vec(&body).unwrap()).unwrap();
    assert_eq!(event.kind(), EventKind::Other);
    assert_eq!(event.shard_id(), Some(5));

    let deploy = decode(Channel::Deploy, br#"{"requestedBy": "ops"}"#).unwrap();
    assert!(matches!(deploy, LocalEvent::Deploy));
}

#[test]
fn published_bodies_decode_on_the_consuming_side() {
    let envelope = DispatchEnvelope::dispatch(2, &ready_payload()).unwrap();
    let event = decode(envelope.channel, &envelope.payload).unwrap();

    match event {
        LocalEvent::Dispatch { shard_id, event } => {
            assert_eq!(shard_id, 2);
            assert_eq!(event.name(), "READY");
        }
        LocalEvent::Deploy => panic!("dispatch decoded as deploy"),
    }
}

#[test]
fn camel_case_shard_id_is_required() {
    let snake = json!({"shard_id": 1, "data": ready_payload()});
    assert!(decode(Channel::Dispatch, &serde_json::to_vec(&snake).unwrap()).is_err());
}
