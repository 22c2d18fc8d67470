//! End-to-end bridge tests
//!
//! Envelopes travel through the in-process broker into the subscriber, the
//! local event bus and the dispatch router, with the same ack surface the
//! JetStream consumer has.

use ani_dispatch::broker::{
    AckLog, Channel, DeliveryOutcome, DispatchPublisher, DispatchSubscriber, MemoryBroker,
};
use ani_dispatch::clock::ManualClock;
use ani_dispatch::error::{DispatchError, HandlerError, ValidationError};
use ani_dispatch::events::{DispatchEvent, EventBus, EventKind, Listener, LocalEvent};
use ani_dispatch::interaction::{InteractionRequest, Reply, Responder};
use ani_dispatch::metrics::DispatchMetrics;
use ani_dispatch::registry::{
    CommandDefinition, Handler, HandlerKind, InteractionContext, Loader, Registry, RegistryEntry,
};
use ani_dispatch::router::{cooldown_notice, DispatchRouter};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Records every `Other` dispatch it sees as `(shard, event name)`
#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(u64, String)>>,
}

impl Recorder {
    fn seen(&self) -> Vec<(u64, String)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Listener for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn on_event(&self, event: &LocalEvent) -> Result<(), HandlerError> {
        if let LocalEvent::Dispatch {
            shard_id,
            event: DispatchEvent::Other { name, .. },
        } = event
        {
            self.seen.lock().unwrap().push((*shard_id, name.clone()));
        }
        Ok(())
    }
}

/// Drains the ack log while the event is being emitted
struct AckProbe {
    acks: Arc<tokio::sync::Mutex<AckLog>>,
    acked_during_emit: Mutex<Vec<String>>,
}

#[async_trait]
impl Listener for AckProbe {
    fn name(&self) -> &str {
        "ack-probe"
    }

    async fn on_event(&self, _event: &LocalEvent) -> Result<(), HandlerError> {
        tokio::task::yield_now().await;
        let early = self.acks.lock().await.drain();
        self.acked_during_emit.lock().unwrap().extend(early);
        Ok(())
    }
}

fn dispatch_body(shard_id: u64, name: &str) -> Bytes {
    let body = json!({
        "shardId": shard_id,
        "data": {"op": 0, "t": name, "s": 1, "d": {"id": "81384788765712384"}}
    });
    Bytes::from(serde_json::to_vec(&body).unwrap())
}

fn subscriber_with(kind: EventKind, listener: Arc<dyn Listener>) -> DispatchSubscriber {
    let mut bus = EventBus::new();
    bus.on(kind, listener);
    DispatchSubscriber::new(Arc::new(bus), DispatchMetrics::noop())
}

async fn collect_acks(acks: &mut AckLog, count: usize) -> Vec<String> {
    let mut ids = Vec::with_capacity(count);
    for _ in 0..count {
        ids.push(acks.next().await.unwrap());
    }
    ids
}

#[tokio::test]
async fn malformed_envelope_is_acked_and_processing_continues() {
    let (broker, inbox, mut acks) = MemoryBroker::new();
    let recorder = Arc::new(Recorder::default());
    let mut subscriber = subscriber_with(EventKind::Other, recorder.clone());
    let mut deliveries = inbox.into_stream();

    broker.inject(Channel::Dispatch, "bad", Bytes::from_static(b"not json"));
    broker.inject(Channel::Dispatch, "good", dispatch_body(1, "GUILD_CREATE"));

    let first = subscriber.handle(deliveries.next().await.unwrap()).await;
    let second = subscriber.handle(deliveries.next().await.unwrap()).await;

    assert_eq!(first, DeliveryOutcome::Malformed);
    assert_eq!(second, DeliveryOutcome::Emitted);
    assert_eq!(recorder.seen(), vec![(1, "GUILD_CREATE".to_string())]);

    let acked: HashSet<String> = collect_acks(&mut acks, 2).await.into_iter().collect();
    assert_eq!(acked, HashSet::from(["bad".to_string(), "good".to_string()]));
}

#[tokio::test]
async fn ack_is_sent_only_after_listeners_ran() {
    let (broker, inbox, acks) = MemoryBroker::new();
    let acks = Arc::new(tokio::sync::Mutex::new(acks));
    let probe = Arc::new(AckProbe {
        acks: Arc::clone(&acks),
        acked_during_emit: Mutex::new(Vec::new()),
    });
    let mut subscriber = subscriber_with(EventKind::Other, probe.clone());
    let mut deliveries = inbox.into_stream();

    broker.inject(Channel::Dispatch, "first", dispatch_body(0, "TYPING_START"));
    let outcome = subscriber.handle(deliveries.next().await.unwrap()).await;

    assert_eq!(outcome, DeliveryOutcome::Emitted);
    assert!(probe.acked_during_emit.lock().unwrap().is_empty());
    assert_eq!(acks.lock().await.next().await.as_deref(), Some("first"));
}

#[tokio::test]
async fn redelivered_message_is_acked_but_not_emitted_again() {
    let (broker, inbox, mut acks) = MemoryBroker::new();
    let recorder = Arc::new(Recorder::default());
    let mut subscriber = subscriber_with(EventKind::Other, recorder.clone());
    let mut deliveries = inbox.into_stream();

    broker.inject(Channel::Dispatch, "same", dispatch_body(2, "GUILD_DELETE"));
    broker.inject(Channel::Dispatch, "same", dispatch_body(2, "GUILD_DELETE"));

    let first = subscriber.handle(deliveries.next().await.unwrap()).await;
    let second = subscriber.handle(deliveries.next().await.unwrap()).await;

    assert_eq!(first, DeliveryOutcome::Emitted);
    assert_eq!(second, DeliveryOutcome::Duplicate);
    assert_eq!(recorder.seen().len(), 1);
    assert_eq!(collect_acks(&mut acks, 2).await, vec!["same", "same"]);
}

#[tokio::test]
async fn published_dispatches_reach_listeners_in_order() {
    let (broker, inbox, mut acks) = MemoryBroker::new();
    let publisher = DispatchPublisher::new(Arc::new(broker));
    let recorder = Arc::new(Recorder::default());
    let subscriber = subscriber_with(EventKind::Other, recorder.clone());

    for (shard, name) in [(0, "GUILD_CREATE"), (3, "CHANNEL_UPDATE"), (0, "GUILD_DELETE")] {
        let raw = json!({"op": 0, "t": name, "s": 7, "d": {}});
        assert!(publisher.publish(Channel::Dispatch, shard, &raw).await);
    }
    assert_eq!(publisher.messages_published(), 3);

    let running = tokio::spawn(subscriber.run(inbox.into_stream()));
    let acked = collect_acks(&mut acks, 3).await;
    running.abort();

    assert_eq!(acked.len(), 3);
    assert_eq!(
        recorder.seen(),
        vec![
            (0, "GUILD_CREATE".to_string()),
            (3, "CHANNEL_UPDATE".to_string()),
            (0, "GUILD_DELETE".to_string()),
        ]
    );
}

/// Counts deploy triggers
#[derive(Default)]
struct DeployCounter {
    triggers: Mutex<usize>,
}

#[async_trait]
impl Listener for DeployCounter {
    fn name(&self) -> &str {
        "deploy-counter"
    }

    async fn on_event(&self, event: &LocalEvent) -> Result<(), HandlerError> {
        if matches!(event, LocalEvent::Deploy) {
            *self.triggers.lock().unwrap() += 1;
        }
        Ok(())
    }
}

#[tokio::test]
async fn deploy_trigger_reaches_deploy_listeners() {
    let (broker, inbox, _acks) = MemoryBroker::new();
    let publisher = DispatchPublisher::new(Arc::new(broker));
    let counter = Arc::new(DeployCounter::default());
    let mut subscriber = subscriber_with(EventKind::Deploy, counter.clone());

    assert!(publisher.publish(Channel::Deploy, 0, &Value::Null).await);
    let outcome = subscriber
        .handle(inbox.into_stream().next().await.unwrap())
        .await;

    assert_eq!(outcome, DeliveryOutcome::Emitted);
    assert_eq!(*counter.triggers.lock().unwrap(), 1);
}

#[derive(Default)]
struct Replies {
    sent: Mutex<Vec<Reply>>,
}

#[async_trait]
impl Responder for Replies {
    async fn reply(&self, _request: &InteractionRequest, reply: Reply) -> Result<(), DispatchError> {
        self.sent.lock().unwrap().push(reply);
        Ok(())
    }
}

struct Ping;

#[async_trait]
impl Handler for Ping {
    type Params = ();

    fn parse(&self, _raw: &[String]) -> Result<(), ValidationError> {
        Ok(())
    }

    async fn execute(&self, ctx: &InteractionContext<'_>, _params: ()) -> Result<(), HandlerError> {
        ctx.reply(Reply::public("pong")).await
    }
}

struct PingLoader;

impl Loader for PingLoader {
    fn load(&self, kind: HandlerKind) -> Result<Vec<RegistryEntry>, DispatchError> {
        Ok(match kind {
            HandlerKind::Command => vec![RegistryEntry::command(
                CommandDefinition::new("ping", "Replies with pong"),
                Ping,
            )
            .cooldown(5)],
            _ => Vec::new(),
        })
    }
}

fn ping_interaction(interaction_id: u64) -> Value {
    json!({
        "op": 0,
        "t": "INTERACTION_CREATE",
        "s": 3,
        "d": {
            "id": interaction_id.to_string(),
            "application_id": "200000000000000000",
            "type": 2,
            "token": "interaction-token",
            "version": 1,
            "entitlements": [],
            "authorizing_integration_owners": {},
            "user": {
                "id": "300000000000000000",
                "username": "tester",
                "discriminator": "0",
                "avatar": null
            },
            "data": {
                "id": "400000000000000000",
                "name": "ping",
                "type": 1,
                "options": []
            }
        }
    })
}

#[tokio::test]
async fn interactions_are_routed_under_cooldown() {
    let (broker, inbox, _acks) = MemoryBroker::new();
    let publisher = DispatchPublisher::new(Arc::new(broker));

    let registry = Arc::new(Registry::load(&PingLoader).unwrap());
    let replies = Arc::new(Replies::default());
    let clock = ManualClock::new(1_000_000);
    let router = DispatchRouter::new(registry, replies.clone(), Arc::new(clock.clone()));
    let mut subscriber = subscriber_with(EventKind::InteractionCreate, Arc::new(router));
    let mut deliveries = inbox.into_stream();

    assert!(publisher.publish(Channel::Dispatch, 0, &ping_interaction(100_000_000_000_000_001)).await);
    subscriber.handle(deliveries.next().await.unwrap()).await;

    clock.advance_secs(3);
    assert!(publisher.publish(Channel::Dispatch, 0, &ping_interaction(100_000_000_000_000_002)).await);
    subscriber.handle(deliveries.next().await.unwrap()).await;

    clock.advance_secs(3);
    assert!(publisher.publish(Channel::Dispatch, 0, &ping_interaction(100_000_000_000_000_003)).await);
    subscriber.handle(deliveries.next().await.unwrap()).await;

    let sent: Vec<String> = replies
        .sent
        .lock()
        .unwrap()
        .iter()
        .map(|reply| reply.content.clone())
        .collect();
    assert_eq!(sent, vec!["pong".to_string(), cooldown_notice(2_000), "pong".to_string()]);
}
