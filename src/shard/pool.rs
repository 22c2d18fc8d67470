//! Shard pool implementation
//!
//! Runs a contiguous range of shards in one process. Each shard starts from
//! its stored session when one is available, relays every dispatch to the
//! broker verbatim and streams session changes to a per-shard writer task.

use crate::broker::{Channel, DispatchPublisher};
use crate::error::DispatchError;
use crate::metrics::DispatchMetrics;
use crate::session::{SessionCache, ShardSession};
use crate::shard::state::{ShardHealth, ShardState};

use futures::StreamExt;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};
use twilight_gateway::error::ReceiveMessageErrorType;
use twilight_gateway::{ConfigBuilder, Intents, Message, Session, Shard};
use twilight_model::gateway::ShardId;

/// Number of shards per gateway process (pool)
pub const SHARDS_PER_POOL: u64 = 25;

/// Consecutive receive errors after which a shard is marked dead
const MAX_CONSECUTIVE_ERRORS: u32 = 10;

const OP_DISPATCH: u64 = 0;
const OP_INVALID_SESSION: u64 = 9;
const OP_HEARTBEAT_ACK: u64 = 11;

static NO_DATA: Value = Value::Null;

/// Shard ids owned by `pool_id`
pub fn shard_range(pool_id: u64, total_shards: u64) -> std::ops::Range<u64> {
    let start = pool_id.saturating_mul(SHARDS_PER_POOL).min(total_shards);
    let end = pool_id
        .saturating_add(1)
        .saturating_mul(SHARDS_PER_POOL)
        .min(total_shards);
    start..end
}

/// The fields of a raw gateway payload the pool looks at
#[derive(Debug)]
struct Frame<'a> {
    op: u64,
    seq: Option<u64>,
    name: Option<&'a str>,
    data: &'a Value,
}

impl<'a> Frame<'a> {
    fn parse(payload: &'a Value) -> Option<Self> {
        Some(Self {
            op: payload.get("op")?.as_u64()?,
            seq: payload.get("s").and_then(Value::as_u64),
            name: payload.get("t").and_then(Value::as_str),
            data: payload.get("d").unwrap_or(&NO_DATA),
        })
    }
}

/// Follows the resumable session of one shard through its gateway traffic
#[derive(Debug)]
struct SessionTracker {
    shard_id: u64,
    session_id: Option<String>,
    sequence: u64,
    resume_url: Option<String>,
}

impl SessionTracker {
    fn new(shard_id: u64, stored: Option<&ShardSession>) -> Self {
        Self {
            shard_id,
            session_id: stored.map(|s| s.session_id.clone()),
            sequence: stored.map_or(0, |s| s.sequence),
            resume_url: stored.map(|s| s.resume_url.clone()),
        }
    }

    /// Apply one frame; returns the new snapshot when the session changed
    fn observe(&mut self, frame: &Frame<'_>) -> Option<ShardSession> {
        match frame.op {
            OP_DISPATCH => {
                let mut changed = false;
                if frame.name == Some("READY") {
                    self.session_id = frame.data["session_id"].as_str().map(str::to_string);
                    self.resume_url = frame.data["resume_gateway_url"].as_str().map(str::to_string);
                    changed = true;
                }
                if let Some(seq) = frame.seq.filter(|seq| *seq != self.sequence) {
                    self.sequence = seq;
                    changed = true;
                }
                if changed {
                    self.snapshot()
                } else {
                    None
                }
            }
            OP_INVALID_SESSION if frame.data.as_bool() != Some(true) => {
                self.session_id = None;
                self.sequence = 0;
                None
            }
            _ => None,
        }
    }

    fn snapshot(&self) -> Option<ShardSession> {
        Some(ShardSession {
            shard_id: self.shard_id,
            session_id: self.session_id.clone()?,
            sequence: self.sequence,
            resume_url: self.resume_url.clone()?,
        })
    }
}

/// Apply a guild lifecycle dispatch to the shard's guild set.
///
/// Returns whether the set changed.
fn apply_guild_event(guilds: &mut HashSet<u64>, name: &str, data: &Value) -> bool {
    let id_of = |value: &Value| value["id"].as_str().and_then(|id| id.parse::<u64>().ok());
    match name {
        "READY" => {
            guilds.clear();
            if let Some(list) = data["guilds"].as_array() {
                guilds.extend(list.iter().filter_map(id_of));
            }
            true
        }
        "GUILD_CREATE" => id_of(data).is_some_and(|id| guilds.insert(id)),
        // An outage is reported as unavailable; the bot is still a member
        "GUILD_DELETE" if data["unavailable"].as_bool() != Some(true) => {
            id_of(data).is_some_and(|id| guilds.remove(&id))
        }
        _ => false,
    }
}

struct PoolShard {
    shard: Shard,
    tracker: SessionTracker,
}

/// Everything a shard task needs besides the shard itself
#[derive(Clone)]
struct ShardContext {
    publisher: Option<Arc<DispatchPublisher>>,
    state: ShardState,
    metrics: DispatchMetrics,
}

/// Shard pool managing multiple Discord shards
pub struct ShardPool {
    pool_id: u64,
    shards: Vec<PoolShard>,
    sessions: SessionCache,
    context: ShardContext,
    shutdown_tx: broadcast::Sender<()>,
}

impl ShardPool {
    /// Create the pool's shards, seeding each with its stored session
    ///
    /// # Arguments
    /// * `pool_id` - Pool identifier (0, 1, 2, ...)
    /// * `total_shards` - Total shards across all pools
    /// * `publisher` - Dispatch publisher (None for local testing)
    /// * `sessions` - Session cache read here and written by the shard tasks
    pub async fn new(
        pool_id: u64,
        total_shards: u64,
        token: String,
        intents: Intents,
        publisher: Option<Arc<DispatchPublisher>>,
        sessions: SessionCache,
        metrics: DispatchMetrics,
    ) -> Result<Self, DispatchError> {
        let range = shard_range(pool_id, total_shards);

        info!(
            pool_id,
            start_shard = range.start,
            end_shard = range.end,
            shard_count = range.end - range.start,
            "Creating shard pool"
        );

        let state = ShardState::new(pool_id, range.clone(), total_shards);

        // Twilight takes u32 shard ids
        let total_shards_u32 = u32::try_from(total_shards)
            .map_err(|_| DispatchError::ShardIdOverflow { value: total_shards })?;

        let mut shards = Vec::with_capacity(range.clone().count());

        for shard_id in range {
            let shard_id_u32 = u32::try_from(shard_id)
                .map_err(|_| DispatchError::ShardIdOverflow { value: shard_id })?;

            let stored = sessions.load(shard_id).await;
            let mut config = ConfigBuilder::new(token.clone(), intents);
            if let Some(session) = &stored {
                info!(shard_id, sequence = session.sequence, "Resuming stored session");
                config = config
                    .session(Session::new(session.sequence, session.session_id.clone()))
                    .resume_url(session.resume_url.clone());
                state.set_health(shard_id, ShardHealth::Resuming);
                state.set_session(shard_id, Some(session.session_id.clone()));
            }

            shards.push(PoolShard {
                shard: Shard::with_config(
                    ShardId::new(shard_id_u32, total_shards_u32),
                    config.build(),
                ),
                tracker: SessionTracker::new(shard_id, stored.as_ref()),
            });
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            pool_id,
            shards,
            sessions,
            context: ShardContext {
                publisher,
                state,
                metrics,
            },
            shutdown_tx,
        })
    }

    pub fn pool_id(&self) -> u64 {
        self.pool_id
    }

    /// Shared state (for health checks)
    pub fn state(&self) -> ShardState {
        self.context.state.clone()
    }

    /// Handle that stops every shard when triggered
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Run all shards until they end or shutdown is signalled
    pub async fn run(self) -> Result<(), DispatchError> {
        let mut handles = Vec::with_capacity(self.shards.len() * 2);

        for PoolShard { shard, tracker } in self.shards {
            let shard_id: u64 = shard.id().number().into();
            let (session_tx, session_rx) = watch::channel(None);

            handles.push(tokio::spawn(persist_sessions(
                shard_id,
                session_rx,
                self.sessions.clone(),
                self.context.clone(),
            )));

            let context = self.context.clone();
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                tokio::select! {
                    result = run_shard(shard, tracker, session_tx, context) => {
                        if let Err(e) = result {
                            error!(shard_id, error = %e, "Shard task failed");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!(shard_id, "Shard received shutdown signal");
                    }
                }
            }));
        }

        // Writers finish once their shard's sender is gone
        for handle in handles {
            let _ = handle.await;
        }

        info!(pool_id = self.pool_id, "Shard pool shut down");
        Ok(())
    }

    /// Signal shutdown to all shards
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Write the latest session snapshot of one shard whenever it changes
async fn persist_sessions(
    shard_id: u64,
    mut sessions: watch::Receiver<Option<ShardSession>>,
    cache: SessionCache,
    context: ShardContext,
) {
    while sessions.changed().await.is_ok() {
        let Some(session) = sessions.borrow_and_update().clone() else {
            continue;
        };
        let ok = cache.persist(&session).await;
        context.metrics.record_session_persist(shard_id, ok);
        if ok {
            context.state.record_session_persisted(shard_id);
        }
    }
    debug!(shard_id, "Session writer stopped");
}

/// Run a single shard's event loop
async fn run_shard(
    mut shard: Shard,
    mut tracker: SessionTracker,
    session_tx: watch::Sender<Option<ShardSession>>,
    context: ShardContext,
) -> Result<(), DispatchError> {
    let ShardContext {
        publisher,
        state,
        metrics,
    } = context;
    let shard_id: u64 = shard.id().number().into();
    let pool_id = state.pool_id();
    let mut guilds = HashSet::new();
    let mut consecutive_errors: u32 = 0;

    info!(shard_id, pool_id, "Shard starting");

    while let Some(item) = shard.next().await {
        let message = match item {
            Ok(message) => {
                consecutive_errors = 0;
                message
            }
            Err(source) => {
                consecutive_errors += 1;
                warn!(shard_id, error = %source, consecutive = consecutive_errors, "Error receiving event");

                // Immediate fatal: reconnect failure
                if matches!(source.kind(), ReceiveMessageErrorType::Reconnect) {
                    let err = DispatchError::ShardReconnectFailed {
                        shard_id,
                        source: Box::new(source),
                    };
                    metrics.record_shard_error(shard_id, err.error_type_label());
                    state.set_health(shard_id, ShardHealth::Dead);
                    error!(shard_id, "Fatal gateway error (reconnect failed)");
                    return Err(err);
                }

                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    let err = DispatchError::ShardCircuitBroken {
                        shard_id,
                        count: consecutive_errors,
                        max: MAX_CONSECUTIVE_ERRORS,
                    };
                    metrics.record_shard_error(shard_id, err.error_type_label());
                    state.set_health(shard_id, ShardHealth::Dead);
                    error!(shard_id, consecutive = consecutive_errors, "Shard dead: consecutive error threshold exceeded");
                    return Err(err);
                }

                metrics.record_shard_error(shard_id, "receive_error");
                state.set_health(shard_id, ShardHealth::Disconnected);
                continue;
            }
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Close(frame) => {
                state.set_health(shard_id, ShardHealth::Disconnected);
                metrics.set_shards_ready(pool_id, state.ready_shards());
                debug!(shard_id, ?frame, "Shard closed");
                continue;
            }
        };

        let payload: Value = match serde_json::from_str(&text) {
            Ok(payload) => payload,
            Err(e) => {
                metrics.record_shard_error(shard_id, "decode");
                warn!(shard_id, error = %e, "Undecodable gateway payload");
                continue;
            }
        };
        let Some(frame) = Frame::parse(&payload) else {
            continue;
        };

        if let Some(session) = tracker.observe(&frame) {
            session_tx.send_replace(Some(session));
        }

        match (frame.op, frame.name) {
            (OP_DISPATCH, Some(name)) => {
                state.record_event(shard_id);
                metrics.record_event(shard_id, name);

                match name {
                    "READY" => {
                        state.set_health(shard_id, ShardHealth::Ready);
                        state.set_session(shard_id, tracker.session_id.clone());
                        metrics.set_shards_ready(pool_id, state.ready_shards());
                        info!(
                            shard_id,
                            guilds = frame.data["guilds"].as_array().map_or(0, Vec::len),
                            session_id = tracker.session_id.as_deref().unwrap_or_default(),
                            "Shard ready"
                        );
                    }
                    "RESUMED" => {
                        state.set_health(shard_id, ShardHealth::Ready);
                        metrics.record_session_resume(shard_id);
                        metrics.set_shards_ready(pool_id, state.ready_shards());
                        debug!(shard_id, sequence = tracker.sequence, "Shard resumed");
                    }
                    _ => {}
                }

                if apply_guild_event(&mut guilds, name, frame.data) {
                    state.set_guilds(shard_id, guilds.len() as u64);
                    metrics.set_guilds(shard_id, guilds.len() as u64);
                }

                if let Some(publisher) = &publisher {
                    let start = Instant::now();
                    let accepted = publisher.publish(Channel::Dispatch, shard_id, &payload).await;
                    state.record_publish(shard_id, accepted);
                    if accepted {
                        metrics.record_route_success(shard_id, start.elapsed());
                    } else {
                        metrics.record_route_failure(shard_id);
                    }
                }
            }
            (OP_HEARTBEAT_ACK, _) => {
                state.record_heartbeat(shard_id);
                metrics.record_heartbeat(shard_id);
            }
            (OP_INVALID_SESSION, _) => {
                state.set_session(shard_id, tracker.session_id.clone());
                debug!(shard_id, "Session invalidated");
            }
            _ => {}
        }
    }

    // Stream ended, shard closed
    info!(shard_id, "Shard event stream ended");
    Ok(())
}
