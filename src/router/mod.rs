//! Dispatch router
//!
//! Resolves each interaction to its registry entry and applies the entry's
//! policy before invoking the handler:
//!
//! 1. unknown key: ignored
//! 2. expired or already-used component instance: expiration notice
//! 3. active cooldown for this actor: cooldown notice with the time left
//! 4. invoke; on success start the cooldown
//! 5. on success, spend single-use component instances
//!
//! Rejections are ordinary outcomes, not errors. Handler failures and
//! panics are contained here and answered with the handler's own notice
//! when it gave one, otherwise with a generic reply. Failures never start a
//! cooldown.

pub mod component;
pub mod cooldown;

pub use component::{ComponentKey, ComponentState, ComponentStore};
pub use cooldown::CooldownStore;

use crate::clock::Clock;
use crate::error::HandlerError;
use crate::events::{DispatchEvent, Listener, LocalEvent};
use crate::interaction::{InteractionRequest, Reply, Responder};
use crate::metrics::DispatchMetrics;
use crate::registry::{InteractionContext, Registry, CUSTOM_ID_DELIMITER};
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const EXPIRED_NOTICE: &str = "This interaction has expired.";
pub const FAILURE_NOTICE: &str = "There was a problem while handling this interaction.";

/// Result of routing one interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Handler ran to completion
    Invoked,
    /// No entry for the key
    Unknown,
    /// Component past its timeout, or single-use and already used
    Expired,
    Cooldown { remaining_ms: u64 },
    /// Handler rejected its input
    Invalid,
    /// Handler returned an error or panicked
    Failed,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Invoked => "invoked",
            Self::Unknown => "unknown",
            Self::Expired => "expired",
            Self::Cooldown { .. } => "cooldown",
            Self::Invalid => "invalid",
            Self::Failed => "failed",
        }
    }
}

/// User-facing cooldown notice, rounded up to whole seconds
pub fn cooldown_notice(remaining_ms: u64) -> String {
    let secs = remaining_ms.div_ceil(1000).max(1);
    let unit = if secs == 1 { "second" } else { "seconds" };
    format!("You are on cooldown. Try again in {secs} {unit}.")
}

/// Split a custom id into its lookup key and positional parameters
pub fn split_custom_id(custom_id: &str) -> (&str, Vec<String>) {
    let mut parts = custom_id.split(CUSTOM_ID_DELIMITER);
    let key = parts.next().unwrap_or(custom_id);
    (key, parts.map(str::to_string).collect())
}

pub struct DispatchRouter {
    registry: Arc<Registry>,
    responder: Arc<dyn Responder>,
    clock: Arc<dyn Clock>,
    cooldowns: CooldownStore,
    components: ComponentStore,
    metrics: DispatchMetrics,
    log_unknown_keys: bool,
}

impl DispatchRouter {
    pub fn new(registry: Arc<Registry>, responder: Arc<dyn Responder>, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry,
            responder,
            clock,
            cooldowns: CooldownStore::new(),
            components: ComponentStore::new(),
            metrics: DispatchMetrics::noop(),
            log_unknown_keys: false,
        }
    }

    pub fn with_metrics(mut self, metrics: DispatchMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Log unknown keys at info instead of debug
    pub fn log_unknown_keys(mut self, enabled: bool) -> Self {
        self.log_unknown_keys = enabled;
        self
    }

    /// Route one interaction through the policy checks and its handler
    pub async fn route(&self, request: &InteractionRequest) -> Outcome {
        let outcome = self.dispatch(request).await;
        self.metrics
            .record_route_outcome(request.kind.label(), outcome.label());
        outcome
    }

    async fn dispatch(&self, request: &InteractionRequest) -> Outcome {
        let (key, params) = if request.kind.is_component() {
            split_custom_id(&request.custom_id)
        } else {
            (request.custom_id.as_str(), Vec::new())
        };

        let Some(entry) = self.registry.get(request.kind, key) else {
            if self.log_unknown_keys {
                info!(kind = %request.kind, key, actor_id = request.actor_id, "Ignoring unknown key");
            } else {
                debug!(kind = %request.kind, key, actor_id = request.actor_id, "Ignoring unknown key");
            }
            return Outcome::Unknown;
        };

        let policy = entry.policy();
        let entry_id = entry.id();
        let now = self.clock.now_millis();

        // Commands and detached modals have no instance to track
        let instance = request
            .message
            .filter(|_| request.kind.is_component())
            .filter(|_| policy.timeout_secs.is_some() || !policy.toggleable);

        if let Some(message) = instance {
            let state = self
                .components
                .state(message, &request.custom_id, policy.timeout_secs, now);
            if state.is_expired(now) {
                debug!(entry = %entry_id, actor_id = request.actor_id, message_id = message.id, "Component expired");
                self.respond(request, Reply::ephemeral(EXPIRED_NOTICE)).await;
                return Outcome::Expired;
            }
        }

        if policy.cooldown_secs > 0 {
            if let Some(remaining_ms) = self.cooldowns.remaining(&entry_id, request.actor_id, now) {
                debug!(entry = %entry_id, actor_id = request.actor_id, remaining_ms, "On cooldown");
                self.respond(request, Reply::ephemeral(cooldown_notice(remaining_ms)))
                    .await;
                return Outcome::Cooldown { remaining_ms };
            }
        }

        let ctx = InteractionContext::new(request, self.responder.as_ref());
        let result = AssertUnwindSafe(entry.handler().invoke(&ctx, &params))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(())) => {
                let finished = self.clock.now_millis();
                if policy.cooldown_secs > 0 {
                    let expires_at = finished.saturating_add(policy.cooldown_secs.saturating_mul(1000));
                    self.cooldowns.record(&entry_id, request.actor_id, expires_at);
                }
                if let Some(message) = instance.filter(|_| !policy.toggleable) {
                    self.components
                        .consume(message, &request.custom_id, policy.timeout_secs, finished);
                }
                debug!(entry = %entry_id, actor_id = request.actor_id, "Handler invoked");
                Outcome::Invoked
            }
            Ok(Err(HandlerError::Validation(e))) => {
                debug!(entry = %entry_id, actor_id = request.actor_id, reason = %e, "Invalid input");
                self.respond(request, Reply::ephemeral(e.0)).await;
                Outcome::Invalid
            }
            Ok(Err(HandlerError::Reported { notice, source })) => {
                error!(entry = %entry_id, actor_id = request.actor_id, error = %source, "Handler failed");
                self.respond(request, Reply::ephemeral(notice)).await;
                Outcome::Failed
            }
            Ok(Err(e)) => {
                error!(entry = %entry_id, actor_id = request.actor_id, error = %e, "Handler failed");
                self.respond(request, Reply::ephemeral(FAILURE_NOTICE)).await;
                Outcome::Failed
            }
            Err(_) => {
                error!(entry = %entry_id, actor_id = request.actor_id, "Handler panicked");
                self.respond(request, Reply::ephemeral(FAILURE_NOTICE)).await;
                Outcome::Failed
            }
        }
    }

    async fn respond(&self, request: &InteractionRequest, reply: Reply) {
        if let Err(e) = self.responder.reply(request, reply).await {
            self.metrics.record_error(e.error_type_label());
            warn!(interaction_id = request.interaction_id, error = %e, "Failed to send reply");
        }
    }
}

/// Routes `INTERACTION_CREATE` only. Message events are delivered to their
/// own bus listeners and never resolved against the registry.
#[async_trait]
impl Listener for DispatchRouter {
    fn name(&self) -> &str {
        "router"
    }

    async fn on_event(&self, event: &LocalEvent) -> Result<(), HandlerError> {
        let LocalEvent::Dispatch {
            shard_id,
            event: DispatchEvent::InteractionCreate(interaction),
        } = event
        else {
            return Ok(());
        };

        match InteractionRequest::from_interaction(*shard_id, interaction) {
            Some(request) => {
                self.route(&request).await;
            }
            None => debug!(shard_id, kind = ?interaction.kind, "Interaction has no routable data"),
        }
        Ok(())
    }
}
