//! Prometheus metrics
//!
//! Thin wrapper over the `metrics` facade. Both processes install the
//! Prometheus recorder once at startup; tests and local tooling use
//! [`DispatchMetrics::noop`], whose calls land on the facade's no-op
//! recorder.

use crate::error::DispatchError;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Duration;

/// Metrics handle shared by every component of a process
#[derive(Clone, Default)]
pub struct DispatchMetrics {
    handle: Option<Arc<PrometheusHandle>>,
}

impl DispatchMetrics {
    /// Install the Prometheus recorder and register metric descriptions
    pub fn install() -> Result<Self, DispatchError> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| DispatchError::Metrics(e.to_string()))?;

        Self::register_metrics();

        Ok(Self {
            handle: Some(Arc::new(handle)),
        })
    }

    /// Metrics that render nothing
    pub fn noop() -> Self {
        Self::default()
    }

    fn register_metrics() {
        // Gateway process
        describe_counter!(
            "gateway_events_received_total",
            Unit::Count,
            "Total events received from Discord"
        );
        describe_counter!(
            "gateway_events_routed_total",
            Unit::Count,
            "Total dispatch envelopes published to the broker"
        );
        describe_counter!(
            "gateway_route_failures_total",
            Unit::Count,
            "Dispatch envelopes that could not be published"
        );
        describe_counter!(
            "gateway_errors_total",
            Unit::Count,
            "Total gateway errors by type"
        );
        describe_counter!(
            "gateway_session_persists_total",
            Unit::Count,
            "Shard session writes by result"
        );
        describe_counter!(
            "gateway_session_resumes_total",
            Unit::Count,
            "Shards that resumed a stored session"
        );
        describe_counter!(
            "dispatch_publish_ack_failures_total",
            Unit::Count,
            "Envelopes the broker never confirmed"
        );
        describe_histogram!(
            "gateway_event_route_duration_seconds",
            Unit::Seconds,
            "Time to hand an event to the broker"
        );
        describe_gauge!(
            "gateway_shards_ready",
            Unit::Count,
            "Number of shards in ready state"
        );
        describe_gauge!(
            "gateway_guilds_total",
            Unit::Count,
            "Guilds per shard"
        );
        describe_gauge!(
            "gateway_nats_connected",
            Unit::Count,
            "NATS connection status (1=connected, 0=disconnected)"
        );

        // Handler process
        describe_counter!(
            "handler_deliveries_total",
            Unit::Count,
            "Broker deliveries received per channel"
        );
        describe_counter!(
            "handler_delivery_outcomes_total",
            Unit::Count,
            "Deliveries by outcome (emitted, duplicate, malformed)"
        );
        describe_counter!(
            "handler_route_outcomes_total",
            Unit::Count,
            "Routed interactions by handler kind and outcome"
        );
        describe_counter!(
            "handler_errors_total",
            Unit::Count,
            "Total handler process errors by type"
        );
    }

    /// Record a gateway event by name
    pub fn record_event(&self, shard_id: u64, event_name: &str) {
        let event_type = match event_name {
            "GUILD_CREATE" => "guild_create",
            "GUILD_DELETE" => "guild_delete",
            "GUILD_UPDATE" => "guild_update",
            "GUILD_MEMBER_ADD" => "member_add",
            "GUILD_MEMBER_REMOVE" => "member_remove",
            "GUILD_MEMBER_UPDATE" => "member_update",
            "INTERACTION_CREATE" => "interaction_create",
            "MESSAGE_CREATE" => "message_create",
            "READY" => "ready",
            "RESUMED" => "resumed",
            _ => "other",
        };

        counter!(
            "gateway_events_received_total",
            "shard_id" => shard_id.to_string(),
            "event_type" => event_type
        )
        .increment(1);
    }

    /// Record an envelope handed to the broker
    pub fn record_route_success(&self, shard_id: u64, duration: Duration) {
        counter!(
            "gateway_events_routed_total",
            "shard_id" => shard_id.to_string()
        )
        .increment(1);

        histogram!(
            "gateway_event_route_duration_seconds",
            "shard_id" => shard_id.to_string()
        )
        .record(duration.as_secs_f64());
    }

    pub fn record_route_failure(&self, shard_id: u64) {
        counter!(
            "gateway_route_failures_total",
            "shard_id" => shard_id.to_string()
        )
        .increment(1);
    }

    /// Record a shard error by `DispatchError::error_type_label`
    pub fn record_shard_error(&self, shard_id: u64, error_type: &'static str) {
        counter!(
            "gateway_errors_total",
            "shard_id" => shard_id.to_string(),
            "error_type" => error_type
        )
        .increment(1);
    }

    /// Record a handler process error by `DispatchError::error_type_label`
    pub fn record_error(&self, error_type: &'static str) {
        counter!("handler_errors_total", "error_type" => error_type).increment(1);
    }

    pub fn record_heartbeat(&self, shard_id: u64) {
        // Heartbeats are frequent, just update a gauge
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        gauge!(
            "gateway_last_heartbeat_timestamp",
            "shard_id" => shard_id.to_string()
        )
        .set(now);
    }

    pub fn record_session_persist(&self, shard_id: u64, ok: bool) {
        counter!(
            "gateway_session_persists_total",
            "shard_id" => shard_id.to_string(),
            "result" => if ok { "ok" } else { "failed" }
        )
        .increment(1);
    }

    pub fn record_session_resume(&self, shard_id: u64) {
        counter!(
            "gateway_session_resumes_total",
            "shard_id" => shard_id.to_string()
        )
        .increment(1);
    }

    pub fn set_guilds(&self, shard_id: u64, count: u64) {
        gauge!(
            "gateway_guilds_total",
            "shard_id" => shard_id.to_string()
        )
        .set(count as f64);
    }

    pub fn set_shards_ready(&self, pool_id: u64, count: usize) {
        gauge!(
            "gateway_shards_ready",
            "pool_id" => pool_id.to_string()
        )
        .set(count as f64);
    }

    /// Count an envelope the broker accepted but never confirmed
    pub fn record_publish_ack_failure(&self, subject: &'static str) {
        counter!("dispatch_publish_ack_failures_total", "subject" => subject).increment(1);
    }

    pub fn set_nats_connected(&self, connected: bool) {
        gauge!("gateway_nats_connected").set(if connected { 1.0 } else { 0.0 });
    }

    pub fn record_delivery(&self, channel: &'static str) {
        counter!("handler_deliveries_total", "channel" => channel).increment(1);
    }

    pub fn record_delivery_outcome(&self, outcome: &'static str) {
        counter!("handler_delivery_outcomes_total", "outcome" => outcome).increment(1);
    }

    pub fn record_route_outcome(&self, kind: &'static str, outcome: &'static str) {
        counter!(
            "handler_route_outcomes_total",
            "kind" => kind,
            "outcome" => outcome
        )
        .increment(1);
    }

    /// Render metrics in Prometheus text format
    pub fn render(&self) -> String {
        self.handle
            .as_ref()
            .map(|handle| handle.render())
            .unwrap_or_default()
    }
}
