//! Health, readiness and metrics endpoints
//!
//! The gateway additionally exposes `POST /deploy`, which publishes a deploy
//! trigger so the handler instances redeploy their command set.

use crate::broker::{Channel, DispatchPublisher, Transport};
use crate::metrics::DispatchMetrics;
use crate::shard::{ShardSnapshot, ShardState};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub role: &'static str,
}

/// Gateway readiness response
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub pool_id: u64,
    pub shards_total: usize,
    pub shards_ready: usize,
    pub nats_connected: bool,
    pub guilds_total: u64,
    pub shards: Vec<ShardSnapshot>,
}

/// Handler readiness response
#[derive(Debug, Serialize)]
pub struct HandlerReadyResponse {
    pub ready: bool,
    pub nats_connected: bool,
    pub handlers: usize,
}

#[derive(Debug, Serialize)]
pub struct DeployResponse {
    pub published: bool,
}

/// State behind the gateway endpoints
#[derive(Clone)]
pub struct GatewayState {
    pub shard_state: ShardState,
    pub publisher: Option<Arc<DispatchPublisher>>,
    pub metrics: DispatchMetrics,
}

/// State behind the handler endpoints
#[derive(Clone)]
pub struct HandlerState {
    pub transport: Arc<dyn Transport>,
    pub handlers: usize,
    pub metrics: DispatchMetrics,
}

pub fn gateway_router(state: GatewayState) -> Router {
    Router::new()
        .route("/health", get(gateway_health))
        .route("/ready", get(gateway_ready))
        .route("/metrics", get(gateway_metrics))
        .route("/deploy", post(trigger_deploy))
        .with_state(state)
}

pub fn handler_router(state: HandlerState) -> Router {
    Router::new()
        .route("/health", get(handler_health))
        .route("/ready", get(handler_ready))
        .route("/metrics", get(handler_metrics))
        .with_state(state)
}

fn health(role: &'static str) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        role,
    })
}

fn prometheus(metrics: &DispatchMetrics) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        metrics.render(),
    )
}

/// Health endpoint - always returns 200 if process is running
async fn gateway_health() -> impl IntoResponse {
    health("gateway")
}

/// Readiness endpoint - returns 200 if at least one shard is ready
async fn gateway_ready(State(state): State<GatewayState>) -> impl IntoResponse {
    let shards_ready = state.shard_state.ready_shards();
    let nats_connected = state.publisher.as_ref().map_or(true, |p| p.is_connected());
    let ready = shards_ready > 0 && nats_connected;

    let response = ReadyResponse {
        ready,
        pool_id: state.shard_state.pool_id(),
        shards_total: state.shard_state.shard_count(),
        shards_ready,
        nats_connected,
        guilds_total: state.shard_state.total_guilds(),
        shards: state.shard_state.snapshot(),
    };

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

async fn gateway_metrics(State(state): State<GatewayState>) -> impl IntoResponse {
    state.metrics.set_shards_ready(
        state.shard_state.pool_id(),
        state.shard_state.ready_shards(),
    );
    if let Some(publisher) = &state.publisher {
        state.metrics.set_nats_connected(publisher.is_connected());
    }
    prometheus(&state.metrics)
}

/// Publish a deploy trigger; 503 in local mode or when the broker refuses
async fn trigger_deploy(State(state): State<GatewayState>) -> impl IntoResponse {
    let published = match &state.publisher {
        Some(publisher) => {
            publisher
                .publish(Channel::Deploy, 0, &serde_json::Value::Null)
                .await
        }
        None => false,
    };
    info!(published, "Deploy trigger requested");

    let status = if published {
        StatusCode::ACCEPTED
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(DeployResponse { published }))
}

async fn handler_health() -> impl IntoResponse {
    health("handler")
}

async fn handler_ready(State(state): State<HandlerState>) -> impl IntoResponse {
    let nats_connected = state.transport.is_connected();
    let ready = nats_connected && state.handlers > 0;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(HandlerReadyResponse {
            ready,
            nats_connected,
            handlers: state.handlers,
        }),
    )
}

async fn handler_metrics(State(state): State<HandlerState>) -> impl IntoResponse {
    prometheus(&state.metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{DispatchEnvelope, MemoryBroker};
    use crate::shard::ShardHealth;
    use crate::error::DispatchError;
    use async_trait::async_trait;
    use futures::StreamExt;
    use serde_json::Value;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn gateway_state(publisher: Option<Arc<DispatchPublisher>>) -> GatewayState {
        GatewayState {
            shard_state: ShardState::new(0, 0..2, 2),
            publisher,
            metrics: DispatchMetrics::noop(),
        }
    }

    struct Disconnected;

    #[async_trait]
    impl Transport for Disconnected {
        async fn send(&self, _envelope: DispatchEnvelope) -> Result<(), DispatchError> {
            Ok(())
        }

        fn is_connected(&self) -> bool {
            false
        }
    }

    #[test]
    fn ready_response_lists_shards() {
        let state = ShardState::new(0, 0..1, 1);
        state.set_health(0, ShardHealth::Ready);
        let response = ReadyResponse {
            ready: true,
            pool_id: 0,
            shards_total: 1,
            shards_ready: 1,
            nats_connected: true,
            guilds_total: 0,
            shards: state.snapshot(),
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["ready"], true);
        assert_eq!(json["shards"][0]["health"], "ready");
    }

    #[tokio::test]
    async fn gateway_is_not_ready_until_a_shard_is() {
        let state = gateway_state(None);
        let shards = state.shard_state.clone();
        let base = serve(gateway_router(state)).await;
        let client = reqwest::Client::new();

        let response = client.get(format!("{base}/ready")).send().await.unwrap();
        assert_eq!(response.status(), 503);

        shards.set_health(1, ShardHealth::Ready);
        let response = client.get(format!("{base}/ready")).send().await.unwrap();
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["shards_ready"], 1);

        let response = client.get(format!("{base}/health")).send().await.unwrap();
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["role"], "gateway");
    }

    #[tokio::test]
    async fn deploy_endpoint_publishes_a_trigger() {
        let (broker, inbox, _acks) = MemoryBroker::new();
        let publisher = Arc::new(DispatchPublisher::new(Arc::new(broker)));
        let base = serve(gateway_router(gateway_state(Some(publisher)))).await;

        let response = reqwest::Client::new()
            .post(format!("{base}/deploy"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 202);

        let delivery = inbox.into_stream().next().await.unwrap();
        assert_eq!(delivery.channel, Channel::Deploy);
        assert_eq!(&delivery.payload[..], b"{}");
    }

    #[tokio::test]
    async fn deploy_endpoint_is_unavailable_in_local_mode() {
        let base = serve(gateway_router(gateway_state(None))).await;
        let response = reqwest::Client::new()
            .post(format!("{base}/deploy"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 503);
    }

    #[tokio::test]
    async fn handler_readiness_requires_the_broker() {
        let base = serve(handler_router(HandlerState {
            transport: Arc::new(Disconnected),
            handlers: 2,
            metrics: DispatchMetrics::noop(),
        }))
        .await;

        let response = reqwest::get(format!("{base}/ready")).await.unwrap();
        assert_eq!(response.status(), 503);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["nats_connected"], false);
        assert_eq!(body["handlers"], 2);
    }
}
