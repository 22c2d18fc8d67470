//! Connection-owning process
//!
//! - Runs one pool of Discord shards, resuming stored sessions
//! - Publishes every dispatch to NATS JetStream
//! - Exposes health/ready/metrics and the deploy trigger over HTTP

use ani_dispatch::broker::{ensure_stream, DispatchPublisher, NatsTransport};
use ani_dispatch::config::GatewayConfig;
use ani_dispatch::health::{self, GatewayState};
use ani_dispatch::metrics::DispatchMetrics;
use ani_dispatch::session::{KvSessionStore, MemorySessionStore, SessionCache, SessionStore};
use ani_dispatch::shard::ShardPool;
use ani_dispatch::telemetry::{init_tracing, shutdown_signal};
use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first to get log level
    let gateway_config = GatewayConfig::from_env()?;
    init_tracing(&gateway_config.log_level)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pool_id = gateway_config.pool_id,
        total_shards = gateway_config.total_shards,
        "Starting gateway"
    );

    let metrics = DispatchMetrics::install()?;
    info!("Prometheus metrics initialized");

    // Connect to NATS if configured; sessions live in the same cluster
    let local_store = || Arc::new(MemorySessionStore::new()) as Arc<dyn SessionStore>;
    let (transport, store): (Option<Arc<NatsTransport>>, Arc<dyn SessionStore>) =
        match &gateway_config.nats_url {
            Some(url) => match NatsTransport::connect(url, metrics.clone()).await {
                Ok(transport) => {
                    ensure_stream(transport.jetstream()).await?;
                    let store =
                        KvSessionStore::open(transport.jetstream(), &gateway_config.session_bucket)
                            .await?;
                    metrics.set_nats_connected(true);
                    (Some(transport), Arc::new(store) as Arc<dyn SessionStore>)
                }
                Err(e) => {
                    error!(error = %e, "Failed to connect to NATS - running in local mode");
                    metrics.set_nats_connected(false);
                    (None, local_store())
                }
            },
            None => {
                info!("No NATS_URL configured - running in local mode");
                (None, local_store())
            }
        };

    let publisher = transport
        .clone()
        .map(|transport| Arc::new(DispatchPublisher::new(transport)));

    let intents = GatewayConfig::intents();
    info!(?intents, "Using Discord intents");

    let pool = ShardPool::new(
        gateway_config.pool_id,
        gateway_config.total_shards,
        gateway_config.discord_token.clone(),
        intents,
        publisher.clone(),
        SessionCache::new(store),
        metrics.clone(),
    )
    .await?;

    let pool_state = pool.state();
    let shutdown = pool.shutdown_handle();
    info!(
        pool_id = gateway_config.pool_id,
        shard_count = pool_state.shard_count(),
        "Shard pool created"
    );

    let router = health::gateway_router(GatewayState {
        shard_state: pool_state,
        publisher,
        metrics,
    });
    let addr: SocketAddr = ([0, 0, 0, 0], gateway_config.http_port).into();
    info!(port = gateway_config.http_port, "Starting HTTP server");
    let http_server = axum::serve(tokio::net::TcpListener::bind(addr).await?, router);

    let mut pool_task = tokio::spawn(pool.run());

    let finished = tokio::select! {
        result = &mut pool_task => Some(result),
        result = http_server => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
            None
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            None
        }
    };

    info!("Shutting down gateway...");

    // Stop the shards and let their session writers flush
    let result = match finished {
        Some(result) => result,
        None => {
            let _ = shutdown.send(());
            pool_task.await
        }
    };
    match result {
        Ok(Err(e)) => error!(error = %e, "Shard pool error"),
        Err(e) => warn!(error = %e, "Shard pool task aborted"),
        Ok(Ok(())) => {}
    }

    if let Some(transport) = &transport {
        transport.close().await;
    }

    info!("Gateway shutdown complete");
    Ok(())
}
