//! Handler process
//!
//! - Consumes `dispatch` and `deploy` envelopes under the shared consumer group
//! - Routes interactions to the built-in handlers
//! - Redeploys the command set on every deploy trigger
//! - Exposes health/ready/metrics over HTTP

use ani_dispatch::api::ApiClient;
use ani_dispatch::broker::{jetstream_deliveries, DispatchSubscriber, NatsTransport};
use ani_dispatch::clock::SystemClock;
use ani_dispatch::config::HandlerConfig;
use ani_dispatch::events::{EventBus, EventKind};
use ani_dispatch::handlers::{BuiltinLoader, KvAccountLinks};
use ani_dispatch::health::{self, HandlerState};
use ani_dispatch::interaction::TwilightResponder;
use ani_dispatch::metrics::DispatchMetrics;
use ani_dispatch::registry::{DeployListener, HandlerKind, Loader, Registry, TwilightCommandSink};
use ani_dispatch::router::DispatchRouter;
use ani_dispatch::telemetry::{init_tracing, shutdown_signal};
use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let handler_config = HandlerConfig::from_env()?;
    init_tracing(&handler_config.log_level)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        consumer_group = %handler_config.consumer_group,
        "Starting handler"
    );

    let metrics = DispatchMetrics::install()?;

    let transport = NatsTransport::connect(&handler_config.nats_url, metrics.clone()).await?;
    let accounts = KvAccountLinks::open(transport.jetstream(), &handler_config.account_bucket).await?;
    let api = ApiClient::new(handler_config.api_url.clone())?;

    let http = Arc::new(twilight_http::Client::new(handler_config.discord_token.clone()));
    let application_id = http.current_user_application().await?.model().await?.id;
    info!(%application_id, "Resolved application");

    // Invalid or duplicate definitions stop the process here
    let loader = BuiltinLoader::new(Arc::new(accounts), Arc::new(api));
    let registry = Arc::new(Registry::load(&loader)?);
    let handlers: usize = HandlerKind::ALL.iter().map(|kind| registry.len(*kind)).sum();

    let router = DispatchRouter::new(
        Arc::clone(&registry),
        Arc::new(TwilightResponder::new(Arc::clone(&http), application_id)),
        Arc::new(SystemClock),
    )
    .with_metrics(metrics.clone())
    .log_unknown_keys(handler_config.log_unknown_keys);

    let deploy = DeployListener::new(
        Arc::clone(&registry),
        Arc::new(TwilightCommandSink::new(Arc::clone(&http), application_id)),
    );

    let mut bus = EventBus::new();
    bus.on(EventKind::InteractionCreate, Arc::new(router));
    bus.on(DeployListener::KIND, Arc::new(deploy));
    for (kind, listener) in loader.listeners() {
        bus.on(kind, listener);
    }

    let deliveries = jetstream_deliveries(transport.jetstream(), &handler_config.consumer_group).await?;
    let subscriber = DispatchSubscriber::new(Arc::new(bus), metrics.clone());

    let router = health::handler_router(HandlerState {
        transport: transport.clone(),
        handlers,
        metrics,
    });
    let addr: SocketAddr = ([0, 0, 0, 0], handler_config.http_port).into();
    info!(port = handler_config.http_port, handlers, "Starting HTTP server");
    let http_server = axum::serve(tokio::net::TcpListener::bind(addr).await?, router);

    tokio::select! {
        _ = subscriber.run(deliveries) => {
            error!("Dispatch subscription ended");
        }
        result = http_server => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    transport.close().await;
    info!("Handler shutdown complete");
    Ok(())
}
