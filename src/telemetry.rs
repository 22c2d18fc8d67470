//! Process-wide logging and signal handling shared by both binaries

use tokio::signal;
use tracing::warn;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::EnvFilter;

/// Install the JSON tracing subscriber.
///
/// `RUST_LOG` is honoured first; the crate itself logs at `log_level`.
pub fn init_tracing(log_level: &str) -> Result<(), ParseError> {
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("ani_dispatch={log_level}").parse()?)
        .add_directive("twilight_gateway=info".parse()?)
        .add_directive("async_nats=warn".parse()?);

    tracing_subscriber::fmt().with_env_filter(filter).json().init();
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

