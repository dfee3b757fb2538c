//! # storefront-shield binary
//!
//! Loads configuration, installs logging and the Prometheus recorder, then
//! serves the public and admin listeners until SIGINT or SIGTERM.

use tokio::signal;
use tracing::{error, info, warn};

use storefront_shield::observability::{init_logging, metrics::install_recorder};
use storefront_shield::{Shield, ShieldConfig, ShieldResult};

const DEFAULT_CONFIG_PATH: &str = "config/shield.yaml";

#[tokio::main]
async fn main() -> ShieldResult<()> {
    init_logging();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting storefront-shield");

    let config_path =
        std::env::var("SHIELD_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let config = ShieldConfig::load_or_default(&config_path).await.map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load configuration");
        e
    })?;
    info!(path = %config_path, "Configuration loaded");

    let mut shield = Shield::new(config)?;
    match install_recorder() {
        Ok(handle) => shield = shield.with_metrics_handle(handle),
        Err(e) => warn!(error = %e, "Prometheus recorder unavailable, /metrics disabled"),
    }

    let server = shield.config().server.clone();
    info!(
        bind_address = %server.bind_address,
        port = server.port,
        admin_port = server.admin_port,
        "Serving catalog and admin listeners"
    );

    shield.serve(shutdown_signal()).await?;

    info!("storefront-shield shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}
