//! Nomad function provider binary.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use nomad_provider::{logging, run, ProviderConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (config, load_error) = match ProviderConfig::load() {
        Ok(config) => (config, None),
        Err(e) => (ProviderConfig::default(), Some(e)),
    };

    let _log_guard = logging::init(&config.logging);

    if let Some(e) = load_error {
        warn!(error = %e, "Failed to load provider configuration, using defaults");
    }
    for var in &config.deprecated_env {
        warn!(
            variable = %var,
            "Deprecated environment variable, use the PROVIDER_ settings instead"
        );
    }

    info!(
        bind_address = %config.server.bind_address,
        nomad = %config.nomad.address,
        consul = %config.consul.address,
        "Configuration loaded"
    );

    let cancel = CancellationToken::new();

    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, initiating graceful shutdown");
        cancel_on_signal.cancel();
    });

    if let Err(e) = run(config, cancel).await {
        error!(error = %e, "Provider error");
        return Err(e.into());
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
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
        () = ctrl_c => {
            info!("Received Ctrl+C");
        }
        () = terminate => {
            info!("Received SIGTERM");
        }
    }
}
