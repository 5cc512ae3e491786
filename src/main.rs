use std::path::PathBuf;
use std::process::ExitCode;

use ldapgate::config::Configuration;
use ldapgate::{AppState, app, telemetry};
use tokio::signal;

/// Environment variable holding the configuration file path.
const CONFIG_PATH_ENV: &str = "CONFIG_PATH";

#[tokio::main]
async fn main() -> ExitCode {
    let mut config = Configuration::default();
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        config = config.path(PathBuf::from(path));
    }
    let config = match config.read() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("cannot load configuration: {error}");
            return ExitCode::FAILURE;
        },
    };

    let _guard = match telemetry::setup_subscriber(&config.log) {
        Ok(guard) => guard,
        Err(error) => {
            eprintln!("cannot initialize logging: {error}");
            return ExitCode::FAILURE;
        },
    };

    let metrics = match telemetry::setup_metrics_recorder() {
        Ok(handle) => Some(handle),
        Err(error) => {
            tracing::warn!(%error, "metrics are disabled");
            None
        },
    };

    let address = config.server.address();
    let state = AppState::new(&config, metrics);

    let listener = match tokio::net::TcpListener::bind(address).await {
        Ok(listener) => listener,
        Err(error) => {
            tracing::error!(%address, %error, "cannot bind listener");
            return ExitCode::FAILURE;
        },
    };
    tracing::info!(%address, "server started");

    if let Err(error) = axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(%error, "server stopped unexpectedly");
        return ExitCode::FAILURE;
    }

    tracing::info!("server stopped");
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::error!(%error, "cannot install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            },
            Err(error) => {
                tracing::error!(%error, "cannot install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
