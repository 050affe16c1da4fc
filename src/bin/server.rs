//! Zone raffle HTTP server.
//!
//! Pre-registration, capacity-bounded raffles and ticket issuance for live events.

use anyhow::Context;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use zone_raffle::app::RaffleApp;
use zone_raffle::config::Config;
use zone_raffle::metrics;
use zone_raffle::server::build_router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,zone_raffle=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Zone Raffle server");

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        server = %config.server_addr(),
        persistent = config.postgres.url.is_some(),
        scope = ?config.raffle.registration_scope,
        "Configuration loaded"
    );

    metrics::install_exporter(config.metrics_addr()?)?;

    let app = RaffleApp::from_config(&config)
        .await
        .context("Failed to initialize application")?;
    let router = build_router(Arc::new(app));

    let addr = config.server_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Server listening on {}", addr);

    let (stop_tx, mut stop_rx) = watch::channel(false);
    let mut server = tokio::spawn(
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = stop_rx.changed().await;
            })
            .into_future(),
    );

    tokio::select! {
        result = &mut server => {
            result??;
            info!("Server stopped");
            return Ok(());
        }
        () = shutdown_signal() => {}
    }

    let _ = stop_tx.send(true);
    let grace = Duration::from_secs(config.server.shutdown_timeout);
    match tokio::time::timeout(grace, server).await {
        Ok(result) => result??,
        Err(_) => warn!(timeout_secs = grace.as_secs(), "In-flight requests did not drain in time"),
    }

    info!("Server stopped");
    Ok(())
}

/// Graceful shutdown signal handler.
///
/// Waits for:
/// - Ctrl+C (SIGINT)
/// - SIGTERM (in production environments)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
