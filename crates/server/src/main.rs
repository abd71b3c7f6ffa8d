mod bootstrap;
mod health;
mod routes;

use std::time::Duration;

use anyhow::Result;
use dastyar_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use dastyar_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Config and logging come up before anything that might want to log.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap(LoadOptions::default()).await?;
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    tracing::info!(event_name = "server_started", bind_address = %address);

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    let shutdown = std::sync::Arc::new(tokio::sync::Notify::new());
    let shutdown_signal = shutdown.clone();
    let router = routes::router(app.state);
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown_signal.notified().await })
            .await
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!(event_name = "server_stopping", grace_secs = grace.as_secs());
    shutdown.notify_one();

    // In-flight requests drain within the grace period or get cut off.
    match tokio::time::timeout(grace, server).await {
        Ok(result) => result??,
        Err(_) => {
            tracing::warn!(event_name = "shutdown_grace_exceeded", "in-flight requests cut off");
        }
    }

    tracing::info!(event_name = "server_stopped");
    app.db_pool.close().await;
    Ok(())
}
