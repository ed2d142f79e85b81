//! FraudPulse - Main Entry Point
//!
//! Loads the dataset and models, starts the live feed, and serves the HTTP and
//! WebSocket API until interrupted.

use anyhow::{Context, Result};
use fraud_pulse::{api, config::AppConfig, service::ServiceContext};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration before logging so the level can come from it
    let config = AppConfig::load()?;

    init_logging(&config.logging.level, &config.logging.format)?;
    info!("Starting FraudPulse");
    info!(
        dataset = %config.data.dataset_path,
        models_dir = %config.models.models_dir,
        buffer_capacity = config.stream.buffer_capacity,
        "Configuration loaded successfully"
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let context = Arc::new(ServiceContext::init(config));
    info!(
        models_loaded = context.models_loaded(),
        data_loaded = context.data_loaded(),
        "Service context initialized"
    );

    let tasks = context.spawn_background().await;
    info!(tasks = tasks.len(), "Background tasks started");

    let app = api::create_router(context.clone());
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("FraudPulse shutting down...");
    tasks.shutdown().await;
    context.metrics().print_summary();

    Ok(())
}

fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("fraud_pulse={}", level).parse()?)
        .add_directive("tower_http=info".parse()?);

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
