//! Outcome Server - client success-rate prediction service
//!
//! Restores or trains the model registry, then serves it over HTTP until
//! interrupted.

use anyhow::Result;
use outcome_server::{api, config::ServiceConfig, startup};
use predictor_lib::{
    health::HealthRegistry,
    observability::{ServiceMetrics, StructuredLogger},
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting outcome-server");

    let config = ServiceConfig::load()?;
    info!(
        service_name = %config.service_name,
        model_dir = %config.model_dir.display(),
        dataset = %config.dataset_path.display(),
        "Service configured"
    );

    let health_registry = HealthRegistry::new();
    let metrics = ServiceMetrics::new();
    let logger = StructuredLogger::new(&config.service_name);

    let registry = startup::prepare_registry(&config, &health_registry, &metrics, &logger).await?;
    logger.log_startup(
        SERVICE_VERSION,
        registry.current_model_name().as_deref(),
        config.api_port,
    );

    let app_state = Arc::new(api::AppState::new(
        registry,
        health_registry,
        metrics,
        logger.clone(),
    ));

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
    };
    api::serve(config.api_port, app_state, shutdown).await?;

    logger.log_shutdown("SIGINT received");
    Ok(())
}
