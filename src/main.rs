//! Churn Prediction Service - Main Entry Point
//!
//! Loads model artifacts and serves predictions over HTTP. A failed model load
//! keeps the process up so `/health` can report why.

use anyhow::{Context, Result};
use churn_prediction_service::{
    config::AppConfig,
    logging,
    metrics::{MetricsReporter, ServiceMetrics},
    models::inference::InferenceEngine,
    server::{self, AppState},
};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    logging::init(&config.logging)?;

    info!("Starting Churn Prediction Service");
    info!(
        "Decision threshold: {:.2}, strict encoding: {}",
        config.decision.threshold, config.encoding.strict
    );

    let metrics = Arc::new(ServiceMetrics::new());

    if config.metrics.report_interval_secs > 0 {
        let reporter = MetricsReporter::new(metrics.clone(), config.metrics.report_interval_secs);
        tokio::spawn(reporter.start());
    }

    let state = match InferenceEngine::init(&config).await {
        Ok(engine) => {
            info!(
                model = engine.model_name(),
                features = engine.schema().len(),
                threshold = engine.threshold(),
                "Model ready"
            );
            AppState::ready(Arc::new(engine), metrics.clone())
        }
        Err(e) => {
            error!(error = %e, "Model failed to load; serving in degraded mode");
            AppState::unavailable(e.to_string(), metrics.clone())
        }
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Listening on {}", addr);

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(server::shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Service shutting down...");
    metrics.print_summary();

    Ok(())
}
