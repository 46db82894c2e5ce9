//! HTTP surface: prediction, health and metrics endpoints

use crate::error::{EncodingError, PredictError};
use crate::metrics::ServiceMetrics;
use crate::models::InferenceEngine;
use crate::types::customer::CustomerRecord;
use crate::types::prediction::PredictionResult;
use axum::extract::{MatchedPath, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Whether the model finished loading at startup
pub enum Readiness {
    Ready(Arc<InferenceEngine>),
    Unavailable(String),
}

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    readiness: Arc<Readiness>,
    metrics: Arc<ServiceMetrics>,
}

impl AppState {
    pub fn ready(engine: Arc<InferenceEngine>, metrics: Arc<ServiceMetrics>) -> Self {
        Self {
            readiness: Arc::new(Readiness::Ready(engine)),
            metrics,
        }
    }

    /// State for a process whose model failed to load; prediction requests
    /// get 503 and `/health` reports the reason.
    pub fn unavailable(reason: impl Into<String>, metrics: Arc<ServiceMetrics>) -> Self {
        Self {
            readiness: Arc::new(Readiness::Unavailable(reason.into())),
            metrics,
        }
    }

    fn engine(&self) -> Result<&InferenceEngine, ApiError> {
        match self.readiness.as_ref() {
            Readiness::Ready(engine) => Ok(engine.as_ref()),
            Readiness::Unavailable(reason) => Err(ApiError::ModelUnavailable(reason.clone())),
        }
    }

    fn model_loaded(&self) -> bool {
        matches!(self.readiness.as_ref(), Readiness::Ready(_))
    }
}

/// Build the service router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/predict", post(predict))
        .route("/predict/batch", post(predict_batch))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route_layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .with_state(state)
}

async fn track_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| request.uri().path().to_owned());
    let start = Instant::now();

    let response = next.run(request).await;

    state.metrics.record_request(&route, response.status().as_u16());
    debug!(
        route = %route,
        status = response.status().as_u16(),
        elapsed_us = start.elapsed().as_micros() as u64,
        "Request handled"
    );
    response
}

async fn root() -> Json<Value> {
    Json(json!({ "message": "Churn Prediction API is running." }))
}

async fn predict(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<Json<PredictionResult>, ApiError> {
    let engine = state.engine()?;
    let record = CustomerRecord::try_from(payload)?;
    let result = run_prediction(&state, engine, &record)?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
struct BatchRequest {
    records: Vec<Value>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum BatchItem {
    Prediction(PredictionResult),
    Error { error: String, columns: Vec<String> },
}

async fn predict_batch(
    State(state): State<AppState>,
    Json(batch): Json<BatchRequest>,
) -> Result<Json<Value>, ApiError> {
    let engine = state.engine()?;

    let predictions: Vec<BatchItem> = batch
        .records
        .into_iter()
        .map(|payload| {
            let outcome = CustomerRecord::try_from(payload)
                .map_err(PredictError::from)
                .and_then(|record| run_prediction(&state, engine, &record));
            match outcome {
                Ok(result) => BatchItem::Prediction(result),
                Err(e) => BatchItem::Error {
                    columns: columns_of(&e),
                    error: e.to_string(),
                },
            }
        })
        .collect();

    Ok(Json(json!({ "predictions": predictions })))
}

/// Predict and record metrics for one record
fn run_prediction(
    state: &AppState,
    engine: &InferenceEngine,
    record: &CustomerRecord,
) -> Result<PredictionResult, PredictError> {
    let start = Instant::now();
    match engine.predict(record) {
        Ok(result) => {
            state
                .metrics
                .record_prediction(start.elapsed(), result.probability, result.label);
            Ok(result)
        }
        Err(e) => {
            state.metrics.record_error(e.kind());
            warn!(kind = e.kind(), error = %e, "Prediction failed");
            Err(e)
        }
    }
}

fn columns_of(error: &PredictError) -> Vec<String> {
    match error {
        PredictError::Encoding(e) => e.columns(),
        _ => Vec::new(),
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    model_loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    features: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match state.readiness.as_ref() {
        Readiness::Ready(engine) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                model_loaded: true,
                model: Some(engine.model_name().to_string()),
                features: Some(engine.schema().len()),
                threshold: Some(engine.threshold()),
                error: None,
            }),
        ),
        Readiness::Unavailable(reason) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unavailable",
                model_loaded: false,
                model: None,
                features: None,
                threshold: None,
                error: Some(reason.clone()),
            }),
        ),
    }
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.render_prometheus(state.model_loaded()),
    )
}

/// Errors surfaced to HTTP clients
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("model not loaded: {0}")]
    ModelUnavailable(String),

    #[error(transparent)]
    Prediction(#[from] PredictError),
}

impl From<EncodingError> for ApiError {
    fn from(e: EncodingError) -> Self {
        ApiError::Prediction(PredictError::Encoding(e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::ModelUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "error": self.to_string() }),
            ),
            ApiError::Prediction(PredictError::Encoding(EncodingError::NotAnObject(_))) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": self.to_string() }),
            ),
            ApiError::Prediction(PredictError::Encoding(e)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "error": self.to_string(), "columns": e.columns() }),
            ),
            ApiError::Prediction(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": self.to_string() }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

/// Resolves on Ctrl-C or SIGTERM. A handler that cannot be installed never
/// fires, so the server keeps running.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
