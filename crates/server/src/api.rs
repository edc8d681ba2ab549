//! HTTP API for model management, prediction, health checks and metrics

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use predictor_lib::{
    features::INTERVENTION_FEATURES,
    health::{ComponentStatus, HealthRegistry},
    observability::{ServiceMetrics, StructuredLogger},
    prepare_prediction_data, ClientRecord, ErrorKind, InterventionFlags, ModelError,
    ModelRegistry, RegistryOverview,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: ModelRegistry,
    pub health_registry: HealthRegistry,
    pub metrics: ServiceMetrics,
    pub logger: StructuredLogger,
}

impl AppState {
    pub fn new(
        registry: ModelRegistry,
        health_registry: HealthRegistry,
        metrics: ServiceMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            registry,
            health_registry,
            metrics,
            logger,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelResponse {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub client: ClientRecord,
    #[serde(default)]
    pub interventions: InterventionFlags,
    /// Registered model to use instead of the current one
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictResponse {
    pub model: String,
    pub success_rate: f64,
}

/// Error body: `{"detail": ..., "kind": ...}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
    kind: &'static str,
}

impl ApiError {
    fn internal(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: detail.into(),
            kind: "internal",
        }
    }
}

impl From<ModelError> for ApiError {
    fn from(err: ModelError) -> Self {
        let kind = err.kind();
        let status = match kind {
            ErrorKind::NotRegistered => StatusCode::NOT_FOUND,
            ErrorKind::NotTrained => StatusCode::CONFLICT,
            ErrorKind::DataIntegrity | ErrorKind::InvalidInput => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Persistence => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            detail: err.to_string(),
            kind: kind.as_str(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "detail": self.detail, "kind": self.kind });
        (self.status, Json(body)).into_response()
    }
}

/// Name of the current model
async fn current_model(State(state): State<Arc<AppState>>) -> Json<ModelResponse> {
    Json(ModelResponse {
        name: state.registry.current_model_name(),
    })
}

/// Registered models and the current one
async fn available_models(State(state): State<Arc<AppState>>) -> Json<RegistryOverview> {
    Json(state.registry.overview())
}

/// Switch the current model
async fn switch_model(
    State(state): State<Arc<AppState>>,
    Path(model_name): Path<String>,
) -> Result<Json<ModelResponse>, ApiError> {
    let switched = state
        .registry
        .switch_current_model(&model_name, |_, current| {
            state.metrics.set_current_model(current)
        });
    let previous = match switched {
        Ok(previous) => previous,
        Err(err) => {
            let mut api_error = ApiError::from(err);
            api_error.detail = format!(
                "Model '{}' not found. Available models: {}",
                model_name,
                state.registry.list_available_models().join(", ")
            );
            return Err(api_error);
        }
    };

    state.metrics.inc_model_switches();
    state
        .logger
        .log_model_switch(previous.as_deref(), &model_name);

    Ok(Json(ModelResponse {
        name: Some(model_name),
    }))
}

/// Predict the success rate of a client under the requested interventions
async fn predict(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PredictRequest>,
) -> Result<Json<PredictResponse>, ApiError> {
    let started = Instant::now();
    let row = prepare_prediction_data(&request.client, &request.interventions);

    let prediction = match state.registry.predict(request.model.as_deref(), row.view()) {
        Ok(prediction) => prediction,
        Err(err) => {
            state.metrics.inc_prediction_errors(err.kind().as_str());
            return Err(err.into());
        }
    };
    let success_rate = prediction.values[0];
    let latency = started.elapsed().as_secs_f64();

    state.metrics.observe_prediction_latency(latency);
    state.metrics.inc_predictions(&prediction.model);
    let selected = selected_interventions(&request.interventions);
    state
        .logger
        .log_prediction(&prediction.model, success_rate, selected, latency);

    Ok(Json(PredictResponse {
        model: prediction.model,
        success_rate,
    }))
}

/// Number of known interventions switched on. Unknown names are ignored by
/// the feature pipeline and are not counted.
fn selected_interventions(interventions: &InterventionFlags) -> usize {
    interventions
        .iter()
        .filter(|(name, on)| **on && INTERVENTION_FEATURES.contains(&name.as_str()))
        .count()
}

/// Health check response - returns 200 if operational, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if the current model can serve
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness(&state.registry).await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    state.metrics.set_trained_models(state.registry.trained_count());

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).map_err(|e| {
        error!(error = %e, "Failed to encode metrics");
        ApiError::internal(e.to_string())
    })?;

    Ok((
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        buffer,
    ))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/models/current", get(current_model))
        .route("/models/available", get(available_models))
        .route("/models/switch/:model_name", post(switch_model))
        .route("/predict", post(predict))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server and run until `shutdown` resolves
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
