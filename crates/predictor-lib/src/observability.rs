//! Observability for the prediction service
//!
//! Provides:
//! - Prometheus metrics (prediction and training latency, prediction counts, model state)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, register_int_gauge_vec, Histogram, HistogramVec, IntCounter,
    IntCounterVec, IntGauge, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for prediction latency (in seconds)
const PREDICTION_BUCKETS: &[f64] = &[
    0.00005, 0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25,
];

/// Histogram buckets for training duration (in seconds)
const TRAINING_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ServiceMetricsInner> = OnceLock::new();

struct ServiceMetricsInner {
    prediction_latency_seconds: Histogram,
    training_duration_seconds: HistogramVec,
    predictions: IntCounterVec,
    prediction_errors: IntCounterVec,
    model_switches: IntCounter,
    current_model_info: IntGaugeVec,
    trained_models: IntGauge,
}

impl ServiceMetricsInner {
    fn new() -> Self {
        Self {
            prediction_latency_seconds: register_histogram!(
                "outcome_service_prediction_latency_seconds",
                "Time spent building features and running a model prediction",
                PREDICTION_BUCKETS.to_vec()
            )
            .expect("Failed to register prediction_latency_seconds"),

            training_duration_seconds: register_histogram_vec!(
                "outcome_service_training_duration_seconds",
                "Time spent training a model",
                &["model"],
                TRAINING_BUCKETS.to_vec()
            )
            .expect("Failed to register training_duration_seconds"),

            predictions: register_int_counter_vec!(
                "outcome_service_predictions_total",
                "Total number of success-rate predictions served",
                &["model"]
            )
            .expect("Failed to register predictions_total"),

            prediction_errors: register_int_counter_vec!(
                "outcome_service_prediction_errors_total",
                "Total number of failed prediction requests",
                &["kind"]
            )
            .expect("Failed to register prediction_errors_total"),

            model_switches: register_int_counter!(
                "outcome_service_model_switches_total",
                "Total number of current-model switches"
            )
            .expect("Failed to register model_switches_total"),

            current_model_info: register_int_gauge_vec!(
                "outcome_service_current_model_info",
                "Model used when a request does not name one",
                &["model"]
            )
            .expect("Failed to register current_model_info"),

            trained_models: register_int_gauge!(
                "outcome_service_trained_models",
                "Number of registered models that are trained"
            )
            .expect("Failed to register trained_models"),
        }
    }
}

/// Service metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct ServiceMetrics {
    _private: (),
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ServiceMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ServiceMetricsInner {
        GLOBAL_METRICS.get_or_init(ServiceMetricsInner::new)
    }

    pub fn observe_prediction_latency(&self, duration_secs: f64) {
        self.inner().prediction_latency_seconds.observe(duration_secs);
    }

    pub fn observe_training_duration(&self, model: &str, duration_secs: f64) {
        self.inner()
            .training_duration_seconds
            .with_label_values(&[model])
            .observe(duration_secs);
    }

    pub fn inc_predictions(&self, model: &str) {
        self.inner().predictions.with_label_values(&[model]).inc();
    }

    pub fn inc_prediction_errors(&self, kind: &str) {
        self.inner().prediction_errors.with_label_values(&[kind]).inc();
    }

    pub fn inc_model_switches(&self) {
        self.inner().model_switches.inc();
    }

    /// Mark `model` as the current model, clearing the previous label
    pub fn set_current_model(&self, model: &str) {
        self.inner().current_model_info.reset();
        self.inner()
            .current_model_info
            .with_label_values(&[model])
            .set(1);
    }

    pub fn set_trained_models(&self, count: usize) {
        self.inner().trained_models.set(count as i64);
    }
}

/// Structured logger for service events
///
/// Every record carries an `event` field so log pipelines can filter on it.
#[derive(Clone)]
pub struct StructuredLogger {
    service_name: String,
}

impl StructuredLogger {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn log_startup(&self, version: &str, current_model: Option<&str>, port: u16) {
        info!(
            event = "service_started",
            service = %self.service_name,
            version = %version,
            current_model = ?current_model,
            port = port,
            "Prediction service started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "service_shutdown",
            service = %self.service_name,
            reason = %reason,
            "Prediction service shutting down"
        );
    }

    pub fn log_prediction(&self, model: &str, success_rate: f64, interventions: usize, latency_secs: f64) {
        info!(
            event = "prediction_served",
            service = %self.service_name,
            model = %model,
            success_rate = success_rate,
            interventions = interventions,
            latency_ms = latency_secs * 1000.0,
            "Served success-rate prediction"
        );
    }

    pub fn log_model_switch(&self, previous: Option<&str>, current: &str) {
        info!(
            event = "model_switched",
            service = %self.service_name,
            previous = ?previous,
            current = %current,
            "Current model switched"
        );
    }

    pub fn log_training(&self, model: &str, rows: usize, duration_secs: f64, success: bool) {
        if success {
            info!(
                event = "model_trained",
                service = %self.service_name,
                model = %model,
                rows = rows,
                duration_secs = duration_secs,
                "Model trained"
            );
        } else {
            warn!(
                event = "model_training_failed",
                service = %self.service_name,
                model = %model,
                rows = rows,
                "Model training failed, model stays untrained"
            );
        }
    }

    pub fn log_models_restored(&self, dir: &str, restored: usize) {
        info!(
            event = "models_restored",
            service = %self.service_name,
            model_dir = %dir,
            restored = restored,
            "Restored persisted models"
        );
    }
}
