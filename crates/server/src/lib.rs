//! Success-rate prediction service
//!
//! Serves the model registry over HTTP: model listing and switching,
//! predictions, health checks and Prometheus metrics.

pub mod api;
pub mod config;
pub mod startup;

pub use api::{create_router, serve, AppState};
pub use config::ServiceConfig;
