//! Prediction core for client success rates
//!
//! This crate provides:
//! - The feature schema and dataset loading
//! - Regression estimators behind a common [`Model`] trait
//! - Model persistence and a registry with a switchable current model
//! - Health checks and observability for the serving layer

pub mod dataset;
pub mod error;
pub mod evaluation;
pub mod features;
pub mod health;
pub mod models;
pub mod observability;
pub mod persist;
pub mod registry;

pub use dataset::{DataProcessor, Dataset, TrainTestSplit};
pub use error::{ErrorKind, ModelError, Result};
pub use evaluation::{evaluate, RegressionMetrics};
pub use features::{
    prepare_prediction_data, ClientRecord, FeatureValue, InterventionFlags, FEATURE_COUNT,
};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::{Model, ModelFamily};
pub use observability::{ServiceMetrics, StructuredLogger};
pub use persist::{load_model, save_model, ModelSnapshot};
pub use registry::{lock_model, ModelRegistry, ModelStore, Prediction, RegistryOverview, SharedModel};
