//! Service configuration

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Service configuration, read from `OUTCOME_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Name attached to structured log events
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Port for the HTTP API
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Directory holding persisted models
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,

    /// Labelled CSV used for start-up training
    #[serde(default = "default_dataset_path")]
    pub dataset_path: PathBuf,

    /// Model selected as current once the registry is populated
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Train models that were not restored from `model_dir`
    #[serde(default = "default_train_on_startup")]
    pub train_on_startup: bool,
}

fn default_service_name() -> String {
    "outcome-service".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_model_dir() -> PathBuf {
    PathBuf::from("models")
}

fn default_dataset_path() -> PathBuf {
    PathBuf::from(predictor_lib::dataset::DEFAULT_DATASET)
}

fn default_model() -> String {
    "RandomForest".to_string()
}

fn default_train_on_startup() -> bool {
    true
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            api_port: default_api_port(),
            model_dir: default_model_dir(),
            dataset_path: default_dataset_path(),
            default_model: default_model(),
            train_on_startup: default_train_on_startup(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self> {
        Self::from_source(None)
    }

    /// Load configuration from an explicit variable map instead of the
    /// process environment
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self> {
        Self::from_source(Some(vars))
    }

    fn from_source(vars: Option<HashMap<String, String>>) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("OUTCOME")
                    .try_parsing(true)
                    .source(vars),
            )
            .build()
            .context("Failed to read service configuration")?;

        config
            .try_deserialize()
            .context("Invalid service configuration")
    }
}
