//! Health tracking for the prediction service
//!
//! Components report their own status; readiness additionally requires the
//! registry's current model to be trained.

use crate::registry::{lock_model, ModelRegistry};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Serving, but e.g. on untrained models or without persistence
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn now(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status among the components, healthy when there are none
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Components the service reports on
pub mod components {
    pub const REGISTRY: &str = "registry";
    pub const MODEL_STORE: &str = "model_store";
    pub const TRAINING: &str = "training";
}

/// Latest reported status per component, shared between the bootstrap code
/// and the health endpoints
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    reports: Arc<RwLock<HashMap<String, ComponentHealth>>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    async fn report(&self, component: &str, status: ComponentStatus, message: Option<String>) {
        self.reports
            .write()
            .await
            .insert(component.to_string(), ComponentHealth::now(status, message));
    }

    /// Start tracking a component as healthy
    pub async fn register(&self, component: &str) {
        self.report(component, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_healthy(&self, component: &str) {
        self.report(component, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_degraded(&self, component: &str, message: impl Into<String>) {
        self.report(component, ComponentStatus::Degraded, Some(message.into()))
            .await;
    }

    pub async fn set_unhealthy(&self, component: &str, message: impl Into<String>) {
        self.report(component, ComponentStatus::Unhealthy, Some(message.into()))
            .await;
    }

    /// Report the registry component: unhealthy when no model is registered,
    /// since every prediction would then fail.
    pub async fn check_registry(&self, registry: &ModelRegistry) -> ComponentStatus {
        if registry.is_empty() {
            self.set_unhealthy(components::REGISTRY, "No models registered")
                .await;
            ComponentStatus::Unhealthy
        } else {
            self.set_healthy(components::REGISTRY).await;
            ComponentStatus::Healthy
        }
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.reports.read().await.clone();
        HealthResponse {
            status: HealthResponse::compute_status(&components),
            components,
        }
    }

    /// Ready when no component is unhealthy and the current model can serve
    /// predictions.
    pub async fn readiness(&self, registry: &ModelRegistry) -> ReadinessResponse {
        let current_model = registry.current_model_name();

        let reason = if self.health().await.status == ComponentStatus::Unhealthy {
            Some("Critical component unhealthy".to_string())
        } else {
            match registry.get_model(None) {
                Err(_) => Some("No current model registered".to_string()),
                Ok(model) if !lock_model(&model).is_trained() => {
                    Some("Current model is not trained".to_string())
                }
                Ok(_) => None,
            }
        };

        ReadinessResponse {
            ready: reason.is_none(),
            current_model,
            reason,
        }
    }
}
