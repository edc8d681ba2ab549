//! Registry bootstrap: restore persisted models, then train what is missing

use crate::config::ServiceConfig;
use anyhow::{Context, Result};
use predictor_lib::{
    evaluation::evaluate,
    health::{components, HealthRegistry},
    lock_model, DataProcessor, ModelRegistry, ModelStore, ServiceMetrics, StructuredLogger,
};
use tracing::{info, warn};

/// Build the registry the service will serve from. Failures to restore or
/// train degrade the service rather than stopping it; an unknown default
/// model is a configuration error.
pub async fn prepare_registry(
    config: &ServiceConfig,
    health: &HealthRegistry,
    metrics: &ServiceMetrics,
    logger: &StructuredLogger,
) -> Result<ModelRegistry> {
    let registry = ModelRegistry::with_default_models();
    registry
        .set_current_model(&config.default_model)
        .with_context(|| format!("Invalid default model '{}'", config.default_model))?;

    health.check_registry(&registry).await;
    health.register(components::MODEL_STORE).await;
    health.register(components::TRAINING).await;

    let store = ModelStore::new(&config.model_dir);
    let restore = {
        let registry = registry.clone();
        let store = store.clone();
        tokio::task::spawn_blocking(move || store.restore(&registry)).await?
    };
    match restore {
        Ok(restored) => {
            logger.log_models_restored(&store.dir().display().to_string(), restored);
        }
        Err(e) => {
            warn!(error = %e, "Failed to restore persisted models");
            health
                .set_degraded(components::MODEL_STORE, e.to_string())
                .await;
        }
    }

    if registry.trained_count() < registry.len() {
        if config.train_on_startup {
            let trained = {
                let registry = registry.clone();
                let store = store.clone();
                let processor = DataProcessor::new(&config.dataset_path);
                let metrics = metrics.clone();
                let logger = logger.clone();
                tokio::task::spawn_blocking(move || {
                    train_registry(&registry, &store, &processor, &metrics, &logger)
                })
                .await?
            };
            if let Err(e) = trained {
                warn!(error = %e, "Start-up training failed");
                health.set_degraded(components::TRAINING, e.to_string()).await;
            }
        } else {
            health
                .set_degraded(components::TRAINING, "Start-up training disabled")
                .await;
        }
    }

    if let Some(current) = registry.current_model_name() {
        metrics.set_current_model(&current);
    }
    metrics.set_trained_models(registry.trained_count());
    Ok(registry)
}

/// Train every registered model on the dataset, report held-out scores and
/// persist the results.
pub fn train_registry(
    registry: &ModelRegistry,
    store: &ModelStore,
    processor: &DataProcessor,
    metrics: &ServiceMetrics,
    logger: &StructuredLogger,
) -> Result<()> {
    let split = processor.prepare_training_data()?;
    let rows = split.targets_train.len();

    let runs = match registry.train_all(split.features_train.view(), split.targets_train.view()) {
        Ok(runs) => runs,
        Err(e) => {
            for name in registry.list_available_models() {
                logger.log_training(&name, rows, 0.0, false);
            }
            return Err(e.into());
        }
    };

    for run in &runs {
        let secs = run.elapsed.as_secs_f64();
        metrics.observe_training_duration(&run.model, secs);
        logger.log_training(&run.model, rows, secs, true);

        let shared = registry.get_model(Some(run.model.as_str()))?;
        let model = lock_model(&shared);
        let scores = evaluate(
            &**model,
            split.features_test.view(),
            split.targets_test.view(),
        )?;
        info!(
            model = %run.model,
            r2 = scores.r2,
            mae = scores.mae,
            rmse = scores.rmse,
            samples = scores.samples,
            "Held-out evaluation"
        );
    }

    let saved = store.save_all(registry)?;
    info!(saved, dir = %store.dir().display(), "Trained models saved");
    Ok(())
}
