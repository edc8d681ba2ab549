//! Thread-safe model registry with a switchable current model
//!
//! The registry maps names to shared estimators and keeps a pointer to the
//! model used when a caller does not ask for one by name. Map, listing order
//! and pointer live behind a single lock, so readers never see a switch
//! half-applied. Each model has its own mutex, which serializes training and
//! prediction on that model without blocking the rest of the registry.

use crate::error::{ModelError, Result};
use crate::models::{Model, ModelFamily};
use crate::persist;
use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// A model shared between the registry and its callers
pub type SharedModel = Arc<Mutex<Box<dyn Model>>>;

pub fn share(model: Box<dyn Model>) -> SharedModel {
    Arc::new(Mutex::new(model))
}

/// Lock a shared model. A panic while holding the lock cannot leave a model
/// half-updated (fitted state is replaced whole), so poisoning is ignored.
pub fn lock_model(model: &SharedModel) -> MutexGuard<'_, Box<dyn Model>> {
    model.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct RegistryState {
    models: HashMap<String, SharedModel>,
    /// Registration order, used for listing
    order: Vec<String>,
    current: Option<String>,
}

/// Models available for listing, as seen at one instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryOverview {
    pub models: Vec<String>,
    pub current_model: Option<String>,
}

/// Result of a registry prediction
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// Name the model was resolved to
    pub model: String,
    pub values: Array1<f64>,
}

/// Timing of one model's training run
#[derive(Debug, Clone)]
pub struct TrainingRun {
    pub model: String,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl ModelRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding one untrained estimator of every family, with
    /// `RandomForest` as the current model.
    pub fn with_default_models() -> Self {
        let registry = Self::new();
        for family in ModelFamily::ALL {
            registry.register_model(family.name(), family.build());
        }
        info!(
            models = ?registry.list_available_models(),
            current = ?registry.current_model_name(),
            "Model registry initialized"
        );
        registry
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a model under `name`, replacing any model already registered
    /// under it. The first model registered becomes the current one.
    pub fn register_model(&self, name: impl Into<String>, model: Box<dyn Model>) -> SharedModel {
        let name = name.into();
        let shared = share(model);
        let mut state = self.write();

        if state.models.insert(name.clone(), shared.clone()).is_none() {
            state.order.push(name.clone());
        }
        if state.current.is_none() {
            state.current = Some(name.clone());
        }
        debug!(model = %name, "Model registered");
        shared
    }

    /// Model registered under `name`, or the current model when `name` is `None`.
    pub fn get_model(&self, name: Option<&str>) -> Result<SharedModel> {
        let state = self.read();
        resolve(&state, name).map(|(_, model)| model)
    }

    /// Point the registry at another registered model. Returns the name that
    /// was current before the switch.
    pub fn set_current_model(&self, name: &str) -> Result<Option<String>> {
        self.switch_current_model(name, |_, _| {})
    }

    /// Like [`set_current_model`](Self::set_current_model), running
    /// `on_switch(previous, current)` while the switch still holds the
    /// registry lock. Observers updated there see switches in registry order.
    pub fn switch_current_model<F>(&self, name: &str, on_switch: F) -> Result<Option<String>>
    where
        F: FnOnce(Option<&str>, &str),
    {
        let mut state = self.write();
        if !state.models.contains_key(name) {
            return Err(ModelError::NotRegistered(name.to_string()));
        }
        let previous = state.current.replace(name.to_string());
        on_switch(previous.as_deref(), name);
        info!(previous = ?previous, current = %name, "Current model switched");
        Ok(previous)
    }

    pub fn current_model_name(&self) -> Option<String> {
        self.read().current.clone()
    }

    /// Registered names in registration order
    pub fn list_available_models(&self) -> Vec<String> {
        self.read().order.clone()
    }

    pub fn overview(&self) -> RegistryOverview {
        let state = self.read();
        RegistryOverview {
            models: state.order.clone(),
            current_model: state.current.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().order.is_empty()
    }

    /// Number of registered models that have been trained
    pub fn trained_count(&self) -> usize {
        self.models()
            .iter()
            .filter(|(_, model)| lock_model(model).is_trained())
            .count()
    }

    /// Predict with the named model, or the current model when `name` is `None`.
    pub fn predict(&self, name: Option<&str>, features: ArrayView2<f64>) -> Result<Prediction> {
        let (resolved, model) = {
            let state = self.read();
            resolve(&state, name)?
        };
        let values = lock_model(&model).predict(features)?;
        Ok(Prediction {
            model: resolved,
            values,
        })
    }

    /// Train every registered model on the same data, in registration order.
    pub fn train_all(
        &self,
        features: ArrayView2<f64>,
        targets: ArrayView1<f64>,
    ) -> Result<Vec<TrainingRun>> {
        let mut runs = Vec::new();
        for (name, model) in self.models() {
            let started = Instant::now();
            lock_model(&model).train(features, targets)?;
            let elapsed = started.elapsed();
            info!(
                model = %name,
                rows = features.nrows(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Model trained"
            );
            runs.push(TrainingRun {
                model: name,
                elapsed,
            });
        }
        Ok(runs)
    }

    /// Snapshot of (name, model) pairs in registration order. The registry
    /// lock is released before any model is locked.
    fn models(&self) -> Vec<(String, SharedModel)> {
        let state = self.read();
        state
            .order
            .iter()
            .filter_map(|name| state.models.get(name).map(|m| (name.clone(), m.clone())))
            .collect()
    }
}

fn resolve(state: &RegistryState, name: Option<&str>) -> Result<(String, SharedModel)> {
    let name = match name {
        Some(name) => name,
        None => state
            .current
            .as_deref()
            .ok_or_else(|| ModelError::NotRegistered("<current>".to_string()))?,
    };
    state
        .models
        .get(name)
        .map(|model| (name.to_string(), model.clone()))
        .ok_or_else(|| ModelError::NotRegistered(name.to_string()))
}

/// A directory of persisted models, one `<name>.model.json` file per
/// registered name
#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.model.json", name))
    }

    /// Save every trained model in the registry. Returns the number saved.
    pub fn save_all(&self, registry: &ModelRegistry) -> Result<usize> {
        let mut saved = 0;
        for (name, model) in registry.models() {
            let model = lock_model(&model);
            if !model.is_trained() {
                debug!(model = %name, "Skipping untrained model");
                continue;
            }
            persist::save_model(&**model, &self.path_for(&name))?;
            saved += 1;
        }
        Ok(saved)
    }

    /// Replace registered models with their saved counterparts, when a file
    /// exists. Callers holding a [`SharedModel`] see the restored state.
    /// Every file is loaded and checked against the registered family before
    /// any model is replaced. Returns the number of models restored.
    pub fn restore(&self, registry: &ModelRegistry) -> Result<usize> {
        let mut loaded = Vec::new();
        for (name, shared) in registry.models() {
            let path = self.path_for(&name);
            if !path.exists() {
                continue;
            }
            let saved = persist::load_model(&path)?;
            let registered = lock_model(&shared).name();
            if saved.name() != registered {
                return Err(ModelError::corrupt(
                    &path,
                    format!(
                        "saved family {} does not match registered {}",
                        saved.name(),
                        registered
                    ),
                ));
            }
            loaded.push((name, shared, saved));
        }

        let restored = loaded.len();
        for (name, shared, saved) in loaded {
            *lock_model(&shared) = saved;
            debug!(model = %name, "Model restored");
        }
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{read_dataset, tests::synthetic_csv, train_test_split};
    use crate::error::ErrorKind;
    use crate::features::{prepare_prediction_data, ClientRecord, FeatureValue, InterventionFlags};
    use crate::models::{
        GradientBoostingModel, GradientBoostingParams, LinearRegressionModel, RandomForestModel,
        RandomForestParams,
    };
    use std::thread;
    use tempfile::TempDir;

    fn small_registry() -> ModelRegistry {
        let registry = ModelRegistry::new();
        registry.register_model(
            "RandomForest",
            Box::new(RandomForestModel::new(RandomForestParams {
                n_estimators: 10,
                ..RandomForestParams::default()
            })),
        );
        registry.register_model(
            "GradientBoosting",
            Box::new(GradientBoostingModel::new(GradientBoostingParams {
                n_estimators: 20,
                ..GradientBoostingParams::default()
            })),
        );
        registry.register_model("LinearRegression", Box::new(LinearRegressionModel::default()));
        registry
    }

    fn train(registry: &ModelRegistry) {
        let dataset = read_dataset(synthetic_csv(60).as_bytes()).unwrap();
        let split = train_test_split(&dataset, 0.2, 42).unwrap();
        registry
            .train_all(split.features_train.view(), split.targets_train.view())
            .unwrap();
    }

    #[test]
    fn test_empty_registry() {
        let registry = ModelRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.current_model_name(), None);
        assert!(registry.list_available_models().is_empty());
        assert!(matches!(
            registry.get_model(None),
            Err(ModelError::NotRegistered(_))
        ));
    }

    #[test]
    fn test_register_then_get_returns_same_model() {
        let registry = ModelRegistry::new();
        let shared = registry.register_model("X", Box::new(LinearRegressionModel::default()));
        let fetched = registry.get_model(Some("X")).unwrap();
        assert!(Arc::ptr_eq(&shared, &fetched));

        match registry.get_model(Some("Y")) {
            Err(err) => assert_eq!(err.kind(), ErrorKind::NotRegistered),
            Ok(_) => panic!("unknown name resolved"),
        }
    }

    #[test]
    fn test_first_registrant_is_current() {
        let registry = small_registry();
        assert_eq!(registry.current_model_name().as_deref(), Some("RandomForest"));
        let current = registry.get_model(None).unwrap();
        assert_eq!(lock_model(&current).name(), "RandomForest");
    }

    #[test]
    fn test_default_models() {
        let registry = ModelRegistry::with_default_models();
        assert_eq!(
            registry.overview(),
            RegistryOverview {
                models: vec![
                    "RandomForest".to_string(),
                    "GradientBoosting".to_string(),
                    "LinearRegression".to_string()
                ],
                current_model: Some("RandomForest".to_string()),
            }
        );
        assert_eq!(registry.trained_count(), 0);
    }

    #[test]
    fn test_switch_to_unknown_leaves_pointer() {
        let registry = small_registry();
        registry.set_current_model("LinearRegression").unwrap();

        let err = registry.set_current_model("svm").unwrap_err();
        assert!(matches!(err, ModelError::NotRegistered(ref name) if name == "svm"));
        assert_eq!(
            registry.current_model_name().as_deref(),
            Some("LinearRegression")
        );
    }

    #[test]
    fn test_overwrite_keeps_listing_position() {
        let registry = small_registry();
        let replacement =
            registry.register_model("RandomForest", Box::new(LinearRegressionModel::default()));
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.list_available_models()[0], "RandomForest");
        assert!(Arc::ptr_eq(
            &replacement,
            &registry.get_model(Some("RandomForest")).unwrap()
        ));
    }

    #[test]
    fn test_end_to_end_train_predict_switch() {
        let registry = small_registry();
        train(&registry);
        assert_eq!(registry.trained_count(), 3);

        let mut client = ClientRecord::new();
        client.insert("age".to_string(), FeatureValue::Number(35.0));
        let mut interventions = InterventionFlags::new();
        interventions.insert("employment_assistance".to_string(), true);
        let row = prepare_prediction_data(&client, &interventions);

        for name in registry.list_available_models() {
            let prediction = registry.predict(Some(name.as_str()), row.view()).unwrap();
            assert_eq!(prediction.model, name);
            assert!(prediction.values[0].is_finite());
        }

        registry.set_current_model("GradientBoosting").unwrap();
        let via_current = registry.predict(None, row.view()).unwrap();
        let via_name = registry.predict(Some("GradientBoosting"), row.view()).unwrap();
        assert_eq!(via_current, via_name);
    }

    #[test]
    fn test_predict_untrained_current() {
        let registry = small_registry();
        let row = ndarray::Array2::<f64>::zeros((1, 31));
        match registry.predict(None, row.view()) {
            Err(ModelError::NotTrained(name)) => assert_eq!(name, "RandomForest"),
            other => panic!("expected NotTrained, got {:?}", other),
        }
    }

    #[test]
    fn test_concurrent_switch_and_read() {
        let registry = small_registry();
        let names = registry.list_available_models();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                let names = names.clone();
                thread::spawn(move || {
                    for j in 0..200 {
                        if i % 2 == 0 {
                            registry
                                .set_current_model(&names[(i + j) % names.len()])
                                .unwrap();
                        } else {
                            let overview = registry.overview();
                            let current = overview.current_model.unwrap();
                            assert!(overview.models.contains(&current));
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(names.contains(&registry.current_model_name().unwrap()));
    }

    #[test]
    fn test_switch_observers_see_switches_in_order() {
        let registry = small_registry();
        let names = registry.list_available_models();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let registry = registry.clone();
                let names = names.clone();
                let seen = seen.clone();
                thread::spawn(move || {
                    for j in 0..100 {
                        let name = &names[(i + j) % names.len()];
                        let previous = registry
                            .switch_current_model(name, |previous, current| {
                                seen.lock().unwrap().push((
                                    previous.map(str::to_string),
                                    current.to_string(),
                                ))
                            })
                            .unwrap();
                        assert!(previous.is_some());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 400);
        assert_eq!(seen[0].0.as_deref(), Some("RandomForest"));
        for pair in seen.windows(2) {
            assert_eq!(pair[1].0.as_deref(), Some(pair[0].1.as_str()));
        }
        assert_eq!(registry.current_model_name(), Some(seen[399].1.clone()));
    }

    #[test]
    fn test_set_current_model_returns_previous() {
        let registry = small_registry();
        assert_eq!(
            registry.set_current_model("LinearRegression").unwrap().as_deref(),
            Some("RandomForest")
        );
        assert_eq!(
            registry.set_current_model("GradientBoosting").unwrap().as_deref(),
            Some("LinearRegression")
        );
    }

    #[test]
    fn test_retrain_while_predicting() {
        let x_a = ndarray::Array2::from_shape_fn((30, 2), |(i, j)| ((i * (j + 2)) % 7) as f64);
        let y_a: Array1<f64> = x_a.rows().into_iter().map(|r| 1.0 + r[0] + 2.0 * r[1]).collect();
        let x_b = x_a.mapv(|v| v + 1.0);
        let y_b: Array1<f64> = x_b.rows().into_iter().map(|r| 5.0 - r[0] + r[1]).collect();
        let row = ndarray::array![[2.0, 3.0]];

        let expected_a = LinearRegressionModel::default()
            .trained(x_a.view(), y_a.view())
            .unwrap()
            .predict(row.view())
            .unwrap()[0];
        let expected_b = LinearRegressionModel::default()
            .trained(x_b.view(), y_b.view())
            .unwrap()
            .predict(row.view())
            .unwrap()[0];
        assert_ne!(expected_a, expected_b);

        let registry = ModelRegistry::new();
        let model = LinearRegressionModel::default()
            .trained(x_a.view(), y_a.view())
            .unwrap();
        registry.register_model("LinearRegression", Box::new(model));

        thread::scope(|scope| {
            scope.spawn(|| {
                let shared = registry.get_model(Some("LinearRegression")).unwrap();
                for i in 0..50 {
                    let (x, y) = if i % 2 == 0 { (&x_b, &y_b) } else { (&x_a, &y_a) };
                    lock_model(&shared).train(x.view(), y.view()).unwrap();
                }
            });
            scope.spawn(|| {
                for _ in 0..200 {
                    let value = registry
                        .predict(Some("LinearRegression"), row.view())
                        .unwrap()
                        .values[0];
                    assert!(value.is_finite());
                    assert!(
                        value == expected_a || value == expected_b,
                        "prediction {} matches neither fit",
                        value
                    );
                }
            });
        });
    }

    #[test]
    fn test_poisoned_model_lock_is_recovered() {
        let registry = small_registry();
        let model = registry.get_model(Some("LinearRegression")).unwrap();
        let poisoner = model.clone();
        let _ = thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison the model lock");
        })
        .join();

        assert!(model.is_poisoned());
        assert_eq!(lock_model(&model).name(), "LinearRegression");
    }

    #[test]
    fn test_store_save_and_restore() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path());

        let trained = small_registry();
        train(&trained);
        trained.set_current_model("LinearRegression").unwrap();
        assert_eq!(store.save_all(&trained).unwrap(), 3);
        assert!(store.path_for("GradientBoosting").exists());

        let fresh = small_registry();
        let handle = fresh.get_model(Some("RandomForest")).unwrap();
        assert_eq!(store.restore(&fresh).unwrap(), 3);
        assert!(lock_model(&handle).is_trained());

        let row = ndarray::Array2::<f64>::from_elem((1, 31), 1.0);
        for name in trained.list_available_models() {
            assert_eq!(
                trained.predict(Some(name.as_str()), row.view()).unwrap().values,
                fresh.predict(Some(name.as_str()), row.view()).unwrap().values
            );
        }
    }

    #[test]
    fn test_restore_rejects_family_mismatch() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path());
        let linear = LinearRegressionModel::default()
            .trained(
                ndarray::array![[1.0], [2.0], [3.0]].view(),
                ndarray::array![2.0, 4.0, 6.0].view(),
            )
            .unwrap();
        persist::save_model(&linear, &store.path_for("RandomForest")).unwrap();

        let registry = ModelRegistry::with_default_models();
        let err = store.restore(&registry).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Persistence);
        assert!(
            err.to_string()
                .contains("saved family LinearRegression does not match registered RandomForest"),
            "{}",
            err
        );

        let model = registry.get_model(Some("RandomForest")).unwrap();
        let model = lock_model(&model);
        assert_eq!(model.name(), "RandomForest");
        assert!(!model.is_trained());
    }

    #[test]
    fn test_restore_mismatch_replaces_nothing() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path());
        let trained = small_registry();
        train(&trained);
        store.save_all(&trained).unwrap();
        std::fs::copy(
            store.path_for("LinearRegression"),
            store.path_for("GradientBoosting"),
        )
        .unwrap();

        let fresh = small_registry();
        assert!(store.restore(&fresh).is_err());
        assert_eq!(fresh.trained_count(), 0);
    }

    #[test]
    fn test_store_skips_untrained_and_missing() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path().join("models"));
        let registry = small_registry();
        assert_eq!(store.save_all(&registry).unwrap(), 0);
        assert_eq!(store.restore(&registry).unwrap(), 0);
    }
}
