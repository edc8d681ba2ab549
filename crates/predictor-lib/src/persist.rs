//! Model persistence
//!
//! A saved model is a JSON envelope carrying the schema version, the save
//! time, a SHA-256 checksum of the serialized model and the model itself:
//!
//! ```json
//! {"schema_version": 1, "saved_at": "...", "checksum": "ab12...",
//!  "model": {"family": "LinearRegression", "state": {...}}}
//! ```
//!
//! Floats are written with round-trip precision, so a reloaded model
//! predicts exactly what the saved one did.

use crate::error::{ModelError, Result};
use crate::models::{Model, ModelFamily};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

/// Version of the envelope layout written by this build
pub const SCHEMA_VERSION: u32 = 1;

/// Complete state of one estimator: its family and the estimator's own
/// serialized form (hyperparameters and fitted parameters, or `null` when
/// untrained)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub family: ModelFamily,
    pub state: serde_json::Value,
}

impl ModelSnapshot {
    /// Capture a model's state. The family is taken from the model's name.
    pub fn of<M: Model + Serialize>(model: &M) -> Result<Self> {
        let family = model.name().parse::<ModelFamily>()?;
        let state = serde_json::to_value(model).map_err(|e| {
            ModelError::corrupt(model.name(), format!("serialization failed: {}", e))
        })?;
        Ok(Self { family, state })
    }

    pub fn family(&self) -> ModelFamily {
        self.family
    }

    /// Rebuild the estimator. `path` only labels the error.
    pub fn into_model(self, path: &Path) -> Result<Box<dyn Model>> {
        let family = self.family;
        let model = family.restore(self.state).map_err(|e| {
            ModelError::corrupt(path, format!("invalid {} state: {}", family, e))
        })?;
        if model.name() != family.name() {
            return Err(ModelError::corrupt(
                path,
                format!("state of {} restored as {}", family, model.name()),
            ));
        }
        Ok(model)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    schema_version: u32,
    saved_at: DateTime<Utc>,
    checksum: String,
    model: ModelSnapshot,
}

/// Write a snapshot to `path` via a temporary file and an atomic rename.
pub fn save_snapshot(snapshot: &ModelSnapshot, path: &Path) -> Result<()> {
    let model_bytes = serde_json::to_vec(snapshot)
        .map_err(|e| ModelError::corrupt(path, format!("serialization failed: {}", e)))?;
    let envelope = Envelope {
        schema_version: SCHEMA_VERSION,
        saved_at: Utc::now(),
        checksum: compute_checksum(&model_bytes),
        model: snapshot.clone(),
    };
    let bytes = serde_json::to_vec_pretty(&envelope)
        .map_err(|e| ModelError::corrupt(path, format!("serialization failed: {}", e)))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| ModelError::io(parent, e))?;
    }

    let temp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&temp_path).map_err(|e| ModelError::io(&temp_path, e))?;
        file.write_all(&bytes)
            .and_then(|_| file.sync_all())
            .map_err(|e| ModelError::io(&temp_path, e))?;
    }
    fs::rename(&temp_path, path).map_err(|e| ModelError::io(path, e))?;

    info!(
        family = %snapshot.family(),
        path = %path.display(),
        checksum = %envelope.checksum,
        size = bytes.len(),
        "Model saved"
    );
    Ok(())
}

pub fn save_model(model: &dyn Model, path: &Path) -> Result<()> {
    save_snapshot(&model.snapshot()?, path)
}

/// Read and verify a snapshot.
pub fn load_snapshot(path: &Path) -> Result<ModelSnapshot> {
    let bytes = fs::read(path).map_err(|e| ModelError::io(path, e))?;
    decode(&bytes, path)
}

/// Load a model saved with [`save_model`] or [`Model::save`].
pub fn load_model(path: &Path) -> Result<Box<dyn Model>> {
    let snapshot = load_snapshot(path)?;
    debug!(family = %snapshot.family(), path = %path.display(), "Model loaded");
    snapshot.into_model(path)
}

fn decode(bytes: &[u8], path: &Path) -> Result<ModelSnapshot> {
    #[derive(Deserialize)]
    struct Header {
        schema_version: u32,
    }

    let header: Header = serde_json::from_slice(bytes)
        .map_err(|e| ModelError::corrupt(path, format!("unreadable envelope: {}", e)))?;
    if header.schema_version != SCHEMA_VERSION {
        return Err(ModelError::corrupt(
            path,
            format!(
                "unsupported schema version {} (expected {})",
                header.schema_version, SCHEMA_VERSION
            ),
        ));
    }

    let envelope: Envelope = serde_json::from_slice(bytes)
        .map_err(|e| ModelError::corrupt(path, format!("unreadable model: {}", e)))?;
    let model_bytes = serde_json::to_vec(&envelope.model)
        .map_err(|e| ModelError::corrupt(path, e.to_string()))?;
    let computed = compute_checksum(&model_bytes);
    if computed != envelope.checksum {
        return Err(ModelError::corrupt(
            path,
            format!(
                "checksum mismatch: expected {}, got {}",
                envelope.checksum, computed
            ),
        ));
    }

    Ok(envelope.model)
}

fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{read_dataset, tests::synthetic_csv, train_test_split};
    use crate::error::ErrorKind;
    use crate::models::{
        GradientBoostingModel, GradientBoostingParams, LinearRegressionModel, RandomForestModel,
        RandomForestParams,
    };
    use tempfile::TempDir;

    fn trained_models() -> (Vec<Box<dyn Model>>, ndarray::Array2<f64>) {
        let dataset = read_dataset(synthetic_csv(60).as_bytes()).unwrap();
        let split = train_test_split(&dataset, 0.2, 42).unwrap();
        let mut models: Vec<Box<dyn Model>> = vec![
            Box::new(RandomForestModel::new(RandomForestParams {
                n_estimators: 10,
                ..RandomForestParams::default()
            })),
            Box::new(GradientBoostingModel::new(GradientBoostingParams {
                n_estimators: 20,
                ..GradientBoostingParams::default()
            })),
            Box::new(LinearRegressionModel::default()),
        ];
        for model in models.iter_mut() {
            model
                .train(split.features_train.view(), split.targets_train.view())
                .unwrap();
        }
        (models, split.features_test)
    }

    #[test]
    fn test_round_trip_predicts_identically() {
        let dir = TempDir::new().unwrap();
        let (models, test_x) = trained_models();

        for model in &models {
            let path = dir.path().join(format!("{}.model.json", model.name()));
            model.save(&path).unwrap();
            let loaded = load_model(&path).unwrap();

            assert_eq!(loaded.name(), model.name());
            assert_eq!(loaded.snapshot().unwrap(), model.snapshot().unwrap());
            assert_eq!(
                loaded.predict(test_x.view()).unwrap(),
                model.predict(test_x.view()).unwrap()
            );
        }
    }

    #[test]
    fn test_untrained_model_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rf.model.json");
        save_model(&RandomForestModel::default(), &path).unwrap();
        let loaded = load_model(&path).unwrap();
        assert!(!loaded.is_trained());
        assert!(!dir.path().join("rf.model.tmp").exists());
    }

    #[test]
    fn test_envelope_layout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lr.model.json");
        save_model(&LinearRegressionModel::default(), &path).unwrap();

        let value: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(value["schema_version"], 1);
        assert_eq!(value["model"]["family"], "LinearRegression");
        assert!(value["model"]["state"]["fitted"].is_null());
        assert_eq!(value["checksum"].as_str().unwrap().len(), 64);
    }

    #[test]
    fn test_tampered_file_fails_checksum() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lr.model.json");
        let (models, _) = trained_models();
        models[2].save(&path).unwrap();

        let mut value: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        value["model"]["state"]["fitted"]["y_offset"] = serde_json::json!(1234.5);
        fs::write(&path, serde_json::to_vec(&value).unwrap()).unwrap();

        let err = load_model(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Persistence);
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn test_schema_version_and_garbage_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gb.model.json");
        save_model(&GradientBoostingModel::default(), &path).unwrap();

        let mut value: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        value["schema_version"] = serde_json::json!(99);
        fs::write(&path, serde_json::to_vec(&value).unwrap()).unwrap();
        let err = load_model(&path).unwrap_err();
        assert!(err.to_string().contains("unsupported schema version 99"));

        fs::write(&path, b"not json").unwrap();
        assert_eq!(load_model(&path).unwrap_err().kind(), ErrorKind::Persistence);

        let missing = load_model(&dir.path().join("absent.model.json")).unwrap_err();
        assert!(matches!(missing, ModelError::Io { .. }));
    }

    #[test]
    fn test_state_of_wrong_shape_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gb.model.json");
        let snapshot = ModelSnapshot {
            family: ModelFamily::GradientBoosting,
            state: serde_json::json!({"params": 5}),
        };
        save_snapshot(&snapshot, &path).unwrap();

        // the checksum matches, so only the state itself is at fault
        assert_eq!(load_snapshot(&path).unwrap(), snapshot);
        let err = load_model(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Persistence);
        assert!(err.to_string().contains("invalid GradientBoosting state"));
    }
}
