//! Success-rate estimators
//!
//! Every estimator implements [`Model`]. Callers hold `Box<dyn Model>` (or a
//! [`crate::registry::SharedModel`]) and never need the concrete type.

mod gradient_boost;
mod linear_regression;
mod random_forest;

pub use gradient_boost::{GradientBoostingModel, GradientBoostingParams};
pub use linear_regression::{LinearRegressionModel, LinearRegressionParams};
pub use random_forest::{RandomForestModel, RandomForestParams};

use crate::error::{ModelError, Result};
use crate::persist::{self, ModelSnapshot};
use gbdt::decision_tree::{Data, DataVec, ValueType};
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Common contract of every estimator
pub trait Model: Send + Sync + fmt::Debug {
    /// Stable identifier, also used as the registry key
    fn name(&self) -> &'static str;

    fn is_trained(&self) -> bool;

    /// Number of features seen during training
    fn n_features(&self) -> Option<usize>;

    /// Fit parameters on an already validated training set.
    fn fit(&mut self, features: ArrayView2<f64>, targets: ArrayView1<f64>) -> Result<()>;

    /// Predict rows whose width matches [`Model::n_features`] on a trained model.
    fn predict_rows(&self, features: ArrayView2<f64>) -> Array1<f64>;

    /// Full state for persistence
    fn snapshot(&self) -> Result<ModelSnapshot>;

    /// Validate the training set, then fit. Re-training replaces the
    /// previously fitted parameters.
    fn train(&mut self, features: ArrayView2<f64>, targets: ArrayView1<f64>) -> Result<()> {
        validate_training_set(features, targets)?;
        self.fit(features, targets)
    }

    /// Train and hand the model back, for chaining at construction time.
    fn trained(mut self, features: ArrayView2<f64>, targets: ArrayView1<f64>) -> Result<Self>
    where
        Self: Sized,
    {
        self.train(features, targets)?;
        Ok(self)
    }

    /// One prediction per row. Fails on an untrained model.
    fn predict(&self, features: ArrayView2<f64>) -> Result<Array1<f64>> {
        let expected = match (self.is_trained(), self.n_features()) {
            (true, Some(expected)) => expected,
            _ => return Err(ModelError::NotTrained(self.name().to_string())),
        };
        if features.ncols() != expected {
            return Err(ModelError::FeatureMismatch {
                expected,
                found: features.ncols(),
            });
        }
        Ok(self.predict_rows(features))
    }

    fn save(&self, path: &Path) -> Result<()> {
        persist::save_snapshot(&self.snapshot()?, path)
    }
}

/// Rows and targets as `gbdt` training samples, each with unit weight
pub(crate) fn training_samples(features: ArrayView2<f64>, targets: ArrayView1<f64>) -> DataVec {
    features
        .axis_iter(Axis(0))
        .zip(targets.iter())
        .map(|(row, target)| {
            let feature = row.iter().map(|v| *v as ValueType).collect();
            Data::new_training_data(feature, 1.0, *target as ValueType, None)
        })
        .collect()
}

/// Rows as unlabelled `gbdt` samples
pub(crate) fn prediction_samples(features: ArrayView2<f64>) -> DataVec {
    features
        .axis_iter(Axis(0))
        .map(|row| Data::new_test_data(row.iter().map(|v| *v as ValueType).collect(), None))
        .collect()
}

/// Reject training sets no estimator can learn from.
pub fn validate_training_set(features: ArrayView2<f64>, targets: ArrayView1<f64>) -> Result<()> {
    if features.nrows() == 0 || features.ncols() == 0 {
        return Err(ModelError::InvalidTrainingSet(format!(
            "feature matrix has shape {}x{}",
            features.nrows(),
            features.ncols()
        )));
    }
    if features.nrows() != targets.len() {
        return Err(ModelError::InvalidTrainingSet(format!(
            "{} feature rows but {} targets",
            features.nrows(),
            targets.len()
        )));
    }
    if !features.iter().chain(targets.iter()).all(|v| v.is_finite()) {
        return Err(ModelError::InvalidTrainingSet(
            "training data contains NaN or infinite values".to_string(),
        ));
    }
    Ok(())
}

/// The estimator families available to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelFamily {
    RandomForest,
    GradientBoosting,
    LinearRegression,
}

impl ModelFamily {
    /// Registration order used by [`crate::registry::ModelRegistry::with_default_models`]
    pub const ALL: [ModelFamily; 3] = [
        ModelFamily::RandomForest,
        ModelFamily::GradientBoosting,
        ModelFamily::LinearRegression,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ModelFamily::RandomForest => "RandomForest",
            ModelFamily::GradientBoosting => "GradientBoosting",
            ModelFamily::LinearRegression => "LinearRegression",
        }
    }

    /// Untrained estimator with default hyperparameters
    pub fn build(&self) -> Box<dyn Model> {
        match self {
            ModelFamily::RandomForest => Box::new(RandomForestModel::default()),
            ModelFamily::GradientBoosting => Box::new(GradientBoostingModel::default()),
            ModelFamily::LinearRegression => Box::new(LinearRegressionModel::default()),
        }
    }

    /// Rebuild an estimator of this family from its persisted state.
    pub fn restore(&self, state: serde_json::Value) -> serde_json::Result<Box<dyn Model>> {
        Ok(match self {
            ModelFamily::RandomForest => {
                Box::new(serde_json::from_value::<RandomForestModel>(state)?)
            }
            ModelFamily::GradientBoosting => {
                Box::new(serde_json::from_value::<GradientBoostingModel>(state)?)
            }
            ModelFamily::LinearRegression => {
                Box::new(serde_json::from_value::<LinearRegressionModel>(state)?)
            }
        })
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelFamily {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "randomforest" | "rf" => Ok(ModelFamily::RandomForest),
            "gradientboosting" | "gradientboost" | "gb" => Ok(ModelFamily::GradientBoosting),
            "linearregression" | "linear" | "lr" => Ok(ModelFamily::LinearRegression),
            _ => Err(ModelError::NotRegistered(s.to_string())),
        }
    }
}
