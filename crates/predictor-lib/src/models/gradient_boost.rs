//! Gradient boosting with least-squares loss, backed by `gbdt`

use super::{prediction_samples, training_samples, Model};
use crate::error::{ModelError, Result};
use crate::persist::ModelSnapshot;
use gbdt::config::Config;
use gbdt::decision_tree::ValueType;
use gbdt::gradient_boost::GBDT;
use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostingParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: u32,
    pub min_leaf_size: usize,
    /// Fraction of rows drawn for each stage. Below 1.0 `gbdt` samples
    /// rows itself and training is no longer reproducible.
    pub subsample: f64,
}

impl Default for GradientBoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 3,
            min_leaf_size: 1,
            subsample: 1.0,
        }
    }
}

impl GradientBoostingParams {
    fn validate(&self) -> Result<()> {
        if self.n_estimators == 0 {
            return Err(ModelError::InvalidParameter(
                "n_estimators must be at least 1".to_string(),
            ));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(ModelError::InvalidParameter(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.max_depth == 0 || self.min_leaf_size == 0 {
            return Err(ModelError::InvalidParameter(
                "max_depth and min_leaf_size must be at least 1".to_string(),
            ));
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return Err(ModelError::InvalidParameter(format!(
                "subsample must be in (0, 1], got {}",
                self.subsample
            )));
        }
        Ok(())
    }

    fn config(&self, n_features: usize) -> Config {
        let mut config = Config::new();
        config.set_feature_size(n_features);
        config.set_shrinkage(self.learning_rate as ValueType);
        config.set_max_depth(self.max_depth);
        config.set_min_leaf_size(self.min_leaf_size);
        config.set_iterations(self.n_estimators);
        config.set_data_sample_ratio(self.subsample);
        config.set_feature_sample_ratio(1.0);
        config.set_loss("SquaredError");
        config.set_debug(false);
        config
    }
}

#[derive(Serialize, Deserialize)]
struct FittedBoosting {
    n_features: usize,
    booster: GBDT,
}

impl fmt::Debug for FittedBoosting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FittedBoosting")
            .field("n_features", &self.n_features)
            .finish_non_exhaustive()
    }
}

/// Gradient boosting model for predicting success rates
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct GradientBoostingModel {
    params: GradientBoostingParams,
    fitted: Option<FittedBoosting>,
}

impl GradientBoostingModel {
    pub fn new(params: GradientBoostingParams) -> Self {
        Self {
            params,
            fitted: None,
        }
    }

    pub fn params(&self) -> &GradientBoostingParams {
        &self.params
    }
}

impl Model for GradientBoostingModel {
    fn name(&self) -> &'static str {
        "GradientBoosting"
    }

    fn is_trained(&self) -> bool {
        self.fitted.is_some()
    }

    fn n_features(&self) -> Option<usize> {
        self.fitted.as_ref().map(|f| f.n_features)
    }

    fn fit(&mut self, features: ArrayView2<f64>, targets: ArrayView1<f64>) -> Result<()> {
        self.params.validate()?;

        let n_features = features.ncols();
        let mut samples = training_samples(features, targets);
        let mut booster = GBDT::new(&self.params.config(n_features));
        booster.fit(&mut samples);

        debug!(
            stages = self.params.n_estimators,
            rows = samples.len(),
            "Gradient boosting fitted"
        );

        self.fitted = Some(FittedBoosting {
            n_features,
            booster,
        });
        Ok(())
    }

    fn predict_rows(&self, features: ArrayView2<f64>) -> Array1<f64> {
        match &self.fitted {
            Some(fitted) => fitted
                .booster
                .predict(&prediction_samples(features))
                .into_iter()
                .map(|value| value as f64)
                .collect(),
            None => Array1::zeros(features.nrows()),
        }
    }

    fn snapshot(&self) -> Result<ModelSnapshot> {
        ModelSnapshot::of(self)
    }
}
