//! Random forest: bootstrap-bagged `gbdt` regression trees

use super::{prediction_samples, training_samples, Model};
use crate::error::{ModelError, Result};
use crate::persist::ModelSnapshot;
use gbdt::config::Loss;
use gbdt::decision_tree::{DataVec, DecisionTree, TrainingCache};
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Depth used when `max_depth` is unset; trees stop growing at
/// `min_leaf_size` long before this.
const UNBOUNDED_DEPTH: u32 = 64;

/// Cache level passed to `gbdt` for each tree
const CACHE_LEVEL: u8 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestParams {
    pub n_estimators: usize,
    /// `None` grows each tree until its leaves reach `min_leaf_size`
    pub max_depth: Option<u32>,
    pub min_leaf_size: usize,
    /// Sample rows with replacement for each tree
    pub bootstrap: bool,
    pub seed: u64,
}

impl Default for RandomForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: None,
            min_leaf_size: 1,
            bootstrap: true,
            seed: 42,
        }
    }
}

impl RandomForestParams {
    fn validate(&self) -> Result<()> {
        if self.n_estimators == 0 {
            return Err(ModelError::InvalidParameter(
                "n_estimators must be at least 1".to_string(),
            ));
        }
        if self.max_depth == Some(0) {
            return Err(ModelError::InvalidParameter(
                "max_depth must be at least 1".to_string(),
            ));
        }
        if self.min_leaf_size == 0 {
            return Err(ModelError::InvalidParameter(
                "min_leaf_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn tree(&self, n_features: usize) -> DecisionTree {
        let mut tree = DecisionTree::new();
        tree.set_feature_size(n_features);
        tree.set_max_depth(self.max_depth.unwrap_or(UNBOUNDED_DEPTH));
        tree.set_min_leaf_size(self.min_leaf_size);
        tree.set_loss(Loss::SquaredError);
        tree
    }
}

#[derive(Serialize, Deserialize)]
struct FittedForest {
    n_features: usize,
    trees: Vec<DecisionTree>,
}

impl fmt::Debug for FittedForest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FittedForest")
            .field("n_features", &self.n_features)
            .field("trees", &self.trees.len())
            .finish()
    }
}

/// Random forest model for predicting success rates
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RandomForestModel {
    params: RandomForestParams,
    fitted: Option<FittedForest>,
}

impl RandomForestModel {
    pub fn new(params: RandomForestParams) -> Self {
        Self {
            params,
            fitted: None,
        }
    }

    pub fn params(&self) -> &RandomForestParams {
        &self.params
    }

    /// Number of fitted trees, zero when untrained
    pub fn n_trees(&self) -> usize {
        self.fitted.as_ref().map_or(0, |f| f.trees.len())
    }
}

impl Model for RandomForestModel {
    fn name(&self) -> &'static str {
        "RandomForest"
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
        let samples = training_samples(features, targets);
        let rows = samples.len();
        let mut rng = StdRng::seed_from_u64(self.params.seed);

        let trees = (0..self.params.n_estimators)
            .map(|_| {
                let bag: DataVec = if self.params.bootstrap {
                    (0..rows)
                        .map(|_| samples[rng.gen_range(0..rows)].clone())
                        .collect()
                } else {
                    samples.clone()
                };
                let mut cache = TrainingCache::get_cache(n_features, &bag, CACHE_LEVEL);
                let mut tree = self.params.tree(n_features);
                tree.fit(&bag, &mut cache);
                tree
            })
            .collect::<Vec<_>>();

        debug!(trees = trees.len(), rows, "Random forest fitted");

        self.fitted = Some(FittedForest { n_features, trees });
        Ok(())
    }

    fn predict_rows(&self, features: ArrayView2<f64>) -> Array1<f64> {
        let Some(fitted) = &self.fitted else {
            return Array1::zeros(features.nrows());
        };
        let samples = prediction_samples(features);
        let mut sums = Array1::<f64>::zeros(features.nrows());
        for tree in &fitted.trees {
            for (sum, value) in sums.iter_mut().zip(tree.predict(&samples)) {
                *sum += value as f64;
            }
        }
        sums / fitted.trees.len() as f64
    }

    fn snapshot(&self) -> Result<ModelSnapshot> {
        ModelSnapshot::of(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2, Axis};

    fn training_data() -> (Array2<f64>, Array1<f64>) {
        let x: Array2<f64> = Array2::from_shape_fn((40, 3), |(i, j)| ((i * (j + 2)) % 11) as f64);
        let y: Array1<f64> = x
            .axis_iter(Axis(0))
            .map(|row| 3.0 * row[0] + if row[1] > 5.0 { 10.0 } else { 0.0 })
            .collect();
        (x, y)
    }

    fn small_forest(seed: u64) -> RandomForestModel {
        RandomForestModel::new(RandomForestParams {
            n_estimators: 20,
            seed,
            ..RandomForestParams::default()
        })
    }

    #[test]
    fn test_training_is_reproducible() {
        let (x, y) = training_data();
        let a = small_forest(42).trained(x.view(), y.view()).unwrap();
        let b = small_forest(42).trained(x.view(), y.view()).unwrap();
        assert_eq!(a.predict(x.view()).unwrap(), b.predict(x.view()).unwrap());
    }

    #[test]
    fn test_fits_training_data_closely() {
        let (x, y) = training_data();
        let model = RandomForestModel::default().trained(x.view(), y.view()).unwrap();
        let predictions = model.predict(x.view()).unwrap();
        let mae = (&predictions - &y).mapv(f64::abs).mean().unwrap();
        assert!(mae < 3.0, "mae was {}", mae);
        assert_eq!(model.n_trees(), 100);
    }

    #[test]
    fn test_different_seeds_give_different_forests() {
        let (x, y) = training_data();
        let a = small_forest(42).trained(x.view(), y.view()).unwrap();
        let b = small_forest(7).trained(x.view(), y.view()).unwrap();
        assert_ne!(a.predict(x.view()).unwrap(), b.predict(x.view()).unwrap());
    }

    #[test]
    fn test_without_bootstrap_separates_two_levels() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = array![0.0, 0.0, 8.0, 8.0];
        let model = RandomForestModel::new(RandomForestParams {
            n_estimators: 3,
            bootstrap: false,
            ..RandomForestParams::default()
        })
        .trained(x.view(), y.view())
        .unwrap();

        let predictions = model.predict(x.view()).unwrap();
        assert!((predictions[0] - 0.0).abs() < 1e-4, "{}", predictions);
        assert!((predictions[3] - 8.0).abs() < 1e-4, "{}", predictions);
    }

    #[test]
    fn test_invalid_hyperparameters_rejected() {
        let (x, y) = training_data();
        for params in [
            RandomForestParams {
                n_estimators: 0,
                ..RandomForestParams::default()
            },
            RandomForestParams {
                max_depth: Some(0),
                ..RandomForestParams::default()
            },
            RandomForestParams {
                min_leaf_size: 0,
                ..RandomForestParams::default()
            },
        ] {
            let mut model = RandomForestModel::new(params);
            assert!(matches!(
                model.train(x.view(), y.view()),
                Err(ModelError::InvalidParameter(_))
            ));
            assert!(!model.is_trained());
        }
    }
}
