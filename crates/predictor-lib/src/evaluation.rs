//! Held-out evaluation of trained models

use crate::error::{ModelError, Result};
use crate::models::Model;
use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

/// Regression quality on a labelled sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    /// Coefficient of determination; 0 when the targets are constant
    pub r2: f64,
    pub mae: f64,
    pub rmse: f64,
    pub samples: usize,
}

impl RegressionMetrics {
    pub fn compute(predictions: ArrayView1<f64>, targets: ArrayView1<f64>) -> Result<Self> {
        if predictions.len() != targets.len() || targets.is_empty() {
            return Err(ModelError::InvalidTrainingSet(format!(
                "cannot score {} predictions against {} targets",
                predictions.len(),
                targets.len()
            )));
        }

        let n = targets.len() as f64;
        let residuals = &targets - &predictions;
        let ss_res = residuals.mapv(|r| r * r).sum();
        let mean = targets.sum() / n;
        let ss_tot = targets.mapv(|t| (t - mean) * (t - mean)).sum();

        Ok(Self {
            r2: if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 },
            mae: residuals.mapv(f64::abs).sum() / n,
            rmse: (ss_res / n).sqrt(),
            samples: targets.len(),
        })
    }
}

/// Predict `features` with `model` and score against `targets`.
pub fn evaluate(
    model: &dyn Model,
    features: ArrayView2<f64>,
    targets: ArrayView1<f64>,
) -> Result<RegressionMetrics> {
    let predictions = model.predict(features)?;
    RegressionMetrics::compute(predictions.view(), targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{read_dataset, tests::synthetic_csv, train_test_split};
    use crate::models::LinearRegressionModel;
    use ndarray::array;

    #[test]
    fn test_perfect_predictions() {
        let y = array![1.0, 2.0, 3.0];
        let metrics = RegressionMetrics::compute(y.view(), y.view()).unwrap();
        assert_eq!(metrics.r2, 1.0);
        assert_eq!(metrics.mae, 0.0);
        assert_eq!(metrics.rmse, 0.0);
        assert_eq!(metrics.samples, 3);
    }

    #[test]
    fn test_known_errors() {
        let predictions = array![2.0, 2.0, 2.0, 2.0];
        let targets = array![1.0, 3.0, 1.0, 3.0];
        let metrics = RegressionMetrics::compute(predictions.view(), targets.view()).unwrap();
        assert_eq!(metrics.mae, 1.0);
        assert_eq!(metrics.rmse, 1.0);
        // predicting the mean scores zero
        assert_eq!(metrics.r2, 0.0);
    }

    #[test]
    fn test_length_mismatch() {
        assert!(RegressionMetrics::compute(array![1.0].view(), array![1.0, 2.0].view()).is_err());
    }

    #[test]
    fn test_linear_model_scores_well_on_held_out_rows() {
        let dataset = read_dataset(synthetic_csv(80).as_bytes()).unwrap();
        let split = train_test_split(&dataset, 0.2, 42).unwrap();
        let model = LinearRegressionModel::default()
            .trained(split.features_train.view(), split.targets_train.view())
            .unwrap();

        let metrics = evaluate(&model, split.features_test.view(), split.targets_test.view()).unwrap();
        assert_eq!(metrics.samples, 16);
        assert!(metrics.r2 > 0.99, "r2 was {}", metrics.r2);
    }

    #[test]
    fn test_untrained_model_cannot_be_evaluated() {
        let model = LinearRegressionModel::default();
        let x = ndarray::Array2::<f64>::zeros((2, 31));
        let err = evaluate(&model, x.view(), array![1.0, 2.0].view()).unwrap_err();
        assert!(matches!(err, ModelError::NotTrained(_)));
    }
}
