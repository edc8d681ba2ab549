//! Ordinary least squares, solved by `linfa-linear`
//!
//! Rows are centred before fitting and the intercept is recovered from the
//! column means. A small ridge is applied by appending `sqrt(ridge) * I`
//! rows with zero targets, which keeps collinear and constant columns
//! solvable while leaving full-rank fits practically unchanged.

use super::Model;
use crate::error::{ModelError, Result};
use crate::persist::ModelSnapshot;
use linfa::traits::{Fit, Predict};
use linfa::Dataset;
use linfa_linear::{FittedLinearRegression, LinearRegression};
use ndarray::{concatenate, Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Ridge multipliers tried in turn when the solver rejects the system
const RIDGE_ESCALATION: [f64; 4] = [1.0, 1e2, 1e4, 1e6];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearRegressionParams {
    pub fit_intercept: bool,
    /// Ridge strength relative to the largest column sum of squares
    pub l2_penalty: f64,
}

impl Default for LinearRegressionParams {
    fn default() -> Self {
        Self {
            fit_intercept: true,
            l2_penalty: 1e-8,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct FittedLinear {
    /// Column means removed before the solver sees a row
    x_offset: Vec<f64>,
    y_offset: f64,
    solver: FittedLinearRegression<f64>,
}

impl fmt::Debug for FittedLinear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FittedLinear")
            .field("coefficients", self.solver.params())
            .field("y_offset", &self.y_offset)
            .finish()
    }
}

impl FittedLinear {
    fn intercept(&self) -> f64 {
        self.y_offset - ArrayView1::from(&self.x_offset[..]).dot(self.solver.params())
    }
}

/// Linear regression model for predicting success rates
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LinearRegressionModel {
    params: LinearRegressionParams,
    fitted: Option<FittedLinear>,
}

impl LinearRegressionModel {
    pub fn new(params: LinearRegressionParams) -> Self {
        Self {
            params,
            fitted: None,
        }
    }

    pub fn params(&self) -> &LinearRegressionParams {
        &self.params
    }

    pub fn coefficients(&self) -> Option<&[f64]> {
        self.fitted.as_ref().and_then(|f| f.solver.params().as_slice())
    }

    pub fn intercept(&self) -> Option<f64> {
        self.fitted.as_ref().map(FittedLinear::intercept)
    }
}

impl Model for LinearRegressionModel {
    fn name(&self) -> &'static str {
        "LinearRegression"
    }

    fn is_trained(&self) -> bool {
        self.fitted.is_some()
    }

    fn n_features(&self) -> Option<usize> {
        self.fitted.as_ref().map(|f| f.x_offset.len())
    }

    fn fit(&mut self, features: ArrayView2<f64>, targets: ArrayView1<f64>) -> Result<()> {
        let penalty = self.params.l2_penalty;
        if !(penalty >= 0.0 && penalty.is_finite()) {
            return Err(ModelError::InvalidParameter(format!(
                "l2_penalty must be non-negative, got {}",
                penalty
            )));
        }

        let n_features = features.ncols();
        let (x_offset, y_offset) = if self.params.fit_intercept {
            (
                features
                    .mean_axis(Axis(0))
                    .unwrap_or_else(|| Array1::zeros(n_features)),
                targets.mean().unwrap_or(0.0),
            )
        } else {
            (Array1::zeros(n_features), 0.0)
        };
        let centered_x = &features - &x_offset;
        let centered_y = &targets - y_offset;

        let scale = centered_x
            .axis_iter(Axis(1))
            .map(|column| column.dot(&column))
            .fold(0.0_f64, f64::max)
            .max(1.0);
        let zeros = Array1::<f64>::zeros(n_features);

        let mut solver = None;
        for factor in RIDGE_ESCALATION {
            let ridge = (penalty * factor).max(f64::EPSILON) * scale;
            let penalty_rows = Array2::<f64>::eye(n_features) * ridge.sqrt();
            let records = concatenate(Axis(0), &[centered_x.view(), penalty_rows.view()])
                .map_err(|e| ModelError::InvalidTrainingSet(e.to_string()))?;
            let response = concatenate(Axis(0), &[centered_y.view(), zeros.view()])
                .map_err(|e| ModelError::InvalidTrainingSet(e.to_string()))?;

            match LinearRegression::new()
                .with_intercept(false)
                .fit(&Dataset::new(records, response))
            {
                Ok(fitted) if fitted.params().iter().all(|w| w.is_finite()) => {
                    solver = Some(fitted);
                    break;
                }
                Ok(_) => warn!(ridge, "Least squares produced non-finite weights, increasing ridge"),
                Err(e) => warn!(ridge, error = %e, "Least squares failed, increasing ridge"),
            }
        }
        let solver = solver.ok_or_else(|| {
            ModelError::InvalidTrainingSet("least squares system could not be solved".to_string())
        })?;

        let fitted = FittedLinear {
            x_offset: x_offset.to_vec(),
            y_offset,
            solver,
        };
        debug!(
            features = n_features,
            rows = features.nrows(),
            intercept = fitted.intercept(),
            "Linear regression fitted"
        );
        self.fitted = Some(fitted);
        Ok(())
    }

    fn predict_rows(&self, features: ArrayView2<f64>) -> Array1<f64> {
        match &self.fitted {
            Some(fitted) => {
                let centered = &features - &ArrayView1::from(&fitted.x_offset[..]);
                fitted.solver.predict(&centered) + fitted.y_offset
            }
            None => Array1::zeros(features.nrows()),
        }
    }

    fn snapshot(&self) -> Result<ModelSnapshot> {
        ModelSnapshot::of(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_recovers_exact_linear_relationship() {
        let x: Array2<f64> = Array2::from_shape_fn((20, 2), |(i, j)| ((i * (j + 1) * 7) % 17) as f64);
        let y: Array1<f64> = x
            .axis_iter(Axis(0))
            .map(|row| 3.0 + 2.0 * row[0] - 0.5 * row[1])
            .collect();
        let model = LinearRegressionModel::default()
            .trained(x.view(), y.view())
            .unwrap();

        let coefs = model.coefficients().unwrap();
        assert!((coefs[0] - 2.0).abs() < 1e-4, "coef {}", coefs[0]);
        assert!((coefs[1] + 0.5).abs() < 1e-4, "coef {}", coefs[1]);
        assert!((model.intercept().unwrap() - 3.0).abs() < 1e-3);

        let prediction = model.predict(array![[4.0, 2.0]].view()).unwrap();
        assert!((prediction[0] - 10.0).abs() < 1e-3);
    }

    #[test]
    fn test_rank_deficient_design_still_fits() {
        // More columns than rows, with a constant and a duplicated column
        let x: Array2<f64> = Array2::from_shape_fn((10, 31), |(i, j)| match j {
            0 => 1.0,
            1 | 2 => i as f64,
            _ => ((i + j) % 3) as f64,
        });
        let y: Array1<f64> = (0..10).map(|i| 10.0 + i as f64).collect();
        let model = LinearRegressionModel::default()
            .trained(x.view(), y.view())
            .unwrap();

        let predictions = model.predict(x.view()).unwrap();
        assert!(predictions.iter().all(|p| p.is_finite()));
        let max_err = (&predictions - &y).mapv(f64::abs).fold(0.0_f64, |a, &b| a.max(b));
        assert!(max_err < 1e-2, "max error {}", max_err);
    }

    #[test]
    fn test_without_intercept_passes_through_origin() {
        let x = array![[1.0], [2.0], [3.0]];
        let y = array![2.0, 4.0, 6.0];
        let model = LinearRegressionModel::new(LinearRegressionParams {
            fit_intercept: false,
            ..LinearRegressionParams::default()
        })
        .trained(x.view(), y.view())
        .unwrap();
        assert_eq!(model.intercept(), Some(0.0));
        assert!((model.coefficients().unwrap()[0] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_negative_penalty_rejected() {
        let mut model = LinearRegressionModel::new(LinearRegressionParams {
            l2_penalty: -1.0,
            ..LinearRegressionParams::default()
        });
        let x = array![[1.0], [2.0]];
        let y = array![1.0, 2.0];
        assert!(matches!(
            model.train(x.view(), y.view()),
            Err(ModelError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_stronger_penalty_shrinks_coefficients() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = array![0.0, 3.0, 6.0, 9.0];
        let ols = LinearRegressionModel::default()
            .trained(x.view(), y.view())
            .unwrap();
        let ridge = LinearRegressionModel::new(LinearRegressionParams {
            l2_penalty: 1.0,
            ..LinearRegressionParams::default()
        })
        .trained(x.view(), y.view())
        .unwrap();

        let slope = |m: &LinearRegressionModel| m.coefficients().unwrap()[0];
        assert!((slope(&ols) - 3.0).abs() < 1e-6);
        // sum of squares of the centred column is 5, so the ridge is 5:
        // slope = 15 / (5 + 5)
        assert!((slope(&ridge) - 1.5).abs() < 1e-9, "slope {}", slope(&ridge));
    }
}
