//! Feature schema and prediction-time feature extraction
//!
//! Estimators are purely positional: column `i` of every feature matrix must
//! mean the same field for training and for prediction. [`feature_columns`]
//! is the single source of that ordering.

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Client attribute fields, in vector order
pub const CLIENT_FEATURES: [&str; 24] = [
    "age",
    "gender",
    "work_experience",
    "canada_workex",
    "dep_num",
    "canada_born",
    "citizen_status",
    "level_of_schooling",
    "fluent_english",
    "reading_english_scale",
    "speaking_english_scale",
    "writing_english_scale",
    "numeracy_scale",
    "computer_scale",
    "transportation_bool",
    "caregiver_bool",
    "housing",
    "income_source",
    "felony_bool",
    "attending_school",
    "currently_employed",
    "substance_use",
    "time_unemployed",
    "need_mental_health_support_bool",
];

/// Intervention flags, in vector order after the client attributes
pub const INTERVENTION_FEATURES: [&str; 7] = [
    "employment_assistance",
    "life_stabilization",
    "retention_services",
    "specialized_services",
    "employment_related_financial_supports",
    "employer_financial_supports",
    "enhanced_referrals",
];

/// Length of every feature vector
pub const FEATURE_COUNT: usize = CLIENT_FEATURES.len() + INTERVENTION_FEATURES.len();

/// Column holding the training target
pub const TARGET_COLUMN: &str = "success_rate";

/// A single client attribute as stored on the client record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Flag(bool),
    Number(f64),
    Missing,
}

impl FeatureValue {
    pub fn as_f64(self) -> f64 {
        match self {
            FeatureValue::Flag(true) => 1.0,
            FeatureValue::Flag(false) => 0.0,
            FeatureValue::Number(value) => value,
            FeatureValue::Missing => 0.0,
        }
    }
}

impl From<bool> for FeatureValue {
    fn from(value: bool) -> Self {
        FeatureValue::Flag(value)
    }
}

impl From<f64> for FeatureValue {
    fn from(value: f64) -> Self {
        FeatureValue::Number(value)
    }
}

impl From<i64> for FeatureValue {
    fn from(value: i64) -> Self {
        FeatureValue::Number(value as f64)
    }
}

/// Client attributes keyed by field name
pub type ClientRecord = HashMap<String, FeatureValue>;

/// Selected interventions keyed by flag name
pub type InterventionFlags = HashMap<String, bool>;

/// All input columns in vector order: client attributes then interventions.
pub fn feature_columns() -> impl Iterator<Item = &'static str> {
    CLIENT_FEATURES
        .iter()
        .chain(INTERVENTION_FEATURES.iter())
        .copied()
}

/// Build one feature vector. Absent keys contribute 0.
pub fn build_feature_vector(
    client: &ClientRecord,
    interventions: &InterventionFlags,
) -> Array1<f64> {
    let client_values = CLIENT_FEATURES
        .iter()
        .map(|name| client.get(*name).map_or(0.0, |v| v.as_f64()));
    let intervention_values = INTERVENTION_FEATURES
        .iter()
        .map(|name| match interventions.get(*name) {
            Some(true) => 1.0,
            _ => 0.0,
        });

    client_values.chain(intervention_values).collect()
}

/// Build the single-row feature matrix consumed by [`crate::models::Model::predict`].
pub fn prepare_prediction_data(
    client: &ClientRecord,
    interventions: &InterventionFlags,
) -> Array2<f64> {
    build_feature_vector(client, interventions).insert_axis(Axis(0))
}
