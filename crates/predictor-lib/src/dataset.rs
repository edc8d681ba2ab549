//! Training data loading and train/test partitioning
//!
//! The labelled dataset is a CSV file with a header row. Only the columns
//! named by [`crate::features::feature_columns`] and the target column are
//! read; anything else in the file is ignored.

use crate::error::{ModelError, Result};
use crate::features::{feature_columns, FEATURE_COUNT, TARGET_COLUMN};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default dataset file name
pub const DEFAULT_DATASET: &str = "data_commontool.csv";

/// Share of rows held out for evaluation
pub const DEFAULT_TEST_FRACTION: f64 = 0.2;

/// Seed for the train/test shuffle
pub const DEFAULT_SPLIT_SEED: u64 = 42;

/// A labelled dataset in feature-schema column order
#[derive(Debug, Clone)]
pub struct Dataset {
    pub features: Array2<f64>,
    pub targets: Array1<f64>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Disjoint training and held-out partitions
#[derive(Debug, Clone)]
pub struct TrainTestSplit {
    pub features_train: Array2<f64>,
    pub features_test: Array2<f64>,
    pub targets_train: Array1<f64>,
    pub targets_test: Array1<f64>,
}

/// Loads the labelled dataset and prepares it for training
#[derive(Debug, Clone)]
pub struct DataProcessor {
    data_file: PathBuf,
    test_fraction: f64,
    seed: u64,
}

impl Default for DataProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_DATASET)
    }
}

impl DataProcessor {
    pub fn new(data_file: impl Into<PathBuf>) -> Self {
        Self {
            data_file: data_file.into(),
            test_fraction: DEFAULT_TEST_FRACTION,
            seed: DEFAULT_SPLIT_SEED,
        }
    }

    pub fn with_split(mut self, test_fraction: f64, seed: u64) -> Self {
        self.test_fraction = test_fraction;
        self.seed = seed;
        self
    }

    pub fn data_file(&self) -> &Path {
        &self.data_file
    }

    /// Load the dataset from file.
    pub fn load_data(&self) -> Result<Dataset> {
        let file = std::fs::File::open(&self.data_file).map_err(|e| ModelError::DatasetRead {
            path: self.data_file.clone(),
            source: csv::Error::from(e),
        })?;
        let dataset = read_dataset(file)?;
        info!(
            path = %self.data_file.display(),
            rows = dataset.len(),
            "Loaded training dataset"
        );
        Ok(dataset)
    }

    /// Load the dataset and split it into training and held-out partitions.
    pub fn prepare_training_data(&self) -> Result<TrainTestSplit> {
        let dataset = self.load_data()?;
        train_test_split(&dataset, self.test_fraction, self.seed)
    }
}

/// Parse a labelled dataset from CSV.
pub fn read_dataset<R: Read>(reader: R) -> Result<Dataset> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = reader.headers()?.clone();

    let column_index = |name: &str| headers.iter().position(|h| h == name);
    let mut missing = Vec::new();
    let mut indices = Vec::with_capacity(FEATURE_COUNT);
    for name in feature_columns() {
        match column_index(name) {
            Some(idx) => indices.push(idx),
            None => missing.push(name.to_string()),
        }
    }
    let target_index = column_index(TARGET_COLUMN);
    if target_index.is_none() {
        missing.push(TARGET_COLUMN.to_string());
    }
    let target_index = match target_index {
        Some(idx) if missing.is_empty() => idx,
        _ => return Err(ModelError::MissingColumns(missing)),
    };

    let mut values = Vec::new();
    let mut targets = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        for (&idx, name) in indices.iter().zip(feature_columns()) {
            values.push(parse_cell(&record, idx, row, name)?);
        }
        targets.push(parse_cell(&record, target_index, row, TARGET_COLUMN)?);
    }

    let rows = targets.len();
    let features = Array2::from_shape_vec((rows, FEATURE_COUNT), values)
        .map_err(|e| ModelError::InvalidTrainingSet(e.to_string()))?;
    debug!(rows, columns = FEATURE_COUNT, "Parsed dataset");

    Ok(Dataset {
        features,
        targets: Array1::from(targets),
    })
}

fn parse_cell(record: &csv::StringRecord, idx: usize, row: usize, column: &str) -> Result<f64> {
    let raw = record.get(idx).unwrap_or_default();
    let invalid = || ModelError::InvalidValue {
        row: row + 1,
        column: column.to_string(),
        value: raw.to_string(),
    };

    if raw.eq_ignore_ascii_case("true") {
        return Ok(1.0);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Ok(0.0);
    }
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(invalid()),
    }
}

/// Shuffle rows with a fixed seed and hold out `ceil(test_fraction * n)` of them.
pub fn train_test_split(dataset: &Dataset, test_fraction: f64, seed: u64) -> Result<TrainTestSplit> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(ModelError::InvalidParameter(format!(
            "test fraction must be in (0, 1), got {}",
            test_fraction
        )));
    }

    let rows = dataset.len();
    let test_rows = (test_fraction * rows as f64).ceil() as usize;
    if test_rows == 0 || test_rows >= rows {
        return Err(ModelError::InvalidTrainingSet(format!(
            "{} rows cannot be split with test fraction {}",
            rows, test_fraction
        )));
    }

    let mut order: Vec<usize> = (0..rows).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));
    let (test_idx, train_idx) = order.split_at(test_rows);

    Ok(TrainTestSplit {
        features_train: dataset.features.select(Axis(0), train_idx),
        features_test: dataset.features.select(Axis(0), test_idx),
        targets_train: dataset.targets.select(Axis(0), train_idx),
        targets_test: dataset.targets.select(Axis(0), test_idx),
    })
}
