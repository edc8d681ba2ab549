//! Offline training and evaluation commands

use anyhow::{bail, Context, Result};
use predictor_lib::{
    evaluate, load_model, lock_model, DataProcessor, ModelFamily, ModelRegistry, ModelStore,
    RegressionMetrics,
};
use serde::Serialize;
use std::path::Path;
use tabled::Tabled;
use tracing::debug;

use crate::output::{
    color_r2, format_duration, print_info, print_success, print_table, print_warning, OutputFormat,
};

/// Row for the training and evaluation tables
#[derive(Tabled, Serialize)]
struct ScoreRow {
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "R²")]
    #[serde(rename = "r2")]
    r2_display: String,
    #[tabled(rename = "MAE")]
    mae: String,
    #[tabled(rename = "RMSE")]
    rmse: String,
    #[tabled(rename = "Samples")]
    samples: usize,
    #[tabled(rename = "Train Time")]
    train_time: String,
}

impl ScoreRow {
    fn new(model: &str, metrics: &RegressionMetrics, train_secs: Option<f64>, format: OutputFormat) -> Self {
        let r2_display = match format {
            OutputFormat::Table => color_r2(metrics.r2),
            OutputFormat::Json => format!("{:.6}", metrics.r2),
        };
        Self {
            model: model.to_string(),
            r2_display,
            mae: format!("{:.3}", metrics.mae),
            rmse: format!("{:.3}", metrics.rmse),
            samples: metrics.samples,
            train_time: train_secs.map(format_duration).unwrap_or_else(|| "-".to_string()),
        }
    }
}

/// Families selected by `--model`, or all of them
fn selected_families(model: Option<&str>) -> Result<Vec<ModelFamily>> {
    match model {
        Some(name) => {
            let family = name.parse::<ModelFamily>().with_context(|| {
                format!(
                    "Known models: {}",
                    ModelFamily::ALL.map(|f| f.name()).join(", ")
                )
            })?;
            Ok(vec![family])
        }
        None => Ok(ModelFamily::ALL.to_vec()),
    }
}

/// Train models on a labelled dataset, score them on the held-out split and
/// save them to `out`
pub fn train_models(
    data: &Path,
    out: &Path,
    model: Option<&str>,
    test_fraction: f64,
    seed: u64,
    format: OutputFormat,
) -> Result<()> {
    let families = selected_families(model)?;
    let split = DataProcessor::new(data)
        .with_split(test_fraction, seed)
        .prepare_training_data()
        .with_context(|| format!("Failed to prepare training data from {}", data.display()))?;

    if let OutputFormat::Table = format {
        print_info(&format!(
            "Training {} model(s) on {} rows, evaluating on {}",
            families.len(),
            split.targets_train.len(),
            split.targets_test.len()
        ));
    }

    let registry = ModelRegistry::new();
    for family in &families {
        registry.register_model(family.name(), family.build());
    }
    debug!(models = families.len(), out = %out.display(), "Starting offline training");
    let runs = registry.train_all(split.features_train.view(), split.targets_train.view())?;

    let mut rows = Vec::with_capacity(runs.len());
    for run in &runs {
        let shared = registry.get_model(Some(run.model.as_str()))?;
        let model = lock_model(&shared);
        let metrics = evaluate(&**model, split.features_test.view(), split.targets_test.view())?;
        rows.push(ScoreRow::new(&run.model, &metrics, Some(run.elapsed.as_secs_f64()), format));
    }

    let store = ModelStore::new(out);
    let saved = store
        .save_all(&registry)
        .with_context(|| format!("Failed to save models to {}", out.display()))?;

    print_table(&rows, format);
    if let OutputFormat::Table = format {
        print_success(&format!("Saved {} model(s) to {}", saved, out.display()));
    }
    Ok(())
}

/// Score previously saved models on the held-out split of a dataset
pub fn evaluate_models(
    data: &Path,
    models_dir: &Path,
    test_fraction: f64,
    seed: u64,
    format: OutputFormat,
) -> Result<()> {
    let split = DataProcessor::new(data)
        .with_split(test_fraction, seed)
        .prepare_training_data()
        .with_context(|| format!("Failed to prepare evaluation data from {}", data.display()))?;

    let store = ModelStore::new(models_dir);
    let mut rows = Vec::new();
    for family in ModelFamily::ALL {
        let path = store.path_for(family.name());
        if !path.exists() {
            if let OutputFormat::Table = format {
                print_warning(&format!("No saved {} model, skipping", family));
            }
            continue;
        }
        debug!(path = %path.display(), "Loading saved model");
        let model = load_model(&path)?;
        let metrics = evaluate(model.as_ref(), split.features_test.view(), split.targets_test.view())
            .with_context(|| format!("Failed to evaluate {}", path.display()))?;
        rows.push(ScoreRow::new(family.name(), &metrics, None, format));
    }

    if rows.is_empty() {
        bail!("No saved models found in {}", models_dir.display());
    }
    print_table(&rows, format);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selected_families() {
        assert_eq!(selected_families(None).unwrap().len(), 3);
        assert_eq!(
            selected_families(Some("linear_regression")).unwrap(),
            vec![ModelFamily::LinearRegression]
        );
        let err = selected_families(Some("svm")).unwrap_err();
        assert!(format!("{:#}", err).contains("Known models: RandomForest"));
    }
}
