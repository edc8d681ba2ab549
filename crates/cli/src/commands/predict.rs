//! Prediction command

use anyhow::{bail, Context, Result};
use predictor_lib::features::{ClientRecord, InterventionFlags, INTERVENTION_FEATURES};
use std::path::Path;

use crate::client::{ApiClient, PredictRequest};
use crate::output::{format_rate, print_json, print_success, OutputFormat};

/// Read a client record from a JSON object file
pub fn read_client(path: &Path) -> Result<ClientRecord> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read client file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| {
        format!(
            "Client file {} must be a JSON object of numbers, booleans or nulls",
            path.display()
        )
    })
}

/// Turn `--intervention` flags into the request map. Every known
/// intervention is sent, selected ones as `true`.
pub fn intervention_flags(selected: &[String]) -> Result<InterventionFlags> {
    if let Some(unknown) = selected
        .iter()
        .find(|name| !INTERVENTION_FEATURES.contains(&name.as_str()))
    {
        bail!(
            "Unknown intervention '{}'. Known interventions: {}",
            unknown,
            INTERVENTION_FEATURES.join(", ")
        );
    }

    Ok(INTERVENTION_FEATURES
        .iter()
        .map(|name| (name.to_string(), selected.iter().any(|s| s == name)))
        .collect())
}

/// Request a success-rate prediction for a client
pub async fn predict(
    client: &ApiClient,
    client_file: &Path,
    interventions: &[String],
    model: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let request = PredictRequest {
        client: read_client(client_file)?,
        interventions: intervention_flags(interventions)?,
        model,
    };

    let response = client.predict(&request).await?;

    match format {
        OutputFormat::Json => print_json(&response),
        OutputFormat::Table => print_success(&format!(
            "Predicted success rate: {} (model {})",
            format_rate(response.success_rate),
            response.model
        )),
    }
    Ok(())
}
