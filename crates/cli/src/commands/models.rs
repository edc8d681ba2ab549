//! Model management commands

use anyhow::Result;
use serde::Serialize;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{mark_current, print_info, print_json, print_success, print_table, OutputFormat};

/// Row for the models table
#[derive(Tabled, Serialize)]
struct ModelRow {
    #[tabled(rename = "Model")]
    name: String,
    #[tabled(rename = "Current")]
    current: String,
}

/// List registered models, marking the current one
pub async fn list_models(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let overview = client.available_models().await?;

    if let OutputFormat::Json = format {
        print_json(&overview);
        return Ok(());
    }

    let current = overview.current_model.as_deref();
    let rows: Vec<ModelRow> = overview
        .models
        .iter()
        .map(|name| ModelRow {
            name: name.clone(),
            current: mark_current(name, current),
        })
        .collect();
    print_table(&rows, format);
    Ok(())
}

/// Show the current model
pub async fn current_model(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let current = client.current_model().await?;

    match format {
        OutputFormat::Json => print_json(&current),
        OutputFormat::Table => match &current.name {
            Some(name) => println!("{}", name),
            None => print_info("No current model"),
        },
    }
    Ok(())
}

/// Switch the current model
pub async fn switch_model(client: &ApiClient, name: &str, format: OutputFormat) -> Result<()> {
    let switched = client.switch_model(name).await?;

    match format {
        OutputFormat::Json => print_json(&switched),
        OutputFormat::Table => {
            print_success(&format!(
                "Current model is now {}",
                switched.name.as_deref().unwrap_or(name)
            ));
        }
    }
    Ok(())
}
