//! Outcome CLI
//!
//! A command-line tool for managing the models of the success-rate
//! prediction service, requesting predictions, and training or evaluating
//! models offline.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{models, predict, train};
use predictor_lib::dataset::{DEFAULT_SPLIT_SEED, DEFAULT_TEST_FRACTION};
use std::path::PathBuf;

/// Outcome CLI
#[derive(Parser)]
#[command(name = "outcome")]
#[command(author, version, about = "CLI for the client success-rate prediction service", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via OUTCOME_API_URL env var)
    #[arg(long, env = "OUTCOME_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect and switch the service's models
    #[command(subcommand)]
    Models(ModelsCommands),

    /// Predict a client's success rate
    Predict {
        /// JSON file with the client's attributes
        #[arg(long)]
        client: PathBuf,

        /// Intervention to apply (repeatable)
        #[arg(long = "intervention", short = 'i')]
        interventions: Vec<String>,

        /// Model to use instead of the current one
        #[arg(long)]
        model: Option<String>,
    },

    /// Train models offline from a labelled CSV dataset
    Train {
        /// Labelled dataset (CSV with a header row)
        #[arg(long)]
        data: PathBuf,

        /// Directory to save trained models to
        #[arg(long)]
        out: PathBuf,

        /// Train only this model
        #[arg(long)]
        model: Option<String>,

        /// Share of rows held out for evaluation
        #[arg(long, default_value_t = DEFAULT_TEST_FRACTION)]
        test_fraction: f64,

        /// Seed for the train/test shuffle
        #[arg(long, default_value_t = DEFAULT_SPLIT_SEED)]
        seed: u64,
    },

    /// Evaluate saved models on the held-out split of a dataset
    Evaluate {
        /// Labelled dataset (CSV with a header row)
        #[arg(long)]
        data: PathBuf,

        /// Directory holding saved models
        #[arg(long)]
        models: PathBuf,

        /// Share of rows held out for evaluation
        #[arg(long, default_value_t = DEFAULT_TEST_FRACTION)]
        test_fraction: f64,

        /// Seed for the train/test shuffle
        #[arg(long, default_value_t = DEFAULT_SPLIT_SEED)]
        seed: u64,
    },
}

#[derive(Subcommand)]
pub enum ModelsCommands {
    /// List registered models
    List,

    /// Show the current model
    Current,

    /// Switch the current model
    Switch {
        /// Model name
        name: String,
    },
}

fn api_client(api_url: Option<String>) -> Result<client::ApiClient> {
    let url = config::Config::load()?.resolve_api_url(api_url);
    client::ApiClient::new(&url)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_max_level(tracing::Level::DEBUG)
            .init();
    }

    match cli.command {
        Commands::Models(models_cmd) => {
            let client = api_client(cli.api_url)?;
            match models_cmd {
                ModelsCommands::List => models::list_models(&client, cli.format).await?,
                ModelsCommands::Current => models::current_model(&client, cli.format).await?,
                ModelsCommands::Switch { name } => {
                    models::switch_model(&client, &name, cli.format).await?
                }
            }
        }
        Commands::Predict {
            client: client_file,
            interventions,
            model,
        } => {
            let client = api_client(cli.api_url)?;
            predict::predict(&client, &client_file, &interventions, model, cli.format).await?;
        }
        Commands::Train {
            data,
            out,
            model,
            test_fraction,
            seed,
        } => {
            tokio::task::spawn_blocking(move || {
                train::train_models(&data, &out, model.as_deref(), test_fraction, seed, cli.format)
            })
            .await??;
        }
        Commands::Evaluate {
            data,
            models,
            test_fraction,
            seed,
        } => {
            train::evaluate_models(&data, &models, test_fraction, seed, cli.format)?;
        }
    }

    Ok(())
}
