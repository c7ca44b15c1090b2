#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for incident deduplication and transit route attribution.
//!
//! Results are printed to stdout as JSON. Logs and progress bars go to
//! stderr through `indicatif-log-bridge` (via
//! [`incident_hub_cli_utils::init_logger`]), filtered by `RUST_LOG`.

mod commands;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::HubConfig;

#[derive(Parser)]
#[command(
    name = "incident_hub",
    about = "Traffic incident deduplication and transit route attribution"
)]
struct Cli {
    /// Config file (overrides `INCIDENT_HUB_CONFIG` and `incident_hub.toml`)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deduplicate a JSON batch of incidents
    Dedup {
        /// Incident JSON file, or `-` for stdin
        input: PathBuf,
    },
    /// Build the route index from the configured transit tables and report
    /// its status
    Index,
    /// Find the routes passing near a point
    Routes {
        /// Latitude in decimal degrees
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        /// Longitude in decimal degrees
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
        /// Free text used when no route geometry is nearby
        #[arg(long, default_value = "")]
        text: String,
    },
    /// Deduplicate a batch, then attribute routes to the result
    Process {
        /// Incident JSON file, or `-` for stdin
        input: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = incident_hub_cli_utils::init_logger();
    let cli = Cli::parse();
    let config = HubConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Dedup { input } => commands::dedup(&config, &input)?,
        Commands::Index => commands::index(&config, &multi)?,
        Commands::Routes { lat, lon, text } => {
            commands::routes(&config, &multi, lat, lon, &text)?;
        }
        Commands::Process { input } => commands::process(&config, &multi, &input)?,
    }

    Ok(())
}
