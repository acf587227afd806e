//! STRATA Command-Line Client
//!
//! Opens a database with the modules of a schema file and runs one
//! operation against it, printing the result as JSON.

mod commands;
mod config;
mod error;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::{Args, CliConfig};
use strata_core::Engine;

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "strata=info,strata_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Args::parse().into_config();
    if let Err(e) = run(config) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(config: CliConfig) -> error::Result<()> {
    let modules = match &config.schema_path {
        Some(path) => commands::load_modules(path)?,
        None => Vec::new(),
    };
    tracing::info!(
        database = ?config.engine.database,
        modules = modules.len(),
        "configuration loaded"
    );

    let engine = Engine::start(config.engine, modules)?;
    let output = commands::execute(&engine, &config.command)?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
