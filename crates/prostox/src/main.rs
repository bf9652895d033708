//! Prostox CLI - batch AI metadata generation for stock photos.
//!
//! Prostox sends each image to a vision model and collects a stock-site
//! title, keyword list and category, ready for CSV upload.
//!
//! # Usage
//!
//! ```bash
//! # Store an API key (prompts for the secret)
//! prostox keys add gemini-2.0-flash --nickname personal
//!
//! # Process a directory and write the upload CSV
//! prostox process ./photos/ --output prostoxai_metadata.csv
//!
//! # List supported models
//! prostox models
//! ```

use clap::{Parser, Subcommand};

mod cli;
mod logging;

/// Prostox - batch AI metadata generation for stock photos.
#[derive(Parser, Debug)]
#[command(name = "prostox")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate titles, keywords and categories for images
    Process(cli::process::ProcessArgs),

    /// Manage stored API keys
    Keys(cli::keys::KeysArgs),

    /// List supported models
    Models,

    /// View and manage configuration
    Config(cli::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logging isn't initialized yet, so config warnings go through eprintln.
    let config = match prostox_core::Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "Warning: Failed to load config: {e}\n  \
                 Using default configuration. Check your config file with `prostox config path`."
            );
            prostox_core::Config::default()
        }
    };
    logging::init_from_config(&config, cli.verbose, cli.json_logs);

    tracing::debug!("Prostox v{}", prostox_core::VERSION);

    match cli.command {
        Commands::Process(args) => cli::process::execute(args, config).await,
        Commands::Keys(args) => cli::keys::execute(args, &config),
        Commands::Models => cli::models::execute(),
        Commands::Config(args) => cli::config::execute(args),
    }
}
