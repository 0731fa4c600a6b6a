//! Gotchi operator CLI
//!
//! Runs a gotchi service on an in-process host and lets an operator poke it
//! from stdin.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod config;
mod run;

use config::{DaemonConfig, Overrides};

#[derive(Parser)]
#[command(name = "gotchi")]
#[command(about = "Gotchi - a resident status service with a control file", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file path
    #[arg(short, long, global = true, default_value = "gotchi.toml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the service and read operator commands from stdin
    Run {
        /// Tick interval in milliseconds
        #[arg(short, long)]
        interval_ms: Option<u64>,

        /// Name of the status device
        #[arg(long)]
        device_name: Option<String>,

        /// Name of the control file
        #[arg(long)]
        control_name: Option<String>,

        /// Stop after this many seconds
        #[arg(long)]
        for_secs: Option<u64>,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let file_config = DaemonConfig::load(&cli.config)?;

    let log_level = if cli.verbose || file_config.verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run {
            interval_ms,
            device_name,
            control_name,
            for_secs,
        } => {
            let config = file_config.resolve(Overrides {
                interval_ms,
                device_name,
                control_name,
            })?;
            run::run(config, for_secs).await?;
        }

        Commands::Config => {
            let config = file_config.resolve(Overrides::default())?;
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}
