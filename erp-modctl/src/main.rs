//! erp-modctl - load, inspect and check ERP feature module manifests

#![warn(missing_docs)]

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;
mod config;
mod manifest;

#[derive(Parser)]
#[command(name = "erp-modctl")]
#[command(about = "Load and inspect ERP feature modules", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Load every module in a manifest and start them
    Load {
        /// Module manifest (TOML)
        #[arg(long, env = "ERP_MODULES_MANIFEST")]
        manifest: PathBuf,

        /// Only load, do not call start hooks
        #[arg(long)]
        no_start: bool,
    },

    /// Load a manifest and print the dependency graph as JSON
    Graph {
        /// Module manifest (TOML)
        #[arg(long, env = "ERP_MODULES_MANIFEST")]
        manifest: PathBuf,
    },

    /// Load a manifest and report circular dependencies
    Check {
        /// Module manifest (TOML)
        #[arg(long, env = "ERP_MODULES_MANIFEST")]
        manifest: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.debug {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt::init();
    }

    // Load configuration
    let config = config::load_config(cli.config)?;

    let ok = match cli.command {
        Commands::Load { manifest, no_start } => {
            commands::load(&manifest, &config, !no_start).await?
        }
        Commands::Graph { manifest } => commands::graph(&manifest, &config).await?,
        Commands::Check { manifest } => commands::check(&manifest, &config).await?,
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
