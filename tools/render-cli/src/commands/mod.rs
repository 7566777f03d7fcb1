//! CLI command implementations.

pub mod config;
pub mod run;

use clap::{Args, Subcommand};

/// Arguments for the run command.
#[derive(Args)]
pub struct RunArgs {
    /// Scenario file (TOML or JSON).
    pub scenario: String,

    /// Render config file, overriding the scenario's `[render]` table.
    #[arg(short, long)]
    pub config: Option<String>,

    /// Stream output to stdout as it is flushed.
    #[arg(long)]
    pub stream: bool,

    /// Print render metrics.
    #[arg(short, long)]
    pub metrics: bool,
}

/// Arguments for the config command.
#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration.
    Show {
        /// Config file to load (default: built-in defaults).
        #[arg(short, long)]
        path: Option<String>,
    },
    /// Print a default config file.
    Init,
}
