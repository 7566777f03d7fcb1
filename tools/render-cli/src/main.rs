//! Render CLI - run scripted ordered renders.
//!
//! Commands:
//! - `render run` - Execute a scenario file and print its output
//! - `render config` - Show or initialize render configuration

mod commands;
mod output;
mod scenario;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;

use commands::{ConfigArgs, RunArgs};

/// Render CLI - Run scripted ordered async renders
#[derive(Parser)]
#[command(name = "render")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use JSON output format
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario file
    Run(RunArgs),

    /// Manage render configuration
    Config(ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let output = output::Output::new(cli.verbose, cli.json);

    let result = match cli.command {
        Commands::Run(args) => commands::run::run(args, &output).await,
        Commands::Config(args) => commands::config::run(args, &output),
    };

    if let Err(e) = result {
        output.error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
