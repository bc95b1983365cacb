//! CLI for LoadMeter
//!
//! Commands:
//! - simulate: Drive a synthetic frame loop and print the aggregate tables
//! - sizes: Print the memory sizing for a configuration

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod output;

#[derive(Parser)]
#[command(name = "loadmeter")]
#[command(about = "LoadMeter - frame-synchronized CPU/GPU load meter", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a synthetic multi-core (and optionally GPU) frame loop
    Simulate(commands::simulate::SimulateArgs),

    /// Print buffer and query pool sizes for a configuration
    Sizes(commands::sizes::SizesArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate(args) => {
            init_tracing(args.verbose);
            commands::simulate::run(args)
        }
        Commands::Sizes(args) => {
            init_tracing(false);
            commands::sizes::run(args)
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
