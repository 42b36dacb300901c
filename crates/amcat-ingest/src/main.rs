mod cli;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Detect { input } => cli::detect::run(&input),
        Commands::Fields { input } => cli::fields::run(&input),
        Commands::Ingest { input, options } => cli::ingest::run(&input, &options),
    }
}
