//! pkgwright CLI

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pkgwright_cli::cmd;
use pkgwright_cli::{Cli, Commands};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            manifest,
            sources_only,
            binaries_only,
        } => cmd::build::build(
            &manifest,
            cli.config.as_deref(),
            cmd::build::Stages::select(sources_only, binaries_only),
        ),
        Commands::Inspect {
            file,
            json,
            public_key,
        } => cmd::inspect::inspect(&file, json, public_key.as_deref()),
        Commands::Keygen { output } => cmd::keygen::keygen(output.as_deref()),
    }
}
