//! pkgwright - build signed packages
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
//!
//! Builds one source package and a set of binary packages from a TOML build
//! manifest, and inspects the packages it writes.
//!
//! # Directory Layout
//!
//! ```text
//! ~/.pkgwright/
//! ├── config.toml  # Build configuration
//! ├── BUILD/       # Script files, by build subdirectory
//! ├── SRPMS/       # Source packages
//! └── RPMS/        # Binary packages, by architecture
//! ```

pub mod cmd;

pub use pkgwright_core::paths::*;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "pkgwright")]
#[command(author, version, about = "pkgwright - build signed packages")]
pub struct Cli {
    /// Configuration file (default: $PKGWRIGHT_HOME/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Build the packages described by a manifest
    Build {
        /// Build manifest (TOML)
        manifest: PathBuf,
        /// Only write the source package
        #[arg(long, conflicts_with = "binaries_only")]
        sources_only: bool,
        /// Only write binary packages
        #[arg(long)]
        binaries_only: bool,
    },
    /// Show the lead, signature block and header of a package
    Inspect {
        /// Package file
        file: PathBuf,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
        /// Verify the Ed25519 record against this base64 public key
        #[arg(long, env = "PKGWRIGHT_PUBLIC_KEY")]
        public_key: Option<String>,
    },
    /// Generate an Ed25519 signing key
    Keygen {
        /// Write the secret key to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}
