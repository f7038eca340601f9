//! Package writing pipeline.
//!
//! Turns a metadata [`Header`](pkgwright_schema::Header) and an ordered list
//! of [`FileMapping`]s into a finished, signed package file:
//!
//! 1. [`scripts`] folds script files into the header.
//! 2. [`writer::PackageWriter`] stages the header, runs the
//!    [`compress::Compressor`] over an [`archive`] of the files, finalizes the
//!    size tags, hands the region to [`signature`], and assembles the output.
//! 3. [`drivers`] decorate headers with provenance and run the writer once per
//!    package.

pub mod archive;
pub mod compress;
pub mod config;
pub mod context;
pub mod drivers;
pub mod error;
pub mod inspect;
pub mod manifest;
pub mod paths;
pub mod scripts;
pub mod signature;
pub mod template;
pub mod writer;

pub use archive::FileMapping;
pub use compress::Compressor;
pub use config::BuildConfig;
pub use context::BuildContext;
pub use drivers::{
    BuildSpec, DependencyGenerator, NoDependencies, Package, package_binaries, package_sources,
};
pub use error::PackError;
pub use inspect::PackageInfo;
pub use paths::*;
pub use writer::{PackageWriter, WrittenPackage};

/// Tool version recorded in the `RPMVERSION` tag of every package.
pub const TOOL_VERSION: &str = concat!("pkgwright-", env!("CARGO_PKG_VERSION"));
