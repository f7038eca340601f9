//! Build command

use anyhow::{Context, Result};
use pkgwright_core::manifest::load_build_spec;
use pkgwright_core::{
    BuildConfig, BuildContext, NoDependencies, PackageWriter, package_binaries, package_sources,
};
use std::path::Path;

/// Which packages a build writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stages {
    pub sources: bool,
    pub binaries: bool,
}

impl Stages {
    pub fn select(sources_only: bool, binaries_only: bool) -> Self {
        Self {
            sources: !binaries_only,
            binaries: !sources_only,
        }
    }
}

/// Build the packages described by `manifest`.
pub fn build(manifest: &Path, config: Option<&Path>, stages: Stages) -> Result<()> {
    let config = BuildConfig::load(config).context("Failed to load config")?;
    let mut spec = load_build_spec(manifest)
        .with_context(|| format!("Failed to load manifest {}", manifest.display()))?;

    let writer = PackageWriter::from_config(&config);
    let mut ctx = BuildContext::new().with_pass_phrase(BuildConfig::pass_phrase_from_env());
    tracing::debug!(?config, ?ctx, "starting build");

    if stages.sources {
        let written = package_sources(&mut spec, &mut ctx, &config, &writer)
            .context("Failed to write source package")?;
        println!("{}", written.path.display());
    }

    if stages.binaries {
        let written = package_binaries(&mut spec, &ctx, &config, &writer, &NoDependencies)
            .context("Failed to write binary packages")?;
        if written.is_empty() {
            tracing::warn!("no binary package has files; nothing written");
        }
        for pkg in &written {
            println!("{}", pkg.path.display());
        }
    }

    Ok(())
}
