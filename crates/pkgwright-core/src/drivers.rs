//! Package-set drivers.
//!
//! A build produces one source package and one binary package per declared
//! package. [`package_sources`] runs first: it names the source package and
//! creates the build cookie, both of which [`package_binaries`] then stamps
//! into every binary header so the set can be traced back to one build.

use std::path::PathBuf;

use pkgwright_schema::{Header, PackageKind, Tag};

use crate::TOOL_VERSION;
use crate::archive::FileMapping;
use crate::config::BuildConfig;
use crate::context::BuildContext;
use crate::error::PackError;
use crate::scripts::{MacroTable, ScriptFiles, inject_scripts};
use crate::template;
use crate::writer::{PackageWriter, WrittenPackage};

/// `SOURCERPM` value when no source package was built.
pub const UNKNOWN_SOURCE: &str = "(unknown)";

/// One binary package.
#[derive(Debug, Clone, Default)]
pub struct Package {
    pub header: Header,
    pub files: Vec<FileMapping>,
    pub scripts: ScriptFiles,
}

impl Package {
    /// Display name for logs and errors.
    pub fn name(&self) -> &str {
        self.header.get_str(Tag::NAME).unwrap_or("(unnamed)")
    }
}

/// Everything needed to write a package set.
#[derive(Debug, Clone, Default)]
pub struct BuildSpec {
    pub source_header: Header,
    pub source_files: Vec<FileMapping>,
    /// Architecture and OS restrictions copied into the source header.
    pub build_restrictions: Header,
    pub build_archs: Vec<String>,
    /// Source package omits its sources (`.nosrc.rpm`).
    pub no_source: bool,
    /// Subdirectory of the build dir that script paths are relative to.
    pub build_subdir: PathBuf,
    pub macros: MacroTable,
    pub packages: Vec<Package>,
}

/// Adds requirement tags derived from a package's files.
pub trait DependencyGenerator {
    fn generate(&self, header: &mut Header, files: &[FileMapping]);
}

/// Generator that adds nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDependencies;

impl DependencyGenerator for NoDependencies {
    fn generate(&self, _header: &mut Header, _files: &[FileMapping]) {}
}

/// Write the source package into `config.source_dir`.
///
/// Records the source package's filename and a fresh cookie in `ctx` for the
/// binary packages that follow.
///
/// # Errors
///
/// Returns [`PackError::Write`] if the package cannot be written.
pub fn package_sources(
    spec: &mut BuildSpec,
    ctx: &mut BuildContext,
    config: &BuildConfig,
    writer: &PackageWriter,
) -> Result<WrittenPackage, PackError> {
    let header = &mut spec.source_header;
    header.set(Tag::RPMVERSION, TOOL_VERSION);
    header.set(Tag::BUILDHOST, ctx.build_host.as_str());
    header.set(Tag::BUILDTIME, ctx.build_time);

    let file_name = format!(
        "{}-{}-{}.{}src.rpm",
        header.get_str(Tag::NAME).unwrap_or_default(),
        header.get_str(Tag::VERSION).unwrap_or_default(),
        header.get_str(Tag::RELEASE).unwrap_or_default(),
        if spec.no_source { "no" } else { "" }
    );
    ctx.source_package_name = Some(file_name.clone());

    header.merge(&spec.build_restrictions);
    if !spec.build_archs.is_empty() {
        header.set(Tag::BUILDARCHS, spec.build_archs.clone());
    }

    let cookie = ctx.make_cookie().to_string();
    header.set(Tag::COOKIE, cookie);

    let output = config.source_dir.join(&file_name);
    tracing::debug!(package = %file_name, files = spec.source_files.len(), "packaging sources");
    writer
        .write(
            header,
            &spec.source_files,
            PackageKind::Source,
            &output,
            ctx.pass_phrase.as_deref(),
        )
        .map_err(|source| PackError::Write {
            package: file_name,
            source,
        })
}

/// Write every binary package that has files into `config.package_dir`.
///
/// Packages without files are skipped. The first failure stops the loop;
/// packages already written stay on disk.
///
/// # Errors
///
/// Returns the first [`PackError`] from script injection, filename
/// rendering, or writing.
pub fn package_binaries(
    spec: &mut BuildSpec,
    ctx: &BuildContext,
    config: &BuildConfig,
    writer: &PackageWriter,
    deps: &dyn DependencyGenerator,
) -> Result<Vec<WrittenPackage>, PackError> {
    let script_dir = config.build_dir.join(&spec.build_subdir);
    let mut written = Vec::new();

    for pkg in &mut spec.packages {
        if pkg.files.is_empty() {
            tracing::debug!(package = pkg.name(), "no files, skipping");
            continue;
        }

        inject_scripts(&mut pkg.header, &pkg.scripts, &script_dir, &spec.macros)?;
        deps.generate(&mut pkg.header, &pkg.files);

        let header = &mut pkg.header;
        if let Some(cookie) = &ctx.cookie {
            header.set(Tag::COOKIE, cookie.as_str());
        }
        header.set(Tag::RPMVERSION, TOOL_VERSION);
        header.set(Tag::BUILDHOST, ctx.build_host.as_str());
        header.set(Tag::BUILDTIME, ctx.build_time);
        header.set(
            Tag::SOURCERPM,
            ctx.source_package_name.as_deref().unwrap_or(UNKNOWN_SOURCE),
        );

        let package = header.get_str(Tag::NAME).unwrap_or("(unnamed)").to_string();
        let file_name =
            template::render(&config.binary_filename, header).map_err(|source| {
                PackError::Filename {
                    package: package.clone(),
                    source,
                }
            })?;
        let output = config.package_dir.join(file_name);

        let result = writer
            .write(
                header,
                &pkg.files,
                PackageKind::Binary,
                &output,
                ctx.pass_phrase.as_deref(),
            )
            .map_err(|source| PackError::Write { package, source })?;
        written.push(result);
    }

    Ok(written)
}
