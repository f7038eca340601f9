//! Build manifest parsing.
//!
//! A build manifest (`pkgwright.toml`) describes one source package and the
//! binary packages built from it. Relative source paths resolve against the
//! manifest's directory.
//!
//! ```toml
//! [source]
//! name = "demo"
//! version = "1.0"
//! release = "1"
//! summary = "Demo tool"
//! license = "MIT"
//! files = ["demo-1.0.tar.gz"]
//!
//! [restrictions]
//! exclude_arch = ["s390x"]
//!
//! [macros]
//! prefix = "/usr"
//!
//! [build]
//! subdir = "demo-1.0"
//! archs = ["x86_64", "aarch64"]
//!
//! [[package]]
//! requires = ["libc.so.6"]
//! files = [{ src = "out/demo", dest = "/usr/bin/demo", mode = 0o755 }]
//! trees = [{ src = "out/share", dest = "/usr/share/demo" }]
//!
//! [package.scripts]
//! post_uninstall = "rm -rf /var/cache/demo"
//!
//! [package.script_files]
//! post_install = "post.sh"
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use pkgwright_schema::{Arch, Header, Os, Tag};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use walkdir::WalkDir;

use crate::archive::FileMapping;
use crate::drivers::{BuildSpec, Package};
use crate::scripts::{MacroTable, ScriptFiles, ScriptRole};

/// Errors that can occur when loading a build manifest.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("couldn't read manifest {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid manifest: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid manifest: {0}")]
    Invalid(String),

    #[error("couldn't walk {}: {source}", root.display())]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub source: SourceSection,
    #[serde(default)]
    pub restrictions: Restrictions,
    #[serde(default)]
    pub macros: BTreeMap<String, String>,
    #[serde(default)]
    pub build: BuildSection,
    #[serde(default, rename = "package")]
    pub packages: Vec<PackageSection>,
}

/// Identity fields shared by the source and binary sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Identity {
    pub name: Option<String>,
    pub version: Option<String>,
    pub release: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub license: Option<String>,
    pub group: Option<String>,
    pub url: Option<String>,
    pub arch: Option<Arch>,
    pub os: Option<Os>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSection {
    #[serde(flatten)]
    pub identity: Identity,
    #[serde(default)]
    pub no_source: bool,
    /// Source files, stored in the source package under their file names.
    #[serde(default)]
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Restrictions {
    #[serde(default)]
    pub exclude_arch: Vec<String>,
    #[serde(default)]
    pub exclusive_arch: Vec<String>,
    #[serde(default)]
    pub exclude_os: Vec<String>,
    #[serde(default)]
    pub exclusive_os: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildSection {
    /// Script paths resolve against `<build_dir>/<subdir>`.
    #[serde(default)]
    pub subdir: PathBuf,
    #[serde(default)]
    pub archs: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageSection {
    /// Missing identity fields are inherited from `[source]`.
    #[serde(flatten)]
    pub identity: Identity,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub files: Vec<FileEntry>,
    #[serde(default)]
    pub trees: Vec<TreeEntry>,
    /// Inline script text.
    #[serde(default)]
    pub scripts: RoleTable<String>,
    /// Script files; these replace inline text for the same role.
    #[serde(default)]
    pub script_files: RoleTable<PathBuf>,
}

/// One value per script role.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleTable<T> {
    pub pre_install: Option<T>,
    pub pre_uninstall: Option<T>,
    pub post_install: Option<T>,
    pub post_uninstall: Option<T>,
    pub verify: Option<T>,
}

impl<T> Default for RoleTable<T> {
    fn default() -> Self {
        Self {
            pre_install: None,
            pre_uninstall: None,
            post_install: None,
            post_uninstall: None,
            verify: None,
        }
    }
}

impl<T> RoleTable<T> {
    fn entries(&self) -> impl Iterator<Item = (ScriptRole, &T)> {
        [
            (ScriptRole::PreInstall, &self.pre_install),
            (ScriptRole::PreUninstall, &self.pre_uninstall),
            (ScriptRole::PostInstall, &self.post_install),
            (ScriptRole::PostUninstall, &self.post_uninstall),
            (ScriptRole::Verify, &self.verify),
        ]
        .into_iter()
        .filter_map(|(role, value)| value.as_ref().map(|v| (role, v)))
    }
}

/// A single file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileEntry {
    pub src: PathBuf,
    pub dest: String,
    pub mode: Option<u32>,
    pub user: Option<String>,
    pub group: Option<String>,
}

/// A directory copied recursively, in sorted order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TreeEntry {
    pub src: PathBuf,
    pub dest: String,
}

impl Manifest {
    /// # Errors
    ///
    /// Returns `ManifestError::Parse` if the TOML content is invalid.
    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        Ok(toml::from_str(content)?)
    }

    /// # Errors
    ///
    /// Returns `ManifestError::Io` if the file cannot be read, or
    /// `ManifestError::Parse` if its content is invalid.
    pub fn from_file(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Convert into a [`BuildSpec`], resolving relative paths against
    /// `base_dir` and expanding trees.
    ///
    /// # Errors
    ///
    /// Returns `ManifestError::Invalid` for missing identity fields or
    /// duplicate package names, and `ManifestError::Walk` for unreadable
    /// trees.
    pub fn into_build_spec(self, base_dir: &Path) -> Result<BuildSpec, ManifestError> {
        let source = &self.source.identity;
        for (field, value) in [
            ("name", &source.name),
            ("version", &source.version),
            ("release", &source.release),
        ] {
            if value.as_deref().is_none_or(str::is_empty) {
                return Err(ManifestError::Invalid(format!("[source] is missing {field}")));
            }
        }

        let source_header = identity_header(source, &Identity::default());
        let source_files = self
            .source
            .files
            .iter()
            .map(|f| {
                let dest = f
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .ok_or_else(|| {
                        ManifestError::Invalid(format!("source file {} has no name", f.display()))
                    })?;
                Ok(FileMapping::new(resolve(base_dir, f), dest))
            })
            .collect::<Result<Vec<_>, ManifestError>>()?;

        let mut seen = HashSet::new();
        let mut packages = Vec::with_capacity(self.packages.len());
        for section in &self.packages {
            let header = package_header(section, source);
            let name = header.get_str(Tag::NAME).unwrap_or_default().to_string();
            if !seen.insert(name.clone()) {
                return Err(ManifestError::Invalid(format!("duplicate package {name}")));
            }
            packages.push(Package {
                header,
                files: package_files(section, base_dir)?,
                scripts: script_files(&section.script_files),
            });
        }

        Ok(BuildSpec {
            source_header,
            source_files,
            build_restrictions: restriction_header(&self.restrictions),
            build_archs: self.build.archs,
            no_source: self.source.no_source,
            build_subdir: self.build.subdir,
            macros: self.macros.into_iter().collect::<MacroTable>(),
            packages,
        })
    }
}

/// Load a manifest file and convert it, resolving paths against its
/// directory.
pub fn load_build_spec(path: &Path) -> Result<BuildSpec, ManifestError> {
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    Manifest::from_file(path)?.into_build_spec(base)
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Header from `identity`, falling back to `inherit` field by field.
fn identity_header(identity: &Identity, inherit: &Identity) -> Header {
    let mut h = Header::new();
    let strings = [
        (Tag::NAME, &identity.name, &inherit.name),
        (Tag::VERSION, &identity.version, &inherit.version),
        (Tag::RELEASE, &identity.release, &inherit.release),
        (Tag::SUMMARY, &identity.summary, &inherit.summary),
        (Tag::DESCRIPTION, &identity.description, &inherit.description),
        (Tag::LICENSE, &identity.license, &inherit.license),
        (Tag::GROUP, &identity.group, &inherit.group),
        (Tag::URL, &identity.url, &inherit.url),
    ];
    for (tag, own, parent) in strings {
        if let Some(value) = own.as_ref().or(parent.as_ref()) {
            h.set(tag, value.as_str());
        }
    }

    let arch = identity.arch.or(inherit.arch).unwrap_or_else(Arch::current);
    let os = identity.os.or(inherit.os).unwrap_or_else(Os::current);
    h.set(Tag::ARCH, arch.as_str());
    h.set(Tag::OS, os.as_str());
    h
}

fn package_header(section: &PackageSection, source: &Identity) -> Header {
    let mut header = identity_header(&section.identity, source);
    for (role, text) in section.scripts.entries() {
        header.set(role.tag(), text.as_str());
    }
    if !section.requires.is_empty() {
        header.set(Tag::REQUIRENAME, section.requires.clone());
    }
    header
}

fn script_files(table: &RoleTable<PathBuf>) -> ScriptFiles {
    let mut files = ScriptFiles::default();
    for (role, path) in table.entries() {
        files.set(role, path);
    }
    files
}

fn restriction_header(r: &Restrictions) -> Header {
    let mut h = Header::new();
    for (tag, values) in [
        (Tag::EXCLUDEARCH, &r.exclude_arch),
        (Tag::EXCLUSIVEARCH, &r.exclusive_arch),
        (Tag::EXCLUDEOS, &r.exclude_os),
        (Tag::EXCLUSIVEOS, &r.exclusive_os),
    ] {
        if !values.is_empty() {
            h.set(tag, values.clone());
        }
    }
    h
}

fn package_files(section: &PackageSection, base: &Path) -> Result<Vec<FileMapping>, ManifestError> {
    let mut files = Vec::new();

    for entry in &section.files {
        if entry.dest.trim_start_matches('/').is_empty() {
            return Err(ManifestError::Invalid(format!(
                "file {} has an empty destination",
                entry.src.display()
            )));
        }
        let mut mapping = FileMapping::new(resolve(base, &entry.src), entry.dest.as_str());
        if let Some(mode) = entry.mode {
            mapping = mapping.with_mode(mode);
        }
        if entry.user.is_some() || entry.group.is_some() {
            mapping = mapping.with_owner(
                entry.user.as_deref().unwrap_or(crate::archive::DEFAULT_OWNER),
                entry.group.as_deref().unwrap_or(crate::archive::DEFAULT_OWNER),
            );
        }
        files.push(mapping);
    }

    for tree in &section.trees {
        let root = resolve(base, &tree.src);
        let dest = tree.dest.trim_end_matches('/');
        for entry in WalkDir::new(&root).sort_by_file_name() {
            let entry = entry.map_err(|source| ManifestError::Walk {
                root: root.clone(),
                source,
            })?;
            let rel = entry.path().strip_prefix(&root).unwrap_or(entry.path());
            let archive_path = if rel.as_os_str().is_empty() {
                dest.to_string()
            } else {
                format!("{dest}/{}", rel.to_string_lossy())
            };
            if archive_path.trim_start_matches('/').is_empty() {
                continue;
            }
            files.push(FileMapping::new(entry.path(), archive_path));
        }
    }

    Ok(files)
}
