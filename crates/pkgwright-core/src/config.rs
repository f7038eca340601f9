//! Build configuration.
//!
//! Read from `$PKGWRIGHT_HOME/config.toml` (or an explicit path). Every key is
//! optional:
//!
//! ```toml
//! build_dir = "/home/me/.pkgwright/BUILD"
//! source_dir = "/home/me/.pkgwright/SRPMS"
//! package_dir = "/home/me/.pkgwright/RPMS"
//! temp_dir = "/var/tmp"
//! binary_filename = "%{ARCH}/%{NAME}-%{VERSION}-%{RELEASE}.%{ARCH}.rpm"
//!
//! [payload]
//! compressor = "external"   # gzip | zstd | external
//! level = 9
//! program = "gzip"
//! args = ["-c9fn"]
//!
//! [signing]
//! kind = "ed25519"          # none | ed25519
//!
//! [target]
//! arch = "aarch64"
//! os = "linux"
//! ```
//!
//! The signing pass-phrase is never stored in the file; it comes from
//! `PKGWRIGHT_SIGNING_KEY`.

use std::path::{Path, PathBuf};

use pkgwright_schema::{Arch, Os};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::compress::{Compressor, DEFAULT_EXTERNAL_ARGS};
use crate::signature::SignatureKind;
use crate::template::DEFAULT_BINARY_TEMPLATE;
use crate::writer::PackageWriter;

/// Environment variable holding the signing pass-phrase.
pub const SIGNING_KEY_ENV: &str = "PKGWRIGHT_SIGNING_KEY";

/// Errors that can occur when loading the build configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("couldn't read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Root for resolving relative script paths.
    pub build_dir: PathBuf,
    /// Where source packages are written.
    pub source_dir: PathBuf,
    /// Where binary packages are written.
    pub package_dir: PathBuf,
    /// Staging directory; the system temp dir when unset.
    pub temp_dir: Option<PathBuf>,
    /// Filename template for binary packages, relative to `package_dir`.
    pub binary_filename: String,
    pub payload: PayloadConfig,
    pub signing: SigningConfig,
    pub target: TargetConfig,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            build_dir: crate::paths::build_dir(),
            source_dir: crate::paths::source_package_dir(),
            package_dir: crate::paths::binary_package_dir(),
            temp_dir: None,
            binary_filename: DEFAULT_BINARY_TEMPLATE.to_string(),
            payload: PayloadConfig::default(),
            signing: SigningConfig::default(),
            target: TargetConfig::default(),
        }
    }
}

/// Payload compressor selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressorKind {
    #[default]
    Gzip,
    Zstd,
    External,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PayloadConfig {
    pub compressor: CompressorKind,
    /// Compression level; gzip defaults to 9, zstd to 19.
    pub level: Option<i32>,
    /// Program for the `external` compressor.
    pub program: PathBuf,
    /// Arguments for the `external` compressor.
    pub args: Vec<String>,
}

impl Default for PayloadConfig {
    fn default() -> Self {
        Self {
            compressor: CompressorKind::Gzip,
            level: None,
            program: PathBuf::from("gzip"),
            args: DEFAULT_EXTERNAL_ARGS.iter().map(ToString::to_string).collect(),
        }
    }
}

impl PayloadConfig {
    /// The configured compressor.
    pub fn compressor(&self) -> Compressor {
        match self.compressor {
            CompressorKind::Gzip => Compressor::Gzip {
                level: self.level.map_or(9, |l| l.clamp(0, 9).unsigned_abs()),
            },
            CompressorKind::Zstd => Compressor::Zstd {
                level: self.level.unwrap_or(19),
            },
            CompressorKind::External => Compressor::External {
                program: self.program.clone(),
                args: self.args.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    pub kind: SignatureKind,
}

/// Target platform recorded in the lead. Defaults to the running host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub arch: Option<Arch>,
    pub os: Option<Os>,
}

impl BuildConfig {
    /// Parse a configuration from TOML.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` if the TOML is invalid.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load a configuration file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` if the file cannot be read, or
    /// `ConfigError::Parse` if it is invalid.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Load `explicit` if given, otherwise the default config file when it
    /// exists, otherwise the defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        let default = crate::paths::config_path();
        if default.exists() {
            tracing::debug!(path = %default.display(), "loading config");
            Self::from_file(&default)
        } else {
            Ok(Self::default())
        }
    }

    /// The signing pass-phrase from the environment, if set and non-empty.
    pub fn pass_phrase_from_env() -> Option<String> {
        std::env::var(SIGNING_KEY_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
    }
}

impl PackageWriter {
    /// A writer using the configured compressor, signature and target.
    pub fn from_config(config: &BuildConfig) -> Self {
        Self {
            compressor: config.payload.compressor(),
            signature: config.signing.kind,
            arch: config.target.arch.unwrap_or_else(Arch::current),
            os: config.target.os.unwrap_or_else(Os::current),
            temp_dir: config.temp_dir.clone(),
        }
    }
}
