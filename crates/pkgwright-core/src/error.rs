use thiserror::Error;

use crate::config::ConfigError;
use crate::manifest::ManifestError;
use crate::scripts::ScriptError;
use crate::template::TemplateError;
use crate::writer::WriteError;

/// Errors surfaced by the package drivers.
#[derive(Error, Debug)]
pub enum PackError {
    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error("couldn't generate output filename for package {package}: {source}")]
    Filename {
        package: String,
        #[source]
        source: TemplateError,
    },

    #[error("couldn't write {package}: {source}")]
    Write {
        package: String,
        #[source]
        source: WriteError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}
