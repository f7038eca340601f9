//! Script injection.
//!
//! Install and uninstall scriptlets may be kept in files next to the build
//! tree. [`inject_scripts`] reads each configured file, runs every line
//! through a [`MacroExpander`], and stores the result in the role's header
//! tag, replacing whatever inline text the tag held before.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use pkgwright_schema::{Header, Tag};
use thiserror::Error;

/// Which scriptlet a file supplies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptRole {
    /// Runs before installation.
    PreInstall,
    /// Runs before removal.
    PreUninstall,
    /// Runs after installation.
    PostInstall,
    /// Runs after removal.
    PostUninstall,
    /// Runs on verification.
    Verify,
}

impl ScriptRole {
    /// All roles, in injection order.
    pub const ALL: [Self; 5] = [
        Self::PreInstall,
        Self::PreUninstall,
        Self::PostInstall,
        Self::PostUninstall,
        Self::Verify,
    ];

    /// Header tag the expanded script is stored under.
    pub fn tag(self) -> Tag {
        match self {
            Self::PreInstall => Tag::PREIN,
            Self::PreUninstall => Tag::PREUN,
            Self::PostInstall => Tag::POSTIN,
            Self::PostUninstall => Tag::POSTUN,
            Self::Verify => Tag::VERIFYSCRIPT,
        }
    }

    /// Label used in error messages.
    pub fn label(self) -> &'static str {
        match self {
            Self::PreInstall => "PreIn",
            Self::PreUninstall => "PreUn",
            Self::PostInstall => "PostIn",
            Self::PostUninstall => "PostUn",
            Self::Verify => "VerifyScript",
        }
    }
}

impl std::fmt::Display for ScriptRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Optional script file per role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptFiles {
    pub pre_install: Option<PathBuf>,
    pub pre_uninstall: Option<PathBuf>,
    pub post_install: Option<PathBuf>,
    pub post_uninstall: Option<PathBuf>,
    pub verify: Option<PathBuf>,
}

impl ScriptFiles {
    /// The configured path for `role`, if any.
    pub fn get(&self, role: ScriptRole) -> Option<&Path> {
        match role {
            ScriptRole::PreInstall => self.pre_install.as_deref(),
            ScriptRole::PreUninstall => self.pre_uninstall.as_deref(),
            ScriptRole::PostInstall => self.post_install.as_deref(),
            ScriptRole::PostUninstall => self.post_uninstall.as_deref(),
            ScriptRole::Verify => self.verify.as_deref(),
        }
    }

    /// Set the path for `role`.
    pub fn set(&mut self, role: ScriptRole, path: impl Into<PathBuf>) {
        let slot = match role {
            ScriptRole::PreInstall => &mut self.pre_install,
            ScriptRole::PreUninstall => &mut self.pre_uninstall,
            ScriptRole::PostInstall => &mut self.post_install,
            ScriptRole::PostUninstall => &mut self.post_uninstall,
            ScriptRole::Verify => &mut self.verify,
        };
        *slot = Some(path.into());
    }

    pub fn is_empty(&self) -> bool {
        ScriptRole::ALL.iter().all(|r| self.get(*r).is_none())
    }
}

/// Failure reading a script file.
#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("couldn't open {role} file {}: {source}", path.display())]
    Open {
        role: ScriptRole,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("couldn't read {role} file {}: {source}", path.display())]
    Read {
        role: ScriptRole,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Line-oriented macro expansion.
pub trait MacroExpander {
    /// Expand one line. The line keeps its terminator, if it had one.
    fn expand_line(&self, line: &str) -> String;
}

/// Expander that returns every line unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMacros;

impl MacroExpander for NoMacros {
    fn expand_line(&self, line: &str) -> String {
        line.to_string()
    }
}

/// A flat `name → value` macro table.
///
/// Recognised forms:
///
/// - `%{name}` and `%name` expand to the value; an undefined `%{name}` is left
///   as written, an undefined `%name` too.
/// - `%{?name}` expands to the value, or to nothing when undefined.
/// - `%%` is a literal `%`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MacroTable {
    macros: HashMap<String, String>,
}

impl MacroTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define or redefine a macro.
    pub fn define(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.macros.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.macros.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.macros.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MacroTable {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            macros: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

impl MacroExpander for MacroTable {
    fn expand_line(&self, line: &str) -> String {
        let mut out = String::with_capacity(line.len());
        let mut rest = line;

        while let Some(pos) = rest.find('%') {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];

            if let Some(tail) = after.strip_prefix('%') {
                out.push('%');
                rest = tail;
            } else if let Some(body) = after.strip_prefix('{') {
                let Some(close) = body.find('}') else {
                    out.push_str(&rest[pos..]);
                    return out;
                };
                let inner = &body[..close];
                let (optional, name) = match inner.strip_prefix('?') {
                    Some(name) => (true, name),
                    None => (false, inner),
                };
                match self.get(name) {
                    Some(value) => out.push_str(value),
                    None if optional => {}
                    None => {
                        out.push_str("%{");
                        out.push_str(inner);
                        out.push('}');
                    }
                }
                rest = &body[close + 1..];
            } else {
                let end = after.find(|c: char| !is_name_char(c)).unwrap_or(after.len());
                let name = &after[..end];
                match self.get(name) {
                    Some(value) if !name.is_empty() => out.push_str(value),
                    _ => {
                        out.push('%');
                        out.push_str(name);
                    }
                }
                rest = &after[end..];
            }
        }

        out.push_str(rest);
        out
    }
}

/// Read every configured script file into its header tag.
///
/// Relative paths resolve against `base_dir`. Roles without a file keep
/// whatever the header already holds.
///
/// # Errors
///
/// Returns [`ScriptError`] naming the role and path of the first file that
/// cannot be opened or read. Tags injected before the failure stay set.
pub fn inject_scripts(
    header: &mut Header,
    scripts: &ScriptFiles,
    base_dir: &Path,
    expander: &dyn MacroExpander,
) -> Result<(), ScriptError> {
    for role in ScriptRole::ALL {
        let Some(path) = scripts.get(role) else {
            continue;
        };
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        };

        let text = read_expanded(role, &path, expander)?;
        tracing::debug!(role = %role, path = %path.display(), bytes = text.len(), "script injected");
        header.set(role.tag(), text);
    }
    Ok(())
}

fn read_expanded(
    role: ScriptRole,
    path: &Path,
    expander: &dyn MacroExpander,
) -> Result<String, ScriptError> {
    let file = File::open(path).map_err(|source| ScriptError::Open {
        role,
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = BufReader::new(file);

    // Lines are raw bytes; invalid UTF-8 is replaced rather than rejected.
    let mut text = String::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = reader
            .read_until(b'\n', &mut line)
            .map_err(|source| ScriptError::Read {
                role,
                path: path.to_path_buf(),
                source,
            })?;
        if n == 0 {
            break;
        }
        text.push_str(&expander.expand_line(&String::from_utf8_lossy(&line)));
    }
    Ok(text)
}
