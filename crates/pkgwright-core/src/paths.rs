use dirs::home_dir;
use std::path::PathBuf;

/// Returns the pkgwright home directory, or None if the user's home cannot be resolved.
pub fn try_pkgwright_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("PKGWRIGHT_HOME") {
        return Some(PathBuf::from(val));
    }
    home_dir().map(|h| h.join(".pkgwright"))
}

/// Returns the pkgwright home directory (`~/.pkgwright`), falling back to
/// `./.pkgwright` when no home directory can be resolved.
pub fn pkgwright_home() -> PathBuf {
    try_pkgwright_home().unwrap_or_else(|| PathBuf::from(".pkgwright"))
}

/// Default configuration file: ~/.pkgwright/config.toml
pub fn config_path() -> PathBuf {
    pkgwright_home().join("config.toml")
}

/// Build tree root, where script files are resolved: ~/.pkgwright/BUILD
pub fn build_dir() -> PathBuf {
    pkgwright_home().join("BUILD")
}

/// Source package output: ~/.pkgwright/SRPMS
pub fn source_package_dir() -> PathBuf {
    pkgwright_home().join("SRPMS")
}

/// Binary package output: ~/.pkgwright/RPMS
pub fn binary_package_dir() -> PathBuf {
    pkgwright_home().join("RPMS")
}
