//! Target architecture and operating system codes.
//!
//! The lead stores both as small integers. The numbering follows the
//! long-standing `arch_canon` / `os_canon` tables so that existing readers
//! identify the target correctly.
//!
//! # Example
//!
//! ```
//! use pkgwright_schema::Arch;
//!
//! let current = Arch::current();
//! println!("Building for: {} (code {})", current, current.code());
//! ```

/// CPU architecture a package is built for.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    /// 64-bit x86 (Intel / AMD)
    #[default]
    X86_64,
    /// 64-bit ARM
    Aarch64,
    /// 32-bit x86
    I686,
    /// 64-bit little-endian POWER
    Ppc64le,
    /// IBM Z
    S390x,
    /// 64-bit RISC-V
    Riscv64,
    /// Architecture independent content
    Noarch,
}

impl Arch {
    /// Get the architecture of the running host
    pub fn current() -> Self {
        match std::env::consts::ARCH {
            "aarch64" => Self::Aarch64,
            "x86" => Self::I686,
            "powerpc64" => Self::Ppc64le,
            "s390x" => Self::S390x,
            "riscv64" => Self::Riscv64,
            _ => Self::X86_64,
        }
    }

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::Aarch64 => "aarch64",
            Self::I686 => "i686",
            Self::Ppc64le => "ppc64le",
            Self::S390x => "s390x",
            Self::Riscv64 => "riscv64",
            Self::Noarch => "noarch",
        }
    }

    /// Numeric code written into the lead.
    ///
    /// `noarch` has no code of its own; it is recorded with the host's code,
    /// which is what readers expect.
    pub fn code(&self) -> u16 {
        match self {
            Self::X86_64 | Self::I686 => 1,
            Self::Ppc64le => 16,
            Self::S390x => 15,
            Self::Aarch64 => 19,
            Self::Riscv64 => 22,
            Self::Noarch => Self::current().code(),
        }
    }
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Arch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "x86_64" | "amd64" => Ok(Self::X86_64),
            "aarch64" | "arm64" => Ok(Self::Aarch64),
            "i386" | "i586" | "i686" | "x86" => Ok(Self::I686),
            "ppc64le" => Ok(Self::Ppc64le),
            "s390x" => Ok(Self::S390x),
            "riscv64" => Ok(Self::Riscv64),
            "noarch" => Ok(Self::Noarch),
            _ => Err(format!("Unknown architecture: {s}")),
        }
    }
}

/// Operating system a package is built for.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    /// Linux
    #[default]
    Linux,
    /// FreeBSD
    FreeBsd,
    /// macOS / Darwin
    Darwin,
}

impl Os {
    /// Get the operating system of the running host
    pub fn current() -> Self {
        match std::env::consts::OS {
            "freebsd" => Self::FreeBsd,
            "macos" => Self::Darwin,
            _ => Self::Linux,
        }
    }

    /// Canonical name, as stored in the `OS` tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::FreeBsd => "freebsd",
            Self::Darwin => "darwin",
        }
    }

    /// Numeric code written into the lead.
    pub fn code(&self) -> u16 {
        match self {
            Self::Linux => 1,
            Self::FreeBsd => 8,
            Self::Darwin => 21,
        }
    }
}

impl std::fmt::Display for Os {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Os {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "linux" => Ok(Self::Linux),
            "freebsd" => Ok(Self::FreeBsd),
            "darwin" | "macos" | "macosx" => Ok(Self::Darwin),
            _ => Err(format!("Unknown operating system: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arch_aliases_parse() {
        assert_eq!("amd64".parse::<Arch>().unwrap(), Arch::X86_64);
        assert_eq!("arm64".parse::<Arch>().unwrap(), Arch::Aarch64);
        assert!("sparc".parse::<Arch>().is_err());
    }

    #[test]
    fn lead_codes_match_canon_table() {
        assert_eq!(Arch::X86_64.code(), 1);
        assert_eq!(Arch::Aarch64.code(), 19);
        assert_eq!(Os::Linux.code(), 1);
        assert_eq!(Os::Darwin.code(), 21);
    }

    #[test]
    fn noarch_borrows_host_code() {
        assert_eq!(Arch::Noarch.code(), Arch::current().code());
    }
}
