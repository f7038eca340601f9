//! Tag identifiers for header and signature blocks.
//!
//! Tags are plain `u32` values on the wire. [`Tag`] wraps the value so that
//! header APIs cannot be handed an arbitrary integer by accident, and carries
//! the well-known constants this writer emits.

/// A metadata header tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag(pub u32);

impl Tag {
    /// Uncompressed archive size as accounted by the archive builder (int64).
    pub const LONGARCHIVESIZE: Self = Self(271);
    /// Package name.
    pub const NAME: Self = Self(1000);
    /// Package version.
    pub const VERSION: Self = Self(1001);
    /// Package release.
    pub const RELEASE: Self = Self(1002);
    /// One-line summary.
    pub const SUMMARY: Self = Self(1004);
    /// Long description.
    pub const DESCRIPTION: Self = Self(1005);
    /// Build time, seconds since the epoch.
    pub const BUILDTIME: Self = Self(1006);
    /// Host the package was built on.
    pub const BUILDHOST: Self = Self(1007);
    /// License string.
    pub const LICENSE: Self = Self(1014);
    /// Package group.
    pub const GROUP: Self = Self(1016);
    /// Upstream URL.
    pub const URL: Self = Self(1020);
    /// Target operating system name.
    pub const OS: Self = Self(1021);
    /// Target architecture name.
    pub const ARCH: Self = Self(1022);
    /// Pre-install script.
    pub const PREIN: Self = Self(1023);
    /// Post-install script.
    pub const POSTIN: Self = Self(1024);
    /// Pre-uninstall script.
    pub const PREUN: Self = Self(1025);
    /// Post-uninstall script.
    pub const POSTUN: Self = Self(1026);
    /// Filename of the source package this binary package came from.
    pub const SOURCERPM: Self = Self(1044);
    /// Size in bytes of the compressed archive that follows the header.
    pub const ARCHIVESIZE: Self = Self(1046);
    /// Names of required capabilities.
    pub const REQUIRENAME: Self = Self(1049);
    /// Architectures the source must not be built on.
    pub const EXCLUDEARCH: Self = Self(1059);
    /// Operating systems the source must not be built on.
    pub const EXCLUDEOS: Self = Self(1060);
    /// The only architectures the source may be built on.
    pub const EXCLUSIVEARCH: Self = Self(1061);
    /// The only operating systems the source may be built on.
    pub const EXCLUSIVEOS: Self = Self(1062);
    /// Version of the tool that wrote the package.
    pub const RPMVERSION: Self = Self(1064);
    /// Verify script.
    pub const VERIFYSCRIPT: Self = Self(1079);
    /// Architectures a source package builds for.
    pub const BUILDARCHS: Self = Self(1089);
    /// Build identity shared by all packages of one build.
    pub const COOKIE: Self = Self(1094);
    /// Archive container format of the payload.
    pub const PAYLOADFORMAT: Self = Self(1124);
    /// Compressor used for the payload.
    pub const PAYLOADCOMPRESSOR: Self = Self(1125);

    /// Name/value table used by the filename template evaluator and by
    /// diagnostics output.
    pub const KNOWN: &'static [(&'static str, Self)] = &[
        ("LONGARCHIVESIZE", Self::LONGARCHIVESIZE),
        ("NAME", Self::NAME),
        ("VERSION", Self::VERSION),
        ("RELEASE", Self::RELEASE),
        ("SUMMARY", Self::SUMMARY),
        ("DESCRIPTION", Self::DESCRIPTION),
        ("BUILDTIME", Self::BUILDTIME),
        ("BUILDHOST", Self::BUILDHOST),
        ("LICENSE", Self::LICENSE),
        ("GROUP", Self::GROUP),
        ("URL", Self::URL),
        ("OS", Self::OS),
        ("ARCH", Self::ARCH),
        ("PREIN", Self::PREIN),
        ("POSTIN", Self::POSTIN),
        ("PREUN", Self::PREUN),
        ("POSTUN", Self::POSTUN),
        ("SOURCERPM", Self::SOURCERPM),
        ("ARCHIVESIZE", Self::ARCHIVESIZE),
        ("REQUIRENAME", Self::REQUIRENAME),
        ("EXCLUDEARCH", Self::EXCLUDEARCH),
        ("EXCLUDEOS", Self::EXCLUDEOS),
        ("EXCLUSIVEARCH", Self::EXCLUSIVEARCH),
        ("EXCLUSIVEOS", Self::EXCLUSIVEOS),
        ("RPMVERSION", Self::RPMVERSION),
        ("VERIFYSCRIPT", Self::VERIFYSCRIPT),
        ("BUILDARCHS", Self::BUILDARCHS),
        ("COOKIE", Self::COOKIE),
        ("PAYLOADFORMAT", Self::PAYLOADFORMAT),
        ("PAYLOADCOMPRESSOR", Self::PAYLOADCOMPRESSOR),
    ];

    /// Look up a tag by its name, ignoring case and an optional `RPMTAG_`
    /// prefix.
    pub fn from_name(name: &str) -> Option<Self> {
        let upper = name.to_ascii_uppercase();
        let bare = upper.strip_prefix("RPMTAG_").unwrap_or(&upper);
        Self::KNOWN
            .iter()
            .find(|(n, _)| *n == bare)
            .map(|(_, tag)| *tag)
    }

    /// Canonical name of a well-known tag.
    pub fn name(self) -> Option<&'static str> {
        Self::KNOWN
            .iter()
            .find(|(_, tag)| *tag == self)
            .map(|(n, _)| *n)
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "tag {}", self.0),
        }
    }
}

/// Tags that appear in the signature block.
#[derive(Debug)]
pub struct SigTag;

impl SigTag {
    /// Byte size of the signed region (header + compressed archive).
    pub const SIZE: Tag = Tag(1000);
    /// Hex SHA256 digest of the signed region.
    pub const SHA256: Tag = Tag(273);
    /// Detached Ed25519 signature over the region's SHA256 digest.
    pub const ED25519: Tag = Tag(1011);

    /// Human-readable name for a signature tag.
    pub fn name(tag: Tag) -> Option<&'static str> {
        match tag {
            Self::SIZE => Some("SIZE"),
            Self::SHA256 => Some("SHA256"),
            Self::ED25519 => Some("ED25519"),
            _ => None,
        }
    }
}
