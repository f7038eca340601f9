//! The fixed 96-byte preamble at offset 0 of every package file.
//!
//! ```text
//! offset  size  field
//!      0     4  magic (ED AB EE DB)
//!      4     1  format major
//!      5     1  format minor
//!      6     2  package type (0 binary, 1 source)
//!      8     2  architecture code
//!     10    66  name, NUL padded
//!     76     2  operating system code
//!     78     2  signature type
//!     80    16  reserved
//! ```
//!
//! All multi-byte integers are big-endian.

use std::io::{Read, Write};

use thiserror::Error;

use crate::LEAD_MAGIC;
use crate::arch::{Arch, Os};

/// Total size of the lead.
pub const LEAD_LEN: usize = 96;

/// Capacity of the name field.
pub const LEAD_NAME_LEN: usize = 66;

/// Format major version written by this crate.
pub const FORMAT_MAJOR: u8 = 3;

/// Signature type announcing a header-style signature block.
pub const SIGNATURE_TYPE_HEADER: u16 = 5;

/// Errors raised while decoding a lead.
#[derive(Error, Debug)]
pub enum LeadError {
    /// The first four bytes are not [`LEAD_MAGIC`].
    #[error("not a package file: bad lead magic {0:02x?}")]
    BadMagic([u8; 4]),

    /// The package type field holds an unknown value.
    #[error("unknown package type {0}")]
    UnknownKind(u16),

    /// I/O error while reading or writing the lead.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether a package carries sources or installable binaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageKind {
    /// Installable binary package.
    Binary,
    /// Source package.
    Source,
}

impl PackageKind {
    /// Lead type code.
    pub fn code(self) -> u16 {
        match self {
            Self::Binary => 0,
            Self::Source => 1,
        }
    }

    /// Decode a lead type code.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(Self::Binary),
            1 => Some(Self::Source),
            _ => None,
        }
    }
}

impl std::fmt::Display for PackageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Binary => f.write_str("binary"),
            Self::Source => f.write_str("source"),
        }
    }
}

/// The decoded lead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lead {
    /// Format major version.
    pub major: u8,
    /// Format minor version.
    pub minor: u8,
    /// Source or binary.
    pub kind: PackageKind,
    /// Architecture code.
    pub arch: u16,
    /// Operating system code.
    pub os: u16,
    /// Signature type selector.
    pub signature_type: u16,
    /// `name-version-release`, truncated to [`LEAD_NAME_LEN`] bytes.
    pub name: String,
}

impl Lead {
    /// Build a lead for a package written by this crate.
    pub fn new(kind: PackageKind, name: &str, arch: Arch, os: Os) -> Self {
        Self {
            major: FORMAT_MAJOR,
            minor: 0,
            kind,
            arch: arch.code(),
            os: os.code(),
            signature_type: SIGNATURE_TYPE_HEADER,
            name: truncate_name(name).to_string(),
        }
    }

    /// Serialize to the fixed 96-byte layout.
    pub fn to_bytes(&self) -> [u8; LEAD_LEN] {
        let mut out = [0u8; LEAD_LEN];
        out[0..4].copy_from_slice(&LEAD_MAGIC);
        out[4] = self.major;
        out[5] = self.minor;
        out[6..8].copy_from_slice(&self.kind.code().to_be_bytes());
        out[8..10].copy_from_slice(&self.arch.to_be_bytes());
        let name = truncate_name(&self.name).as_bytes();
        out[10..10 + name.len()].copy_from_slice(name);
        out[76..78].copy_from_slice(&self.os.to_be_bytes());
        out[78..80].copy_from_slice(&self.signature_type.to_be_bytes());
        out
    }

    /// Write the lead.
    ///
    /// # Errors
    ///
    /// Returns any I/O error raised by the writer.
    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<usize> {
        w.write_all(&self.to_bytes())?;
        Ok(LEAD_LEN)
    }

    /// Decode a lead from its 96-byte form.
    ///
    /// # Errors
    ///
    /// Returns [`LeadError::BadMagic`] or [`LeadError::UnknownKind`] for
    /// input that is not a lead.
    pub fn parse(buf: &[u8; LEAD_LEN]) -> Result<Self, LeadError> {
        let magic = [buf[0], buf[1], buf[2], buf[3]];
        if magic != LEAD_MAGIC {
            return Err(LeadError::BadMagic(magic));
        }
        let be16 = |at: usize| u16::from_be_bytes([buf[at], buf[at + 1]]);
        let kind = PackageKind::from_code(be16(6)).ok_or(LeadError::UnknownKind(be16(6)))?;
        let raw_name = &buf[10..10 + LEAD_NAME_LEN];
        let end = raw_name.iter().position(|&b| b == 0).unwrap_or(raw_name.len());

        Ok(Self {
            major: buf[4],
            minor: buf[5],
            kind,
            arch: be16(8),
            os: be16(76),
            signature_type: be16(78),
            name: String::from_utf8_lossy(&raw_name[..end]).into_owned(),
        })
    }

    /// Read a lead from a stream.
    ///
    /// # Errors
    ///
    /// Returns a [`LeadError`] on I/O failure or invalid content.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, LeadError> {
        let mut buf = [0u8; LEAD_LEN];
        r.read_exact(&mut buf)?;
        Self::parse(&buf)
    }
}

/// Truncate to the name field's capacity without splitting a UTF-8 sequence.
fn truncate_name(name: &str) -> &str {
    if name.len() <= LEAD_NAME_LEN {
        return name;
    }
    let mut end = LEAD_NAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_offsets() {
        let lead = Lead::new(PackageKind::Source, "pkg-1.0-1", Arch::Aarch64, Os::Linux);
        let bytes = lead.to_bytes();
        assert_eq!(bytes.len(), 96);
        assert_eq!(&bytes[0..4], &LEAD_MAGIC);
        assert_eq!(bytes[4], 3);
        assert_eq!(bytes[5], 0);
        assert_eq!(&bytes[6..8], &[0, 1]);
        assert_eq!(&bytes[8..10], &[0, 19]);
        assert_eq!(&bytes[10..19], b"pkg-1.0-1");
        assert_eq!(bytes[19], 0);
        assert_eq!(&bytes[76..78], &[0, 1]);
        assert_eq!(&bytes[78..80], &[0, 5]);
        assert!(bytes[80..].iter().all(|&b| b == 0));
    }

    #[test]
    fn parse_inverts_to_bytes() {
        let lead = Lead::new(PackageKind::Binary, "hello-2.3-4", Arch::X86_64, Os::Darwin);
        assert_eq!(Lead::parse(&lead.to_bytes()).unwrap(), lead);
    }

    #[test]
    fn long_names_fill_the_field() {
        let name = "x".repeat(100);
        let lead = Lead::new(PackageKind::Binary, &name, Arch::X86_64, Os::Linux);
        assert_eq!(lead.name.len(), LEAD_NAME_LEN);
        let bytes = lead.to_bytes();
        assert_eq!(&bytes[76..78], &[0, 1]);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let name = format!("{}é", "a".repeat(65));
        assert_eq!(truncate_name(&name), "a".repeat(65));
    }

    #[test]
    fn rejects_foreign_files() {
        let buf = [0u8; LEAD_LEN];
        assert!(matches!(Lead::parse(&buf), Err(LeadError::BadMagic(_))));
    }
}
