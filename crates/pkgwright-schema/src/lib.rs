//! Shared wire format for pkgwright packages.
//!
//! A package file is four concatenated regions:
//!
//! ```text
//! +--------+------------------+-----------------+--------------------+
//! | lead   | signature header | metadata header | compressed archive |
//! | 96 B   | padded to 8 B    |                 |                    |
//! +--------+------------------+-----------------+--------------------+
//! ```
//!
//! This crate owns everything that has a byte layout: the [`Lead`], the
//! tag-keyed [`Header`] block and its codec, and the architecture/OS codes
//! stored in the lead.

pub mod arch;
pub mod hash;
pub mod header;
pub mod lead;
pub mod tag;

// Re-exports
pub use arch::*;
pub use hash::*;
pub use header::{Header, HeaderError, TagValue, signature_padding};
pub use lead::{LEAD_LEN, Lead, LeadError, PackageKind};
pub use tag::{SigTag, Tag};

/// Magic bytes that open every serialized header block.
pub const HEADER_MAGIC: [u8; 4] = [0x8E, 0xAD, 0xE8, 0x01];

/// Magic bytes that open the lead.
pub const LEAD_MAGIC: [u8; 4] = [0xED, 0xAB, 0xEE, 0xDB];

/// Magic bytes for gzip streams.
pub const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

/// Magic bytes for ZSTD compression (Little Endian: 0xFD2FB528 -> 28 B5 2F FD)
pub const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];
