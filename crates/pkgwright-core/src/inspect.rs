//! Read-only decoding of a written package.
//!
//! Parses the lead, signature block and metadata header, and re-hashes the
//! signed region so its recorded size and digest can be checked. The payload
//! is located but never extracted.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use pkgwright_schema::{Header, HeaderError, Lead, LeadError, SigTag, Sha256Digest};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InspectError {
    #[error("couldn't open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("bad lead: {0}")]
    Lead(#[from] LeadError),

    #[error("bad header block: {0}")]
    Header(#[from] HeaderError),

    #[error("read error: {0}")]
    Io(#[from] io::Error),
}

/// The decoded metadata of one package file.
#[derive(Debug, Clone)]
pub struct PackageInfo {
    pub lead: Lead,
    pub signature: Header,
    pub header: Header,
    /// Byte offset of the metadata header; the signed region starts here.
    pub region_offset: u64,
    pub region_size: u64,
    pub region_digest: Sha256Digest,
    /// Byte offset of the compressed payload.
    pub payload_offset: u64,
}

impl PackageInfo {
    /// Decode `path`.
    pub fn read(path: &Path) -> Result<Self, InspectError> {
        let file = File::open(path).map_err(|source| InspectError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let mut r = BufReader::new(file);

        let lead = Lead::read_from(&mut r)?;
        let signature = Header::read_signature(&mut r)?;
        let region_offset = r.stream_position()?;

        let header = Header::read_from(&mut r)?;
        let payload_offset = r.stream_position()?;

        r.seek(SeekFrom::Start(region_offset))?;
        let (region_digest, region_size) = Sha256Digest::compute_reader(&mut r)?;

        Ok(Self {
            lead,
            signature,
            header,
            region_offset,
            region_size,
            region_digest,
            payload_offset,
        })
    }

    pub fn payload_size(&self) -> u64 {
        self.region_size - (self.payload_offset - self.region_offset)
    }

    /// Whether the recorded size matches the region.
    pub fn size_matches(&self) -> bool {
        self.signature
            .get_u32(SigTag::SIZE)
            .is_some_and(|s| u64::from(s) == self.region_size)
    }

    /// Whether the recorded digest matches the region.
    pub fn digest_matches(&self) -> bool {
        self.signature
            .get_str(SigTag::SHA256)
            .is_some_and(|d| d == self.region_digest.as_str())
    }

    /// Read the compressed payload bytes from `path`.
    pub fn read_payload(&self, path: &Path) -> Result<Vec<u8>, InspectError> {
        let mut file = File::open(path).map_err(|source| InspectError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        file.seek(SeekFrom::Start(self.payload_offset))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Ok(buf)
    }
}
