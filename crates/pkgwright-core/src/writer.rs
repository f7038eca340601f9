//! Package assembly.
//!
//! [`PackageWriter::write`] turns a metadata header and a list of file
//! mappings into a finished package:
//!
//! ```text
//! [lead 96 bytes][signature header + pad to 8][header][compressed tar]
//! ```
//!
//! The header and payload are first staged together in a temporary file (the
//! "region"). The header is serialized with placeholder sizes, the payload is
//! appended, and the header is rewritten in place with the real sizes. Its
//! integer tags are fixed-width, so the rewrite never changes its length and
//! never touches payload bytes. Only then is the region signed and copied
//! behind the lead and signature block.
//!
//! Nothing is created at the destination until the region is signed. If
//! anything fails after that, the half-written destination is removed before
//! the error is returned. The staging file is removed on every path.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use pkgwright_schema::{Arch, Header, Lead, Os, PackageKind, Tag};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::archive::FileMapping;
use crate::compress::{CompressError, Compressor, PayloadStats};
use crate::signature::{SignatureError, SignatureKind, generate_signature};

/// Payload container recorded in `PAYLOADFORMAT`.
pub const PAYLOAD_FORMAT: &str = "tar";

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("couldn't create staging file in {}: {source}", dir.display())]
    TempFile {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("couldn't stage header: {0}")]
    Stage(#[source] io::Error),

    #[error("couldn't compress payload: {0}")]
    Compress(#[from] CompressError),

    #[error("header changed size while finalizing ({staged} -> {finalized} bytes)")]
    HeaderResized { staged: usize, finalized: usize },

    #[error("compressed payload is {0} bytes, larger than ARCHIVESIZE can hold")]
    TooLarge(u64),

    #[error("couldn't generate signature: {0}")]
    Signature(#[from] SignatureError),

    #[error("couldn't create {}: {source}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("couldn't write {}: {source}", path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// What [`PackageWriter::write`] produced.
#[derive(Debug, Clone)]
pub struct WrittenPackage {
    pub path: PathBuf,
    /// Total bytes in the output file.
    pub size: u64,
    pub payload: PayloadStats,
    /// The signature block that was written.
    pub signature: Header,
}

/// Writes package files. One writer serves every package of a build.
#[derive(Debug, Clone, Default)]
pub struct PackageWriter {
    pub compressor: Compressor,
    pub signature: SignatureKind,
    /// Lead architecture used when the header's `ARCH` is absent or unknown.
    pub arch: Arch,
    pub os: Os,
    /// Where the staging file lives; the system temp dir when unset.
    pub temp_dir: Option<PathBuf>,
}

impl PackageWriter {
    pub fn new(compressor: Compressor) -> Self {
        Self {
            compressor,
            arch: Arch::current(),
            os: Os::current(),
            ..Self::default()
        }
    }

    pub fn with_signature(mut self, kind: SignatureKind) -> Self {
        self.signature = kind;
        self
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Write one package to `output`.
    ///
    /// `header` gains the payload tags (`ARCHIVESIZE`, `LONGARCHIVESIZE`,
    /// `PAYLOADFORMAT`, `PAYLOADCOMPRESSOR`) as a side effect. `secret` is the
    /// pass-phrase for the configured signature kind.
    ///
    /// # Errors
    ///
    /// Returns [`WriteError`] from whichever stage failed. No file is left at
    /// `output` when an error is returned.
    pub fn write(
        &self,
        header: &mut Header,
        files: &[FileMapping],
        kind: PackageKind,
        output: &Path,
        secret: Option<&str>,
    ) -> Result<WrittenPackage, WriteError> {
        self.write_via(header, files, kind, output, secret, BufWriter::new)
    }

    /// [`write`](Self::write) with the destination file wrapped by `sink`.
    fn write_via<W: Write>(
        &self,
        header: &mut Header,
        files: &[FileMapping],
        kind: PackageKind,
        output: &Path,
        secret: Option<&str>,
        sink: impl FnOnce(File) -> W,
    ) -> Result<WrittenPackage, WriteError> {
        // Stage the header with placeholder sizes.
        header.set(Tag::ARCHIVESIZE, 0u32);
        header.set(Tag::LONGARCHIVESIZE, 0u64);
        header.set(Tag::PAYLOADFORMAT, PAYLOAD_FORMAT);
        header.set(Tag::PAYLOADCOMPRESSOR, self.compressor.name());

        let mut region = self.staging_file()?;
        let staged = header
            .write_to(region.as_file_mut())
            .map_err(WriteError::Stage)?;
        tracing::debug!(bytes = staged, path = %region.path().display(), "header staged");

        // Append the payload.
        let payload = self
            .compressor
            .compress_archive(region.as_file_mut(), files)?;
        tracing::debug!(
            archive_size = payload.archive_size,
            compressed_size = payload.compressed_size,
            "archive appended"
        );

        // Finalize the sizes and rewrite the header over the placeholder.
        let compressed = u32::try_from(payload.compressed_size)
            .map_err(|_| WriteError::TooLarge(payload.compressed_size))?;
        header.set(Tag::ARCHIVESIZE, compressed);
        header.set(Tag::LONGARCHIVESIZE, payload.archive_size);
        let finalized = header.to_bytes();
        if finalized.len() != staged {
            return Err(WriteError::HeaderResized {
                staged,
                finalized: finalized.len(),
            });
        }
        rewrite_at_start(region.as_file_mut(), &finalized).map_err(WriteError::Stage)?;
        tracing::debug!("header finalized");

        // Sign the finished region.
        let signature = generate_signature(region.as_file_mut(), self.signature, secret)?;

        // Only now does anything appear at the destination.
        let lead = Lead::new(kind, &lead_name(header), self.lead_arch(header), self.os);
        let (guard, out) = PartialOutput::create(output)?;
        let out_err = |source| WriteError::Output {
            path: output.to_path_buf(),
            source,
        };

        let synced = out.try_clone().map_err(out_err)?;
        let mut sink = sink(out);
        let size = assemble(&mut sink, &lead, &signature, region.as_file_mut()).map_err(out_err)?;
        drop(sink);
        synced.sync_all().map_err(out_err)?;
        guard.commit();

        tracing::info!("Wrote: {}", output.display());
        Ok(WrittenPackage {
            path: output.to_path_buf(),
            size,
            payload,
            signature,
        })
    }

    fn staging_file(&self) -> Result<NamedTempFile, WriteError> {
        let dir = self.temp_dir.clone().unwrap_or_else(std::env::temp_dir);
        fs::create_dir_all(&dir)
            .and_then(|()| NamedTempFile::new_in(&dir))
            .map_err(|source| WriteError::TempFile { dir, source })
    }

    /// `noarch` packages take the configured target's lead code.
    fn lead_arch(&self, header: &Header) -> Arch {
        match header.get_str(Tag::ARCH).and_then(|a| a.parse().ok()) {
            Some(Arch::Noarch) | None => self.arch,
            Some(arch) => arch,
        }
    }
}

/// `name-version-release` from the header, for the lead.
fn lead_name(header: &Header) -> String {
    let part = |tag| header.get_str(tag).unwrap_or_default();
    format!(
        "{}-{}-{}",
        part(Tag::NAME),
        part(Tag::VERSION),
        part(Tag::RELEASE)
    )
}

fn rewrite_at_start(file: &mut File, bytes: &[u8]) -> io::Result<()> {
    file.seek(SeekFrom::Start(0))?;
    file.write_all(bytes)?;
    file.flush()
}

/// Write the lead and signature block, then copy the whole region.
/// Returns the total number of bytes written.
fn assemble<W: Write, R: Read + Seek>(
    sink: &mut W,
    lead: &Lead,
    signature: &Header,
    region: &mut R,
) -> io::Result<u64> {
    let lead_len = lead.write_to(sink)?;
    let sig_len = signature.write_signature(sink)?;
    region.seek(SeekFrom::Start(0))?;
    let copied = io::copy(region, sink)?;
    sink.flush()?;
    Ok((lead_len + sig_len) as u64 + copied)
}

/// Destination file that is removed on drop unless committed.
struct PartialOutput {
    path: PathBuf,
    committed: bool,
}

impl PartialOutput {
    fn create(path: &Path) -> Result<(Self, File), WriteError> {
        let create_err = |source| WriteError::Create {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(create_err)?;
        }

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o644);
        }
        let file = options.open(path).map_err(create_err)?;

        Ok((
            Self {
                path: path.to_path_buf(),
                committed: false,
            },
            file,
        ))
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for PartialOutput {
    fn drop(&mut self) {
        if !self.committed {
            tracing::debug!(path = %self.path.display(), "removing partial output");
            let _ = fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkgwright_schema::{LEAD_LEN, SigTag, signature_padding};
    use std::io::Cursor;
    use tempfile::tempdir;

    /// Passes `limit` bytes through to `inner`, then fails every write.
    struct FailingWriter<W> {
        inner: W,
        written: usize,
        limit: usize,
    }

    impl<W: Write> FailingWriter<W> {
        fn new(inner: W, limit: usize) -> Self {
            Self {
                inner,
                written: 0,
                limit,
            }
        }
    }

    impl<W: Write> Write for FailingWriter<W> {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.written >= self.limit {
                return Err(io::Error::other("disk full"));
            }
            let len = buf.len().min(self.limit - self.written);
            let n = self.inner.write(&buf[..len])?;
            self.written += n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.inner.flush()
        }
    }

    fn header() -> Header {
        let mut h = Header::new();
        h.set(Tag::NAME, "pkg");
        h.set(Tag::VERSION, "1.0");
        h.set(Tag::RELEASE, "1");
        h.set(Tag::ARCH, "x86_64");
        h
    }

    #[test]
    fn assemble_lays_out_blocks_in_order() {
        let lead = Lead::new(PackageKind::Binary, "pkg-1.0-1", Arch::X86_64, Os::Linux);
        let mut sig = Header::new();
        sig.set(SigTag::SIZE, 3u32);
        let mut out = Vec::new();

        let n = assemble(&mut out, &lead, &sig, &mut Cursor::new(b"abc".to_vec())).unwrap();

        let sig_len = sig.to_bytes().len();
        assert_eq!(n as usize, out.len());
        assert_eq!(out.len(), LEAD_LEN + sig_len + signature_padding(sig_len) + 3);
        assert!(out.ends_with(b"abc"));
    }

    #[test]
    fn partial_output_is_removed_when_copy_fails() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("out/pkg.rpm");
        let lead = Lead::new(PackageKind::Binary, "pkg-1.0-1", Arch::X86_64, Os::Linux);

        {
            let (_guard, _file) = PartialOutput::create(&path).unwrap();
            assert!(path.exists());
            let mut sink = FailingWriter::new(io::sink(), LEAD_LEN + 40);
            let region = vec![7u8; 4096];
            let err = assemble(&mut sink, &lead, &Header::new(), &mut Cursor::new(region));
            assert!(err.is_err());
        }

        assert!(!path.exists());
    }

    #[test]
    fn committed_output_survives() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("kept.rpm");
        let (guard, _file) = PartialOutput::create(&path).unwrap();
        guard.commit();
        assert!(path.exists());
    }

    #[test]
    fn bad_key_leaves_no_output_and_no_staging_file() {
        let tmp = tempdir().unwrap();
        let src = tmp.path().join("hello.txt");
        fs::write(&src, "hi\n").unwrap();
        let staging = tmp.path().join("staging");
        let output = tmp.path().join("RPMS/pkg.rpm");

        let writer = PackageWriter::new(Compressor::default())
            .with_signature(SignatureKind::Ed25519)
            .with_temp_dir(&staging);
        let err = writer
            .write(
                &mut header(),
                &[FileMapping::new(&src, "/usr/share/hello.txt")],
                PackageKind::Binary,
                &output,
                Some("not a key"),
            )
            .unwrap_err();

        assert!(matches!(err, WriteError::Signature(_)));
        assert!(!output.exists());
        assert_eq!(fs::read_dir(&staging).unwrap().count(), 0);
    }

    #[test]
    fn archive_failure_leaves_nothing_behind() {
        let tmp = tempdir().unwrap();
        let staging = tmp.path().join("staging");
        let output = tmp.path().join("pkg.rpm");

        let writer = PackageWriter::new(Compressor::default()).with_temp_dir(&staging);
        let err = writer
            .write(
                &mut header(),
                &[FileMapping::new(tmp.path().join("missing"), "missing")],
                PackageKind::Binary,
                &output,
                None,
            )
            .unwrap_err();

        assert!(matches!(err, WriteError::Compress(CompressError::Archive(_))));
        assert!(!output.exists());
        assert_eq!(fs::read_dir(&staging).unwrap().count(), 0);
    }

    #[test]
    fn failed_copy_during_write_removes_output() {
        let tmp = tempdir().unwrap();
        let src = tmp.path().join("hello.txt");
        fs::write(&src, "x".repeat(64 * 1024)).unwrap();
        let staging = tmp.path().join("staging");
        let output = tmp.path().join("RPMS/pkg.rpm");
        fs::create_dir_all(output.parent().unwrap()).unwrap();
        fs::write(&output, "previous build").unwrap();

        let writer = PackageWriter::new(Compressor::Zstd { level: 1 }).with_temp_dir(&staging);
        let err = writer
            .write_via(
                &mut header(),
                &[FileMapping::new(&src, "/usr/share/hello.txt")],
                PackageKind::Binary,
                &output,
                None,
                |f| FailingWriter::new(f, LEAD_LEN + 64),
            )
            .unwrap_err();

        assert!(matches!(err, WriteError::Output { .. }));
        assert!(!output.exists());
        assert_eq!(fs::read_dir(&staging).unwrap().count(), 0);
    }

    #[test]
    fn noarch_takes_the_configured_lead_arch() {
        let writer = PackageWriter {
            arch: Arch::Aarch64,
            ..PackageWriter::default()
        };
        let mut h = header();
        h.set(Tag::ARCH, "noarch");
        assert_eq!(writer.lead_arch(&h), Arch::Aarch64);
    }

    #[test]
    fn lead_arch_follows_header() {
        let writer = PackageWriter {
            arch: Arch::Aarch64,
            ..PackageWriter::default()
        };
        let mut h = header();
        assert_eq!(writer.lead_arch(&h), Arch::X86_64);
        h.remove(Tag::ARCH);
        assert_eq!(writer.lead_arch(&h), Arch::Aarch64);
        assert_eq!(lead_name(&h), "pkg-1.0-1");
    }
}
