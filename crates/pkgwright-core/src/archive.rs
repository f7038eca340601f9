//! Archive builder.
//!
//! Streams an ordered list of [`FileMapping`]s into a tar archive written to
//! any [`Write`] sink. The sink is only ever appended to, so it can be a pipe
//! to a compressor process as well as an in-process encoder.
//!
//! Entry order is the mapping order. Ownership is recorded by name (uid/gid
//! are always 0) so that extraction maps owners on the target system rather
//! than reproducing the build host's numeric ids.

use std::fs::{self, File, Metadata};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use thiserror::Error;

/// Default owner and group recorded for archived entries.
pub const DEFAULT_OWNER: &str = "root";

/// One file to archive: where it lives on disk and where it goes in the
/// package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMapping {
    /// Path of the file on the build host.
    pub source: PathBuf,
    /// Path of the entry inside the archive. A leading `/` is dropped.
    pub archive_path: String,
    /// Permission bits to record instead of the source's own.
    pub mode: Option<u32>,
    /// Owning user name.
    pub user: String,
    /// Owning group name.
    pub group: String,
    /// Modification time to record instead of the source's own.
    pub mtime: Option<u64>,
}

impl FileMapping {
    /// Map `source` to `archive_path` with default attributes.
    pub fn new(source: impl Into<PathBuf>, archive_path: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            archive_path: archive_path.into(),
            mode: None,
            user: DEFAULT_OWNER.to_string(),
            group: DEFAULT_OWNER.to_string(),
            mtime: None,
        }
    }

    /// Override the recorded permission bits.
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Override the recorded owner and group.
    pub fn with_owner(mut self, user: impl Into<String>, group: impl Into<String>) -> Self {
        self.user = user.into();
        self.group = group.into();
        self
    }

    /// Override the recorded modification time.
    pub fn with_mtime(mut self, mtime: u64) -> Self {
        self.mtime = Some(mtime);
        self
    }

    /// Archive path as written into the entry header.
    pub fn entry_path(&self) -> &str {
        self.archive_path.trim_start_matches('/')
    }
}

/// A failure while archiving. The first failing entry aborts the archive.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// The source could not be inspected or opened.
    #[error("cannot read {}: {source}", path.display())]
    Source {
        /// Failing source path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The entry could not be encoded or streamed into the sink.
    #[error("cannot archive {} as {archive_path}: {source}", path.display())]
    Entry {
        /// Failing source path.
        path: PathBuf,
        /// Destination path inside the archive.
        archive_path: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The end-of-archive trailer could not be written.
    #[error("cannot finish archive: {0}")]
    Finish(#[source] io::Error),
}

impl ArchiveError {
    /// Source path of the entry that failed, if the failure is per-entry.
    pub fn failed_path(&self) -> Option<&Path> {
        match self {
            Self::Source { path, .. } | Self::Entry { path, .. } => Some(path),
            Self::Finish(_) => None,
        }
    }

    /// OS error code carried by the failure, when there is one.
    pub fn os_error(&self) -> Option<i32> {
        match self {
            Self::Source { source, .. } | Self::Entry { source, .. } | Self::Finish(source) => {
                source.raw_os_error()
            }
        }
    }
}

/// Accounting for a finished archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    /// Total serialized archive bytes, trailer included.
    pub bytes: u64,
    /// Number of entries written.
    pub entries: usize,
}

/// Write every mapping, in order, into a tar stream on `sink`.
///
/// Returns the sink (so encoders can be finished by the caller) together
/// with the archive's byte count.
///
/// # Errors
///
/// Returns [`ArchiveError`] naming the first entry that could not be read
/// or written.
pub fn write_archive<W: Write>(
    sink: W,
    files: &[FileMapping],
) -> Result<(W, ArchiveSummary), ArchiveError> {
    let mut builder = tar::Builder::new(CountingWriter::new(sink));

    for mapping in files {
        append_entry(&mut builder, mapping)?;
        tracing::trace!(path = mapping.entry_path(), "archived");
    }

    let counter = builder.into_inner().map_err(ArchiveError::Finish)?;
    let summary = ArchiveSummary {
        bytes: counter.count(),
        entries: files.len(),
    };
    Ok((counter.into_inner(), summary))
}

fn append_entry<W: Write>(
    builder: &mut tar::Builder<W>,
    mapping: &FileMapping,
) -> Result<(), ArchiveError> {
    let source_err = |source: io::Error| ArchiveError::Source {
        path: mapping.source.clone(),
        source,
    };
    let entry_err = |source: io::Error| ArchiveError::Entry {
        path: mapping.source.clone(),
        archive_path: mapping.archive_path.clone(),
        source,
    };

    let meta = fs::symlink_metadata(&mapping.source).map_err(source_err)?;
    let file_type = meta.file_type();
    let path = mapping.entry_path();

    let mut header = tar::Header::new_gnu();
    header.set_mode(mapping.mode.unwrap_or_else(|| mode_of(&meta)) & 0o7777);
    header.set_uid(0);
    header.set_gid(0);
    header.set_username(&mapping.user).map_err(entry_err)?;
    header.set_groupname(&mapping.group).map_err(entry_err)?;
    header.set_mtime(mapping.mtime.unwrap_or_else(|| mtime_of(&meta)));

    if file_type.is_dir() {
        header.set_entry_type(tar::EntryType::Directory);
        header.set_size(0);
        builder
            .append_data(&mut header, path, io::empty())
            .map_err(entry_err)
    } else if file_type.is_symlink() {
        let target = fs::read_link(&mapping.source).map_err(source_err)?;
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        builder
            .append_link(&mut header, path, target)
            .map_err(entry_err)
    } else {
        let file = File::open(&mapping.source).map_err(source_err)?;
        let len = file.metadata().map_err(source_err)?.len();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(len);
        builder
            .append_data(&mut header, path, io::Read::take(file, len))
            .map_err(entry_err)
    }
}

#[cfg(unix)]
fn mode_of(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn mode_of(meta: &Metadata) -> u32 {
    if meta.is_dir() { 0o755 } else { 0o644 }
}

fn mtime_of(meta: &Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs())
}

/// Pass-through writer that counts bytes.
#[derive(Debug)]
pub(crate) struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> CountingWriter<W> {
    pub(crate) fn new(inner: W) -> Self {
        Self { inner, count: 0 }
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }

    pub(crate) fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
