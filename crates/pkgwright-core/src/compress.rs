//! Compressor bridge.
//!
//! Runs the [archive builder](crate::archive) through a stream compressor and
//! appends the compressed bytes to the target file at its current position.
//!
//! Three back ends produce the payload:
//!
//! | Back end | How | Stream format |
//! |---|---|---|
//! | [`Compressor::Gzip`] | `flate2`, in process | gzip (no name, mtime 0) |
//! | [`Compressor::Zstd`] | `zstd`, in process | zstd frame |
//! | [`Compressor::External`] | child process fed through a pipe | whatever the program writes |
//!
//! The external back end spawns the program with a pipe on stdin and a
//! duplicate of the target descriptor on stdout, writes the whole archive into
//! the pipe, closes it, and only then waits for the child. Closing before
//! waiting is what keeps a full pipe from deadlocking the two processes.
//! There is no timeout: a compressor that never exits blocks the build.

use std::fs::File;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use thiserror::Error;

use crate::archive::{ArchiveError, ArchiveSummary, FileMapping, write_archive};

/// Default arguments for an external compressor: write to stdout, maximum
/// compression, force, and do not store the original name or timestamp.
pub const DEFAULT_EXTERNAL_ARGS: &[&str] = &["-c9fn"];

/// Errors from the compression step. Partial output in the target is never
/// usable after any of these.
#[derive(Error, Debug)]
pub enum CompressError {
    /// The compressor process could not be started.
    #[error("couldn't exec {}: {source}", program.display())]
    Spawn {
        /// Program that failed to start.
        program: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The pipe or the target descriptor could not be wired to the child.
    #[error("couldn't set up compressor pipe: {0}")]
    Pipe(#[source] io::Error),

    /// The compressor exited non-zero or was killed.
    #[error("execution of {} failed: {status}", program.display())]
    Exit {
        /// Program that failed.
        program: PathBuf,
        /// How it terminated.
        status: ExitStatus,
    },

    /// Waiting for the compressor failed.
    #[error("couldn't wait for {}: {source}", program.display())]
    Wait {
        /// Program being waited on.
        program: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The archive builder failed on an entry.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// The in-process encoder or the target file failed.
    #[error("compression IO error: {0}")]
    Io(#[from] io::Error),
}

/// Sizes produced by one compression run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PayloadStats {
    /// Uncompressed archive bytes, as accounted by the archive builder.
    pub archive_size: u64,
    /// Compressed bytes that landed in the target.
    pub compressed_size: u64,
    /// Number of archive entries.
    pub entries: usize,
}

/// The payload compressor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compressor {
    /// In-process gzip at the given level (0-9).
    Gzip {
        /// Compression level.
        level: u32,
    },
    /// In-process zstd at the given level.
    Zstd {
        /// Compression level.
        level: i32,
    },
    /// External program reading the archive on stdin and writing the
    /// compressed stream to stdout.
    External {
        /// Program to run (resolved through `PATH` when not absolute).
        program: PathBuf,
        /// Arguments passed to the program.
        args: Vec<String>,
    },
}

impl Default for Compressor {
    fn default() -> Self {
        Self::Gzip { level: 9 }
    }
}

impl Compressor {
    /// An external compressor with the default `-c9fn` arguments.
    pub fn external(program: impl Into<PathBuf>) -> Self {
        Self::External {
            program: program.into(),
            args: DEFAULT_EXTERNAL_ARGS.iter().map(ToString::to_string).collect(),
        }
    }

    /// Name recorded in the `PAYLOADCOMPRESSOR` tag.
    pub fn name(&self) -> String {
        match self {
            Self::Gzip { .. } => "gzip".to_string(),
            Self::Zstd { .. } => "zstd".to_string(),
            Self::External { program, .. } => program
                .file_name()
                .map_or_else(|| program.display().to_string(), |n| {
                    n.to_string_lossy().to_string()
                }),
        }
    }

    /// Archive `files` and append the compressed stream to `target` at its
    /// current position.
    ///
    /// # Errors
    ///
    /// Returns a [`CompressError`] if the archive, the encoder, or the
    /// compressor process fails.
    pub fn compress_archive(
        &self,
        target: &mut File,
        files: &[FileMapping],
    ) -> Result<PayloadStats, CompressError> {
        let start = target.stream_position()?;

        let archive = match self {
            Self::Gzip { level } => {
                let encoder = flate2::write::GzEncoder::new(
                    BufWriter::new(&mut *target),
                    flate2::Compression::new((*level).min(9)),
                );
                let (encoder, summary) = write_archive(encoder, files)?;
                encoder.finish()?.flush()?;
                summary
            }
            Self::Zstd { level } => {
                let encoder = zstd::stream::Encoder::new(BufWriter::new(&mut *target), *level)?;
                let (encoder, summary) = write_archive(encoder, files)?;
                encoder.finish()?.flush()?;
                summary
            }
            Self::External { program, args } => run_external(program, args, target, files)?,
        };

        // The child shares the descriptor's offset, so the end of the file is
        // where the compressed stream stopped.
        let end = target.seek(SeekFrom::End(0))?;

        let stats = PayloadStats {
            archive_size: archive.bytes,
            compressed_size: end - start,
            entries: archive.entries,
        };
        tracing::debug!(
            compressor = %self.name(),
            archive_size = stats.archive_size,
            compressed_size = stats.compressed_size,
            entries = stats.entries,
            "payload compressed"
        );
        Ok(stats)
    }
}

fn run_external(
    program: &Path,
    args: &[String],
    target: &File,
    files: &[FileMapping],
) -> Result<ArchiveSummary, CompressError> {
    let _sigpipe = SigpipeGuard::ignore();

    let stdout = target.try_clone().map_err(CompressError::Pipe)?;
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|source| CompressError::Spawn {
            program: program.to_path_buf(),
            source,
        })?;

    let archived = match child.stdin.take() {
        Some(stdin) => write_archive(BufWriter::new(stdin), files).and_then(|(mut w, summary)| {
            w.flush().map_err(ArchiveError::Finish)?;
            Ok(summary)
        }),
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(CompressError::Pipe(io::Error::other(
                "compressor stdin was not captured",
            )));
        }
    };
    // The write end is closed by now, on success and on failure alike.

    let status = child.wait().map_err(|source| CompressError::Wait {
        program: program.to_path_buf(),
        source,
    })?;
    if !status.success() {
        return Err(CompressError::Exit {
            program: program.to_path_buf(),
            status,
        });
    }

    Ok(archived?)
}

/// Ignores `SIGPIPE` for its lifetime and restores the previous disposition on
/// drop, so a compressor that dies early yields `EPIPE` instead of killing the
/// build.
#[cfg(unix)]
struct SigpipeGuard {
    previous: Option<libc::sighandler_t>,
}

#[cfg(unix)]
impl SigpipeGuard {
    #[allow(unsafe_code)]
    fn ignore() -> Self {
        // SAFETY: SIG_IGN installs no handler code; the call only swaps the
        // disposition and returns the old one.
        let previous = unsafe { libc::signal(libc::SIGPIPE, libc::SIG_IGN) };
        Self {
            previous: (previous != libc::SIG_ERR).then_some(previous),
        }
    }
}

#[cfg(unix)]
impl Drop for SigpipeGuard {
    #[allow(unsafe_code)]
    fn drop(&mut self) {
        if let Some(previous) = self.previous {
            // SAFETY: `previous` was returned by signal(2) for SIGPIPE and is
            // a valid disposition for it.
            unsafe {
                libc::signal(libc::SIGPIPE, previous);
            }
        }
    }
}

#[cfg(not(unix))]
struct SigpipeGuard;

#[cfg(not(unix))]
impl SigpipeGuard {
    fn ignore() -> Self {
        Self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Read;
    use tempfile::tempdir;

    const PREFIX: &[u8] = b"staged header bytes";

    /// Serializes tests that spawn a compressor, since the SIGPIPE
    /// disposition is process-wide.
    static SIGNALS: std::sync::Mutex<()> = std::sync::Mutex::new(());

    fn lock_signals() -> std::sync::MutexGuard<'static, ()> {
        SIGNALS.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn fixture() -> (tempfile::TempDir, Vec<FileMapping>) {
        let tmp = tempdir().unwrap();
        let a = tmp.path().join("a.txt");
        let b = tmp.path().join("b.txt");
        fs::write(&a, "hello world\n").unwrap();
        fs::write(&b, "x".repeat(10_000)).unwrap();
        let files = vec![FileMapping::new(&a, "a.txt"), FileMapping::new(&b, "b.txt")];
        (tmp, files)
    }

    fn target_with_prefix() -> File {
        let mut f = tempfile::tempfile().unwrap();
        f.write_all(PREFIX).unwrap();
        f
    }

    fn payload(f: &mut File) -> Vec<u8> {
        f.seek(SeekFrom::Start(PREFIX.len() as u64)).unwrap();
        let mut buf = Vec::new();
        f.read_to_end(&mut buf).unwrap();
        buf
    }

    fn entry_names(archive: &[u8]) -> Vec<String> {
        tar::Archive::new(archive)
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn gzip_appends_after_existing_bytes() {
        let (_tmp, files) = fixture();
        let mut target = target_with_prefix();

        let stats = Compressor::default()
            .compress_archive(&mut target, &files)
            .unwrap();
        let compressed = payload(&mut target);
        assert_eq!(stats.compressed_size, compressed.len() as u64);
        assert_eq!(&compressed[..2], &pkgwright_schema::GZIP_MAGIC);

        let mut archive = Vec::new();
        flate2::read::GzDecoder::new(&compressed[..])
            .read_to_end(&mut archive)
            .unwrap();
        assert_eq!(stats.archive_size, archive.len() as u64);
        assert_eq!(entry_names(&archive), vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn zstd_stream_decodes() {
        let (_tmp, files) = fixture();
        let mut target = target_with_prefix();

        let stats = Compressor::Zstd { level: 3 }
            .compress_archive(&mut target, &files)
            .unwrap();
        let compressed = payload(&mut target);
        assert_eq!(&compressed[..4], &pkgwright_schema::ZSTD_MAGIC);

        let archive = zstd::decode_all(&compressed[..]).unwrap();
        assert_eq!(stats.archive_size, archive.len() as u64);
        assert_eq!(stats.entries, 2);
    }

    #[cfg(unix)]
    #[test]
    fn external_identity_filter_passes_archive_through() {
        let _signals = lock_signals();
        let (_tmp, files) = fixture();
        let mut target = target_with_prefix();
        let cat = Compressor::External {
            program: "sh".into(),
            args: vec!["-c".into(), "cat".into()],
        };

        let stats = cat.compress_archive(&mut target, &files).unwrap();
        let out = payload(&mut target);
        assert_eq!(stats.compressed_size, stats.archive_size);
        assert_eq!(entry_names(&out), vec!["a.txt", "b.txt"]);
    }

    #[cfg(unix)]
    #[test]
    fn external_gzip_when_installed() {
        let _signals = lock_signals();
        let Some(gzip) = ["/usr/bin/gzip", "/bin/gzip"]
            .iter()
            .map(Path::new)
            .find(|p| p.exists())
        else {
            return;
        };
        let (_tmp, files) = fixture();
        let mut target = target_with_prefix();

        let stats = Compressor::external(gzip)
            .compress_archive(&mut target, &files)
            .unwrap();
        let compressed = payload(&mut target);
        assert_eq!(stats.compressed_size, compressed.len() as u64);

        let mut archive = Vec::new();
        flate2::read::GzDecoder::new(&compressed[..])
            .read_to_end(&mut archive)
            .unwrap();
        assert_eq!(entry_names(&archive), vec!["a.txt", "b.txt"]);
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_is_reported() {
        let _signals = lock_signals();
        let (_tmp, files) = fixture();
        let mut target = target_with_prefix();
        let failing = Compressor::External {
            program: "sh".into(),
            args: vec!["-c".into(), "cat >/dev/null; exit 3".into()],
        };

        let err = failing.compress_archive(&mut target, &files).unwrap_err();
        match err {
            CompressError::Exit { status, .. } => assert_eq!(status.code(), Some(3)),
            other => panic!("expected Exit, got {other:?}"),
        }
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let _signals = lock_signals();
        let (_tmp, files) = fixture();
        let mut target = target_with_prefix();
        let err = Compressor::external("/nonexistent/pkgwright-compressor")
            .compress_archive(&mut target, &files)
            .unwrap_err();
        assert!(matches!(err, CompressError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn archive_failure_still_reaps_child() {
        let _signals = lock_signals();
        let tmp = tempdir().unwrap();
        let files = vec![FileMapping::new(tmp.path().join("absent"), "absent")];
        let mut target = target_with_prefix();
        let cat = Compressor::External {
            program: "sh".into(),
            args: vec!["-c".into(), "cat >/dev/null".into()],
        };

        let err = cat.compress_archive(&mut target, &files).unwrap_err();
        assert!(matches!(err, CompressError::Archive(ArchiveError::Source { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn killed_compressor_is_reported() {
        let _signals = lock_signals();
        let (_tmp, files) = fixture();
        let mut target = target_with_prefix();
        let killed = Compressor::External {
            program: "sh".into(),
            args: vec!["-c".into(), "kill -9 $$".into()],
        };

        let err = killed.compress_archive(&mut target, &files).unwrap_err();
        match err {
            CompressError::Exit { status, .. } => assert_eq!(status.code(), None),
            other => panic!("expected Exit, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    #[allow(unsafe_code)]
    fn sigpipe_disposition_is_restored_after_failure() {
        let _signals = lock_signals();
        let tmp = tempdir().unwrap();
        let big = tmp.path().join("big.bin");
        fs::write(&big, vec![0u8; 1 << 20]).unwrap();
        let files = vec![FileMapping::new(&big, "big.bin")];
        let mut target = target_with_prefix();
        let early_exit = Compressor::External {
            program: "sh".into(),
            args: vec!["-c".into(), "exit 0".into()],
        };

        // SAFETY: only swaps dispositions; no handler code is installed.
        let original = unsafe { libc::signal(libc::SIGPIPE, libc::SIG_DFL) };
        let result = early_exit.compress_archive(&mut target, &files);
        // SAFETY: as above; `original` came from signal(2) for SIGPIPE.
        let after = unsafe { libc::signal(libc::SIGPIPE, original) };

        assert!(result.is_err());
        assert_eq!(after, libc::SIG_DFL);
    }

    #[test]
    fn names_for_payload_tag() {
        assert_eq!(Compressor::default().name(), "gzip");
        assert_eq!(Compressor::Zstd { level: 19 }.name(), "zstd");
        assert_eq!(Compressor::external("/usr/bin/xz").name(), "xz");
    }
}
