use std::path::PathBuf;

use thiserror::Error;

/// The fatal error type for all archive operations in the `pipetar` crate.
///
/// Anything that surfaces as an `ArchiverError` ends the run: the record
/// framing has no resynchronization point, so once the stream or an extracted
/// file is inconsistent there is nothing sensible left to do. Per-item
/// problems on the creation side (unlistable directories, unreadable files)
/// are logged and counted instead and never reach this type.
#[derive(Error, Debug)]
pub enum ArchiverError {
    /// Reading or writing the archive stream itself failed.
    #[error("archive stream I/O error: {0}")]
    Stream(#[from] std::io::Error),

    /// An I/O error while materializing a file or directory on disk.
    /// Includes the path where the error happened.
    #[error("I/O error on path '{}': {source}", .path.display())]
    Io { source: std::io::Error, path: PathBuf },

    /// The stream ended in the middle of a record.
    #[error("archive truncated while reading {0}")]
    Truncated(&'static str),

    /// A record carried a flag byte outside of START, END and DATA.
    #[error("unrecognized record flag {0:#05b}")]
    UnknownFlag(u8),

    /// A DATA or END record referenced a path with no open START.
    #[error("record for '{}' without a preceding start marker", .0.display())]
    UnknownPath(PathBuf),

    /// A START record arrived for a path that is still open.
    #[error("duplicate start marker for '{}'", .0.display())]
    DuplicateStart(PathBuf),

    /// A file writer hung up on its input before receiving the END record.
    #[error("file writer for '{}' stopped before the end marker", .0.display())]
    WriterStopped(PathBuf),

    /// The stream ended cleanly but some files never received their END record.
    #[error("archive ended with {0} unterminated file(s)")]
    Unterminated(usize),

    /// An archived path would escape the extraction directory.
    #[error("refusing to extract unsafe path '{}'", .0.display())]
    UnsafePath(PathBuf),

    /// A path does not fit the 16-bit length field of a record.
    #[error("path '{}' is {len} bytes long, the format allows at most 65535", .path.display())]
    PathTooLong { path: PathBuf, len: usize },

    /// Rejected runtime configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The operating system refused to start a pipeline thread.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(std::io::Error),

    /// A pipeline thread panicked instead of returning.
    #[error("a {0} thread panicked")]
    WorkerPanicked(&'static str),
}

impl ArchiverError {
    /// Attach a filesystem path to an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ArchiverError::Io { source, path: path.into() }
    }
}

/// Result type alias for archive operations
pub type Result<T> = std::result::Result<T, ArchiverError>;
