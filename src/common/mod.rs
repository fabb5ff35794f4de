//! Common utilities and types module.
// Shared configuration and the work-completion counter used by both pipelines.

mod counter;
pub use counter::{WorkCounter, WorkToken};

use crate::error::{ArchiverError, Result};

pub const DEFAULT_BLOCK_SIZE: u16 = 4096;
pub const DEFAULT_SCANNERS: usize = 16;
pub const DEFAULT_READERS: usize = 16;
pub const DEFAULT_QUEUE_DEPTH: usize = 128;

/// Runtime configuration, built once at startup and passed by reference into
/// every pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Size of the chunks files are split into on creation. Ignored on extraction,
    /// where chunk sizes come from the stream.
    pub block_size: u16,
    /// Trace every visited directory, opened file and extracted file.
    pub verbose: bool,
    /// Number of DirectoryScanner threads.
    pub scanners: usize,
    /// Number of FileReader threads.
    pub readers: usize,
    /// Capacity of each bounded queue between creation stages.
    pub queue_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            block_size: DEFAULT_BLOCK_SIZE,
            verbose: false,
            scanners: DEFAULT_SCANNERS,
            readers: DEFAULT_READERS,
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(ArchiverError::Config("block size must be at least 1".into()));
        }
        if self.scanners == 0 || self.readers == 0 {
            return Err(ArchiverError::Config("worker pools need at least one thread each".into()));
        }
        if self.queue_depth == 0 {
            return Err(ArchiverError::Config("queue depth must be at least 1".into()));
        }
        Ok(())
    }
}
