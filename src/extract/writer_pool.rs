//! Per-file writers for extraction.
//!
//! The archive reader spawns one [`FileWriter`] per file that is open in the stream
//! and feeds it through a rendezvous channel, so the pool is as large as the number
//! of files the creator had in flight at once. Each writer sees exactly one file's
//! blocks in stream order.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use crossbeam_channel::Receiver;
use tracing::info;

use crate::archive::Block;
use crate::error::{ArchiverError, Result};

pub(crate) struct FileWriter {
    destination: PathBuf,
    verbose: bool,
}

impl FileWriter {
    pub fn new(destination: PathBuf, verbose: bool) -> Self {
        FileWriter { destination, verbose }
    }

    /// Materialize one file from `Start`, `Data`..., `End`. Returns the bytes written.
    ///
    /// Every filesystem error is fatal. If the channel closes before `End` the
    /// extraction was abandoned and the partial file is reported as truncated.
    pub fn run(self, blocks: Receiver<Block>) -> Result<u64> {
        let mut file: Option<BufWriter<File>> = None;
        let mut written = 0u64;

        for block in blocks.iter() {
            match block {
                Block::Start { .. } => {
                    if self.verbose {
                        info!("{}", self.destination.display());
                    }
                    if let Some(parent) = self.destination.parent() {
                        fs::create_dir_all(parent).map_err(|e| ArchiverError::io(parent, e))?;
                    }
                    let created = File::create(&self.destination).map_err(|e| ArchiverError::io(&self.destination, e))?;
                    file = Some(BufWriter::new(created));
                }
                Block::Data { path, data } => {
                    let out = file.as_mut().ok_or_else(|| ArchiverError::UnknownPath(path.to_path_buf()))?;
                    out.write_all(&data).map_err(|e| ArchiverError::io(&self.destination, e))?;
                    written += data.len() as u64;
                }
                Block::End { path } => {
                    let out = file.take().ok_or_else(|| ArchiverError::UnknownPath(path.to_path_buf()))?;
                    out.into_inner().map_err(|e| ArchiverError::io(&self.destination, e.into_error()))?;
                    return Ok(written);
                }
            }
        }

        Err(ArchiverError::Truncated("file contents"))
    }
}
