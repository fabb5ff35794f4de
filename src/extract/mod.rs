//! # Extraction Module
//!
//! This module reads an archive stream sequentially and rebuilds the files it holds.
//!
//! A single [`ArchiveReader`] owns the map from archived path to the channel of that
//! path's writer; nothing else touches it, so it needs no lock. Each `Start` record
//! spawns a FileWriter bound to a capacity-1 channel. The reader blocks whenever a
//! writer has not yet taken the previous block, which ties reading speed to disk speed
//! and keeps roughly one block in flight per open file.

mod writer_pool;

use std::collections::{HashMap, HashSet};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, Scope, ScopedJoinHandle};

use crossbeam_channel::{bounded, Sender};
use tracing::info;

use crate::archive::{records, sanitize_path, Block};
use crate::common::{Config, WorkCounter};
use crate::error::{ArchiverError, Result};
use writer_pool::FileWriter;

/// Totals reported by [`extract_archive`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExtractStats {
    /// Files fully written.
    pub files: u64,
    /// File content bytes written.
    pub bytes: u64,
    /// Records read from the stream.
    pub records: u64,
}

/// Extract every file in the archive stream `input` below `target`.
///
/// Leading root components of archived paths are stripped, so an archive made from
/// absolute roots extracts under `target` as well. Any malformed record, unsafe path
/// or filesystem error aborts the extraction; files already closed stay on disk.
pub fn extract_archive<R: Read>(input: R, target: &Path, config: &Config) -> Result<ExtractStats> {
    let counter = WorkCounter::new();
    let mut input = BufReader::new(input);

    let stats = thread::scope(|s| {
        let mut reader = ArchiveReader::new(s, config, &counter, target);
        let result = reader.read_all(&mut input).and_then(|()| reader.finish());
        // Dropping the reader closes every open channel, so abandoned writers exit.
        drop(reader);
        result
    })?;

    if config.verbose {
        info!("Extracted {} files ({} bytes) from {} records", stats.files, stats.bytes, stats.records);
    }
    Ok(stats)
}

struct OpenFile<'scope> {
    destination: PathBuf,
    sender: Sender<Block>,
    handle: ScopedJoinHandle<'scope, Result<u64>>,
}

struct ClosedFile<'scope> {
    destination: PathBuf,
    handle: ScopedJoinHandle<'scope, Result<u64>>,
}

/// Demultiplexes the record stream into per-file writer channels.
///
/// Open files are tracked both by archived path and by on-disk destination, since
/// different spellings (`d/f`, `/d/f`, `./d/f`) extract to the same file.
pub(crate) struct ArchiveReader<'scope, 'env: 'scope> {
    scope: &'scope Scope<'scope, 'env>,
    config: &'env Config,
    counter: &'env WorkCounter,
    target: &'env Path,
    open: HashMap<Arc<Path>, OpenFile<'scope>>,
    destinations: HashSet<PathBuf>,
    closed: Vec<ClosedFile<'scope>>,
    stats: ExtractStats,
}

impl<'scope, 'env: 'scope> ArchiveReader<'scope, 'env> {
    fn new(scope: &'scope Scope<'scope, 'env>, config: &'env Config, counter: &'env WorkCounter, target: &'env Path) -> Self {
        ArchiveReader {
            scope,
            config,
            counter,
            target,
            open: HashMap::new(),
            destinations: HashSet::new(),
            closed: Vec::new(),
            stats: ExtractStats::default(),
        }
    }

    fn read_all<R: Read>(&mut self, input: &mut R) -> Result<()> {
        for block in records(input) {
            let block = block?;
            self.stats.records += 1;
            self.dispatch(block)?;
        }

        if !self.open.is_empty() {
            return Err(ArchiverError::Unterminated(self.open.len()));
        }
        Ok(())
    }

    fn dispatch(&mut self, block: Block) -> Result<()> {
        match block {
            Block::Start { path } => {
                if self.open.contains_key(&path) {
                    return Err(ArchiverError::DuplicateStart(path.to_path_buf()));
                }
                let destination = self.target.join(sanitize_path(&path)?);
                if self.destinations.contains(&destination) {
                    return Err(ArchiverError::DuplicateStart(path.to_path_buf()));
                }
                // An earlier, already ended copy may still be flushing to the same file.
                self.settle(&destination)?;

                let (sender, receiver) = bounded(1);
                let writer = FileWriter::new(destination.clone(), self.config.verbose);
                let token = self.counter.token();
                let handle = thread::Builder::new()
                    .spawn_scoped(self.scope, move || {
                        let _token = token;
                        writer.run(receiver)
                    })
                    .map_err(ArchiverError::Spawn)?;

                self.destinations.insert(destination.clone());
                self.open.insert(path.clone(), OpenFile { destination, sender, handle });
                self.forward(&path, Block::Start { path: path.clone() })
            }
            Block::Data { path, data } => {
                if !self.open.contains_key(&path) {
                    return Err(ArchiverError::UnknownPath(path.to_path_buf()));
                }
                self.forward(&path, Block::Data { path: path.clone(), data })
            }
            Block::End { path } => {
                if !self.open.contains_key(&path) {
                    return Err(ArchiverError::UnknownPath(path.to_path_buf()));
                }
                self.forward(&path, Block::End { path: path.clone() })?;
                if let Some(file) = self.close(&path) {
                    drop(file.sender);
                    self.closed.push(ClosedFile { destination: file.destination, handle: file.handle });
                }
                self.reap()
            }
        }
    }

    /// Hand a block to the path's writer. A refused send means the writer already
    /// stopped, so its error is collected and returned.
    fn forward(&mut self, path: &Arc<Path>, block: Block) -> Result<()> {
        let sent = match self.open.get(path) {
            Some(file) => file.sender.send(block).is_ok(),
            None => return Err(ArchiverError::UnknownPath(path.to_path_buf())),
        };
        if sent {
            return Ok(());
        }

        match self.close(path) {
            Some(file) => {
                drop(file.sender);
                join_writer(file.handle)?;
                Err(ArchiverError::WriterStopped(path.to_path_buf()))
            }
            None => Err(ArchiverError::UnknownPath(path.to_path_buf())),
        }
    }

    fn close(&mut self, path: &Arc<Path>) -> Option<OpenFile<'scope>> {
        let file = self.open.remove(path)?;
        self.destinations.remove(&file.destination);
        Some(file)
    }

    /// Join every finished writer of `destination`.
    fn settle(&mut self, destination: &Path) -> Result<()> {
        let mut i = 0;
        while i < self.closed.len() {
            if self.closed[i].destination == destination {
                let file = self.closed.swap_remove(i);
                self.collect(file.handle)?;
            } else {
                i += 1;
            }
        }
        Ok(())
    }

    /// Collect writers that have finished, surfacing the first failure.
    fn reap(&mut self) -> Result<()> {
        let mut i = 0;
        while i < self.closed.len() {
            if self.closed[i].handle.is_finished() {
                let file = self.closed.swap_remove(i);
                self.collect(file.handle)?;
            } else {
                i += 1;
            }
        }
        Ok(())
    }

    fn collect(&mut self, handle: ScopedJoinHandle<'scope, Result<u64>>) -> Result<()> {
        self.stats.bytes += join_writer(handle)?;
        self.stats.files += 1;
        Ok(())
    }

    /// Wait for every writer to drain, then collect their results.
    fn finish(&mut self) -> Result<ExtractStats> {
        self.counter.wait();
        for file in std::mem::take(&mut self.closed) {
            self.collect(file.handle)?;
        }
        Ok(self.stats)
    }
}

fn join_writer(handle: ScopedJoinHandle<'_, Result<u64>>) -> Result<u64> {
    handle.join().map_err(|_| ArchiverError::WorkerPanicked("file writer"))?
}
