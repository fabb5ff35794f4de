//! # Archive Creation Pipeline
//!
//! Creation runs as three bounded stages connected by `crossbeam` channels:
//!
//! 1. A pool of [`DirectoryScanner`]s lists directories, feeding subdirectories back
//!    into their own queue and regular files into the read queue.
//! 2. A pool of [`FileReader`]s turns each file into `Start`, `Data`..., `End` blocks.
//! 3. A single [`ArchiveWriter`] serializes blocks onto the output stream.
//!
//! The scan queue feeds itself, so it never closes on its own. A [`WorkCounter`]
//! tracks every enqueued directory, file and block; once it drains the scanners are
//! told to stop, and the remaining stages wind down as their inputs disconnect.

mod reader;
mod scanner;

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;

use crossbeam_channel::{bounded, Receiver};
use tracing::{error, info, warn};

use crate::archive::{self, Block};
use crate::common::{Config, WorkCounter};
use crate::error::{ArchiverError, Result};
use reader::{FileReader, ReadStats};
use scanner::{DirectoryScanner, ScanStats};

/// The downstream stage hung up; stop producing.
#[derive(Debug)]
pub(crate) struct Disconnected;

/// Totals reported by [`create_archive`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CreateStats {
    /// Directories listed successfully.
    pub directories: u64,
    /// Files archived, truncated ones included.
    pub files: u64,
    /// File content bytes archived.
    pub bytes: u64,
    /// Records written to the output stream.
    pub records: u64,
    /// Directories and files skipped because they could not be listed or opened.
    pub skipped: u64,
    /// Files whose read failed part way; they are archived short.
    pub truncated: u64,
}

/// Serializes blocks onto the archive stream.
///
/// There is exactly one writer per archive, so the stream needs no locking.
pub struct ArchiveWriter<W: Write> {
    out: BufWriter<W>,
    records: u64,
}

impl<W: Write> ArchiveWriter<W> {
    pub fn new(out: W) -> Self {
        ArchiveWriter { out: BufWriter::new(out), records: 0 }
    }

    pub fn write_block(&mut self, block: &Block) -> Result<()> {
        archive::write_block(&mut self.out, block)?;
        self.records += 1;
        Ok(())
    }

    /// Flush everything and hand back the underlying stream.
    pub fn finish(self) -> Result<(W, u64)> {
        let records = self.records;
        let out = self.out.into_inner().map_err(|e| ArchiverError::Stream(e.into_error()))?;
        Ok((out, records))
    }

    /// Drain `blocks` onto the stream, releasing one unit of work per block written.
    ///
    /// A write error aborts `counter` so the driver stops waiting for work that can
    /// no longer complete.
    fn run(mut self, blocks: Receiver<Block>, counter: &WorkCounter) -> Result<u64> {
        for block in blocks.iter() {
            if let Err(e) = self.write_block(&block) {
                error!("Archive write error: {}", e);
                counter.abort();
                return Err(e);
            }
            counter.done();
        }

        let (mut out, records) = self.finish()?;
        out.flush()?;
        Ok(records)
    }
}

struct Root {
    path: PathBuf,
    canonical: PathBuf,
    is_file: bool,
}

/// Resolve `roots`, dropping every root that repeats or lies inside another one so
/// that no file is read twice. Roots that cannot be resolved are logged and counted
/// in `skipped`.
fn distinct_roots<P: AsRef<Path>>(roots: &[P], skipped: &mut u64) -> Vec<Root> {
    let mut resolved = Vec::with_capacity(roots.len());
    for root in roots {
        let path = root.as_ref();
        let found = fs::metadata(path).and_then(|meta| Ok((meta.is_file(), fs::canonicalize(path)?)));
        match found {
            Ok((is_file, canonical)) => resolved.push(Root { path: path.to_path_buf(), canonical, is_file }),
            Err(e) => {
                warn!("Skipping '{}': {}", path.display(), e);
                *skipped += 1;
            }
        }
    }

    let covered: Vec<bool> = resolved
        .iter()
        .enumerate()
        .map(|(i, root)| {
            resolved.iter().enumerate().any(|(j, other)| {
                if i == j {
                    false
                } else if other.canonical == root.canonical {
                    j < i
                } else {
                    !other.is_file && root.canonical.starts_with(&other.canonical)
                }
            })
        })
        .collect();

    resolved
        .into_iter()
        .zip(covered)
        .filter_map(|(root, covered)| {
            if covered {
                warn!("Skipping '{}': already archived through another root", root.path.display());
                None
            } else {
                Some(root)
            }
        })
        .collect()
}

/// Archive every file reachable from `roots` onto `output`.
///
/// Roots that are directories are walked recursively; roots that are regular files
/// are archived directly. Paths are stored exactly as they are reached from the
/// roots. A root that repeats or sits inside another root is archived once, through
/// the first or outermost one. Unlistable directories and unopenable files are logged
/// and skipped; only a failure on `output` itself is an error.
pub fn create_archive<P, W>(roots: &[P], output: W, config: &Config) -> Result<CreateStats>
where
    P: AsRef<Path>,
    W: Write + Send,
{
    config.validate()?;

    let counter = WorkCounter::new();
    let (scan_tx, scan_rx) = bounded::<PathBuf>(config.queue_depth);
    let (read_tx, read_rx) = bounded::<PathBuf>(config.queue_depth);
    let (write_tx, write_rx) = bounded::<Block>(config.queue_depth);
    let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

    let mut stats = CreateStats::default();

    let outcome = thread::scope(|s| {
        let counter = &counter;

        let writer = thread::Builder::new()
            .name("archive-writer".into())
            .spawn_scoped(s, move || ArchiveWriter::new(output).run(write_rx, counter))
            .map_err(ArchiverError::Spawn)?;

        let mut scanners = Vec::with_capacity(config.scanners);
        for i in 0..config.scanners {
            let scanner = DirectoryScanner::new(config, counter, scan_tx.clone(), read_tx.clone());
            let (queue, shutdown) = (scan_rx.clone(), shutdown_rx.clone());
            let handle = thread::Builder::new()
                .name(format!("scanner-{}", i))
                .spawn_scoped(s, move || scanner.run(queue, shutdown))
                .map_err(ArchiverError::Spawn)?;
            scanners.push(handle);
        }

        let mut readers = Vec::with_capacity(config.readers);
        for i in 0..config.readers {
            let reader = FileReader::new(config, counter, write_tx.clone());
            let paths = read_rx.clone();
            let handle = thread::Builder::new()
                .name(format!("reader-{}", i))
                .spawn_scoped(s, move || reader.run(paths))
                .map_err(ArchiverError::Spawn)?;
            readers.push(handle);
        }

        // Only the workers may keep these ends alive.
        drop(scan_rx);
        drop(read_rx);
        drop(write_tx);
        drop(shutdown_rx);

        for root in distinct_roots(roots, &mut stats.skipped) {
            counter.add(1);
            let sent = if root.is_file {
                read_tx.send(root.path).is_ok()
            } else {
                scan_tx.send(root.path).is_ok()
            };
            if !sent {
                counter.done();
                break;
            }
        }
        drop(read_tx);
        drop(scan_tx);

        let drained = counter.wait();
        if !drained {
            warn!("Archive writer failed, stopping the pipeline");
        }
        drop(shutdown_tx);

        for handle in scanners {
            let scanned: ScanStats = handle.join().map_err(|_| ArchiverError::WorkerPanicked("directory scanner"))?;
            stats.directories += scanned.directories;
            stats.skipped += scanned.skipped;
        }
        for handle in readers {
            let read: ReadStats = handle.join().map_err(|_| ArchiverError::WorkerPanicked("file reader"))?;
            stats.files += read.files;
            stats.bytes += read.bytes;
            stats.skipped += read.skipped;
            stats.truncated += read.truncated;
        }
        writer.join().map_err(|_| ArchiverError::WorkerPanicked("archive writer"))?
    });

    stats.records = outcome?;

    if config.verbose {
        info!(
            "Archived {} files ({} bytes, {} records) from {} directories; {} skipped, {} truncated",
            stats.files, stats.bytes, stats.records, stats.directories, stats.skipped, stats.truncated
        );
    }
    Ok(stats)
}
