use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use tracing::{info, warn};

use super::Disconnected;
use crate::archive::{encode_path, Block, MAX_FIELD_LEN};
use crate::common::{Config, WorkCounter};

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct ReadStats {
    pub files: u64,
    pub bytes: u64,
    pub skipped: u64,
    pub truncated: u64,
}

/// Turns files into block sequences.
///
/// One reader owns a file from `Start` to `End`, which is what keeps a file's
/// blocks in order on the shared write queue.
pub(crate) struct FileReader<'a> {
    config: &'a Config,
    counter: &'a WorkCounter,
    blocks: Sender<Block>,
    stats: ReadStats,
}

impl<'a> FileReader<'a> {
    pub fn new(config: &'a Config, counter: &'a WorkCounter, blocks: Sender<Block>) -> Self {
        FileReader { config, counter, blocks, stats: ReadStats::default() }
    }

    pub fn run(mut self, paths: Receiver<PathBuf>) -> ReadStats {
        for path in paths.iter() {
            let result = self.read_file(&path);
            self.counter.done();
            if result.is_err() {
                break;
            }
        }
        self.stats
    }

    fn read_file(&mut self, path: &Path) -> Result<(), Disconnected> {
        if self.config.verbose {
            info!("{}", path.display());
        }

        let encoded_len = encode_path(path).len();
        if encoded_len > MAX_FIELD_LEN {
            warn!("Skipping '{}': path is {} bytes, at most {} fit in a record", path.display(), encoded_len, MAX_FIELD_LEN);
            self.stats.skipped += 1;
            return Ok(());
        }

        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) => {
                warn!("file open error on '{}': {}", path.display(), e);
                self.stats.skipped += 1;
                return Ok(());
            }
        };

        let path: Arc<Path> = Arc::from(path);
        self.read_stream(&path, file)
    }

    /// Emit `Start`, the contents of `input` in `block_size` chunks, then `End`.
    ///
    /// A read error part way through still closes the file with `End`; whatever was
    /// read before it stays in the archive.
    fn read_stream<R: Read>(&mut self, path: &Arc<Path>, mut input: R) -> Result<(), Disconnected> {
        self.emit(Block::Start { path: path.clone() })?;

        let block_size = self.config.block_size as usize;
        let mut archived = 0u64;
        loop {
            let mut chunk = vec![0u8; block_size];
            let (n, failure) = fill_chunk(&mut input, &mut chunk);
            if n > 0 {
                chunk.truncate(n);
                archived += n as u64;
                self.emit(Block::Data { path: path.clone(), data: chunk })?;
            }
            if let Some(e) = failure {
                warn!(
                    "file read error on '{}' after {} bytes; archived contents will be incomplete: {}",
                    path.display(),
                    archived,
                    e
                );
                self.stats.truncated += 1;
                break;
            }
            if n < block_size {
                break;
            }
        }

        self.emit(Block::End { path: path.clone() })?;
        self.stats.files += 1;
        self.stats.bytes += archived;
        Ok(())
    }

    fn emit(&self, block: Block) -> Result<(), Disconnected> {
        self.counter.add(1);
        if self.blocks.send(block).is_err() {
            self.counter.done();
            return Err(Disconnected);
        }
        Ok(())
    }
}

/// Read until `buf` is full or the file ends, so only a file's last chunk is short.
///
/// Bytes that arrived before a read error are still counted in the returned length.
fn fill_chunk<R: Read>(input: &mut R, buf: &mut [u8]) -> (usize, Option<io::Error>) {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return (filled, Some(e)),
        }
    }
    (filled, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::fs;
    use tempfile::tempdir;

    fn read_one(path: &Path, config: &Config) -> (Vec<Block>, ReadStats, usize) {
        let counter = WorkCounter::new();
        let (tx, rx) = unbounded();
        let mut reader = FileReader::new(config, &counter, tx);
        reader.read_file(path).unwrap();
        (rx.try_iter().collect(), reader.stats, counter.outstanding())
    }

    #[test]
    fn chunks_follow_the_block_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f");
        let contents: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        fs::write(&path, &contents).unwrap();

        let config = Config { block_size: 300, ..Config::default() };
        let (blocks, stats, outstanding) = read_one(&path, &config);

        assert_eq!(blocks.len(), 6);
        assert!(matches!(blocks.first(), Some(Block::Start { .. })));
        assert!(matches!(blocks.last(), Some(Block::End { .. })));
        let data: Vec<u8> = blocks
            .iter()
            .filter_map(|b| match b {
                Block::Data { data, .. } => Some(data.clone()),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(data, contents);
        assert_eq!(stats.bytes, 1000);
        // Every emitted block is counted until the writer releases it.
        assert_eq!(outstanding, 6);
    }

    #[test]
    fn unopenable_file_produces_nothing() {
        let dir = tempdir().unwrap();
        let (blocks, stats, outstanding) = read_one(&dir.path().join("missing"), &Config::default());
        assert!(blocks.is_empty());
        assert_eq!(stats.skipped, 1);
        assert_eq!(outstanding, 0);
    }

    #[test]
    fn disconnected_writer_stops_the_reader() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, b"data").unwrap();

        let config = Config::default();
        let counter = WorkCounter::new();
        let (tx, rx) = unbounded();
        drop(rx);
        let mut reader = FileReader::new(&config, &counter, tx);
        assert!(reader.read_file(&path).is_err());
        assert_eq!(counter.outstanding(), 0);
    }

    struct Flaky {
        served: usize,
    }

    impl Read for Flaky {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.served == 0 {
                self.served = 1;
                let n = buf.len().min(3);
                buf[..n].fill(9);
                return Ok(n);
            }
            Err(io::Error::new(io::ErrorKind::Other, "device gone"))
        }
    }

    #[test]
    fn fill_chunk_surfaces_mid_read_errors() {
        let mut buf = [0u8; 8];
        let (n, failure) = fill_chunk(&mut Flaky { served: 0 }, &mut buf);
        assert_eq!(n, 3);
        assert!(failure.is_some());
        let (n, failure) = fill_chunk(&mut &b"abc"[..], &mut buf);
        assert_eq!(n, 3);
        assert!(failure.is_none());
    }

    #[test]
    fn failed_read_still_closes_the_file() {
        let config = Config { block_size: 8, ..Config::default() };
        let counter = WorkCounter::new();
        let (tx, rx) = unbounded();
        let mut reader = FileReader::new(&config, &counter, tx);
        let path: Arc<Path> = Arc::from(Path::new("flaky.bin"));

        reader.read_stream(&path, Flaky { served: 0 }).unwrap();

        let blocks: Vec<Block> = rx.try_iter().collect();
        assert_eq!(blocks.len(), 3);
        assert!(matches!(&blocks[0], Block::Start { path: p } if *p == path));
        assert!(matches!(&blocks[1], Block::Data { data, .. } if data == &vec![9u8; 3]));
        assert!(matches!(&blocks[2], Block::End { path: p } if *p == path));
        assert_eq!(reader.stats.truncated, 1);
        assert_eq!(reader.stats.files, 1);
        assert_eq!(reader.stats.bytes, 3);
        assert_eq!(counter.outstanding(), 3);
    }
}
