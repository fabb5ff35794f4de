use std::fs;
use std::path::{Path, PathBuf};

use crossbeam_channel::{select, Receiver, Sender, TrySendError};
use tracing::{info, warn};

use super::Disconnected;
use crate::common::{Config, WorkCounter};

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct ScanStats {
    pub directories: u64,
    pub skipped: u64,
}

/// Lists directories, sending subdirectories back to the scan queue and regular
/// files on to the readers.
///
/// The scan queue is bounded and fed by the scanners themselves, so a scanner never
/// blocks on it: when the queue is full the subdirectory goes on this scanner's own
/// backlog and is listed here instead.
pub(crate) struct DirectoryScanner<'a> {
    config: &'a Config,
    counter: &'a WorkCounter,
    directories: Sender<PathBuf>,
    files: Sender<PathBuf>,
    backlog: Vec<PathBuf>,
    stats: ScanStats,
}

impl<'a> DirectoryScanner<'a> {
    pub fn new(config: &'a Config, counter: &'a WorkCounter, directories: Sender<PathBuf>, files: Sender<PathBuf>) -> Self {
        DirectoryScanner { config, counter, directories, files, backlog: Vec::new(), stats: ScanStats::default() }
    }

    /// Scan until `shutdown` disconnects or the readers go away.
    pub fn run(mut self, queue: Receiver<PathBuf>, shutdown: Receiver<()>) -> ScanStats {
        loop {
            let dir = match self.backlog.pop() {
                Some(dir) => dir,
                None => select! {
                    recv(queue) -> msg => match msg {
                        Ok(dir) => dir,
                        Err(_) => break,
                    },
                    recv(shutdown) -> _ => break,
                },
            };

            if self.scan(&dir).is_err() {
                break;
            }
        }
        self.stats
    }

    fn scan(&mut self, dir: &Path) -> Result<(), Disconnected> {
        if self.config.verbose {
            info!("{}", dir.display());
        }

        let result = self.enqueue_children(dir);
        self.counter.done();
        result
    }

    fn enqueue_children(&mut self, dir: &Path) -> Result<(), Disconnected> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("directory read error on '{}': {}", dir.display(), e);
                self.stats.skipped += 1;
                return Ok(());
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("directory read error on '{}': {}", dir.display(), e);
                    self.stats.skipped += 1;
                    continue;
                }
            };
            let path = entry.path();
            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(e) => {
                    warn!("Skipping '{}': {}", path.display(), e);
                    self.stats.skipped += 1;
                    continue;
                }
            };

            if file_type.is_dir() {
                self.counter.add(1);
                match self.directories.try_send(path) {
                    Ok(()) => {}
                    Err(TrySendError::Full(path)) | Err(TrySendError::Disconnected(path)) => self.backlog.push(path),
                }
            } else if file_type.is_file() {
                self.counter.add(1);
                if self.files.send(path).is_err() {
                    self.counter.done();
                    return Err(Disconnected);
                }
            } else if self.config.verbose {
                info!("Skipping '{}': not a regular file or directory", path.display());
            }
        }

        self.stats.directories += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{bounded, unbounded};
    use tempfile::tempdir;

    #[test]
    fn splits_children_between_queues() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::write(dir.path().join("b.txt"), b"b").unwrap();

        let config = Config::default();
        let counter = WorkCounter::new();
        let (dir_tx, dir_rx) = unbounded();
        let (file_tx, file_rx) = unbounded();

        let mut scanner = DirectoryScanner::new(&config, &counter, dir_tx, file_tx);
        counter.add(1);
        scanner.scan(dir.path()).unwrap();

        assert_eq!(dir_rx.try_iter().collect::<Vec<_>>(), vec![dir.path().join("sub")]);
        let mut files: Vec<_> = file_rx.try_iter().collect();
        files.sort();
        assert_eq!(files, vec![dir.path().join("a.txt"), dir.path().join("b.txt")]);
        // The directory itself is done; its three children are still outstanding.
        assert_eq!(counter.outstanding(), 3);
        assert_eq!(scanner.stats.directories, 1);
    }

    #[test]
    fn full_queue_spills_to_backlog() {
        let dir = tempdir().unwrap();
        for i in 0..3 {
            fs::create_dir(dir.path().join(format!("d{}", i))).unwrap();
        }

        let config = Config::default();
        let counter = WorkCounter::new();
        let (dir_tx, dir_rx) = bounded(1);
        let (file_tx, _file_rx) = unbounded();

        let mut scanner = DirectoryScanner::new(&config, &counter, dir_tx, file_tx);
        counter.add(1);
        scanner.scan(dir.path()).unwrap();

        assert_eq!(dir_rx.len(), 1);
        assert_eq!(scanner.backlog.len(), 2);
        assert_eq!(counter.outstanding(), 3);
    }

    #[test]
    fn unreadable_directory_is_skipped() {
        let dir = tempdir().unwrap();
        let config = Config::default();
        let counter = WorkCounter::new();
        let (dir_tx, _dir_rx) = unbounded();
        let (file_tx, _file_rx) = unbounded();

        let mut scanner = DirectoryScanner::new(&config, &counter, dir_tx, file_tx);
        counter.add(1);
        scanner.scan(&dir.path().join("gone")).unwrap();

        assert_eq!(counter.outstanding(), 0);
        assert_eq!(scanner.stats.skipped, 1);
        assert_eq!(scanner.stats.directories, 0);
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_not_followed() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("real")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("link")).unwrap();

        let config = Config::default();
        let counter = WorkCounter::new();
        let (dir_tx, dir_rx) = unbounded();
        let (file_tx, file_rx) = unbounded();

        let mut scanner = DirectoryScanner::new(&config, &counter, dir_tx, file_tx);
        counter.add(1);
        scanner.scan(dir.path()).unwrap();

        assert_eq!(dir_rx.try_iter().collect::<Vec<_>>(), vec![dir.path().join("real")]);
        assert_eq!(file_rx.try_iter().count(), 0);
    }
}
