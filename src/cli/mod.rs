use clap::{ArgGroup, Parser, ValueEnum};
use std::path::PathBuf;
use tracing::Level;

use crate::common::{Config, DEFAULT_BLOCK_SIZE, DEFAULT_QUEUE_DEPTH, DEFAULT_READERS, DEFAULT_SCANNERS};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(group(ArgGroup::new("mode").required(true).args(["extract", "create"])))]
pub struct Args {
    /// Extract an archive read from --input (or standard input).
    #[arg(short = 'x', long)]
    pub extract: bool,

    /// Create an archive of the given directories, written to --output (or standard output).
    #[arg(short = 'c', long)]
    pub create: bool,

    /// Archive to extract. Defaults to standard input.
    #[arg(short = 'i', long, conflicts_with = "create")]
    pub input: Option<PathBuf>,

    /// File to write the archive to. Defaults to standard output.
    #[arg(short = 'o', long, conflicts_with = "extract")]
    pub output: Option<PathBuf>,

    /// Directory to extract into.
    #[arg(short = 'C', long, default_value = ".", conflicts_with = "create")]
    pub directory: PathBuf,

    /// Size of the chunks files are split into when creating (1-65535).
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE, value_parser = clap::value_parser!(u16).range(1..))]
    pub block_size: u16,

    /// Trace every visited path on standard error.
    #[arg(short, long)]
    pub verbose: bool,

    /// Override the log level implied by --verbose.
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// `[ADVANCED]` Number of directory scanner threads.
    #[arg(long, default_value_t = DEFAULT_SCANNERS)]
    pub scanners: usize,

    /// `[ADVANCED]` Number of file reader threads.
    #[arg(long, default_value_t = DEFAULT_READERS)]
    pub readers: usize,

    /// `[ADVANCED]` Capacity of each queue between pipeline stages.
    #[arg(long, default_value_t = DEFAULT_QUEUE_DEPTH)]
    pub queue_depth: usize,

    /// Directories to archive.
    #[arg(required_if_eq("create", "true"), conflicts_with = "extract")]
    pub roots: Vec<PathBuf>,
}

/// Log verbosity accepted by `--log-level`.
#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl Args {
    /// The runtime configuration these arguments describe.
    pub fn config(&self) -> Config {
        Config {
            block_size: self.block_size,
            verbose: self.verbose,
            scanners: self.scanners,
            readers: self.readers,
            queue_depth: self.queue_depth,
        }
    }

    pub fn log_level(&self) -> Level {
        match (self.log_level, self.verbose) {
            (Some(level), _) => level.into(),
            (None, true) => Level::INFO,
            (None, false) => Level::WARN,
        }
    }
}

/// Initialize logging with the specified level.
///
/// Logs are written to stderr so stdout remains clean for the archive stream.
pub fn init_logging(level: Level) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| -> Box<dyn std::error::Error> { e })
}

/// Parses command-line arguments using `clap`.
///
/// Exits the process with clap's own message when the arguments are invalid.
pub fn run() -> Args {
    Args::parse()
}
