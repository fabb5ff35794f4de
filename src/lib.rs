//! # pipetar Core Library
//!
//! This crate archives directory trees into a single self-describing stream and
//! rebuilds trees from such streams, the way `tar -c` / `tar -x` do, with both
//! directions running as bounded multi-threaded pipelines.
//!
//! ## Key Modules
//!
//! - [`archive`]: The [`Block`](archive::Block) type and the binary record framing.
//! - [`workers`]: The creation pipeline (directory scanners, file readers, archive writer).
//! - [`extract`]: The extraction pipeline (archive reader and per-file writers).
//! - [`common`]: Runtime [`Config`] and the [`WorkCounter`](common::WorkCounter).
//! - [`cli`]: Command-line parsing and logging setup for the `pipetar` binary.
//!
//! ## Examples
//!
//! ```no_run
//! use pipetar::{create_archive, extract_archive, Config};
//! use std::fs::File;
//! use std::path::Path;
//!
//! let config = Config::default();
//! create_archive(&["photos"], File::create("photos.ptar")?, &config)?;
//! extract_archive(File::open("photos.ptar")?, Path::new("restore"), &config)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod archive;
pub mod cli;
pub mod common;
pub mod error;
pub mod extract;
pub mod workers;

pub use common::Config;
pub use error::{ArchiverError, Result};
pub use extract::{extract_archive, ExtractStats};
pub use workers::{create_archive, ArchiveWriter, CreateStats};
