//! Main entry point for the pipetar CLI app

use pipetar::cli;
use pipetar::{create_archive, extract_archive, ArchiverError};
use std::fs::File;
use std::io;
use tracing::info;

fn main() -> std::process::ExitCode {
    if let Err(e) = run_app() {
        eprintln!("Error: {}", e);
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}

fn run_app() -> Result<(), Box<dyn std::error::Error>> {
    let args = cli::run();
    cli::init_logging(args.log_level())?;

    let config = args.config();
    config.validate()?;

    if args.create {
        let stats = match &args.output {
            Some(path) => {
                let file = File::create(path).map_err(|e| ArchiverError::io(path, e))?;
                create_archive(&args.roots, file, &config)?
            }
            None => create_archive(&args.roots, io::stdout(), &config)?,
        };
        info!(
            "Done! Archived {} files ({} bytes) in {} records, {} skipped, {} truncated",
            stats.files, stats.bytes, stats.records, stats.skipped, stats.truncated
        );
    } else {
        let stats = match &args.input {
            Some(path) => {
                let file = File::open(path).map_err(|e| ArchiverError::io(path, e))?;
                extract_archive(file, &args.directory, &config)?
            }
            None => extract_archive(io::stdin(), &args.directory, &config)?,
        };
        info!("Done! Extracted {} files ({} bytes) from {} records", stats.files, stats.bytes, stats.records);
    }

    Ok(())
}
