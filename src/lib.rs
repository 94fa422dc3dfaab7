//! dupindex - persistent content-addressed duplicate file index
//!
//! Walks directory trees and records every regular file by size. Files are
//! only hashed (SHA-1) once another file of the same size shows up, and
//! paths are stored as sequences of interned component ids, which keeps the
//! index small. The index lives in a directory and is updated incrementally
//! across runs.

pub mod cli;
pub mod config;
pub mod error;
pub mod index;
pub mod logging;
pub mod progress;
pub mod scanner;
pub mod signal;

use std::sync::Arc;

use anyhow::Context;

use crate::cli::{Cli, Commands, ScanArgs};
use crate::config::IndexConfig;
use crate::error::ExitCode;
use crate::index::{Index, ScanConfig};
use crate::progress::Progress;

/// Run the command described by `cli`.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the index cannot be
/// opened or saved, or the scan fails. The index is saved even when the
/// scan fails.
pub fn run_app(cli: Cli) -> anyhow::Result<ExitCode> {
    logging::init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Scan(ref args) => run_scan(&cli, args),
    }
}

fn run_scan(cli: &Cli, args: &ScanArgs) -> anyhow::Result<ExitCode> {
    let mut config = match cli.config {
        Some(ref path) => IndexConfig::load_from_path(path)?,
        None => IndexConfig::load()?,
    };
    config.merge_scan_args(args);
    log::debug!("Configuration: {config:?}");

    let handler = signal::install_handler()?;

    let mut index = Index::open(config.clone())
        .with_context(|| format!("Failed to open index in {}", config.index_dir.display()))?;

    let mut scan_config = ScanConfig::default().with_shutdown_flag(handler.get_flag());
    if !cli.quiet && !args.no_progress {
        scan_config = scan_config.with_progress_callback(Arc::new(Progress::new(false)));
    }

    let scanned = index.scan(&args.root, &scan_config);
    let saved = index
        .save()
        .with_context(|| format!("Failed to save index in {}", config.index_dir.display()));

    let summary = scanned.with_context(|| format!("Scan of {} failed", args.root.display()))?;
    saved?;

    let stats = index.stats();
    log::info!(
        "Index holds {} files in {} sizes, {} duplicate groups ({} redundant files, {})",
        stats.files,
        stats.sizes,
        stats.duplicate_groups,
        stats.redundant_files,
        bytesize::ByteSize(stats.redundant_bytes)
    );

    if summary.interrupted {
        Ok(ExitCode::Interrupted)
    } else if summary.is_partial() {
        log::warn!(
            "{} files skipped (permission denied: {}, hash failures: {})",
            summary.skipped_permission + summary.hash_failures,
            summary.skipped_permission,
            summary.hash_failures
        );
        Ok(ExitCode::PartialSuccess)
    } else {
        Ok(ExitCode::Success)
    }
}
