//! Command-line interface definitions for dupindex.
//!
//! This module defines all CLI arguments and subcommands using the clap derive API.
//! Global options (verbosity, error format, config file) apply to every subcommand.
//!
//! # Example
//!
//! ```bash
//! # Index a directory into the default index location
//! dupindex scan ~/Pictures
//!
//! # Use a separate index and hash everything above 1MB externally
//! dupindex scan ~/Pictures --index-dir /tmp/pics.idx --threshold 1MB
//!
//! # Debug logging, including the periodic performance line
//! dupindex -v scan ~/Pictures
//! ```

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Persistent content-addressed index of duplicate files.
///
/// dupindex walks directory trees and records every regular file by size,
/// hashing (SHA-1) only files whose size collides with another known file.
#[derive(Debug, Parser)]
#[command(name = "dupindex")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Print errors as JSON on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Configuration file to use instead of the default location
    #[arg(long, global = true, value_name = "FILE", env = "DUPINDEX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands for dupindex.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Add every file below a directory to the index
    Scan(ScanArgs),
}

/// Arguments for the scan subcommand.
#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Directory to index
    #[arg(value_name = "ROOT")]
    pub root: PathBuf,

    /// Directory holding the index
    #[arg(long, value_name = "DIR")]
    pub index_dir: Option<PathBuf>,

    /// Size at which hashing switches to the external program (e.g. 60000, 1MB)
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub threshold: Option<u64>,

    /// Additional directory name to skip (can be repeated)
    #[arg(long, value_name = "NAME")]
    pub ignore: Vec<String>,

    /// Seconds before an external hash is abandoned
    #[arg(long, value_name = "SECS")]
    pub hash_timeout: Option<u64>,

    /// Do not show a progress spinner
    #[arg(long)]
    pub no_progress: bool,

    /// Skip reloading the index after saving to check it
    #[arg(long)]
    pub no_verify: bool,
}

/// Parse a human-readable size string into bytes.
///
/// Supports the following formats:
/// - Plain numbers: "1024" -> 1024 bytes
/// - Decimal units: "1KB", "1MB", "1GB", "1TB" (powers of 1000)
/// - Binary units: "1KiB", "1MiB", "1GiB", "1TiB" (powers of 1024)
///
/// Units are case-insensitive.
///
/// # Examples
///
/// ```
/// use dupindex::cli::parse_size;
///
/// assert_eq!(parse_size("60000").unwrap(), 60_000);
/// assert_eq!(parse_size("64KiB").unwrap(), 65_536);
/// assert_eq!(parse_size("1MB").unwrap(), 1_000_000);
/// ```
/// # Errors
///
/// Returns an error if the string is empty, contains an invalid number,
/// a negative number, or an unknown size suffix.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Size cannot be empty".to_string());
    }
    if s.starts_with('-') {
        return Err("Size cannot be negative".to_string());
    }

    let (num_str, suffix) = match s.find(|c: char| !c.is_ascii_digit() && c != '.') {
        Some(idx) => (&s[..idx], s[idx..].trim().to_uppercase()),
        None => (s, String::new()),
    };

    let multiplier: u64 = match suffix.as_str() {
        "" | "B" => 1,
        "KB" | "K" => 1_000,
        "KIB" => 1_024,
        "MB" | "M" => 1_000_000,
        "MIB" => 1_048_576,
        "GB" | "G" => 1_000_000_000,
        "GIB" => 1_073_741_824,
        "TB" | "T" => 1_000_000_000_000,
        "TIB" => 1_099_511_627_776,
        _ => return Err(format!("Unknown size suffix: '{suffix}'")),
    };

    // Integers stay exact; fractions go through f64
    if let Ok(whole) = num_str.parse::<u64>() {
        return whole
            .checked_mul(multiplier)
            .ok_or_else(|| format!("Size too large: '{s}'"));
    }

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number: '{num_str}'"))?;

    Ok((num * multiplier as f64) as u64)
}
