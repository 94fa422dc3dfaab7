//! Feeding a directory tree into the index.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytesize::ByteSize;

use super::{Index, IndexError, Observation};
use crate::progress::ProgressCallback;
use crate::scanner::{HashError, ScanError, Walker};

/// Files between two performance log lines.
const PERF_LOG_INTERVAL: usize = 1000;

/// Options for one scan.
#[derive(Default)]
pub struct ScanConfig {
    /// Optional shutdown flag for graceful termination.
    pub shutdown_flag: Option<Arc<AtomicBool>>,
    /// Optional progress callback for reporting.
    pub progress_callback: Option<Arc<dyn ProgressCallback>>,
}

impl std::fmt::Debug for ScanConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanConfig")
            .field("shutdown_flag", &self.shutdown_flag)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl ScanConfig {
    /// Stop the scan when `flag` becomes true.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Report progress to `callback`.
    #[must_use]
    pub fn with_progress_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }
}

/// Counters for one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Files processed, including ones already indexed
    pub files: usize,
    /// Total size of processed files in bytes
    pub total_bytes: u64,
    /// Files that were the first of their size
    pub new_sizes: usize,
    /// Files that matched the content of an indexed file
    pub duplicates: usize,
    /// Files that were already indexed
    pub rescans: usize,
    /// Hashes computed because sizes collided
    pub collisions: usize,
    /// Files and directories skipped because access was denied
    pub skipped_permission: usize,
    /// Files skipped because they could not be hashed
    pub hash_failures: usize,
    /// Whether the scan stopped early on request
    pub interrupted: bool,
    /// Wall time of the scan
    pub duration: Duration,
}

impl ScanSummary {
    /// Whether anything was skipped.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.skipped_permission > 0 || self.hash_failures > 0
    }

    fn record(&mut self, observation: Observation, size: u64) {
        self.files += 1;
        self.total_bytes += size;
        match observation {
            Observation::NewSize => self.new_sizes += 1,
            Observation::Rescan => self.rescans += 1,
            Observation::Promoted { .. } | Observation::Duplicate { .. } | Observation::NewGroup => {
                self.collisions += 1;
            }
        }
        if observation.is_duplicate() {
            self.duplicates += 1;
        }
    }
}

impl Index {
    /// Add every regular file below `root`.
    ///
    /// Files that cannot be read for lack of permission or cannot be
    /// hashed are skipped and counted. A requested shutdown stops the scan
    /// between files and is reported through [`ScanSummary::interrupted`].
    /// Nothing is saved; call [`save`](Index::save) afterwards, also when
    /// this returns an error.
    ///
    /// # Errors
    ///
    /// [`IndexError::Scan`] if `root` is not a readable directory or the
    /// traversal fails, or any non-skippable [`IndexError`] from adding a
    /// file.
    pub fn scan(&mut self, root: &Path, config: &ScanConfig) -> Result<ScanSummary, IndexError> {
        check_root(root)?;

        let mut walker = Walker::new(root, self.config().walker_config());
        if let Some(ref flag) = config.shutdown_flag {
            walker = walker.with_shutdown_flag(Arc::clone(flag));
        }
        log::info!("Scanning {}", walker.root().display());

        let start = Instant::now();
        let mut summary = ScanSummary::default();
        if let Some(ref progress) = config.progress_callback {
            progress.on_phase_start("Indexing", 0);
        }

        let result = self.scan_walk(&walker, config, &mut summary, start);

        if let Some(ref progress) = config.progress_callback {
            progress.on_phase_end("Indexing");
        }
        summary.duration = start.elapsed();
        result?;

        if summary.interrupted {
            log::warn!("Scan interrupted after {} files", summary.files);
        }
        log::info!(
            "added {} files with a total of {} ({} duplicates, {} skipped) in {:.1}s",
            summary.files,
            ByteSize(summary.total_bytes),
            summary.duplicates,
            summary.skipped_permission + summary.hash_failures,
            summary.duration.as_secs_f64()
        );
        Ok(summary)
    }

    fn scan_walk(
        &mut self,
        walker: &Walker,
        config: &ScanConfig,
        summary: &mut ScanSummary,
        start: Instant,
    ) -> Result<(), IndexError> {
        let progress = config.progress_callback.as_deref();

        for item in walker.walk() {
            if config.is_shutdown_requested() {
                summary.interrupted = true;
                break;
            }

            let entry = match item {
                Ok(entry) => entry,
                Err(e) if e.is_recoverable() => {
                    summary.skipped_permission += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            match self.add_entry(&entry) {
                Ok(observation) => {
                    summary.record(observation, entry.size);
                    if summary.files % PERF_LOG_INTERVAL == 0 {
                        log::debug!(
                            "files: {}, {:.3}ms/file, name components: {}",
                            summary.files,
                            start.elapsed().as_secs_f64() * 1000.0 / summary.files as f64,
                            self.names().len()
                        );
                    }
                    if let Some(progress) = progress {
                        progress.on_item_completed(entry.size);
                        if observation.is_duplicate() {
                            progress.on_message(&format!("{} duplicates", summary.duplicates));
                        }
                    }
                }
                Err(IndexError::Hash(HashError::PermissionDenied(path))) => {
                    log::warn!("Permission denied: {}", path.display());
                    summary.skipped_permission += 1;
                }
                Err(IndexError::Hash(e)) => {
                    match e.path().filter(|p| *p != entry.path.as_path()) {
                        Some(stale) => log::warn!(
                            "Indexed file {} cannot be read, skipping {} ({e})",
                            stale.display(),
                            entry.path.display()
                        ),
                        None => log::warn!(
                            "Cannot create checksum, skipping {}: {e}",
                            entry.path.display()
                        ),
                    }
                    summary.hash_failures += 1;
                }
                Err(e) => return Err(e),
            }

            let seen = summary.files + summary.skipped_permission + summary.hash_failures;
            if let Some(progress) = progress {
                progress.on_progress(seen, &entry.path.to_string_lossy());
            }
        }

        // The walker also stops on the flag, possibly before the loop sees it
        if config.is_shutdown_requested() {
            summary.interrupted = true;
        }
        Ok(())
    }
}

fn check_root(root: &Path) -> Result<(), ScanError> {
    let metadata = fs::metadata(root).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ScanError::NotFound(root.to_path_buf()),
        std::io::ErrorKind::PermissionDenied => ScanError::PermissionDenied(root.to_path_buf()),
        _ => ScanError::Io {
            path: root.to_path_buf(),
            source: e,
        },
    })?;
    if metadata.is_dir() {
        Ok(())
    } else {
        Err(ScanError::NotADirectory(root.to_path_buf()))
    }
}
