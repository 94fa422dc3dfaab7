//! Progress reporting using indicatif.
//!
//! A scan does not know up front how many files it will see, so the
//! [`Progress`] reporter shows a spinner with a running file count, the
//! file being indexed and the number of bytes indexed so far.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use bytesize::ByteSize;
use indicatif::{ProgressBar, ProgressStyle};

/// Receives updates while a scan runs.
pub trait ProgressCallback: Send + Sync {
    /// Called when a phase starts. `total` is 0 when unknown.
    fn on_phase_start(&self, phase: &str, total: usize);

    /// Called for each file processed; `current` is 1-based.
    fn on_progress(&self, current: usize, path: &str);

    /// Called with the size of each file that was indexed.
    fn on_item_completed(&self, _bytes: u64) {}

    /// Called when a phase completes.
    fn on_phase_end(&self, phase: &str);

    /// Called to replace the status message.
    fn on_message(&self, _message: &str) {}
}

/// Terminal spinner for the indexing phase.
pub struct Progress {
    bar: Mutex<Option<ProgressBar>>,
    status: Mutex<String>,
    bytes: AtomicU64,
    quiet: bool,
}

impl Progress {
    /// Create a reporter; a `quiet` one draws nothing.
    ///
    /// ```
    /// use dupindex::progress::Progress;
    ///
    /// let progress = Progress::new(true);
    /// ```
    #[must_use]
    pub fn new(quiet: bool) -> Self {
        Self {
            bar: Mutex::new(None),
            status: Mutex::new(String::new()),
            bytes: AtomicU64::new(0),
            quiet,
        }
    }

    fn style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed_precise}] {pos} files")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
    }

    fn render(&self, path: &str) -> String {
        let bytes = ByteSize(self.bytes.load(Ordering::Relaxed));
        let status = self.status.lock().map(|s| s.clone()).unwrap_or_default();
        let path = truncate_path(path, 40);
        if status.is_empty() {
            format!("{bytes} {path}")
        } else {
            format!("{bytes} ({status}) {path}")
        }
    }
}

impl ProgressCallback for Progress {
    fn on_phase_start(&self, phase: &str, _total: usize) {
        if self.quiet {
            return;
        }
        let bar = ProgressBar::new_spinner();
        bar.set_style(Self::style());
        bar.set_message(phase.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));
        if let Ok(mut slot) = self.bar.lock() {
            *slot = Some(bar);
        }
    }

    fn on_progress(&self, current: usize, path: &str) {
        if self.quiet {
            return;
        }
        let message = self.render(path);
        if let Ok(slot) = self.bar.lock() {
            if let Some(bar) = slot.as_ref() {
                bar.set_position(current as u64);
                bar.set_message(message);
            }
        }
    }

    fn on_item_completed(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn on_phase_end(&self, phase: &str) {
        if self.quiet {
            return;
        }
        if let Some(bar) = self.bar.lock().ok().and_then(|mut slot| slot.take()) {
            let bytes = ByteSize(self.bytes.load(Ordering::Relaxed));
            bar.finish_with_message(format!("{phase} complete, {bytes}"));
        }
    }

    fn on_message(&self, message: &str) {
        if let Ok(mut status) = self.status.lock() {
            *status = message.to_string();
        }
    }
}

/// Shorten a path to its file name when it does not fit.
fn truncate_path(path: &str, max_len: usize) -> String {
    if path.chars().count() <= max_len {
        return path.to_string();
    }

    let file_name = std::path::Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let name_len = file_name.chars().count();
    if name_len + 4 > max_len {
        let tail: String = file_name
            .chars()
            .skip(name_len.saturating_sub(max_len.saturating_sub(3)))
            .collect();
        return format!("...{tail}");
    }

    format!(".../{file_name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_path_unchanged() {
        assert_eq!(truncate_path("/a/b.txt", 40), "/a/b.txt");
    }

    #[test]
    fn test_truncate_keeps_file_name() {
        let path = "/very/long/directory/structure/that/goes/on/file.txt";
        assert_eq!(truncate_path(path, 20), ".../file.txt");
    }

    #[test]
    fn test_truncate_long_file_name() {
        let path = format!("/x/{}", "n".repeat(50));
        let shown = truncate_path(&path, 10);
        assert_eq!(shown, format!("...{}", "n".repeat(7)));
    }

    #[test]
    fn test_quiet_progress_counts_bytes() {
        let progress = Progress::new(true);
        progress.on_phase_start("indexing", 0);
        progress.on_item_completed(1000);
        progress.on_item_completed(24);
        progress.on_progress(2, "/tmp/x");
        progress.on_phase_end("indexing");
        assert_eq!(progress.bytes.load(Ordering::Relaxed), 1024);
    }

    #[test]
    fn test_render_includes_status() {
        let progress = Progress::new(true);
        progress.on_message("3 duplicates");
        let rendered = progress.render("/tmp/file");
        assert!(rendered.contains("(3 duplicates)"));
        assert!(rendered.ends_with("/tmp/file"));
    }
}
