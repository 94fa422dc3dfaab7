//! SHA-1 file hashing with a size-based strategy.
//!
//! # Overview
//!
//! Small files are streamed through an in-process SHA-1 accumulator in
//! [`CHUNK_SIZE`] pieces. Files at or above the configured threshold are
//! handed to an external `sha1sum`-compatible program, which is faster for
//! large inputs. Both methods produce the same lowercase hex digest for the
//! same bytes.
//!
//! # Example
//!
//! ```no_run
//! use dupindex::scanner::Hasher;
//! use std::path::Path;
//!
//! let hasher = Hasher::default();
//! let hash = hasher.hash(Path::new("/etc/hostname"), 12).unwrap();
//! println!("{hash}");
//! ```

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use sha1::{Digest, Sha1};

use super::HashError;

/// Read buffer size for streamed hashing (32 KiB).
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Files of this size and above are hashed by the external program.
pub const DEFAULT_HASH_THRESHOLD: u64 = 60_000;

/// Default external hashing program.
pub const DEFAULT_EXTERNAL_PROGRAM: &str = "sha1sum";

/// Default limit for a single external hash.
pub const DEFAULT_HASH_TIMEOUT: Duration = Duration::from_secs(300);

/// Hashes of files at least this large are timed in the debug log.
const TIMED_HASH_SIZE: u64 = 1_000_000;

/// Upper bound for the child polling interval.
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A 160-bit content digest in lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash(String);

impl ContentHash {
    /// Number of hex characters in a digest.
    pub const HEX_LEN: usize = 40;

    /// Parse a hex digest, accepting either case.
    #[must_use]
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() == Self::HEX_LEN && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(Self(s.to_ascii_lowercase()))
        } else {
            None
        }
    }

    /// The digest as lowercase hex.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_hasher(hasher: Sha1) -> Self {
        Self(format!("{:x}", hasher.finalize()))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s).ok_or_else(|| format!("not a SHA-1 hex digest: '{s}'"))
    }
}

/// A way of turning a file's content into a [`ContentHash`].
pub trait HashMethod: Send + Sync {
    /// Short name used in log messages.
    fn name(&self) -> &str;

    /// Hash the full content of the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] if the file cannot be opened or read, or the
    /// digest cannot be produced.
    fn hash_file(&self, path: &Path) -> Result<ContentHash, HashError>;
}

/// In-process SHA-1, streamed in [`CHUNK_SIZE`] chunks.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamingSha1;

impl StreamingSha1 {
    /// Hash everything readable from `reader`.
    ///
    /// # Errors
    ///
    /// Propagates read errors other than `Interrupted`.
    pub fn hash_reader<R: Read>(&self, mut reader: R) -> io::Result<ContentHash> {
        let mut hasher = Sha1::new();
        let mut buffer = vec![0u8; CHUNK_SIZE];
        loop {
            match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => hasher.update(&buffer[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(ContentHash::from_hasher(hasher))
    }
}

impl HashMethod for StreamingSha1 {
    fn name(&self) -> &str {
        "streaming"
    }

    fn hash_file(&self, path: &Path) -> Result<ContentHash, HashError> {
        let file = File::open(path).map_err(|e| HashError::from_io(path, e))?;
        self.hash_reader(file)
            .map_err(|e| HashError::from_io(path, e))
    }
}

/// SHA-1 computed by an external `sha1sum`-compatible program.
///
/// The first whitespace-delimited token of the program's stdout is taken as
/// the digest.
#[derive(Debug, Clone)]
pub struct ExternalSha1 {
    program: String,
    timeout: Duration,
}

impl Default for ExternalSha1 {
    fn default() -> Self {
        Self::new(DEFAULT_EXTERNAL_PROGRAM, DEFAULT_HASH_TIMEOUT)
    }
}

impl ExternalSha1 {
    /// Create a method running `program` with a per-file `timeout`.
    #[must_use]
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// The configured program.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Check whether the program can be run at all.
    #[must_use]
    pub fn is_available(&self) -> bool {
        Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|status| status.success())
    }

    /// Extract the digest from the program's stdout.
    ///
    /// `sha1sum` prefixes the line with `\` when the file name needed
    /// escaping; that marker is not part of the digest.
    fn parse_output(&self, path: &Path, stdout: &str) -> Result<ContentHash, HashError> {
        let token = stdout.split_whitespace().next().unwrap_or_default();
        let token = token.strip_prefix('\\').unwrap_or(token);
        ContentHash::from_hex(token).ok_or_else(|| HashError::External {
            program: self.program.clone(),
            path: path.to_path_buf(),
            reason: format!("unexpected output '{}'", stdout.trim()),
        })
    }
}

impl HashMethod for ExternalSha1 {
    fn name(&self) -> &str {
        &self.program
    }

    fn hash_file(&self, path: &Path) -> Result<ContentHash, HashError> {
        // Report unreadable files with the same kinds the streaming method uses.
        drop(File::open(path).map_err(|e| HashError::from_io(path, e))?);

        let mut child = Command::new(&self.program)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| HashError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let deadline = Instant::now() + self.timeout;
        let mut interval = Duration::from_millis(1);
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(HashError::Timeout {
                        path: path.to_path_buf(),
                        seconds: self.timeout.as_secs(),
                    });
                }
                Ok(None) => {
                    std::thread::sleep(interval);
                    interval = (interval * 2).min(MAX_POLL_INTERVAL);
                }
                Err(source) => {
                    let _ = child.kill();
                    return Err(HashError::Io {
                        path: path.to_path_buf(),
                        source,
                    });
                }
            }
        };

        let mut stdout = String::new();
        if let Some(mut out) = child.stdout.take() {
            out.read_to_string(&mut stdout).map_err(|source| HashError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }

        if !status.success() {
            let mut stderr = String::new();
            if let Some(mut err) = child.stderr.take() {
                let _ = err.read_to_string(&mut stderr);
            }
            return Err(HashError::External {
                program: self.program.clone(),
                path: path.to_path_buf(),
                reason: format!("{status}: {}", stderr.trim()),
            });
        }

        self.parse_output(path, &stdout)
    }
}

/// Which hashing method a file of a given size gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashStrategy {
    /// In-process streaming hash
    Streaming,
    /// External program
    External,
}

/// Pick the hashing method for a file of `size` bytes.
#[must_use]
pub fn select_strategy(size: u64, threshold: u64) -> HashStrategy {
    if size < threshold {
        HashStrategy::Streaming
    } else {
        HashStrategy::External
    }
}

/// Size-aware hasher combining both methods.
///
/// If the external program cannot be started at all, large files fall back
/// to the streaming method for the rest of the process; the digest is the
/// same either way.
#[derive(Debug)]
pub struct Hasher {
    threshold: u64,
    streaming: StreamingSha1,
    external: ExternalSha1,
    external_unavailable: AtomicBool,
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_THRESHOLD, ExternalSha1::default())
    }
}

impl Hasher {
    /// Create a hasher switching to `external` at `threshold` bytes.
    #[must_use]
    pub fn new(threshold: u64, external: ExternalSha1) -> Self {
        Self {
            threshold,
            streaming: StreamingSha1,
            external,
            external_unavailable: AtomicBool::new(false),
        }
    }

    /// The size at which the external program takes over.
    #[must_use]
    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Hash the file at `path`, whose size is `size`.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] if the file cannot be read or the external
    /// program fails or times out.
    pub fn hash(&self, path: &Path, size: u64) -> Result<ContentHash, HashError> {
        let start = Instant::now();
        let (hash, method) = match select_strategy(size, self.threshold) {
            HashStrategy::Streaming => (self.streaming.hash_file(path)?, self.streaming.name()),
            HashStrategy::External => (self.hash_external(path)?, self.external.name()),
        };

        if size >= TIMED_HASH_SIZE {
            let elapsed = start.elapsed();
            let mb_per_s = size as f64 / 1_000_000.0 / elapsed.as_secs_f64().max(1e-6);
            log::debug!(
                "#={} ({}), {} bytes, {:.1}ms, {:.1}MB/s, {}",
                hash,
                method,
                size,
                elapsed.as_secs_f64() * 1000.0,
                mb_per_s,
                path.display()
            );
        }
        Ok(hash)
    }

    fn hash_external(&self, path: &Path) -> Result<ContentHash, HashError> {
        if self.external_unavailable.load(Ordering::Relaxed) {
            return self.streaming.hash_file(path);
        }
        match self.external.hash_file(path) {
            Err(HashError::Spawn { program, source }) => {
                if !self.external_unavailable.swap(true, Ordering::Relaxed) {
                    log::warn!(
                        "Cannot run {}: {}; hashing large files in-process",
                        program,
                        source
                    );
                }
                self.streaming.hash_file(path)
            }
            other => other,
        }
    }
}
