//! Index configuration.
//!
//! Settings are layered, later sources overriding earlier ones:
//!
//! 1. Built-in defaults
//! 2. `config.toml` in the platform config directory, or the file given
//!    with `--config`
//! 3. `DUPINDEX_*` environment variables (e.g. `DUPINDEX_HASH_THRESHOLD`)
//! 4. Command-line flags, applied with [`IndexConfig::merge_scan_args`]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::cli::ScanArgs;
use crate::scanner::hasher::{DEFAULT_EXTERNAL_PROGRAM, DEFAULT_HASH_TIMEOUT};
use crate::scanner::{
    ExternalSha1, Hasher, WalkerConfig, DEFAULT_HASH_THRESHOLD, DEFAULT_IGNORED_NAMES,
};

/// Prefix of environment variables read into the configuration.
pub const ENV_PREFIX: &str = "DUPINDEX_";

/// Everything the index and the scanner need to know.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Directory holding the persisted index.
    pub index_dir: PathBuf,
    /// Files of at least this many bytes are hashed by the external program.
    pub hash_threshold: u64,
    /// Directory names never descended into.
    pub ignored_names: Vec<String>,
    /// External SHA-1 program used for large files.
    pub external_hasher: String,
    /// Seconds before an external hash is abandoned.
    pub hash_timeout_secs: u64,
    /// Reload and compare the index after its first save.
    pub verify_on_save: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            index_dir: Self::default_index_dir(),
            hash_threshold: DEFAULT_HASH_THRESHOLD,
            ignored_names: DEFAULT_IGNORED_NAMES
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            external_hasher: DEFAULT_EXTERNAL_PROGRAM.to_string(),
            hash_timeout_secs: DEFAULT_HASH_TIMEOUT.as_secs(),
            verify_on_save: true,
        }
    }
}

impl IndexConfig {
    /// Defaults with the index stored in `index_dir`.
    #[must_use]
    pub fn with_index_dir(index_dir: impl Into<PathBuf>) -> Self {
        Self {
            index_dir: index_dir.into(),
            ..Self::default()
        }
    }

    /// Load from the default config file location plus the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or an environment value does not parse.
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) => Self::load_from_path(&path),
            None => Self::figment(None)
                .extract()
                .context("Invalid configuration"),
        }
    }

    /// Load from `path` plus the environment. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or an environment value does not parse.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if path.exists() {
            log::debug!("Loading configuration from {}", path.display());
        }
        Self::figment(Some(path))
            .extract()
            .with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    /// The layered configuration sources, lowest priority first.
    #[must_use]
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    /// Apply command-line overrides.
    pub fn merge_scan_args(&mut self, args: &ScanArgs) {
        if let Some(ref dir) = args.index_dir {
            self.index_dir.clone_from(dir);
        }
        if let Some(threshold) = args.threshold {
            self.hash_threshold = threshold;
        }
        for name in &args.ignore {
            if !self.ignored_names.contains(name) {
                self.ignored_names.push(name.clone());
            }
        }
        if let Some(timeout) = args.hash_timeout {
            self.hash_timeout_secs = timeout;
        }
        if args.no_verify {
            self.verify_on_save = false;
        }
    }

    /// Write the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Hasher honoring the threshold and external program settings.
    #[must_use]
    pub fn hasher(&self) -> Hasher {
        let external = ExternalSha1::new(
            self.external_hasher.clone(),
            Duration::from_secs(self.hash_timeout_secs),
        );
        Hasher::new(self.hash_threshold, external)
    }

    /// Walker settings for a scan.
    #[must_use]
    pub fn walker_config(&self) -> WalkerConfig {
        WalkerConfig::new(self.ignored_names.clone())
    }

    /// Platform-specific location of `config.toml`.
    #[must_use]
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("org", "dupindex", "dupindex")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Platform-specific data directory for the index, or `.dupindex`.
    #[must_use]
    pub fn default_index_dir() -> PathBuf {
        ProjectDirs::from("org", "dupindex", "dupindex").map_or_else(
            || PathBuf::from(".dupindex"),
            |dirs| dirs.data_dir().join("index"),
        )
    }
}
