//! Layered configuration.
//!
//! Values are merged with `figment` in increasing priority:
//!
//! 1. Built-in defaults ([`Config::default`])
//! 2. `config.toml` in the platform config directory
//!    (e.g. `~/.config/vidupe/config.toml` on Linux)
//! 3. `VIDUPE_*` environment variables (`__` separates nested keys)
//!
//! Root directories may also be given on the command line; see
//! [`Config::with_roots`].

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::duplicates::{default_workers, FinderConfig, DEFAULT_TOLERANCE_MS};
use crate::fingerprint::sampler::{SampleConfig, DEFAULT_SAMPLE_SEGMENTS, DEFAULT_SEGMENT_SIZE};
use crate::scanner::{WalkerConfig, DEFAULT_VIDEO_EXTENSIONS};

/// Prefix of the environment variables read by [`Config::load`].
pub const ENV_PREFIX: &str = "VIDUPE_";

/// File name of the fingerprint database inside the cache directory.
pub const CACHE_FILE_NAME: &str = "fingerprints.db";

/// Errors raised while loading or validating configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// A provider could not be read or a value had the wrong type.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] figment::Error),

    /// A value was well-formed but out of range.
    #[error("Invalid configuration value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },

    /// The configuration file could not be written.
    #[error("Failed to write configuration to {path}: {reason}")]
    Write { path: PathBuf, reason: String },
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum duration difference for near-duplicates, in milliseconds.
    pub near_duplicate_tolerance_ms: u64,
    /// Fingerprinting worker threads.
    pub workers: usize,
    /// Segments sampled per file for the content hash.
    pub sample_segments: usize,
    /// Bytes per sampled segment.
    pub segment_size: u64,
    /// Fingerprint database location; `None` uses the platform cache dir.
    pub cache_path: Option<PathBuf>,
    /// Persist fingerprints between runs.
    pub use_cache: bool,
    /// Drop cached fingerprints older than this many days.
    pub cache_max_age_days: Option<u64>,
    /// Extensions (without the dot) treated as videos.
    pub video_extensions: Vec<String>,
    pub skip_hidden: bool,
    pub follow_symlinks: bool,
    /// Gitignore-style patterns excluded from the walk.
    pub ignore_patterns: Vec<String>,
    /// 0 = info, 1 = debug, 2+ = trace.
    pub verbose: u8,
    /// Errors only, no progress bars.
    pub quiet: bool,
    /// Report fatal errors as JSON on stderr.
    pub json_errors: bool,
    /// Directories to scan.
    pub roots: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            near_duplicate_tolerance_ms: DEFAULT_TOLERANCE_MS,
            workers: default_workers(),
            sample_segments: DEFAULT_SAMPLE_SEGMENTS,
            segment_size: DEFAULT_SEGMENT_SIZE,
            cache_path: None,
            use_cache: true,
            cache_max_age_days: None,
            video_extensions: DEFAULT_VIDEO_EXTENSIONS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            skip_hidden: false,
            follow_symlinks: false,
            ignore_patterns: Vec::new(),
            verbose: 0,
            quiet: false,
            json_errors: false,
            roots: Vec::new(),
        }
    }
}

impl Config {
    /// Load defaults, the user config file and `VIDUPE_*` variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if the file is malformed or a value has
    /// the wrong type. A missing file is not an error.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(default_config_path().as_deref())
    }

    /// Like [`Config::load`] with an explicit config file.
    ///
    /// # Errors
    ///
    /// See [`Config::load`].
    pub fn load_from(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let config: Self = Self::figment(config_file).extract()?;
        log::debug!(
            "Configuration loaded (file: {})",
            config_file.map_or_else(|| "none".to_string(), |p| p.display().to_string())
        );
        Ok(config)
    }

    /// The merged provider stack used by [`Config::load_from`].
    #[must_use]
    pub fn figment(config_file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = config_file {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Replace the configured roots when any are given.
    #[must_use]
    pub fn with_roots(mut self, roots: Vec<PathBuf>) -> Self {
        if !roots.is_empty() {
            self.roots = roots;
        }
        self
    }

    /// Check value ranges. Run once at startup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid {
                field: "workers",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.sample_segments < 2 {
            return Err(ConfigError::Invalid {
                field: "sample_segments",
                reason: format!("must be at least 2, got {}", self.sample_segments),
            });
        }
        if self.segment_size == 0 {
            return Err(ConfigError::Invalid {
                field: "segment_size",
                reason: "must be at least 1 byte".to_string(),
            });
        }
        if self.walker_config().extensions.is_empty() {
            return Err(ConfigError::Invalid {
                field: "video_extensions",
                reason: "at least one extension is required".to_string(),
            });
        }
        Ok(())
    }

    /// Where the fingerprint database lives, if caching is enabled.
    #[must_use]
    pub fn resolved_cache_path(&self) -> Option<PathBuf> {
        if !self.use_cache {
            return None;
        }
        self.cache_path.clone().or_else(default_cache_path)
    }

    /// Walk settings; extensions are lowercased and stripped of dots.
    #[must_use]
    pub fn walker_config(&self) -> WalkerConfig {
        let mut extensions: Vec<String> = self
            .video_extensions
            .iter()
            .map(|e| e.trim().trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        extensions.sort();
        extensions.dedup();

        WalkerConfig {
            follow_symlinks: self.follow_symlinks,
            skip_hidden: self.skip_hidden,
            extensions,
            ignore_patterns: self.ignore_patterns.clone(),
        }
    }

    #[must_use]
    pub fn sample_config(&self) -> SampleConfig {
        SampleConfig::new(self.sample_segments, self.segment_size)
    }

    /// Finder settings without cache, shutdown flag or progress callback.
    #[must_use]
    pub fn finder_config(&self) -> FinderConfig {
        FinderConfig::default()
            .with_workers(self.workers)
            .with_tolerance_ms(self.near_duplicate_tolerance_ms)
            .with_sample_config(self.sample_config())
            .with_walker_config(self.walker_config())
    }

    /// Write the configuration as TOML, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Write`] if serialization or the write fails.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_error = |reason: String| ConfigError::Write {
            path: path.to_path_buf(),
            reason,
        };
        let content = toml::to_string_pretty(self).map_err(|e| write_error(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| write_error(e.to_string()))?;
        }
        std::fs::write(path, content).map_err(|e| write_error(e.to_string()))?;
        log::debug!("Configuration written to {}", path.display());
        Ok(())
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "vidupe", "vidupe")
}

/// Platform location of `config.toml`.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Platform location of the fingerprint database.
#[must_use]
pub fn default_cache_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.cache_dir().join(CACHE_FILE_NAME))
}
