//! Scanner module for candidate discovery and file identities.
//!
//! This module provides functionality for:
//! - Parallel directory walking using jwalk
//! - Video extension filtering
//! - Building [`FileIdentity`] values from live filesystem metadata
//!
//! # Architecture
//!
//! The scanner is divided into submodules:
//! - [`walker`]: Directory traversal and file discovery
//!
//! # Example
//!
//! ```no_run
//! use vidupe::scanner::{Walker, WalkerConfig};
//! use std::path::Path;
//!
//! let walker = Walker::new(Path::new("."), WalkerConfig::default());
//! for entry in walker.walk() {
//!     match entry {
//!         Ok(file) => println!("{}: {} bytes", file.path.display(), file.size),
//!         Err(e) => eprintln!("Warning: {}", e),
//!     }
//! }
//! ```

pub mod walker;

use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub use walker::Walker;

/// Extensions treated as video files when no other list is configured.
pub const DEFAULT_VIDEO_EXTENSIONS: &[&str] =
    &["mp4", "mkv", "avi", "mov", "flv", "wmv", "webm", "m4v"];

/// The (path, size, modification time) triple used as the cache key.
///
/// Two identities are equal only if all three fields match. A change in
/// size or mtime means the content may have changed since it was last
/// fingerprinted.
///
/// Ordering is by path first, which gives the deterministic order used
/// for duplicate groups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileIdentity {
    /// Absolute path to the file
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch
    pub modified_at: i64,
}

impl FileIdentity {
    /// Create an identity from already known facts.
    #[must_use]
    pub fn new(path: PathBuf, size: u64, modified_at: i64) -> Self {
        Self {
            path,
            size,
            modified_at,
        }
    }

    /// Build an identity from the file's current metadata.
    ///
    /// The path is made absolute. Fails if the file does not exist or is
    /// not a regular file.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError`] if metadata cannot be read.
    pub fn from_path(path: &Path) -> Result<Self, ScanError> {
        let absolute = std::path::absolute(path).map_err(|e| ScanError::from_io(path, e))?;
        let metadata = std::fs::metadata(&absolute).map_err(|e| ScanError::from_io(path, e))?;
        if !metadata.is_file() {
            return Err(ScanError::NotAFile(absolute));
        }
        Ok(Self::from_metadata(absolute, &metadata))
    }

    /// Build an identity from metadata the caller already holds.
    #[must_use]
    pub fn from_metadata(path: PathBuf, metadata: &Metadata) -> Self {
        let modified = metadata.modified().unwrap_or(UNIX_EPOCH);
        Self {
            path,
            size: metadata.len(),
            modified_at: system_time_to_nanos(modified),
        }
    }

    /// Lowercased file extension, or an empty string.
    #[must_use]
    pub fn extension(&self) -> String {
        self.path
            .extension()
            .and_then(|s| s.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default()
    }
}

/// Convert a [`SystemTime`] to signed nanoseconds since the Unix epoch.
///
/// Times outside the `i64` range saturate.
#[must_use]
pub fn system_time_to_nanos(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_nanos()).unwrap_or(i64::MAX),
        Err(before) => i64::try_from(before.duration().as_nanos())
            .map(|n| -n)
            .unwrap_or(i64::MIN),
    }
}

/// Configuration for directory walking.
///
/// Controls filtering, symlink handling, and other walk behavior.
#[derive(Debug, Clone)]
pub struct WalkerConfig {
    /// Follow symbolic links during traversal.
    /// Warning: May cause infinite loops with symlink cycles.
    pub follow_symlinks: bool,

    /// Skip hidden files and directories (names starting with `.`).
    pub skip_hidden: bool,

    /// Lowercase extensions (without the dot) that count as video files.
    pub extensions: Vec<String>,

    /// Glob patterns to ignore (gitignore-style).
    pub ignore_patterns: Vec<String>,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            follow_symlinks: false,
            skip_hidden: false,
            extensions: DEFAULT_VIDEO_EXTENSIONS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            ignore_patterns: Vec::new(),
        }
    }
}

impl WalkerConfig {
    /// Check whether a path carries one of the configured extensions.
    #[must_use]
    pub fn matches_extension(&self, path: &Path) -> bool {
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        !extension.is_empty() && self.extensions.iter().any(|e| *e == extension)
    }
}

/// Errors that can occur during directory scanning.
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    /// Permission was denied when accessing a file or directory.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// The specified path was not found.
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    /// The specified path is not a directory.
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// The specified path is not a regular file.
    #[error("Not a regular file: {0}")]
    NotAFile(PathBuf),

    /// An I/O error occurred while accessing a file.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl ScanError {
    pub(crate) fn from_io(path: &Path, error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match error.kind() {
            ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            _ => Self::Io {
                path: path.to_path_buf(),
                source: error,
            },
        }
    }
}
