//! Content fingerprinting for video files.
//!
//! A [`Fingerprint`] combines a BLAKE3 hash over a bounded sample of the
//! file's bytes with structural metadata read from the container header
//! (duration, resolution, codec). Large files are never read in full.
//!
//! # Architecture
//!
//! - [`sampler`]: deterministic head/stride/tail sampling and hashing
//! - [`container`]: lightweight MP4/MOV, Matroska/WebM and AVI header parsing
//!
//! # Example
//!
//! ```no_run
//! use vidupe::fingerprint::{Fingerprinter, SampleConfig};
//! use std::path::Path;
//!
//! let fingerprinter = Fingerprinter::new(SampleConfig::default());
//! let fp = fingerprinter.fingerprint(Path::new("/videos/a.mp4")).unwrap();
//! println!("{} {}x{} {}ms", fp.hash_hex(), fp.width(), fp.height(), fp.duration_ms());
//! ```

pub mod container;
pub mod sampler;

use std::fs::File;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use container::{ContainerKind, MediaInfo};
pub use sampler::{SampleConfig, DEFAULT_SAMPLE_SEGMENTS, DEFAULT_SEGMENT_SIZE};

/// BLAKE3 digest of the sampled content (32 bytes).
pub type Hash = [u8; 32];

/// Convert a hash to a lowercase hexadecimal string.
#[must_use]
pub fn hash_to_hex(hash: &Hash) -> String {
    blake3::Hash::from_bytes(*hash).to_hex().to_string()
}

/// Parse a 64-character hexadecimal string back into a hash.
#[must_use]
pub fn hex_to_hash(hex: &str) -> Option<Hash> {
    blake3::Hash::from_hex(hex).ok().map(|h| *h.as_bytes())
}

/// Compact, immutable summary of a video file's content and structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    content_hash: Hash,
    duration_ms: u64,
    width: u32,
    height: u32,
    codec: String,
    computed_at: i64,
}

impl Fingerprint {
    /// Assemble a fingerprint from its parts.
    #[must_use]
    pub fn new(
        content_hash: Hash,
        duration_ms: u64,
        width: u32,
        height: u32,
        codec: impl Into<String>,
        computed_at: i64,
    ) -> Self {
        Self {
            content_hash,
            duration_ms,
            width,
            height,
            codec: codec.into(),
            computed_at,
        }
    }

    /// Fingerprint with parsed container metadata, stamped with the current time.
    #[must_use]
    pub fn from_media(content_hash: Hash, info: MediaInfo) -> Self {
        Self::new(
            content_hash,
            info.duration_ms,
            info.width,
            info.height,
            info.codec,
            chrono::Utc::now().timestamp(),
        )
    }

    /// Fingerprint for a file whose container metadata could not be parsed.
    ///
    /// Such fingerprints take part in exact matching only.
    #[must_use]
    pub fn content_only(content_hash: Hash) -> Self {
        Self::new(
            content_hash,
            0,
            0,
            0,
            String::new(),
            chrono::Utc::now().timestamp(),
        )
    }

    #[must_use]
    pub fn content_hash(&self) -> &Hash {
        &self.content_hash
    }

    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn codec(&self) -> &str {
        &self.codec
    }

    /// Seconds since the Unix epoch when this fingerprint was computed.
    #[must_use]
    pub fn computed_at(&self) -> i64 {
        self.computed_at
    }

    /// Pixel count (width × height).
    #[must_use]
    pub fn pixels(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Whether duration and dimensions are all known.
    ///
    /// Fingerprints without media info are excluded from near-duplicate
    /// matching.
    #[must_use]
    pub fn has_media_info(&self) -> bool {
        self.duration_ms > 0 && self.width > 0 && self.height > 0
    }

    #[must_use]
    pub fn hash_hex(&self) -> String {
        hash_to_hex(&self.content_hash)
    }
}

/// Errors that can occur while fingerprinting a file.
#[derive(thiserror::Error, Debug)]
pub enum FingerprintError {
    /// The file could not be opened or read.
    #[error("Unreadable file {path}: {source}")]
    UnreadableFile {
        /// Path of the file
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The container was recognised but its structure is cut short or
    /// inconsistent.
    #[error("Truncated media {path}: {reason}")]
    TruncatedMedia {
        /// Path of the file
        path: PathBuf,
        /// What could not be parsed
        reason: String,
    },

    /// The container format is not recognised.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(PathBuf),

    /// A cached content-only fingerprint; the original parse error is not kept.
    #[error("No media metadata for {0} (cached)")]
    MissingMetadata(PathBuf),
}

impl FingerprintError {
    /// Path of the file that failed.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::UnreadableFile { path, .. } | Self::TruncatedMedia { path, .. } => path,
            Self::UnsupportedFormat(path) | Self::MissingMetadata(path) => path,
        }
    }

    /// Whether only the structural metadata failed (the bytes were readable).
    #[must_use]
    pub fn is_metadata_error(&self) -> bool {
        matches!(
            self,
            Self::TruncatedMedia { .. } | Self::UnsupportedFormat(_) | Self::MissingMetadata(_)
        )
    }

    fn unreadable(path: &Path, source: std::io::Error) -> Self {
        Self::UnreadableFile {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result of a lenient fingerprint: metadata failures degrade to a
/// content-only fingerprint instead of failing.
#[derive(Debug)]
pub struct Probed {
    /// The fingerprint (content-only if metadata could not be read)
    pub fingerprint: Fingerprint,
    /// The metadata failure, if any
    pub metadata_error: Option<FingerprintError>,
}

/// Computes fingerprints with a fixed sampling configuration.
#[derive(Debug, Clone, Default)]
pub struct Fingerprinter {
    config: SampleConfig,
}

impl Fingerprinter {
    /// Create a fingerprinter using the given sampling configuration.
    #[must_use]
    pub fn new(config: SampleConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn sample_config(&self) -> &SampleConfig {
        &self.config
    }

    /// Fingerprint a file: sampled content hash plus container metadata.
    ///
    /// # Errors
    ///
    /// - [`FingerprintError::UnreadableFile`] if the file cannot be opened or read
    /// - [`FingerprintError::TruncatedMedia`] if the container structure is broken
    /// - [`FingerprintError::UnsupportedFormat`] if the container is not recognised
    pub fn fingerprint(&self, path: &Path) -> Result<Fingerprint, FingerprintError> {
        let (hash, info) = self.read(path)?;
        Ok(Fingerprint::from_media(hash, info?))
    }

    /// Fingerprint a file, falling back to a content-only fingerprint when
    /// the container metadata cannot be parsed.
    ///
    /// # Errors
    ///
    /// Returns [`FingerprintError::UnreadableFile`] if hashing itself fails.
    pub fn fingerprint_lenient(&self, path: &Path) -> Result<Probed, FingerprintError> {
        let (hash, info) = self.read(path)?;
        Ok(match info {
            Ok(info) => Probed {
                fingerprint: Fingerprint::from_media(hash, info),
                metadata_error: None,
            },
            Err(e) => {
                log::debug!("Metadata unavailable, hashing only: {}", e);
                Probed {
                    fingerprint: Fingerprint::content_only(hash),
                    metadata_error: Some(e),
                }
            }
        })
    }

    /// Compute only the sampled content hash.
    ///
    /// # Errors
    ///
    /// Returns [`FingerprintError::UnreadableFile`] on I/O failure.
    pub fn content_hash(&self, path: &Path) -> Result<Hash, FingerprintError> {
        let mut file = File::open(path).map_err(|e| FingerprintError::unreadable(path, e))?;
        let len = file
            .metadata()
            .map_err(|e| FingerprintError::unreadable(path, e))?
            .len();
        sampler::sample_hash(&mut file, len, &self.config)
            .map_err(|e| FingerprintError::unreadable(path, e))
    }

    /// Hash the file, then probe its container through the same handle.
    fn read(
        &self,
        path: &Path,
    ) -> Result<(Hash, Result<MediaInfo, FingerprintError>), FingerprintError> {
        let mut file = File::open(path).map_err(|e| FingerprintError::unreadable(path, e))?;
        let len = file
            .metadata()
            .map_err(|e| FingerprintError::unreadable(path, e))?
            .len();
        let hash = sampler::sample_hash(&mut file, len, &self.config)
            .map_err(|e| FingerprintError::unreadable(path, e))?;

        let info = container::probe(&mut file, len).map_err(|e| e.into_error(path));
        Ok((hash, info))
    }
}
