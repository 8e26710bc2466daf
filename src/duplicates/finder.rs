//! Duplicate finder pipeline.
//!
//! # Overview
//!
//! This module orchestrates the duplicate detection pipeline:
//! 1. **Walk**: collect candidate videos from the roots (see [`crate::scanner`])
//! 2. **Fingerprint**: per file, consult the cache and fingerprint on a miss,
//!    in parallel on a bounded worker pool
//! 3. **Flush**: persist the cache, also when the batch was interrupted
//! 4. **Group**: exact and near-duplicate grouping over the complete snapshot
//!    (see [`crate::duplicates::groups`])
//! 5. **Resolve**: pick a keeper per group (see [`crate::duplicates::policy`])
//!
//! A single file's failure never aborts the batch: unreadable files are
//! recorded and excluded, files whose container cannot be parsed are kept
//! with a content-only fingerprint.
//!
//! # Example
//!
//! ```no_run
//! use vidupe::cache::FingerprintCache;
//! use vidupe::duplicates::{DuplicateFinder, FinderConfig};
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! let cache = Arc::new(FingerprintCache::open(&PathBuf::from("/tmp/fingerprints.db")).unwrap());
//! let config = FinderConfig::default().with_workers(4).with_cache(cache);
//! let finder = DuplicateFinder::new(config);
//!
//! let (groups, summary) = finder
//!     .find_duplicates_in_paths(&[PathBuf::from("/videos")])
//!     .unwrap();
//! println!("{} groups, {} reclaimable", groups.len(), summary.reclaimable_display());
//! ```

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;

use super::groups::{group, group_key, DuplicateGroup, MatchKind, DEFAULT_TOLERANCE_MS};
use super::policy::resolve_all;
use crate::cache::FingerprintCache;
use crate::fingerprint::{Fingerprint, FingerprintError, Fingerprinter, SampleConfig};
use crate::progress::ProgressCallback;
use crate::scanner::{walker::collect_candidates, FileIdentity, ScanError, WalkerConfig};

/// Worker count used when the platform cannot report its parallelism.
const FALLBACK_WORKERS: usize = 4;

/// Default worker pool size: the available parallelism of the machine.
#[must_use]
pub fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(FALLBACK_WORKERS, NonZeroUsize::get)
}

/// Configuration for the duplicate finder.
#[derive(Clone)]
pub struct FinderConfig {
    /// Number of worker threads for fingerprinting.
    pub workers: usize,
    /// Maximum duration difference for near-duplicates, in milliseconds.
    pub tolerance_ms: u64,
    /// Content sampling parameters.
    pub sample_config: SampleConfig,
    /// Optional fingerprint cache for faster rescans.
    pub cache: Option<Arc<FingerprintCache>>,
    /// Walker configuration for directory traversal.
    pub walker_config: WalkerConfig,
    /// Optional shutdown flag for graceful termination.
    pub shutdown_flag: Option<Arc<AtomicBool>>,
    /// Optional progress callback for reporting.
    pub progress_callback: Option<Arc<dyn ProgressCallback>>,
}

impl std::fmt::Debug for FinderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinderConfig")
            .field("workers", &self.workers)
            .field("tolerance_ms", &self.tolerance_ms)
            .field("sample_config", &self.sample_config)
            .field("cache", &self.cache.as_ref().map(|_| "<cache>"))
            .field("walker_config", &self.walker_config)
            .field("shutdown_flag", &self.shutdown_flag)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            tolerance_ms: DEFAULT_TOLERANCE_MS,
            sample_config: SampleConfig::default(),
            cache: None,
            walker_config: WalkerConfig::default(),
            shutdown_flag: None,
            progress_callback: None,
        }
    }
}

impl FinderConfig {
    /// Set the worker pool size (at least one).
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the near-duplicate duration tolerance.
    #[must_use]
    pub fn with_tolerance_ms(mut self, tolerance_ms: u64) -> Self {
        self.tolerance_ms = tolerance_ms;
        self
    }

    /// Set the content sampling parameters.
    #[must_use]
    pub fn with_sample_config(mut self, config: SampleConfig) -> Self {
        self.sample_config = config;
        self
    }

    /// Set the fingerprint cache.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<FingerprintCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Set the walker configuration.
    #[must_use]
    pub fn with_walker_config(mut self, config: WalkerConfig) -> Self {
        self.walker_config = config;
        self
    }

    /// Set the shutdown flag for graceful termination.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Set the progress callback.
    #[must_use]
    pub fn with_progress_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Check if shutdown has been requested.
    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }
}

/// A file that could not be fingerprinted (or only partially).
#[derive(Debug)]
pub struct FileFailure {
    /// Path of the file
    pub path: PathBuf,
    /// What went wrong
    pub error: FingerprintError,
}

/// Outcome of fingerprinting a batch of files.
#[derive(Debug, Default)]
pub struct FingerprintBatch {
    /// Fingerprint of every file that could be hashed
    pub fingerprints: HashMap<FileIdentity, Fingerprint>,
    /// Files skipped because they could not be read
    pub failures: Vec<FileFailure>,
    /// Files kept with a content-only fingerprint
    pub metadata_failures: Vec<FileFailure>,
    /// Fingerprints served from the cache
    pub cache_hits: usize,
    /// Fingerprints computed because the cache had no valid entry
    pub cache_misses: usize,
    /// Files not started because shutdown was requested
    pub skipped: usize,
    /// Whether shutdown left any file unprocessed
    pub interrupted: bool,
}

/// Per-file result inside the worker pool.
enum Outcome {
    Cached(Fingerprint),
    Computed(Fingerprint, Option<FingerprintError>),
    Failed(FingerprintError),
    Skipped,
}

/// Summary statistics from a duplicate scan.
#[derive(Debug, Default)]
pub struct ScanSummary {
    /// Total number of candidate files
    pub total_files: usize,
    /// Total size of all candidate files in bytes
    pub total_size: u64,
    /// Files with a fingerprint (cached or computed)
    pub fingerprinted_files: usize,
    /// Number of cache hits
    pub cache_hits: usize,
    /// Number of cache misses
    pub cache_misses: usize,
    /// Files skipped because they could not be read
    pub failed_files: usize,
    /// Files whose container metadata could not be parsed
    pub metadata_failures: usize,
    /// Files not processed because of shutdown
    pub skipped_files: usize,
    /// Number of duplicate groups reported
    pub duplicate_groups: usize,
    /// Of which exact matches
    pub exact_groups: usize,
    /// Of which near-duplicates
    pub near_duplicate_groups: usize,
    /// Groups hidden because the user chose to ignore them
    pub ignored_groups: usize,
    /// Total number of non-keeper files in reported groups
    pub duplicate_files: usize,
    /// Total space that can be reclaimed by removing non-keepers
    pub reclaimable_space: u64,
    /// Number of entries persisted to the cache, if it was flushed
    pub cache_entries_written: Option<usize>,
    /// Whether persisting the cache failed
    pub cache_write_failed: bool,
    /// Duration of the entire scan
    pub scan_duration: Duration,
    /// Whether the scan was interrupted
    pub interrupted: bool,
    /// Errors encountered while walking
    pub scan_errors: Vec<ScanError>,
    /// Files that failed to fingerprint or lost their metadata
    pub file_failures: Vec<FileFailure>,
}

impl ScanSummary {
    /// Calculate the percentage of space that is wasted by duplicates.
    #[must_use]
    pub fn wasted_percentage(&self) -> f64 {
        if self.total_size == 0 {
            0.0
        } else {
            (self.reclaimable_space as f64 / self.total_size as f64) * 100.0
        }
    }

    /// Format reclaimable space as human-readable string.
    #[must_use]
    pub fn reclaimable_display(&self) -> String {
        format_size(self.reclaimable_space)
    }

    /// Format total size as human-readable string.
    #[must_use]
    pub fn total_size_display(&self) -> String {
        format_size(self.total_size)
    }

    /// Whether some files or directories could not be processed.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.failed_files > 0 || !self.scan_errors.is_empty()
    }
}

/// Format a byte size as a human-readable string.
fn format_size(bytes: u64) -> String {
    bytesize::ByteSize(bytes).to_string()
}

/// Errors that can occur during duplicate finding.
#[derive(thiserror::Error, Debug)]
pub enum FinderError {
    /// The scan was interrupted by user (Ctrl+C or shutdown signal).
    #[error("Scan interrupted by user")]
    Interrupted,

    /// The provided path does not exist.
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// The provided path is not a directory.
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// A scan error occurred.
    #[error(transparent)]
    ScanError(#[from] ScanError),
}

/// Duplicate finder that runs the fingerprint, group and resolve pipeline.
pub struct DuplicateFinder {
    config: FinderConfig,
    fingerprinter: Fingerprinter,
}

impl DuplicateFinder {
    /// Create a new duplicate finder with the given configuration.
    #[must_use]
    pub fn new(config: FinderConfig) -> Self {
        let fingerprinter = Fingerprinter::new(config.sample_config);
        Self {
            config,
            fingerprinter,
        }
    }

    /// Create a new duplicate finder with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(FinderConfig::default())
    }

    #[must_use]
    pub fn config(&self) -> &FinderConfig {
        &self.config
    }

    /// Walk the roots and find duplicate videos.
    ///
    /// # Errors
    ///
    /// - [`FinderError::PathNotFound`] / [`FinderError::NotADirectory`] if no
    ///   root can be walked at all
    /// - [`FinderError::Interrupted`] if shutdown was requested
    pub fn find_duplicates_in_paths(
        &self,
        roots: &[PathBuf],
    ) -> Result<(Vec<DuplicateGroup>, ScanSummary), FinderError> {
        if roots.is_empty() {
            log::warn!("No paths provided for scanning");
            return Ok((Vec::new(), ScanSummary::default()));
        }
        if let Some(first) = roots.first().filter(|_| roots.iter().all(|r| !r.is_dir())) {
            return Err(if first.exists() {
                FinderError::NotADirectory(first.clone())
            } else {
                FinderError::PathNotFound(first.clone())
            });
        }
        if self.config.is_shutdown_requested() {
            return Err(FinderError::Interrupted);
        }

        if let Some(ref callback) = self.config.progress_callback {
            callback.on_phase_start("walking", 0);
            callback.on_message(&format!("Walking {} directories", roots.len()));
        }
        let (files, scan_errors) = collect_candidates(
            roots,
            &self.config.walker_config,
            self.config.shutdown_flag.clone(),
        );
        if let Some(ref callback) = self.config.progress_callback {
            callback.on_phase_end("walking");
        }
        if self.config.is_shutdown_requested() {
            return Err(FinderError::Interrupted);
        }

        let (groups, mut summary) = self.find_duplicates_from_files(files)?;
        summary.scan_errors = scan_errors;
        Ok((groups, summary))
    }

    /// Find duplicates among an already collected candidate list.
    ///
    /// The cache (if any) is flushed after fingerprinting, including when
    /// the batch was interrupted.
    ///
    /// # Errors
    ///
    /// Returns [`FinderError::Interrupted`] if shutdown was requested.
    pub fn find_duplicates_from_files(
        &self,
        files: Vec<FileIdentity>,
    ) -> Result<(Vec<DuplicateGroup>, ScanSummary), FinderError> {
        let start_time = Instant::now();
        let mut summary = ScanSummary {
            total_files: files.len(),
            total_size: files.iter().map(|f| f.size).sum(),
            ..ScanSummary::default()
        };

        let batch = self.fingerprint_batch(&files);
        self.flush_cache(&mut summary);

        if batch.interrupted {
            log::info!(
                "Interrupted after {} file(s), {} not started",
                batch.fingerprints.len(),
                batch.skipped
            );
            return Err(FinderError::Interrupted);
        }

        let groups = resolve_all(
            &group(&files, &batch.fingerprints, self.config.tolerance_ms),
            &batch.fingerprints,
        );
        let groups = self.without_ignored(groups, &batch.fingerprints, &mut summary);

        summary.fingerprinted_files = batch.fingerprints.len();
        summary.cache_hits = batch.cache_hits;
        summary.cache_misses = batch.cache_misses;
        summary.failed_files = batch.failures.len();
        summary.metadata_failures = batch.metadata_failures.len();
        summary.skipped_files = batch.skipped;
        summary.duplicate_groups = groups.len();
        summary.exact_groups = groups
            .iter()
            .filter(|g| g.match_kind() == MatchKind::Exact)
            .count();
        summary.near_duplicate_groups = summary.duplicate_groups - summary.exact_groups;
        summary.duplicate_files = groups.iter().map(|g| g.len() - 1).sum();
        summary.reclaimable_space = groups.iter().map(DuplicateGroup::reclaimable_space).sum();
        summary.file_failures = batch
            .failures
            .into_iter()
            .chain(batch.metadata_failures)
            .collect();
        summary.scan_duration = start_time.elapsed();

        log::info!(
            "Found {} duplicate group(s) ({} exact, {} near-duplicate), {} reclaimable",
            summary.duplicate_groups,
            summary.exact_groups,
            summary.near_duplicate_groups,
            summary.reclaimable_display()
        );
        Ok((groups, summary))
    }

    /// Fingerprint every file, consulting the cache first.
    ///
    /// Files are processed in parallel on a pool of `workers` threads. The
    /// shutdown flag is checked before each file; files not started are
    /// counted as skipped.
    #[must_use]
    pub fn fingerprint_batch(&self, files: &[FileIdentity]) -> FingerprintBatch {
        let mut batch = FingerprintBatch::default();
        if files.is_empty() {
            log::debug!("No files to fingerprint");
            return batch;
        }

        if let Some(ref callback) = self.config.progress_callback {
            callback.on_phase_start("fingerprint", files.len());
        }
        log::info!(
            "Fingerprinting {} file(s) with {} worker(s)",
            files.len(),
            self.config.workers
        );

        let done = AtomicUsize::new(0);
        let run = || -> Vec<Outcome> {
            files
                .par_iter()
                .map(|file| {
                    let outcome = self.process_file(file);
                    if !matches!(outcome, Outcome::Skipped) {
                        if let Some(ref callback) = self.config.progress_callback {
                            let current = done.fetch_add(1, Ordering::SeqCst) + 1;
                            callback.on_progress(current, file.path.to_string_lossy().as_ref());
                            callback.on_item_completed(file.size);
                        }
                    }
                    outcome
                })
                .collect()
        };
        let outcomes = match rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .build()
        {
            Ok(pool) => pool.install(run),
            Err(e) => {
                log::warn!(
                    "Failed to create worker pool ({}), using global pool with {} threads",
                    e,
                    rayon::current_num_threads()
                );
                run()
            }
        };

        for (file, outcome) in files.iter().zip(outcomes) {
            match outcome {
                Outcome::Cached(fp) => {
                    batch.cache_hits += 1;
                    if !fp.has_media_info() {
                        batch.metadata_failures.push(FileFailure {
                            path: file.path.clone(),
                            error: FingerprintError::MissingMetadata(file.path.clone()),
                        });
                    }
                    batch.fingerprints.insert(file.clone(), fp);
                }
                Outcome::Computed(fp, metadata_error) => {
                    batch.cache_misses += 1;
                    if let Some(error) = metadata_error {
                        batch.metadata_failures.push(FileFailure {
                            path: file.path.clone(),
                            error,
                        });
                    }
                    batch.fingerprints.insert(file.clone(), fp);
                }
                Outcome::Failed(error) => batch.failures.push(FileFailure {
                    path: file.path.clone(),
                    error,
                }),
                Outcome::Skipped => batch.skipped += 1,
            }
        }
        // Only files left unstarted make the batch incomplete.
        batch.interrupted = batch.skipped > 0;

        if let Some(ref callback) = self.config.progress_callback {
            callback.on_phase_end("fingerprint");
        }
        log::info!(
            "Fingerprinting complete: {} cached, {} computed, {} failed, {} skipped",
            batch.cache_hits,
            batch.cache_misses,
            batch.failures.len(),
            batch.skipped
        );
        batch
    }

    fn process_file(&self, file: &FileIdentity) -> Outcome {
        if self.config.is_shutdown_requested() {
            return Outcome::Skipped;
        }

        if let Some(ref cache) = self.config.cache {
            if let Some(fp) = cache.lookup(file) {
                return Outcome::Cached(fp);
            }
            log::trace!("Cache miss: {}", file.path.display());
        }

        match self.fingerprinter.fingerprint_lenient(&file.path) {
            Ok(probed) => {
                if let Some(ref cache) = self.config.cache {
                    cache.store(file.clone(), probed.fingerprint.clone());
                }
                if let Some(ref e) = probed.metadata_error {
                    log::warn!("{}; matching by content only", e);
                }
                Outcome::Computed(probed.fingerprint, probed.metadata_error)
            }
            Err(e) => {
                log::warn!("Skipping {}", e);
                Outcome::Failed(e)
            }
        }
    }

    /// Flush the cache if one is configured. Failure is logged, not fatal.
    fn flush_cache(&self, summary: &mut ScanSummary) {
        let Some(ref cache) = self.config.cache else {
            return;
        };
        match cache.flush() {
            Ok(written) => summary.cache_entries_written = Some(written),
            Err(e) => {
                log::warn!("Fingerprints will not be reused next run: {}", e);
                summary.cache_write_failed = true;
            }
        }
    }

    /// Drop groups the user marked as ignored in the cache.
    fn without_ignored(
        &self,
        groups: Vec<DuplicateGroup>,
        fingerprints: &HashMap<FileIdentity, Fingerprint>,
        summary: &mut ScanSummary,
    ) -> Vec<DuplicateGroup> {
        let Some(ref cache) = self.config.cache else {
            return groups;
        };
        groups
            .into_iter()
            .filter(|g| {
                let ignored = group_key(g, fingerprints).is_some_and(|key| cache.is_group_ignored(&key));
                if ignored {
                    summary.ignored_groups += 1;
                    log::debug!("Hiding ignored group of {} files", g.len());
                }
                !ignored
            })
            .collect()
    }
}
