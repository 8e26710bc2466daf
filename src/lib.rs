//! vidupe - Duplicate Video Finder
//!
//! Finds duplicate and near-duplicate videos under a set of directories,
//! picks a keeper for each group and reports proposed dispositions as JSON.
//! Fingerprints are cached in SQLite, keyed by path, size and modification
//! time, so unchanged files are not read again on the next run.
//!
//! Nothing in this crate deletes or modifies the scanned files.

pub mod cache;
pub mod config;
pub mod duplicates;
pub mod error;
pub mod fingerprint;
pub mod logging;
pub mod output;
pub mod progress;
pub mod scanner;
pub mod signal;

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::cache::FingerprintCache;
use crate::config::Config;
use crate::duplicates::{group_key, DuplicateFinder, DuplicateGroup};
use crate::error::ExitCode;
use crate::output::JsonOutput;
use crate::progress::{Progress, ProgressCallback};
use crate::signal::ShutdownHandler;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Run a scan and print the JSON report to stdout.
///
/// # Errors
///
/// Fails on invalid configuration, when no root can be scanned, when the
/// scan is interrupted, or when the report cannot be written.
pub fn run_app(config: Config, shutdown: &ShutdownHandler) -> Result<ExitCode> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    run_with_output(config, shutdown, &mut out)
}

/// Like [`run_app`], writing the report to `out`.
///
/// # Errors
///
/// See [`run_app`].
pub fn run_with_output<W: Write>(
    config: Config,
    shutdown: &ShutdownHandler,
    out: &mut W,
) -> Result<ExitCode> {
    config.validate().context("Invalid configuration")?;
    if config.roots.is_empty() {
        bail!("No directories to scan: pass them as arguments or set `roots` in config.toml");
    }

    let cache = open_cache(&config);
    if let Some(ref cache) = cache {
        maintain_cache(cache, &config);
    }

    let progress: Arc<dyn ProgressCallback> = Arc::new(Progress::new(config.quiet));
    let mut finder_config = config
        .finder_config()
        .with_shutdown_flag(shutdown.get_flag())
        .with_progress_callback(progress);
    if let Some(ref cache) = cache {
        finder_config = finder_config.with_cache(Arc::clone(cache));
    }

    log::info!(
        "Scanning {} root(s): {}",
        config.roots.len(),
        config
            .roots
            .iter()
            .map(|r| r.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    let finder = DuplicateFinder::new(finder_config);
    let (groups, summary) = finder
        .find_duplicates_in_paths(&config.roots)
        .context("Scan failed")?;

    let exit_code = if summary.has_errors() {
        ExitCode::PartialSuccess
    } else if groups.is_empty() {
        ExitCode::NoDuplicates
    } else {
        ExitCode::Success
    };

    let keys = group_keys(cache.as_deref(), &groups);
    JsonOutput::new(&groups, &keys, &summary, exit_code)
        .write_to(out, true)
        .context("Failed to write report")?;

    log::info!(
        "{} file(s), {} duplicate group(s), {} of {} reclaimable ({:.1}%) in {:.2?}",
        summary.total_files,
        summary.duplicate_groups,
        summary.reclaimable_display(),
        summary.total_size_display(),
        summary.wasted_percentage(),
        summary.scan_duration
    );
    Ok(exit_code)
}

/// Open the persistent cache, falling back to an in-memory one.
///
/// Returns `None` only when caching is disabled or no cache can be created.
fn open_cache(config: &Config) -> Option<Arc<FingerprintCache>> {
    if !config.use_cache {
        log::debug!("Fingerprint cache disabled");
        return None;
    }

    let persistent = match config.resolved_cache_path() {
        Some(path) => match FingerprintCache::open(&path) {
            Ok(cache) => Some(cache),
            Err(e) => {
                log::warn!(
                    "Cannot open fingerprint cache at {}: {}; results will not be reused",
                    path.display(),
                    e
                );
                None
            }
        },
        None => {
            log::warn!("No cache directory available; results will not be reused");
            None
        }
    };

    let cache = match persistent {
        Some(cache) => cache,
        None => match FingerprintCache::in_memory() {
            Ok(cache) => cache,
            Err(e) => {
                log::warn!("Running without a fingerprint cache: {}", e);
                return None;
            }
        },
    };

    if cache.recovered_from_corruption() {
        log::warn!("Fingerprint cache was unreadable and has been reset");
    }
    log::debug!(
        "Fingerprint cache ready ({} entries, {} ignored groups)",
        cache.len(),
        cache.ignored_groups().len()
    );
    Some(Arc::new(cache))
}

/// Drop expired entries and entries for files that no longer exist.
///
/// Changes reach disk with the flush that follows the scan.
fn maintain_cache(cache: &FingerprintCache, config: &Config) {
    if let Some(days) = config.cache_max_age_days {
        let max_age = Duration::from_secs(days.saturating_mul(SECONDS_PER_DAY));
        let removed = cache.prune_expired(max_age, chrono::Utc::now().timestamp());
        if removed > 0 {
            log::info!("Removed {} cache entries older than {} day(s)", removed, days);
        }
    }

    let existing: HashSet<PathBuf> = cache.paths().into_iter().filter(|p| p.is_file()).collect();
    let removed = cache.prune(&existing);
    if removed > 0 {
        log::info!("Removed {} cache entries for deleted files", removed);
    }
}

/// Ignore key of each group, computed from cached fingerprints.
fn group_keys(cache: Option<&FingerprintCache>, groups: &[DuplicateGroup]) -> Vec<Option<String>> {
    let Some(cache) = cache else {
        return vec![None; groups.len()];
    };
    groups
        .iter()
        .map(|g| {
            let fingerprints: HashMap<_, _> = g
                .members()
                .iter()
                .filter_map(|m| cache.lookup(m).map(|fp| (m.clone(), fp)))
                .collect();
            group_key(g, &fingerprints)
        })
        .collect()
}
