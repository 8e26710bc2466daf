//! Directory walker producing candidate video files.
//!
//! # Overview
//!
//! The walker traverses a directory tree with jwalk, applies gitignore-style
//! patterns and the video extension filter, and yields a [`FileIdentity`]
//! for each candidate. Children are sorted by name so the candidate list is
//! deterministic for an unchanged tree.
//!
//! # Example
//!
//! ```no_run
//! use vidupe::scanner::{Walker, WalkerConfig};
//! use std::path::Path;
//!
//! let walker = Walker::new(Path::new("/videos"), WalkerConfig::default());
//! let files: Vec<_> = walker.walk().filter_map(Result::ok).collect();
//! println!("Found {} videos", files.len());
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use jwalk::WalkDir;

use super::{FileIdentity, ScanError, WalkerConfig};

/// Directory walker for parallel file discovery.
#[derive(Debug)]
pub struct Walker {
    /// Root path to walk
    root: PathBuf,
    /// Walker configuration
    config: WalkerConfig,
    /// Optional shutdown flag for graceful termination
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl Walker {
    /// Create a new walker for the given path.
    ///
    /// The root is made absolute so every yielded identity carries an
    /// absolute path.
    #[must_use]
    pub fn new(path: &Path, config: WalkerConfig) -> Self {
        let root = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        Self {
            root,
            config,
            shutdown_flag: None,
        }
    }

    /// Set the shutdown flag for graceful termination.
    ///
    /// When the flag is set to `true`, the walker stops iteration
    /// as soon as possible.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Build gitignore matcher from config patterns and .gitignore file.
    fn build_gitignore(&self) -> Option<Gitignore> {
        let mut builder = GitignoreBuilder::new(&self.root);

        let gitignore_path = self.root.join(".gitignore");
        if gitignore_path.exists() {
            if let Some(e) = builder.add(&gitignore_path) {
                log::warn!(
                    "Failed to load .gitignore from {}: {}",
                    gitignore_path.display(),
                    e
                );
            } else {
                log::debug!("Loaded .gitignore from {}", gitignore_path.display());
            }
        }

        for pattern in &self.config.ignore_patterns {
            if let Err(e) = builder.add_line(None, pattern) {
                log::warn!("Invalid ignore pattern '{}': {}", pattern, e);
            }
        }

        match builder.build() {
            Ok(gitignore) if gitignore.is_empty() => None,
            Ok(gitignore) => Some(gitignore),
            Err(e) => {
                log::warn!("Failed to build ignore patterns: {}", e);
                None
            }
        }
    }

    fn should_ignore(&self, path: &Path, is_dir: bool, gitignore: &Option<Gitignore>) -> bool {
        let Some(gi) = gitignore else {
            return false;
        };
        // Gitignore matching expects root-relative paths with forward slashes.
        let relative_path = path.strip_prefix(&self.root).unwrap_or(path);
        let path_str = relative_path.to_string_lossy();
        let normalized_path = if cfg!(windows) {
            path_str.replace('\\', "/")
        } else {
            path_str.into_owned()
        };

        gi.matched_path_or_any_parents(normalized_path, is_dir)
            .is_ignore()
    }

    /// Walk the directory tree, yielding candidate video files.
    ///
    /// Errors are yielded as [`ScanError`] values rather than stopping
    /// iteration.
    pub fn walk(&self) -> impl Iterator<Item = Result<FileIdentity, ScanError>> + '_ {
        let gitignore = self.build_gitignore();

        let walk_dir = WalkDir::new(&self.root)
            .follow_links(self.config.follow_symlinks)
            .skip_hidden(self.config.skip_hidden)
            .process_read_dir(move |_depth, _path, _read_dir_state, children| {
                children.sort_by(|a, b| match (a, b) {
                    (Ok(a), Ok(b)) => a.file_name().cmp(b.file_name()),
                    (Ok(_), Err(_)) => std::cmp::Ordering::Less,
                    (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
                    (Err(_), Err(_)) => std::cmp::Ordering::Equal,
                });
            });

        walk_dir.into_iter().filter_map(move |entry_result| {
            if self.is_shutdown_requested() {
                log::debug!("Walker: Shutdown requested, stopping iteration");
                return None;
            }

            match entry_result {
                Ok(entry) => {
                    let path = entry.path();
                    if path == self.root {
                        return None;
                    }

                    let file_type = entry.file_type();
                    if file_type.is_dir() {
                        return None;
                    }

                    if self.should_ignore(&path, false, &gitignore) {
                        log::trace!("Ignoring file: {}", path.display());
                        return None;
                    }

                    if file_type.is_symlink() && !self.config.follow_symlinks {
                        log::trace!("Skipping symlink: {}", path.display());
                        return None;
                    }

                    if !self.config.matches_extension(&path) {
                        log::trace!("Skipping non-video file: {}", path.display());
                        return None;
                    }

                    let metadata = if self.config.follow_symlinks {
                        std::fs::metadata(&path)
                    } else {
                        std::fs::symlink_metadata(&path)
                    };

                    match metadata {
                        Ok(m) if m.is_file() => Some(Ok(FileIdentity::from_metadata(path, &m))),
                        Ok(_) => None,
                        Err(e) => Some(Err(self.handle_io_error(&path, e))),
                    }
                }
                Err(e) => {
                    let path = e
                        .path()
                        .map_or_else(|| self.root.clone(), std::borrow::ToOwned::to_owned);
                    log::warn!("Walker error for {}: {}", path.display(), e);
                    Some(Err(ScanError::Io {
                        path,
                        source: std::io::Error::other(e.to_string()),
                    }))
                }
            }
        })
    }

    fn handle_io_error(&self, path: &Path, error: std::io::Error) -> ScanError {
        let err = ScanError::from_io(path, error);
        match err {
            ScanError::NotFound(_) => {
                log::debug!("File not found (may have been deleted): {}", path.display());
            }
            _ => log::warn!("{}", err),
        }
        err
    }
}

/// Walk several roots and return the combined, path-sorted, de-duplicated
/// candidate list along with the errors encountered.
///
/// # Errors
///
/// A root that does not exist or is not a directory is reported in the
/// error list; it does not stop the other roots.
pub fn collect_candidates(
    roots: &[PathBuf],
    config: &WalkerConfig,
    shutdown_flag: Option<Arc<AtomicBool>>,
) -> (Vec<FileIdentity>, Vec<ScanError>) {
    let mut files = Vec::new();
    let mut errors = Vec::new();

    for root in roots {
        if !root.exists() {
            errors.push(ScanError::NotFound(root.clone()));
            continue;
        }
        if !root.is_dir() {
            errors.push(ScanError::NotADirectory(root.clone()));
            continue;
        }

        let mut walker = Walker::new(root, config.clone());
        if let Some(ref flag) = shutdown_flag {
            walker = walker.with_shutdown_flag(Arc::clone(flag));
        }
        for entry in walker.walk() {
            match entry {
                Ok(file) => files.push(file),
                Err(e) => errors.push(e),
            }
        }
    }

    files.sort();
    files.dedup_by(|a, b| a.path == b.path);
    log::info!(
        "Collected {} candidate video(s) from {} root(s)",
        files.len(),
        roots.len()
    );
    (files, errors)
}
