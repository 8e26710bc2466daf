//! Duplicate detection module.
//!
//! This module provides functionality for:
//! - Exact grouping by content hash and near-duplicate matching
//!   ([`groups`])
//! - Keeper selection and proposed dispositions ([`policy`])
//! - The parallel, cache-aware fingerprinting pipeline ([`finder`])

pub mod finder;
pub mod groups;
pub mod policy;

pub use finder::{
    default_workers, DuplicateFinder, FileFailure, FinderConfig, FinderError, FingerprintBatch,
    ScanSummary,
};
pub use groups::{
    group, group_key, is_near_duplicate, DuplicateGroup, MatchKind, DEFAULT_TOLERANCE_MS,
};
pub use policy::{propose, resolve, resolve_all, Action, ActionRequest};
