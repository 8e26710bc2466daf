//! Fingerprint caching module.
//!
//! This module provides persistent storage for video fingerprints so that
//! later runs do not re-read unchanged files.
//!
//! # Architecture
//!
//! The caching system is split into two main components:
//!
//! * [`database`]: SQLite persistence, schema management and the shared
//!   in-memory map.
//! * [`entry`]: The data model stored in the cache and its validation logic.
//!
//! # Cache Invalidation
//!
//! Entries are validated using:
//! * File path (primary key)
//! * File size
//! * Modification time (nanoseconds)
//!
//! If size or mtime differ from the stored entry, the lookup is a miss and
//! the file is fingerprinted again. Stale entries are never returned and
//! carry no separate flag; the next store for that path replaces them.

pub mod database;
pub mod entry;

pub use database::{CacheError, CacheResult, FingerprintCache, SCHEMA_VERSION};
pub use entry::CacheEntry;
