//! SQLite-backed fingerprint cache.
//!
//! All entries live in memory behind a single lock while the process runs;
//! the SQLite store is read once at [`FingerprintCache::open`] and rewritten
//! by [`FingerprintCache::flush`].

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rusqlite::{params, Connection, Transaction};

use super::entry::CacheEntry;
use crate::fingerprint::{Fingerprint, Hash};
use crate::scanner::FileIdentity;

/// Version stored in `PRAGMA user_version`. Any other non-zero value is
/// treated as an unreadable store.
pub const SCHEMA_VERSION: i64 = 2;

const CREATE_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS fingerprints (
        path BLOB PRIMARY KEY NOT NULL,
        size INTEGER NOT NULL,
        modified_at INTEGER NOT NULL,
        content_hash BLOB NOT NULL,
        duration_ms INTEGER NOT NULL,
        width INTEGER NOT NULL,
        height INTEGER NOT NULL,
        codec TEXT NOT NULL,
        computed_at INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS ignored_groups (
        group_key TEXT PRIMARY KEY NOT NULL
    );
    PRAGMA user_version = 2;
";

/// Errors raised by the fingerprint cache.
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    /// The backing store exists but cannot be read.
    #[error("Cache store is corrupted: {0}")]
    Corruption(String),

    /// Persisting entries failed. In-memory state is still valid.
    #[error("Failed to write cache: {0}")]
    WriteFailure(#[source] rusqlite::Error),

    /// Any other SQLite failure.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Filesystem failure around the store file.
    #[error("Cache I/O error at {path}: {source}")]
    Io {
        /// Path involved
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Row as stored, before validation.
struct StoredRow {
    path: Vec<u8>,
    size: i64,
    modified_at: i64,
    content_hash: Vec<u8>,
    duration_ms: i64,
    width: i64,
    height: i64,
    codec: String,
    computed_at: i64,
}

impl StoredRow {
    fn into_entry(self) -> CacheResult<CacheEntry> {
        let path = path_from_key(self.path)
            .ok_or_else(|| CacheError::Corruption("path key is not valid UTF-8".to_string()))?;
        let corrupt = |what: &str| CacheError::Corruption(format!("{} for {}", what, path.display()));
        let content_hash: Hash = self
            .content_hash
            .as_slice()
            .try_into()
            .map_err(|_| corrupt("content hash of wrong length"))?;
        let size = u64::try_from(self.size).map_err(|_| corrupt("negative size"))?;
        let duration_ms =
            u64::try_from(self.duration_ms).map_err(|_| corrupt("negative duration"))?;
        let width = u32::try_from(self.width).map_err(|_| corrupt("invalid width"))?;
        let height = u32::try_from(self.height).map_err(|_| corrupt("invalid height"))?;

        let fingerprint = Fingerprint::new(
            content_hash,
            duration_ms,
            width,
            height,
            self.codec,
            self.computed_at,
        );
        let identity = FileIdentity::new(path, size, self.modified_at);
        Ok(CacheEntry::new(identity, fingerprint))
    }
}

/// Persistent cache mapping file identities to fingerprints.
///
/// Safe to share between worker threads as `Arc<FingerprintCache>`.
pub struct FingerprintCache {
    entries: Mutex<HashMap<PathBuf, CacheEntry>>,
    ignored_groups: Mutex<BTreeSet<String>>,
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
    recovered: bool,
}

impl std::fmt::Debug for FingerprintCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FingerprintCache")
            .field("path", &self.path)
            .field("entries", &self.len())
            .field("recovered", &self.recovered)
            .finish()
    }
}

impl FingerprintCache {
    /// Open the store at `path`, creating it (and its parent directories)
    /// if needed, and load every entry into memory.
    ///
    /// An existing store that cannot be read is discarded and replaced by
    /// an empty one; [`recovered_from_corruption`](Self::recovered_from_corruption)
    /// then returns `true`.
    ///
    /// # Errors
    ///
    /// Fails only when no usable store can be created at `path`.
    pub fn open(path: &Path) -> CacheResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| CacheError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let existed = path.exists();
        match Self::open_store(path) {
            Ok(cache) => {
                log::debug!(
                    "Loaded {} cached fingerprints from {}",
                    cache.len(),
                    path.display()
                );
                Ok(cache)
            }
            Err(e) if existed => {
                log::warn!(
                    "Discarding unreadable fingerprint cache {}: {}",
                    path.display(),
                    e
                );
                discard_store(path)?;
                let mut cache = Self::open_store(path)?;
                cache.recovered = true;
                Ok(cache)
            }
            Err(e) => Err(e),
        }
    }

    /// Create an empty cache backed by an in-memory SQLite database.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Sqlite`] if the database cannot be created.
    pub fn in_memory() -> CacheResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CREATE_SCHEMA)?;
        Ok(Self::with_state(conn, None, HashMap::new(), BTreeSet::new()))
    }

    fn with_state(
        conn: Connection,
        path: Option<PathBuf>,
        entries: HashMap<PathBuf, CacheEntry>,
        ignored_groups: BTreeSet<String>,
    ) -> Self {
        Self {
            entries: Mutex::new(entries),
            ignored_groups: Mutex::new(ignored_groups),
            conn: Mutex::new(conn),
            path,
            recovered: false,
        }
    }

    fn open_store(path: &Path) -> CacheResult<Self> {
        let conn = Connection::open(path)?;
        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        match version {
            0 => conn.execute_batch(CREATE_SCHEMA)?,
            SCHEMA_VERSION => {}
            other => {
                return Err(CacheError::Corruption(format!(
                    "unknown schema version {}",
                    other
                )))
            }
        }
        let check: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
        if check != "ok" {
            return Err(CacheError::Corruption(check));
        }

        let entries = load_entries(&conn)?;
        let ignored = load_ignored_groups(&conn)?;
        Ok(Self::with_state(
            conn,
            Some(path.to_path_buf()),
            entries,
            ignored,
        ))
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<PathBuf, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ignored(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.ignored_groups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the stored fingerprint if an entry exists for this path with
    /// exactly the same size and modification time.
    #[must_use]
    pub fn lookup(&self, identity: &FileIdentity) -> Option<Fingerprint> {
        let entries = self.entries();
        match entries.get(&identity.path) {
            Some(entry) if entry.is_valid_for(identity) => {
                log::trace!("Cache hit for {}", identity.path.display());
                Some(entry.fingerprint.clone())
            }
            Some(_) => {
                log::trace!("Stale cache entry for {}", identity.path.display());
                None
            }
            None => None,
        }
    }

    /// Insert or overwrite the entry for the identity's path.
    pub fn store(&self, identity: FileIdentity, fingerprint: Fingerprint) {
        let path = identity.path.clone();
        self.entries()
            .insert(path, CacheEntry::new(identity, fingerprint));
    }

    /// Entry stored for a path, whatever its identity.
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<CacheEntry> {
        self.entries().get(path).cloned()
    }

    /// Persist every entry and ignored group in one transaction.
    ///
    /// Returns the number of entries written.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::WriteFailure`] if the store cannot be written.
    /// The in-memory state is unaffected.
    pub fn flush(&self) -> CacheResult<usize> {
        let mut entries: Vec<CacheEntry> = self.entries().values().cloned().collect();
        entries.sort_by(|a, b| a.identity.path.cmp(&b.identity.path));
        let ignored: Vec<String> = self.ignored().iter().cloned().collect();

        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = conn.transaction().map_err(CacheError::WriteFailure)?;
        let written = write_all(&tx, &entries, &ignored).map_err(CacheError::WriteFailure)?;
        tx.commit().map_err(CacheError::WriteFailure)?;

        log::debug!("Flushed {} fingerprints to cache", written);
        Ok(written)
    }

    /// Remove entries whose path is not in `existing_paths`.
    ///
    /// Returns the number of entries removed.
    pub fn prune(&self, existing_paths: &HashSet<PathBuf>) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|path, _| existing_paths.contains(path));
        let removed = before - entries.len();
        if removed > 0 {
            log::debug!("Pruned {} cache entries for missing files", removed);
        }
        removed
    }

    /// Remove entries computed more than `max_age` before `now` (Unix seconds).
    ///
    /// Returns the number of entries removed.
    pub fn prune_expired(&self, max_age: Duration, now: i64) -> usize {
        let max_age = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
        let cutoff = now.saturating_sub(max_age);
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_older_than(cutoff));
        let removed = before - entries.len();
        if removed > 0 {
            log::debug!("Pruned {} expired cache entries", removed);
        }
        removed
    }

    /// Remember a duplicate group the user chose to ignore.
    pub fn ignore_group(&self, key: impl Into<String>) {
        self.ignored().insert(key.into());
    }

    #[must_use]
    pub fn is_group_ignored(&self, key: &str) -> bool {
        self.ignored().contains(key)
    }

    /// All ignored group keys in sorted order.
    #[must_use]
    pub fn ignored_groups(&self) -> Vec<String> {
        self.ignored().iter().cloned().collect()
    }

    /// Paths of all cached entries, sorted.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.entries().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Number of entries held in memory.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Drop every entry and ignored group, in memory and on disk.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::WriteFailure`] if the store cannot be emptied.
    pub fn clear(&self) -> CacheResult<()> {
        self.entries().clear();
        self.ignored().clear();
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute_batch("DELETE FROM fingerprints; DELETE FROM ignored_groups;")
            .map_err(CacheError::WriteFailure)
    }

    /// Location of the store, or `None` for an in-memory cache.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether an unreadable store was discarded when this cache was opened.
    #[must_use]
    pub fn recovered_from_corruption(&self) -> bool {
        self.recovered
    }
}

fn load_entries(conn: &Connection) -> CacheResult<HashMap<PathBuf, CacheEntry>> {
    let mut stmt = conn.prepare(
        "SELECT path, size, modified_at, content_hash, duration_ms, width, height, codec, computed_at
         FROM fingerprints",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(StoredRow {
            path: row.get(0)?,
            size: row.get(1)?,
            modified_at: row.get(2)?,
            content_hash: row.get(3)?,
            duration_ms: row.get(4)?,
            width: row.get(5)?,
            height: row.get(6)?,
            codec: row.get(7)?,
            computed_at: row.get(8)?,
        })
    })?;

    let mut entries = HashMap::new();
    for row in rows {
        let entry = row?.into_entry()?;
        entries.insert(entry.identity.path.clone(), entry);
    }
    Ok(entries)
}

fn load_ignored_groups(conn: &Connection) -> CacheResult<BTreeSet<String>> {
    let mut stmt = conn.prepare("SELECT group_key FROM ignored_groups")?;
    let keys = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(keys)
}

fn write_all(
    tx: &Transaction<'_>,
    entries: &[CacheEntry],
    ignored: &[String],
) -> rusqlite::Result<usize> {
    tx.execute("DELETE FROM fingerprints", [])?;
    tx.execute("DELETE FROM ignored_groups", [])?;

    let mut insert = tx.prepare(
        "INSERT INTO fingerprints
         (path, size, modified_at, content_hash, duration_ms, width, height, codec, computed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    let mut written = 0;
    for entry in entries {
        let Some(key) = path_key(&entry.identity.path) else {
            log::debug!(
                "Not persisting fingerprint for non-UTF-8 path {}",
                entry.identity.path.display()
            );
            continue;
        };
        let fp = &entry.fingerprint;
        insert.execute(params![
            key,
            i64::try_from(entry.identity.size).unwrap_or(i64::MAX),
            entry.identity.modified_at,
            fp.content_hash().as_slice(),
            i64::try_from(fp.duration_ms()).unwrap_or(i64::MAX),
            i64::from(fp.width()),
            i64::from(fp.height()),
            fp.codec(),
            fp.computed_at(),
        ])?;
        written += 1;
    }

    let mut insert = tx.prepare("INSERT INTO ignored_groups (group_key) VALUES (?1)")?;
    for key in ignored {
        insert.execute(params![key])?;
    }
    Ok(written)
}

/// Raw bytes of `path` used as the primary key.
#[cfg(unix)]
fn path_key(path: &Path) -> Option<Vec<u8>> {
    use std::os::unix::ffi::OsStrExt;
    Some(path.as_os_str().as_bytes().to_vec())
}

/// UTF-8 bytes of `path`; paths that are not valid Unicode are not stored.
#[cfg(not(unix))]
fn path_key(path: &Path) -> Option<Vec<u8>> {
    path.to_str().map(|s| s.as_bytes().to_vec())
}

#[cfg(unix)]
fn path_from_key(key: Vec<u8>) -> Option<PathBuf> {
    use std::os::unix::ffi::OsStringExt;
    Some(PathBuf::from(std::ffi::OsString::from_vec(key)))
}

#[cfg(not(unix))]
fn path_from_key(key: Vec<u8>) -> Option<PathBuf> {
    String::from_utf8(key).ok().map(PathBuf::from)
}

/// Remove a store file and its SQLite sidecar files.
fn discard_store(path: &Path) -> CacheResult<()> {
    let mut targets = vec![path.to_path_buf()];
    for suffix in ["-journal", "-wal", "-shm"] {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        targets.push(PathBuf::from(name));
    }
    for target in targets {
        match fs::remove_file(&target) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(CacheError::Io { path: target, source }),
        }
    }
    Ok(())
}
