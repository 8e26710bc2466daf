//! Cache entry definitions.

use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;
use crate::scanner::FileIdentity;

/// A fingerprint together with the file identity it was computed for.
///
/// Entries are replaced whole on store and never partially updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Identity of the file when it was fingerprinted
    pub identity: FileIdentity,
    /// The fingerprint computed for that identity
    pub fingerprint: Fingerprint,
}

impl CacheEntry {
    #[must_use]
    pub fn new(identity: FileIdentity, fingerprint: Fingerprint) -> Self {
        Self {
            identity,
            fingerprint,
        }
    }

    /// Whether this entry is still valid for the given identity.
    ///
    /// Size and modification time must match exactly; any difference means
    /// the content may have changed.
    #[must_use]
    pub fn is_valid_for(&self, identity: &FileIdentity) -> bool {
        self.identity == *identity
    }

    /// Whether the fingerprint was computed before `cutoff` (Unix seconds).
    #[must_use]
    pub fn is_older_than(&self, cutoff: i64) -> bool {
        self.fingerprint.computed_at() < cutoff
    }
}
