//! Duplicate grouping over a complete fingerprint snapshot.
//!
//! # Overview
//!
//! Grouping runs in two passes:
//!
//! 1. **Exact**: files are bucketed by content hash. Every bucket with two
//!    or more files becomes an [`MatchKind::Exact`] group.
//! 2. **Near-duplicate**: files left alone in their bucket are compared
//!    pairwise. Two files match when their durations differ by at most the
//!    tolerance and width, height and codec are equal. This is the only
//!    quadratic step and only sees the residual singletons.
//!
//! Fingerprints without media info (zero duration or dimensions) skip the
//! second pass but still take part in exact matching.
//!
//! Members are sorted by path and groups by their first member, so the
//! same snapshot always produces the same output.
//!
//! # Example
//!
//! ```
//! use vidupe::duplicates::{group, MatchKind};
//! use vidupe::fingerprint::Fingerprint;
//! use vidupe::scanner::FileIdentity;
//! use std::collections::HashMap;
//! use std::path::PathBuf;
//!
//! let a = FileIdentity::new(PathBuf::from("/v/a.mp4"), 1000, 0);
//! let b = FileIdentity::new(PathBuf::from("/v/b.mp4"), 1000, 0);
//! let mut fingerprints = HashMap::new();
//! fingerprints.insert(a.clone(), Fingerprint::new([1; 32], 120_000, 1920, 1080, "h264", 0));
//! fingerprints.insert(b.clone(), Fingerprint::new([1; 32], 120_000, 1920, 1080, "h264", 0));
//!
//! let groups = group(&[a, b], &fingerprints, 500);
//! assert_eq!(groups.len(), 1);
//! assert_eq!(groups[0].match_kind(), MatchKind::Exact);
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::fingerprint::{hash_to_hex, Fingerprint, Hash};
use crate::scanner::FileIdentity;

/// Default duration tolerance for near-duplicate matching.
pub const DEFAULT_TOLERANCE_MS: u64 = 500;

/// How the members of a group were matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Identical sampled content
    Exact,
    /// Different content, matching duration, resolution and codec
    NearDuplicate,
}

impl std::fmt::Display for MatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::NearDuplicate => write!(f, "near-duplicate"),
        }
    }
}

/// A set of two or more files considered copies of each other.
///
/// The keeper is always one of the members. Until the resolution policy
/// runs it is the first member by path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    members: Vec<FileIdentity>,
    keeper: FileIdentity,
    match_kind: MatchKind,
    #[serde(skip)]
    content_hash: Option<Hash>,
}

impl DuplicateGroup {
    /// Build a group from its members.
    ///
    /// Members are sorted by path and deduplicated. Returns `None` if fewer
    /// than two distinct files remain.
    #[must_use]
    pub fn new(
        mut members: Vec<FileIdentity>,
        match_kind: MatchKind,
        content_hash: Option<Hash>,
    ) -> Option<Self> {
        members.sort();
        members.dedup_by(|a, b| a.path == b.path);
        if members.len() < 2 {
            return None;
        }
        let keeper = members[0].clone();
        Some(Self {
            members,
            keeper,
            match_kind,
            content_hash,
        })
    }

    /// Same group with the member at `index` as keeper.
    ///
    /// An out-of-range index leaves the keeper unchanged.
    #[must_use]
    pub(crate) fn with_keeper_at(mut self, index: usize) -> Self {
        if let Some(keeper) = self.members.get(index) {
            self.keeper = keeper.clone();
        }
        self
    }

    /// Members in path order.
    #[must_use]
    pub fn members(&self) -> &[FileIdentity] {
        &self.members
    }

    #[must_use]
    pub fn keeper(&self) -> &FileIdentity {
        &self.keeper
    }

    #[must_use]
    pub fn match_kind(&self) -> MatchKind {
        self.match_kind
    }

    /// Shared content hash, set for exact groups only.
    #[must_use]
    pub fn content_hash(&self) -> Option<&Hash> {
        self.content_hash.as_ref()
    }

    /// Number of files in this group.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Always `false` for a constructed group.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Total size of all members in bytes.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.members.iter().map(|f| f.size).sum()
    }

    /// Space freed by removing every member except the keeper.
    #[must_use]
    pub fn reclaimable_space(&self) -> u64 {
        self.total_size().saturating_sub(self.keeper.size)
    }

    /// Members other than the keeper, in path order.
    pub fn duplicates(&self) -> impl Iterator<Item = &FileIdentity> {
        self.members.iter().filter(move |f| f.path != self.keeper.path)
    }

    /// Get just the paths of files in this group.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        self.members.iter().map(|f| f.path.clone()).collect()
    }

    /// Content hash as hexadecimal string, for exact groups.
    #[must_use]
    pub fn hash_hex(&self) -> Option<String> {
        self.content_hash.as_ref().map(hash_to_hex)
    }

    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.members.iter().any(|f| f.path == path)
    }
}

/// Near-duplicate comparator.
///
/// Both fingerprints need media info; durations may differ by at most
/// `tolerance_ms`, and width, height and codec must be equal.
#[must_use]
pub fn is_near_duplicate(a: &Fingerprint, b: &Fingerprint, tolerance_ms: u64) -> bool {
    a.has_media_info()
        && b.has_media_info()
        && a.width() == b.width()
        && a.height() == b.height()
        && a.codec() == b.codec()
        && a.duration_ms().abs_diff(b.duration_ms()) <= tolerance_ms
}

/// Partition files into duplicate groups.
///
/// Files without an entry in `fingerprints` are ignored. See the
/// [module documentation](self) for the algorithm.
#[must_use]
pub fn group(
    files: &[FileIdentity],
    fingerprints: &HashMap<FileIdentity, Fingerprint>,
    tolerance_ms: u64,
) -> Vec<DuplicateGroup> {
    let mut known: Vec<(&FileIdentity, &Fingerprint)> = files
        .iter()
        .filter_map(|f| fingerprints.get(f).map(|fp| (f, fp)))
        .collect();
    known.sort_by(|a, b| a.0.cmp(b.0));
    known.dedup_by(|a, b| a.0.path == b.0.path);

    let mut buckets: HashMap<&Hash, Vec<(&FileIdentity, &Fingerprint)>> = HashMap::new();
    for (file, fp) in known {
        buckets.entry(fp.content_hash()).or_default().push((file, fp));
    }

    let mut groups = Vec::new();
    let mut singles = Vec::new();
    for (hash, members) in buckets {
        if members.len() >= 2 {
            log::trace!("Exact bucket {} with {} files", hash_to_hex(hash), members.len());
            let members = members.into_iter().map(|(f, _)| f.clone()).collect();
            groups.extend(DuplicateGroup::new(members, MatchKind::Exact, Some(*hash)));
        } else {
            singles.extend(members.into_iter().filter(|(_, fp)| fp.has_media_info()));
        }
    }
    let exact_groups = groups.len();

    singles.sort_by(|a, b| a.0.cmp(b.0));
    let mut assigned = vec![false; singles.len()];
    for seed in 0..singles.len() {
        if assigned[seed] {
            continue;
        }
        // The comparator is not transitive: a candidate joins only if it
        // matches every file already in the group.
        let mut clique = vec![seed];
        for candidate in seed + 1..singles.len() {
            if assigned[candidate] {
                continue;
            }
            if clique
                .iter()
                .all(|&m| is_near_duplicate(singles[m].1, singles[candidate].1, tolerance_ms))
            {
                clique.push(candidate);
            }
        }
        if clique.len() < 2 {
            continue;
        }
        for &m in &clique {
            assigned[m] = true;
        }
        let members = clique.iter().map(|&m| singles[m].0.clone()).collect();
        groups.extend(DuplicateGroup::new(members, MatchKind::NearDuplicate, None));
    }

    groups.sort_by(|a, b| a.members[0].path.cmp(&b.members[0].path));

    log::debug!(
        "Grouping complete: {} exact, {} near-duplicate groups",
        exact_groups,
        groups.len() - exact_groups
    );
    groups
}

/// Stable key identifying a group by content rather than by path.
///
/// The key is the BLAKE3 hash of the members' content hashes in sorted
/// order, so renaming or moving the files keeps the same key. Returns
/// `None` if a member has no fingerprint.
#[must_use]
pub fn group_key(
    group: &DuplicateGroup,
    fingerprints: &HashMap<FileIdentity, Fingerprint>,
) -> Option<String> {
    let mut hashes = group
        .members
        .iter()
        .map(|f| fingerprints.get(f).map(|fp| *fp.content_hash()))
        .collect::<Option<Vec<Hash>>>()?;
    hashes.sort_unstable();

    let mut hasher = blake3::Hasher::new();
    for hash in &hashes {
        hasher.update(hash);
    }
    Some(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, size: u64) -> FileIdentity {
        FileIdentity::new(PathBuf::from(path), size, 0)
    }

    fn fp(seed: u8, duration_ms: u64, width: u32, height: u32, codec: &str) -> Fingerprint {
        Fingerprint::new([seed; 32], duration_ms, width, height, codec, 0)
    }

    fn snapshot(items: &[(FileIdentity, Fingerprint)]) -> (Vec<FileIdentity>, HashMap<FileIdentity, Fingerprint>) {
        let files = items.iter().map(|(f, _)| f.clone()).collect();
        let fingerprints = items.iter().cloned().collect();
        (files, fingerprints)
    }

    #[test]
    fn test_new_sorts_and_requires_two_members() {
        let group = DuplicateGroup::new(
            vec![file("/b.mp4", 1), file("/a.mp4", 1)],
            MatchKind::Exact,
            None,
        )
        .unwrap();
        assert_eq!(group.members()[0].path, PathBuf::from("/a.mp4"));
        assert_eq!(group.keeper().path, PathBuf::from("/a.mp4"));

        assert!(DuplicateGroup::new(vec![file("/a.mp4", 1)], MatchKind::Exact, None).is_none());
        assert!(
            DuplicateGroup::new(vec![file("/a.mp4", 1), file("/a.mp4", 1)], MatchKind::Exact, None)
                .is_none()
        );
    }

    #[test]
    fn test_reclaimable_space_excludes_keeper() {
        let group = DuplicateGroup::new(
            vec![file("/a.mp4", 100), file("/b.mp4", 300)],
            MatchKind::NearDuplicate,
            None,
        )
        .unwrap()
        .with_keeper_at(1);
        assert_eq!(group.total_size(), 400);
        assert_eq!(group.reclaimable_space(), 100);
        let dups: Vec<_> = group.duplicates().map(|f| f.path.clone()).collect();
        assert_eq!(dups, vec![PathBuf::from("/a.mp4")]);
    }

    #[test]
    fn test_with_keeper_at_out_of_range() {
        let group = DuplicateGroup::new(
            vec![file("/a.mp4", 1), file("/b.mp4", 1)],
            MatchKind::Exact,
            None,
        )
        .unwrap()
        .with_keeper_at(9);
        assert_eq!(group.keeper().path, PathBuf::from("/a.mp4"));
    }

    #[test]
    fn test_is_near_duplicate() {
        let base = fp(1, 60_000, 1280, 720, "h264");
        assert!(is_near_duplicate(&base, &fp(2, 60_500, 1280, 720, "h264"), 500));
        assert!(!is_near_duplicate(&base, &fp(2, 60_501, 1280, 720, "h264"), 500));
        assert!(!is_near_duplicate(&base, &fp(2, 60_000, 1920, 720, "h264"), 500));
        assert!(!is_near_duplicate(&base, &fp(2, 60_000, 1280, 1080, "h264"), 500));
        assert!(!is_near_duplicate(&base, &fp(2, 60_000, 1280, 720, "hevc"), 500));
        assert!(!is_near_duplicate(&fp(1, 0, 1280, 720, "h264"), &fp(2, 0, 1280, 720, "h264"), 500));
    }

    #[test]
    fn test_exact_and_near_groups() {
        let (files, fps) = snapshot(&[
            (file("/v/a.mp4", 10), fp(1, 120_000, 1920, 1080, "h264")),
            (file("/v/b.mp4", 10), fp(1, 120_000, 1920, 1080, "h264")),
            (file("/v/c.mp4", 20), fp(2, 60_000, 1280, 720, "h264")),
            (file("/v/d.mp4", 25), fp(3, 60_300, 1280, 720, "h264")),
            (file("/v/e.mp4", 30), fp(4, 10_000, 640, 480, "vp9")),
        ]);

        let groups = group(&files, &fps, 500);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].match_kind(), MatchKind::Exact);
        assert_eq!(groups[0].paths(), vec![PathBuf::from("/v/a.mp4"), PathBuf::from("/v/b.mp4")]);
        assert_eq!(groups[0].content_hash(), Some(&[1u8; 32]));
        assert_eq!(groups[1].match_kind(), MatchKind::NearDuplicate);
        assert_eq!(groups[1].paths(), vec![PathBuf::from("/v/c.mp4"), PathBuf::from("/v/d.mp4")]);
        assert_eq!(groups[1].content_hash(), None);
    }

    #[test]
    fn test_near_groups_are_cliques() {
        // a~b and b~c, but a and c are 800ms apart.
        let (files, fps) = snapshot(&[
            (file("/a.mp4", 1), fp(1, 10_000, 640, 480, "h264")),
            (file("/b.mp4", 1), fp(2, 10_400, 640, 480, "h264")),
            (file("/c.mp4", 1), fp(3, 10_800, 640, 480, "h264")),
        ]);

        let groups = group(&files, &fps, 500);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].paths(), vec![PathBuf::from("/a.mp4"), PathBuf::from("/b.mp4")]);
    }

    #[test]
    fn test_files_without_media_info_only_match_exactly() {
        let (files, fps) = snapshot(&[
            (file("/a.mp4", 1), Fingerprint::new([1; 32], 0, 0, 0, "", 0)),
            (file("/b.mp4", 1), Fingerprint::new([2; 32], 0, 0, 0, "", 0)),
            (file("/c.mp4", 1), Fingerprint::new([2; 32], 0, 0, 0, "", 0)),
        ]);

        let groups = group(&files, &fps, 500);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].match_kind(), MatchKind::Exact);
        assert!(!groups[0].contains(Path::new("/a.mp4")));
    }

    #[test]
    fn test_unfingerprinted_files_are_ignored() {
        let (mut files, fps) = snapshot(&[(file("/a.mp4", 1), fp(1, 1000, 1, 1, "h264"))]);
        files.push(file("/b.mp4", 1));
        assert!(group(&files, &fps, 500).is_empty());
    }

    #[test]
    fn test_single_file_produces_no_groups() {
        let (files, fps) = snapshot(&[(file("/a.mp4", 1), fp(1, 1000, 1, 1, "h264"))]);
        assert!(group(&files, &fps, 500).is_empty());
        assert!(group(&[], &fps, 500).is_empty());
    }

    #[test]
    fn test_group_order_is_independent_of_input_order() {
        let items = [
            (file("/z.mp4", 1), fp(9, 1000, 1, 1, "h264")),
            (file("/m.mp4", 1), fp(9, 1000, 1, 1, "h264")),
            (file("/b.mp4", 1), fp(5, 5000, 2, 2, "h264")),
            (file("/a.mp4", 1), fp(6, 5100, 2, 2, "h264")),
        ];
        let (files, fps) = snapshot(&items);
        let mut reversed = files.clone();
        reversed.reverse();

        let first = group(&files, &fps, 500);
        assert_eq!(first, group(&reversed, &fps, 500));
        assert_eq!(first[0].members()[0].path, PathBuf::from("/a.mp4"));
        assert_eq!(first[1].members()[0].path, PathBuf::from("/m.mp4"));
    }

    #[test]
    fn test_group_key_ignores_paths() {
        let (files, fps) = snapshot(&[
            (file("/a.mp4", 1), fp(1, 1000, 1, 1, "h264")),
            (file("/b.mp4", 1), fp(1, 1000, 1, 1, "h264")),
        ]);
        let (renamed_files, renamed_fps) = snapshot(&[
            (file("/x/a2.mp4", 1), fp(1, 1000, 1, 1, "h264")),
            (file("/x/b2.mp4", 1), fp(1, 1000, 1, 1, "h264")),
        ]);

        let key = group_key(&group(&files, &fps, 500)[0], &fps).unwrap();
        let renamed = group_key(&group(&renamed_files, &renamed_fps, 500)[0], &renamed_fps).unwrap();
        assert_eq!(key, renamed);
        assert_eq!(key.len(), 64);
    }

    #[test]
    fn test_group_key_requires_fingerprints() {
        let group = DuplicateGroup::new(
            vec![file("/a.mp4", 1), file("/b.mp4", 1)],
            MatchKind::Exact,
            None,
        )
        .unwrap();
        assert_eq!(group_key(&group, &HashMap::new()), None);
    }
}
