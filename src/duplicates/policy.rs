//! Keeper selection and proposed dispositions.
//!
//! The keeper of a group is the member with, in order:
//! 1. the most pixels (width × height),
//! 2. the largest file size,
//! 3. the lexicographically smallest path.
//!
//! Every other member gets a proposed [`Action`]. Nothing here touches the
//! filesystem; requests are handed to an external file-action collaborator
//! after confirmation.

use std::cmp::Reverse;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::groups::{DuplicateGroup, MatchKind};
use crate::fingerprint::Fingerprint;
use crate::scanner::FileIdentity;

/// Proposed disposition of a non-keeper file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Remove the file; the keeper has identical content.
    Delete,
    /// Review against the keeper before removal (likely a re-encode).
    Merge,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Delete => write!(f, "delete"),
            Self::Merge => write!(f, "merge"),
        }
    }
}

/// A disposition for the file-action collaborator to execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action: Action,
    /// File the action applies to
    pub target: FileIdentity,
    /// Keeper of the group the target belongs to
    pub keeper: FileIdentity,
}

/// Return the group with its keeper chosen by the ranking above.
///
/// Members without a fingerprint rank as zero pixels.
#[must_use]
pub fn resolve(
    group: &DuplicateGroup,
    fingerprints: &HashMap<FileIdentity, Fingerprint>,
) -> DuplicateGroup {
    let best = group
        .members()
        .iter()
        .enumerate()
        .min_by_key(|&(_, member)| {
            let pixels = fingerprints.get(member).map_or(0, Fingerprint::pixels);
            (Reverse(pixels), Reverse(member.size), &member.path)
        })
        .map_or(0, |(index, _)| index);

    let resolved = group.clone().with_keeper_at(best);
    log::trace!(
        "Keeper for group of {}: {}",
        resolved.len(),
        resolved.keeper().path.display()
    );
    resolved
}

/// Resolve every group.
#[must_use]
pub fn resolve_all(
    groups: &[DuplicateGroup],
    fingerprints: &HashMap<FileIdentity, Fingerprint>,
) -> Vec<DuplicateGroup> {
    groups.iter().map(|g| resolve(g, fingerprints)).collect()
}

/// Proposed actions for every non-keeper member, in path order.
///
/// Exact groups propose [`Action::Delete`]; near-duplicate groups propose
/// [`Action::Merge`].
#[must_use]
pub fn propose(group: &DuplicateGroup) -> Vec<ActionRequest> {
    let action = match group.match_kind() {
        MatchKind::Exact => Action::Delete,
        MatchKind::NearDuplicate => Action::Merge,
    };
    group
        .duplicates()
        .map(|target| ActionRequest {
            action,
            target: target.clone(),
            keeper: group.keeper().clone(),
        })
        .collect()
}
