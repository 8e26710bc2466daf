//! JSON report for duplicate scan results.
//!
//! The report is what the interactive UI and the file-action collaborator
//! consume: every group with its keeper, match kind and proposed actions,
//! the files that could not be processed, and the run summary.
//!
//! # Output Schema
//!
//! ```json
//! {
//!   "groups": [
//!     {
//!       "match_kind": "exact",
//!       "hash": "ab12...",
//!       "key": "9f3c...",
//!       "keeper": "/videos/a.mp4",
//!       "members": [{ "path": "/videos/a.mp4", "size": 1048576 }],
//!       "actions": [{ "action": "delete", "target": "/videos/b.mp4" }]
//!     }
//!   ],
//!   "failures": [{ "path": "/videos/broken.mp4", "error": "..." }],
//!   "summary": { "total_files": 3, "duplicate_groups": 1, "exit_code": 0 }
//! }
//! ```

use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::duplicates::{propose, Action, DuplicateGroup, MatchKind, ScanSummary};
use crate::error::ExitCode;

/// A member of a group.
#[derive(Debug, Clone, Serialize)]
pub struct JsonFile {
    pub path: String,
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch
    pub modified_at: i64,
}

/// A proposed disposition of a non-keeper member.
#[derive(Debug, Clone, Serialize)]
pub struct JsonAction {
    pub action: Action,
    pub target: String,
}

/// A single duplicate group in JSON format.
#[derive(Debug, Clone, Serialize)]
pub struct JsonDuplicateGroup {
    pub match_kind: MatchKind,
    /// Shared content hash, for exact groups only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Key to pass back when the user ignores this group
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub keeper: String,
    pub members: Vec<JsonFile>,
    pub actions: Vec<JsonAction>,
    /// Bytes freed by removing every non-keeper
    pub reclaimable_space: u64,
}

impl JsonDuplicateGroup {
    #[must_use]
    pub fn from_duplicate_group(group: &DuplicateGroup, key: Option<String>) -> Self {
        Self {
            match_kind: group.match_kind(),
            hash: group.hash_hex(),
            key,
            keeper: path_string(&group.keeper().path),
            members: group
                .members()
                .iter()
                .map(|f| JsonFile {
                    path: path_string(&f.path),
                    size: f.size,
                    modified_at: f.modified_at,
                })
                .collect(),
            actions: propose(group)
                .into_iter()
                .map(|request| JsonAction {
                    action: request.action,
                    target: path_string(&request.target.path),
                })
                .collect(),
            reclaimable_space: group.reclaimable_space(),
        }
    }
}

/// A file or directory that could not be processed.
#[derive(Debug, Clone, Serialize)]
pub struct JsonFailure {
    pub path: String,
    pub error: String,
    /// True when the file was still hashed but only matches exactly
    pub content_only: bool,
}

/// Summary statistics in JSON format.
#[derive(Debug, Clone, Serialize)]
pub struct JsonSummary {
    pub total_files: usize,
    pub total_size: u64,
    pub fingerprinted_files: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub failed_files: usize,
    pub metadata_failures: usize,
    pub duplicate_groups: usize,
    pub exact_groups: usize,
    pub near_duplicate_groups: usize,
    pub ignored_groups: usize,
    /// Total number of non-keeper files
    pub duplicate_files: usize,
    pub reclaimable_space: u64,
    /// Number of fingerprints persisted; absent when no cache was used
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_entries_written: Option<usize>,
    pub cache_write_failed: bool,
    pub scan_duration_ms: u64,
    pub interrupted: bool,
    pub exit_code: i32,
    /// The machine-readable exit code name (e.g., "VD000")
    pub exit_code_name: String,
}

impl JsonSummary {
    #[must_use]
    pub fn from_scan_summary(summary: &ScanSummary, exit_code: ExitCode) -> Self {
        Self {
            total_files: summary.total_files,
            total_size: summary.total_size,
            fingerprinted_files: summary.fingerprinted_files,
            cache_hits: summary.cache_hits,
            cache_misses: summary.cache_misses,
            failed_files: summary.failed_files,
            metadata_failures: summary.metadata_failures,
            duplicate_groups: summary.duplicate_groups,
            exact_groups: summary.exact_groups,
            near_duplicate_groups: summary.near_duplicate_groups,
            ignored_groups: summary.ignored_groups,
            duplicate_files: summary.duplicate_files,
            reclaimable_space: summary.reclaimable_space,
            cache_entries_written: summary.cache_entries_written,
            cache_write_failed: summary.cache_write_failed,
            scan_duration_ms: u64::try_from(summary.scan_duration.as_millis()).unwrap_or(u64::MAX),
            interrupted: summary.interrupted,
            exit_code: exit_code.as_i32(),
            exit_code_name: exit_code.code_prefix().to_string(),
        }
    }
}

/// Complete JSON report.
#[derive(Debug, Clone, Serialize)]
pub struct JsonOutput {
    pub groups: Vec<JsonDuplicateGroup>,
    pub failures: Vec<JsonFailure>,
    pub summary: JsonSummary,
}

impl JsonOutput {
    /// Build the report.
    ///
    /// `keys` holds the ignore key of each group, in the same order as
    /// `groups`; missing entries are reported without a key.
    ///
    /// ```
    /// use vidupe::duplicates::ScanSummary;
    /// use vidupe::error::ExitCode;
    /// use vidupe::output::json::JsonOutput;
    ///
    /// let output = JsonOutput::new(&[], &[], &ScanSummary::default(), ExitCode::NoDuplicates);
    /// assert!(output.groups.is_empty());
    /// assert_eq!(output.summary.exit_code, 2);
    /// ```
    #[must_use]
    pub fn new(
        groups: &[DuplicateGroup],
        keys: &[Option<String>],
        summary: &ScanSummary,
        exit_code: ExitCode,
    ) -> Self {
        let failures = summary
            .scan_errors
            .iter()
            .map(|e| JsonFailure {
                path: scan_error_path(e),
                error: e.to_string(),
                content_only: false,
            })
            .chain(summary.file_failures.iter().map(|f| JsonFailure {
                path: path_string(&f.path),
                error: f.error.to_string(),
                content_only: f.error.is_metadata_error(),
            }))
            .collect();

        Self {
            groups: groups
                .iter()
                .enumerate()
                .map(|(i, g)| {
                    JsonDuplicateGroup::from_duplicate_group(g, keys.get(i).cloned().flatten())
                })
                .collect(),
            failures,
            summary: JsonSummary::from_scan_summary(summary, exit_code),
        }
    }

    /// Serialize to compact JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize to pretty-printed JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write JSON followed by a newline.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write_to<W: Write>(&self, writer: &mut W, pretty: bool) -> Result<(), JsonOutputError> {
        let json = if pretty {
            self.to_json_pretty()?
        } else {
            self.to_json()?
        };
        writer.write_all(json.as_bytes())?;
        writer.write_all(b"\n")?;
        Ok(())
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn scan_error_path(error: &crate::scanner::ScanError) -> String {
    use crate::scanner::ScanError;
    match error {
        ScanError::PermissionDenied(p)
        | ScanError::NotFound(p)
        | ScanError::NotADirectory(p)
        | ScanError::NotAFile(p)
        | ScanError::Io { path: p, .. } => path_string(p),
    }
}

/// Errors that can occur during JSON output.
#[derive(thiserror::Error, Debug)]
pub enum JsonOutputError {
    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error while writing report: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duplicates::FileFailure;
    use crate::fingerprint::FingerprintError;
    use crate::scanner::{FileIdentity, ScanError};
    use std::path::PathBuf;
    use std::time::Duration;

    fn file(path: &str, size: u64) -> FileIdentity {
        FileIdentity::new(PathBuf::from(path), size, 7)
    }

    fn groups() -> Vec<DuplicateGroup> {
        vec![
            DuplicateGroup::new(
                vec![file("/v/a.mp4", 100), file("/v/b.mp4", 100)],
                MatchKind::Exact,
                Some([0xab; 32]),
            )
            .unwrap(),
            DuplicateGroup::new(
                vec![
                    file("/v/c.mkv", 300),
                    file("/v/d.mkv", 200),
                    file("/v/e.mkv", 100),
                ],
                MatchKind::NearDuplicate,
                None,
            )
            .unwrap(),
        ]
    }

    #[test]
    fn test_groups_carry_keeper_and_actions() {
        let keys = vec![Some("k1".to_string())];
        let output = JsonOutput::new(&groups(), &keys, &ScanSummary::default(), ExitCode::Success);

        let exact = &output.groups[0];
        assert_eq!(exact.keeper, "/v/a.mp4");
        assert_eq!(exact.hash.as_deref(), Some("ab".repeat(32).as_str()));
        assert_eq!(exact.key.as_deref(), Some("k1"));
        assert_eq!(exact.actions.len(), 1);
        assert_eq!(exact.actions[0].action, Action::Delete);
        assert_eq!(exact.actions[0].target, "/v/b.mp4");

        let near = &output.groups[1];
        assert!(near.hash.is_none());
        assert!(near.key.is_none());
        assert_eq!(near.members.len(), 3);
        assert!(near.actions.iter().all(|a| a.action == Action::Merge));
        assert_eq!(near.reclaimable_space, 300);
    }

    #[test]
    fn test_failures_are_listed() {
        let summary = ScanSummary {
            scan_errors: vec![ScanError::PermissionDenied(PathBuf::from("/locked"))],
            file_failures: vec![FileFailure {
                path: PathBuf::from("/v/odd.mp4"),
                error: FingerprintError::UnsupportedFormat(PathBuf::from("/v/odd.mp4")),
            }],
            ..ScanSummary::default()
        };
        let output = JsonOutput::new(&[], &[], &summary, ExitCode::PartialSuccess);

        assert_eq!(output.failures.len(), 2);
        assert_eq!(output.failures[0].path, "/locked");
        assert!(!output.failures[0].content_only);
        assert_eq!(output.failures[1].path, "/v/odd.mp4");
        assert!(output.failures[1].content_only);
        assert_eq!(output.summary.exit_code_name, "VD003");
    }

    #[test]
    fn test_json_shape() {
        let summary = ScanSummary {
            total_files: 5,
            duplicate_groups: 2,
            scan_duration: Duration::from_millis(1234),
            ..ScanSummary::default()
        };
        let output = JsonOutput::new(&groups(), &[], &summary, ExitCode::Success);
        let value: serde_json::Value = serde_json::from_str(&output.to_json().unwrap()).unwrap();

        assert_eq!(value["groups"][0]["match_kind"], "exact");
        assert_eq!(value["groups"][1]["match_kind"], "near_duplicate");
        assert_eq!(value["summary"]["scan_duration_ms"], 1234);
        assert_eq!(value["summary"]["exit_code"], 0);
        assert!(value["summary"].get("cache_entries_written").is_none());
    }

    #[test]
    fn test_write_to_appends_newline() {
        let output = JsonOutput::new(&[], &[], &ScanSummary::default(), ExitCode::NoDuplicates);
        let mut buf = Vec::new();
        output.write_to(&mut buf, true).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.ends_with("}\n"));
        assert!(text.contains('\n'));
    }
}
