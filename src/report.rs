//! Resolution Report
//!
//! One entry per placeholder, in document order of the owning blocks.
//! The report is a pure output; nothing reads it back during resolution.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Resolved,
    MissingEntry,
    MissingFile,
    HashMismatch,
    DecodeError,
    UnsupportedSpec,
}

impl ReportStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReportStatus::Resolved => "resolved",
            ReportStatus::MissingEntry => "missing_entry",
            ReportStatus::MissingFile => "missing_file",
            ReportStatus::HashMismatch => "hash_mismatch",
            ReportStatus::DecodeError => "decode_error",
            ReportStatus::UnsupportedSpec => "unsupported_spec",
        }
    }

    pub fn is_resolved(self) -> bool {
        self == ReportStatus::Resolved
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub id: String,
    pub status: ReportStatus,
    pub detail: String,
}

impl ReportEntry {
    pub fn new(id: impl Into<String>, status: ReportStatus, detail: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status,
            detail: detail.into(),
        }
    }
}

/// Serialized as a bare JSON array of entries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResolutionReport {
    pub entries: Vec<ReportEntry>,
}

impl ResolutionReport {
    pub fn new(entries: Vec<ReportEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ReportEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Entries whose status is anything but `resolved`
    pub fn failures(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries.iter().filter(|e| !e.status.is_resolved())
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn counts(&self) -> BTreeMap<ReportStatus, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.entries {
            *counts.entry(entry.status).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_array() {
        let report = ResolutionReport::new(vec![ReportEntry::new(
            "metric.x.v1",
            ReportStatus::HashMismatch,
            "expected abc123",
        )]);
        let json = serde_json::to_string(&report).unwrap();
        assert_eq!(
            json,
            r#"[{"id":"metric.x.v1","status":"hash_mismatch","detail":"expected abc123"}]"#
        );
    }

    #[test]
    fn counts_and_failures() {
        let report = ResolutionReport::new(vec![
            ReportEntry::new("a", ReportStatus::Resolved, ""),
            ReportEntry::new("b", ReportStatus::DecodeError, "bad row"),
            ReportEntry::new("c", ReportStatus::Resolved, ""),
        ]);
        assert_eq!(report.counts()[&ReportStatus::Resolved], 2);
        assert_eq!(report.failures().count(), 1);
        assert!(!report.is_clean());
        assert!(ResolutionReport::default().is_clean());
    }
}
