//! Resolution Policy - Status/Action Separation
//!
//! The resolver only produces statuses.
//! Policy maps each status to what happens to the build.

use serde::{Deserialize, Serialize};

use crate::report::{ReportStatus, ResolutionReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    /// Any unresolved placeholder fails the build
    #[default]
    Strict,
    /// Unresolved placeholders become visible stubs
    Lenient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Splice the decoded fragment
    Splice,
    /// Leave an inert stub and keep going
    Stub,
    /// Leave a stub, fail the build after the pass
    Fail,
    /// Fail the build after the pass, whatever the mode
    Abort,
}

impl Action {
    pub fn is_fatal(self) -> bool {
        matches!(self, Action::Fail | Action::Abort)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResolutionPolicy {
    pub mode: FailureMode,
}

impl ResolutionPolicy {
    pub fn new(mode: FailureMode) -> Self {
        Self { mode }
    }

    pub fn action(&self, status: ReportStatus) -> Action {
        match (status, self.mode) {
            (ReportStatus::Resolved, _) => Action::Splice,
            // Changed evidence is never tolerated
            (ReportStatus::HashMismatch, _) => Action::Abort,
            (_, FailureMode::Strict) => Action::Fail,
            (_, FailureMode::Lenient) => Action::Stub,
        }
    }

    /// Verdict over a finished report
    pub fn verdict(&self, report: &ResolutionReport) -> Verdict {
        let mut verdict = Verdict::default();
        for entry in &report.entries {
            match self.action(entry.status) {
                Action::Splice => {}
                Action::Stub => verdict.stubbed.push(entry.id.clone()),
                Action::Fail => verdict.failed.push(entry.id.clone()),
                Action::Abort => verdict.aborted.push(entry.id.clone()),
            }
        }
        verdict
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Verdict {
    pub stubbed: Vec<String>,
    pub failed: Vec<String>,
    pub aborted: Vec<String>,
}

impl Verdict {
    pub fn passes(&self) -> bool {
        self.failed.is_empty() && self.aborted.is_empty()
    }
}
