//! Aggregated result of a sync run.

use crate::error::FailureKind;
use serde::{Deserialize, Serialize};

/// Pipeline phase a failure was recorded in
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePhase {
    /// Manifest fetch or parse
    Metadata,
    /// Artifact download, verification or commit
    Content,
    /// Repository count rebuild
    Finalize,
}

/// One package or artifact that could not be synchronized
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    /// Where it failed
    pub phase: FailurePhase,
    /// Package name (metadata phase) or artifact filename (content phase)
    pub subject: String,
    /// Why it failed
    pub kind: FailureKind,
}

impl SyncFailure {
    /// Failure of a whole package during discovery
    pub fn metadata(package: impl Into<String>, kind: FailureKind) -> Self {
        Self {
            phase: FailurePhase::Metadata,
            subject: package.into(),
            kind,
        }
    }

    /// Failure of one artifact during content fetch
    pub fn content(filename: impl Into<String>, kind: FailureKind) -> Self {
        Self {
            phase: FailurePhase::Content,
            subject: filename.into(),
            kind,
        }
    }

    /// Failure while finalizing the repository
    pub fn finalize(repository: impl Into<String>, kind: FailureKind) -> Self {
        Self {
            phase: FailurePhase::Finalize,
            subject: repository.into(),
            kind,
        }
    }
}

impl std::fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.subject, self.kind)
    }
}

/// Result of a sync run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Candidate artifacts found across all manifests
    pub discovered: usize,
    /// Artifacts newly committed in this run
    pub committed: usize,
    /// Artifacts whose filename was already cataloged
    pub already_present: usize,
    /// Every package or artifact that failed, in the order observed
    pub failures: Vec<SyncFailure>,
    /// Whether the run stopped early on cancellation
    pub cancelled: bool,
}

impl SyncReport {
    /// True iff no failures were recorded in either phase
    pub fn success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failures recorded in one phase
    pub fn failures_in(&self, phase: FailurePhase) -> impl Iterator<Item = &SyncFailure> {
        self.failures.iter().filter(move |f| f.phase == phase)
    }

    /// Failure recorded for a package name or filename, if any
    pub fn failure_for(&self, subject: &str) -> Option<&SyncFailure> {
        self.failures.iter().find(|f| f.subject == subject)
    }
}
