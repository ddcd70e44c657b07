//! Core types for pypi-sync

use serde::{Deserialize, Serialize};

use crate::error::FailureKind;

/// Catalog identifier of a stored unit
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub i64);

impl UnitId {
    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for UnitId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for UnitId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for UnitId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for UnitId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Identifier of the repository units are associated with
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepositoryId(pub String);

impl RepositoryId {
    /// Create a repository id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content type recorded in repository content counts
pub const PYTHON_PACKAGE_TYPE: &str = "python_package";

/// Where a sync run currently is
///
/// `Initialized → MetadataPhase → ContentPhase → Finalizing → Done`, with
/// `Cancelled` reachable from either fetch phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    /// Inputs captured, nothing fetched yet
    Initialized,
    /// Fetching and parsing manifests
    MetadataPhase,
    /// Downloading, verifying and committing artifacts
    ContentPhase,
    /// Rebuilding repository counts and assembling the report
    Finalizing,
    /// Run finished
    Done,
    /// Run stopped early; committed units are kept
    Cancelled,
}

impl SyncPhase {
    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncPhase::Done | SyncPhase::Cancelled)
    }

    /// Whether moving to `next` is a legal transition
    pub fn can_transition_to(&self, next: SyncPhase) -> bool {
        use SyncPhase::*;
        matches!(
            (self, next),
            (Initialized, MetadataPhase)
                | (MetadataPhase, ContentPhase)
                | (ContentPhase, Finalizing)
                | (Finalizing, Done)
                | (MetadataPhase, Cancelled)
                | (ContentPhase, Cancelled)
        )
    }
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncPhase::Initialized => "initialized",
            SyncPhase::MetadataPhase => "metadata",
            SyncPhase::ContentPhase => "content",
            SyncPhase::Finalizing => "finalizing",
            SyncPhase::Done => "done",
            SyncPhase::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Events emitted during a sync run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// The run moved to a new phase
    PhaseChanged {
        /// Repository being synced
        repository: RepositoryId,
        /// New phase
        phase: SyncPhase,
    },

    /// A manifest was fetched and parsed
    ManifestProcessed {
        /// Package name
        package: String,
        /// Number of release files found
        artifacts: usize,
    },

    /// A manifest could not be fetched or parsed
    ManifestFailed {
        /// Package name
        package: String,
        /// Why it failed
        failure: FailureKind,
    },

    /// An artifact was verified and committed
    ArtifactCommitted {
        /// Artifact filename
        filename: String,
    },

    /// An artifact was already in the catalog
    ArtifactAlreadyPresent {
        /// Artifact filename
        filename: String,
    },

    /// An artifact could not be committed
    ArtifactFailed {
        /// Artifact filename
        filename: String,
        /// Why it failed
        failure: FailureKind,
    },

    /// The run finished (successfully or not)
    SyncFinished {
        /// Repository that was synced
        repository: RepositoryId,
        /// Whether zero failures were recorded
        success: bool,
        /// Whether the run was cancelled
        cancelled: bool,
    },
}
