//! Catalog database for pypi-sync
//!
//! Handles SQLite persistence for package units and their repository
//! associations.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - `migrations`: Database lifecycle, schema migrations
//! - `units`: Unit storage under the filename uniqueness constraint
//! - `repositories`: Repository associations and content counts

use crate::checksum::{Checksum, ChecksumType};
use crate::types::UnitId;
use crate::unit::{ArtifactRecord, PackageUnit, UnitBookkeeping};
use sqlx::{FromRow, sqlite::SqlitePool};
use std::path::PathBuf;

mod migrations;
mod repositories;
mod units;

/// Outcome of saving a unit under the filename uniqueness constraint
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    /// A new unit row was written
    Saved(UnitId),
    /// A unit with this filename already existed; nothing was written
    AlreadyPresent(UnitId),
}

impl SaveOutcome {
    /// Id of the saved or pre-existing unit
    pub fn unit_id(&self) -> UnitId {
        match self {
            SaveOutcome::Saved(id) | SaveOutcome::AlreadyPresent(id) => *id,
        }
    }
}

/// Unit record from database
#[derive(Debug, Clone, FromRow)]
pub struct UnitRow {
    /// Unique database ID
    pub id: UnitId,
    /// Filename (unique key)
    pub filename: String,
    /// Project name
    pub name: String,
    /// Release version
    pub version: String,
    /// Source download URL
    pub url: String,
    /// Distribution type
    pub packagetype: Option<String>,
    /// Algorithm of `checksum`
    pub checksum_type: String,
    /// Verified digest
    pub checksum: String,
    /// Location in the content store
    pub storage_path: Option<String>,
    /// Size in bytes
    pub size_bytes: Option<i64>,
    /// Full [`ArtifactRecord`] serialized as JSON
    pub metadata: String,
    /// Unix timestamp when the unit was first saved
    pub created_at: i64,
}

impl UnitRow {
    /// Rebuild the in-memory unit from its row
    pub fn to_unit(&self) -> crate::Result<PackageUnit> {
        let record: ArtifactRecord = serde_json::from_str(&self.metadata)?;
        let algorithm: ChecksumType = self.checksum_type.parse().map_err(|e: String| {
            crate::Error::Database(crate::error::DatabaseError::QueryFailed(format!(
                "unit {} has invalid checksum type: {}",
                self.id, e
            )))
        })?;
        Ok(PackageUnit {
            record,
            bookkeeping: UnitBookkeeping {
                checksum: Checksum::new(algorithm, self.checksum.clone()),
                storage_path: self.storage_path.as_ref().map(PathBuf::from),
            },
        })
    }
}

/// Database handle for the catalog
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
