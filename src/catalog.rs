//! Catalog seam used by the content phase.
//!
//! [`ContentFetcher`](crate::fetch::ContentFetcher) only needs to save units,
//! associate them and refresh counts. [`Database`] is the production
//! implementation; tests substitute in-memory catalogs to inject failures.

use crate::Result;
use crate::db::{Database, SaveOutcome};
use crate::types::{RepositoryId, UnitId};
use crate::unit::PackageUnit;
use async_trait::async_trait;

/// Persistent record of units and their repository membership
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Create the repository if needed
    async fn ensure_repository(&self, repository: &RepositoryId) -> Result<()>;

    /// Save a unit; duplicate filenames yield [`SaveOutcome::AlreadyPresent`]
    async fn save(&self, unit: &PackageUnit) -> Result<SaveOutcome>;

    /// Associate a saved unit with a repository (idempotent)
    async fn associate(&self, repository: &RepositoryId, unit: UnitId) -> Result<()>;

    /// Recompute the repository's content counts, returning the package count
    async fn rebuild_counts(&self, repository: &RepositoryId) -> Result<i64>;
}

#[async_trait]
impl Catalog for Database {
    async fn ensure_repository(&self, repository: &RepositoryId) -> Result<()> {
        Database::ensure_repository(self, repository).await
    }

    async fn save(&self, unit: &PackageUnit) -> Result<SaveOutcome> {
        self.save_unit(unit).await
    }

    async fn associate(&self, repository: &RepositoryId, unit: UnitId) -> Result<()> {
        self.associate_unit(repository, unit).await.map(|_| ())
    }

    async fn rebuild_counts(&self, repository: &RepositoryId) -> Result<i64> {
        self.rebuild_content_counts(repository).await
    }
}
