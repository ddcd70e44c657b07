//! Repository associations and content counts.

use crate::error::DatabaseError;
use crate::types::{PYTHON_PACKAGE_TYPE, RepositoryId, UnitId};
use crate::{Error, Result};

use super::{Database, UnitRow};

fn query_failed(what: &str, e: sqlx::Error) -> Error {
    Error::Database(DatabaseError::QueryFailed(format!(
        "Failed to {}: {}",
        what, e
    )))
}

impl Database {
    /// Create the repository row if it doesn't exist yet
    pub async fn ensure_repository(&self, repository: &RepositoryId) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("INSERT OR IGNORE INTO repositories (id, created_at) VALUES (?, ?)")
            .bind(repository.as_str())
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| query_failed("create repository", e))?;
        Ok(())
    }

    /// Associate a unit with a repository
    ///
    /// Idempotent: associating an already-associated unit is a no-op.
    /// Returns whether a new association was created.
    pub async fn associate_unit(&self, repository: &RepositoryId, unit: UnitId) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO repository_units (repository_id, unit_id, created_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(repository.as_str())
        .bind(unit)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("associate unit", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Recompute the stored package count for a repository
    ///
    /// Returns the new count.
    pub async fn rebuild_content_counts(&self, repository: &RepositoryId) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM repository_units WHERE repository_id = ?")
                .bind(repository.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| query_failed("count repository units", e))?;

        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO repository_content_counts (repository_id, content_type, count, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(repository_id, content_type)
            DO UPDATE SET count = excluded.count, updated_at = excluded.updated_at
            "#,
        )
        .bind(repository.as_str())
        .bind(PYTHON_PACKAGE_TYPE)
        .bind(count)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("store content count", e))?;

        Ok(count)
    }

    /// Last stored package count for a repository, if counts were ever rebuilt
    pub async fn content_count(&self, repository: &RepositoryId) -> Result<Option<i64>> {
        sqlx::query_scalar(
            r#"
            SELECT count FROM repository_content_counts
            WHERE repository_id = ? AND content_type = ?
            "#,
        )
        .bind(repository.as_str())
        .bind(PYTHON_PACKAGE_TYPE)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("read content count", e))
    }

    /// Units associated with a repository, ordered by filename
    pub async fn units_in_repository(&self, repository: &RepositoryId) -> Result<Vec<UnitRow>> {
        sqlx::query_as::<_, UnitRow>(
            r#"
            SELECT
                u.id, u.filename, u.name, u.version, u.url, u.packagetype,
                u.checksum_type, u.checksum, u.storage_path, u.size_bytes,
                u.metadata, u.created_at
            FROM units u
            JOIN repository_units ru ON ru.unit_id = u.id
            WHERE ru.repository_id = ?
            ORDER BY u.filename
            "#,
        )
        .bind(repository.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("list repository units", e))
    }
}
