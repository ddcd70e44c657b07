//! Unit storage keyed by filename.

use crate::error::DatabaseError;
use crate::types::UnitId;
use crate::unit::PackageUnit;
use crate::{Error, Result};

use super::{Database, SaveOutcome, UnitRow};

const UNIT_COLUMNS: &str = r#"
    id, filename, name, version, url, packagetype, checksum_type, checksum,
    storage_path, size_bytes, metadata, created_at
"#;

fn query_failed(what: &str, e: sqlx::Error) -> Error {
    Error::Database(DatabaseError::QueryFailed(format!(
        "Failed to {}: {}",
        what, e
    )))
}

impl Database {
    /// Save a unit under the filename uniqueness constraint
    ///
    /// Returns [`SaveOutcome::AlreadyPresent`] with the existing id when a
    /// unit with the same filename is already cataloged; the existing row is
    /// left untouched.
    pub async fn save_unit(&self, unit: &PackageUnit) -> Result<SaveOutcome> {
        let metadata = serde_json::to_string(&unit.record)?;
        let storage_path = unit
            .bookkeeping
            .storage_path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned());
        let size_bytes = unit.record.size.map(|s| s as i64);
        let now = chrono::Utc::now().timestamp();

        let inserted = sqlx::query(
            r#"
            INSERT INTO units (
                filename, name, version, url, packagetype, checksum_type,
                checksum, storage_path, size_bytes, metadata, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(unit.filename())
        .bind(&unit.record.name)
        .bind(&unit.record.version)
        .bind(&unit.record.url)
        .bind(&unit.record.packagetype)
        .bind(unit.bookkeeping.checksum.algorithm.as_str())
        .bind(&unit.bookkeeping.checksum.value)
        .bind(storage_path)
        .bind(size_bytes)
        .bind(metadata)
        .bind(now)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(result) => Ok(SaveOutcome::Saved(UnitId(result.last_insert_rowid()))),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                let existing = self
                    .find_unit_by_filename(unit.filename())
                    .await?
                    .ok_or_else(|| {
                        Error::Database(DatabaseError::NotFound(format!(
                            "unit {} reported duplicate but was not found",
                            unit.filename()
                        )))
                    })?;
                tracing::debug!(
                    filename = unit.filename(),
                    unit_id = existing.id.get(),
                    "unit already cataloged"
                );
                Ok(SaveOutcome::AlreadyPresent(existing.id))
            }
            Err(e) => Err(query_failed("insert unit", e)),
        }
    }

    /// Look up a unit by its filename
    pub async fn find_unit_by_filename(&self, filename: &str) -> Result<Option<UnitRow>> {
        sqlx::query_as::<_, UnitRow>(&format!(
            "SELECT {UNIT_COLUMNS} FROM units WHERE filename = ? LIMIT 1"
        ))
        .bind(filename)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("find unit by filename", e))
    }

    /// Look up a unit by id
    pub async fn get_unit(&self, id: UnitId) -> Result<Option<UnitRow>> {
        sqlx::query_as::<_, UnitRow>(&format!("SELECT {UNIT_COLUMNS} FROM units WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| query_failed("get unit", e))
    }

    /// All units of one project, newest first
    pub async fn packages_by_project(&self, name: &str) -> Result<Vec<UnitRow>> {
        sqlx::query_as::<_, UnitRow>(&format!(
            "SELECT {UNIT_COLUMNS} FROM units WHERE name = ? ORDER BY created_at DESC, id DESC"
        ))
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("list units by project", e))
    }

    /// Number of units in the catalog
    pub async fn count_units(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM units")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| query_failed("count units", e))
    }
}
