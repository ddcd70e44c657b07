//! Database lifecycle and schema migrations.

use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::SqliteConnection;
use sqlx::sqlite::SqlitePool;
use std::path::Path;

use super::Database;

fn migration_failed(what: &str, e: sqlx::Error) -> Error {
    Error::Database(DatabaseError::MigrationFailed(format!(
        "Failed to {}: {}",
        what, e
    )))
}

impl Database {
    /// Open (or create) the catalog at `path`
    ///
    /// Creates the database file and parent directories if they don't exist
    /// and runs migrations.
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory: {}",
                    e
                )))
            })?;
        }

        use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to parse database path: {}",
                    e
                )))
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to connect to database: {}",
                e
            )))
        })?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| migration_failed("create schema_version table", e))?;

        let current_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to query schema version: {}",
                        e
                    )))
                })?;

        if current_version.unwrap_or(0) < 1 {
            Self::migrate_v1(&mut conn).await?;
        }

        Ok(())
    }

    /// Migration v1: units, repositories, associations and content counts
    async fn migrate_v1(conn: &mut SqliteConnection) -> Result<()> {
        tracing::info!("Applying database migration v1");

        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(|e| migration_failed("begin transaction", e))?;

        let result = async {
            Self::create_units_schema(conn).await?;
            Self::create_repositories_schema(conn).await?;
            Self::record_migration(conn, 1).await?;
            Ok::<(), Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| migration_failed("commit migration v1", e))?;
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                return Err(e);
            }
        }

        tracing::info!("Database migration v1 complete");
        Ok(())
    }

    async fn create_units_schema(conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE units (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                version TEXT NOT NULL,
                url TEXT NOT NULL,
                packagetype TEXT,
                checksum_type TEXT NOT NULL,
                checksum TEXT NOT NULL,
                storage_path TEXT,
                size_bytes INTEGER,
                metadata TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| migration_failed("create units table", e))?;

        sqlx::query("CREATE INDEX idx_units_name ON units(name)")
            .execute(&mut *conn)
            .await
            .map_err(|e| migration_failed("create index", e))?;

        Ok(())
    }

    async fn create_repositories_schema(conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE repositories (
                id TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| migration_failed("create repositories table", e))?;

        sqlx::query(
            r#"
            CREATE TABLE repository_units (
                repository_id TEXT NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
                unit_id INTEGER NOT NULL REFERENCES units(id) ON DELETE CASCADE,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (repository_id, unit_id)
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| migration_failed("create repository_units table", e))?;

        sqlx::query(
            r#"
            CREATE TABLE repository_content_counts (
                repository_id TEXT NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
                content_type TEXT NOT NULL,
                count INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (repository_id, content_type)
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| migration_failed("create repository_content_counts table", e))?;

        Ok(())
    }

    async fn record_migration(conn: &mut SqliteConnection, version: i32) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(|e| migration_failed("record migration", e))?;

        Ok(())
    }

    /// Close the database connection
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
