use super::sample_unit;
use crate::db::*;
use tempfile::NamedTempFile;

/// Querying after the pool is closed returns an error rather than hanging
#[tokio::test]
async fn test_find_unit_after_pool_close_returns_error() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    db.save_unit(&sample_unit("foo", "1.0", "foo-1.0.tar.gz"))
        .await
        .unwrap();
    assert!(
        db.find_unit_by_filename("foo-1.0.tar.gz")
            .await
            .unwrap()
            .is_some()
    );

    db.pool().close().await;

    let result = db.find_unit_by_filename("foo-1.0.tar.gz").await;
    assert!(
        result.is_err(),
        "find_unit_by_filename after pool close should return an error, got: {:?}",
        result
    );
}

#[tokio::test]
async fn test_save_after_pool_close_returns_error() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    db.pool().close().await;

    let result = db
        .save_unit(&sample_unit("foo", "1.0", "foo-1.0.tar.gz"))
        .await;
    assert!(result.is_err());
}
