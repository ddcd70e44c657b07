//! Content-addressed store for verified artifacts.
//!
//! Files are laid out as
//! `<root>/units/python/<algorithm>/<hex[0..2]>/<hex>/<filename>`, so two
//! artifacts can only collide when their verified digests are equal.

use crate::error::StorageError;
use crate::unit::PackageUnit;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Filesystem content store rooted at a directory
#[derive(Clone, Debug)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    /// Create a store rooted at `root`. Directories are created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final storage location for a unit, derived from its checksum
    pub fn storage_path_for(&self, unit: &PackageUnit) -> PathBuf {
        let checksum = &unit.bookkeeping.checksum;
        let prefix = checksum.value.get(..2).unwrap_or(&checksum.value);
        self.root
            .join("units")
            .join("python")
            .join(checksum.algorithm.as_str())
            .join(prefix)
            .join(&checksum.value)
            .join(unit.filename())
    }

    /// Whether `path` names an entry strictly beneath the root
    fn contains(&self, path: &Path) -> bool {
        match path.strip_prefix(&self.root) {
            Ok(rest) => {
                rest.components().next().is_some()
                    && rest.components().all(|c| matches!(c, Component::Normal(_)))
            }
            Err(_) => false,
        }
    }

    /// Move a verified working file to the unit's storage path
    ///
    /// The unit must already carry its storage path, and it must lie beneath
    /// the store root. If an object is already
    /// stored there, the working file is discarded and the stored object is
    /// kept.
    pub async fn import_content(
        &self,
        unit: &PackageUnit,
        working_file: &Path,
    ) -> Result<PathBuf, StorageError> {
        let destination = unit.bookkeeping.storage_path.clone().ok_or_else(|| {
            StorageError::NoStoragePath {
                filename: unit.filename().to_string(),
            }
        })?;
        if !self.contains(&destination) {
            return Err(StorageError::OutsideRoot { path: destination });
        }

        let move_failed = |reason: String| StorageError::MoveFailed {
            source_path: working_file.to_path_buf(),
            dest_path: destination.clone(),
            reason,
        };

        if fs::try_exists(&destination).await.unwrap_or(false) {
            debug!(?destination, "content already stored");
            discard_working_file(working_file).await;
            return Ok(destination);
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| move_failed(format!("failed to create directory: {e}")))?;
        }

        if let Err(rename_err) = fs::rename(working_file, &destination).await {
            // Working dir and store may be on different filesystems
            debug!(error = %rename_err, "rename failed, falling back to copy");
            if let Err(e) = fs::copy(working_file, &destination).await {
                let _ = fs::remove_file(&destination).await;
                return Err(move_failed(e.to_string()));
            }
            discard_working_file(working_file).await;
        }

        debug!(?working_file, ?destination, "imported content");
        Ok(destination)
    }
}

/// Remove a working file, ignoring files that are already gone
pub async fn discard_working_file(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(?path, error = %e, "failed to remove working file"),
    }
}
