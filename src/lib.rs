//! # pypi-sync
//!
//! Library for mirroring Python package index releases into a local,
//! content-addressed repository.
//!
//! A sync runs in two fetch phases followed by a short finalization:
//! - **Metadata** - fetch each configured package's JSON manifest and turn
//!   every release artifact into a candidate unit
//! - **Content** - download candidates with bounded concurrency, verify each
//!   against its upstream digest, move it into the content store and record it
//!   in the catalog
//! - **Finalizing** - rebuild the repository's content counts
//!
//! Failures of single packages or artifacts are collected in the
//! [`SyncReport`]; they never abort the run.
//!
//! ## Quick Start
//!
//! ```no_run
//! use pypi_sync::{Config, PackageNames, RepositoryId, Syncer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config {
//!         feed: Some("https://pypi.org/".to_string()),
//!         package_names: PackageNames::parse("sampleproject"),
//!         ..Default::default()
//!     };
//!
//!     let syncer = Syncer::new(config).await?;
//!
//!     // Subscribe to events
//!     let mut events = syncer.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let report = syncer.sync(&RepositoryId::new("pypi-mirror")).await?;
//!     println!("committed {} of {}", report.committed, report.discovered);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Catalog seam used by the content phase
pub mod catalog;
/// Digest algorithms and file hashing
pub mod checksum;
/// Configuration types
pub mod config;
/// Catalog database
pub mod db;
/// Error types
pub mod error;
/// Metadata and content fetch phases
pub mod fetch;
/// Core metadata extraction from sdists and wheels
pub mod inspect;
/// Sync run report
pub mod report;
/// Retry logic with exponential backoff
pub mod retry;
/// Content-addressed artifact store
pub mod storage;
/// Sync orchestration
pub mod syncer;
/// Bounded-concurrency download transport
pub mod transport;
/// Core types and events
pub mod types;
/// Package units and manifest records
pub mod unit;

// Re-export commonly used types
pub use catalog::Catalog;
pub use checksum::{Checksum, ChecksumType};
pub use config::{ChecksumConfig, Config, PackageNames, PersistenceConfig, TransportConfig};
pub use db::{Database, SaveOutcome};
pub use error::{
    DatabaseError, Error, FailureKind, ManifestError, Result, StorageError, TransportError,
};
pub use report::{FailurePhase, SyncFailure, SyncReport};
pub use storage::ContentStore;
pub use syncer::Syncer;
pub use transport::{DownloadTransport, HttpTransport};
pub use types::{Event, RepositoryId, SyncPhase, UnitId};
pub use unit::{ArtifactRecord, PackageMetadata, PackageUnit};

/// Run a sync, cancelling it when a termination signal arrives.
///
/// On a signal the syncer is cancelled and the run is awaited, so the returned
/// report reflects every unit committed before the stop.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use pypi_sync::{Config, RepositoryId, Syncer, sync_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::load("pypi-sync.json".as_ref()).await?;
///     let syncer = Syncer::new(config).await?;
///
///     let report = sync_with_shutdown(&syncer, &RepositoryId::new("pypi-mirror")).await?;
///     if report.cancelled {
///         eprintln!("sync interrupted");
///     }
///
///     Ok(())
/// }
/// ```
pub async fn sync_with_shutdown(syncer: &Syncer, repository: &RepositoryId) -> Result<SyncReport> {
    let run = syncer.sync(repository);
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => result,
        _ = wait_for_signal() => {
            syncer.cancel();
            run.await
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(_), Err(e)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}
