//! Artifact download, verification and commit.

use crate::catalog::Catalog;
use crate::checksum::checksum_file_async;
use crate::db::SaveOutcome;
use crate::error::FailureKind;
use crate::inspect::read_package_metadata_async;
use crate::report::{SyncFailure, SyncReport};
use crate::storage::{ContentStore, discard_working_file};
use crate::transport::{
    Destination, DownloadOutcome, DownloadRequest, DownloadTransport, OutcomeHandler, run_requests,
};
use crate::types::{Event, RepositoryId};
use crate::unit::PackageUnit;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A candidate paired with the working file it downloads to
#[derive(Debug)]
struct Candidate {
    unit: PackageUnit,
    working_file: PathBuf,
}

/// How a verified artifact ended up in the catalog
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Committed {
    New,
    AlreadyPresent,
}

/// Downloads candidates and commits verified artifacts
pub struct ContentFetcher {
    transport: Arc<dyn DownloadTransport>,
    catalog: Arc<dyn Catalog>,
    store: ContentStore,
    event_tx: broadcast::Sender<Event>,
}

impl ContentFetcher {
    /// Create a fetcher committing into `catalog` and `store`
    pub fn new(
        transport: Arc<dyn DownloadTransport>,
        catalog: Arc<dyn Catalog>,
        store: ContentStore,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            transport,
            catalog,
            store,
            event_tx,
        }
    }

    /// Download every candidate into `working_dir` and commit the verified ones
    ///
    /// The returned report counts every candidate as discovered. Per-artifact
    /// failures are recorded and never stop the others. An unusable working
    /// directory is one failure for the whole phase and nothing is requested. Cancellation stops new
    /// downloads; units already committed stay committed.
    pub async fn fetch(
        &self,
        candidates: Vec<PackageUnit>,
        working_dir: &Path,
        repository: &RepositoryId,
        cancel: &CancellationToken,
    ) -> SyncReport {
        if let Err(e) = tokio::fs::create_dir_all(working_dir).await {
            warn!(?working_dir, error = %e, "failed to create working directory");
            return SyncReport {
                discovered: candidates.len(),
                failures: vec![SyncFailure::content(
                    working_dir.display().to_string(),
                    FailureKind::StorageFailure {
                        reason: format!("failed to create working directory: {e}"),
                    },
                )],
                cancelled: cancel.is_cancelled(),
                ..Default::default()
            };
        }

        let mut handler = CommitHandler {
            catalog: self.catalog.as_ref(),
            store: &self.store,
            repository,
            event_tx: &self.event_tx,
            report: SyncReport {
                discovered: candidates.len(),
                ..Default::default()
            },
        };

        let requests = candidates.into_iter().map(|unit| {
            let working_file = working_dir.join(working_file_name(&unit));
            DownloadRequest {
                url: unit.record.url.clone(),
                destination: Destination::File(working_file.clone()),
                tag: Candidate { unit, working_file },
            }
        });

        run_requests(&self.transport, requests, cancel, &mut handler).await;

        let mut report = handler.report;
        report.cancelled = cancel.is_cancelled();
        info!(
            committed = report.committed,
            already_present = report.already_present,
            failures = report.failures.len(),
            cancelled = report.cancelled,
            "content fetch finished"
        );
        report
    }
}

/// Last path segment of the artifact URL, falling back to the filename
fn working_file_name(unit: &PackageUnit) -> String {
    url::Url::parse(&unit.record.url)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|name| !name.is_empty() && name != "." && name != "..")
        .unwrap_or_else(|| unit.filename().to_string())
}

struct CommitHandler<'a> {
    catalog: &'a dyn Catalog,
    store: &'a ContentStore,
    repository: &'a RepositoryId,
    event_tx: &'a broadcast::Sender<Event>,
    report: SyncReport,
}

impl CommitHandler<'_> {
    fn fail(&mut self, filename: &str, kind: FailureKind) {
        warn!(filename = %filename, error = %kind, "artifact failed");
        self.event_tx
            .send(Event::ArtifactFailed {
                filename: filename.to_string(),
                failure: kind.clone(),
            })
            .ok();
        self.report
            .failures
            .push(SyncFailure::content(filename, kind));
    }

    async fn commit(
        &self,
        mut unit: PackageUnit,
        working_file: &Path,
    ) -> Result<Committed, FailureKind> {
        let expected = unit.bookkeeping.checksum.clone();
        let actual = checksum_file_async(working_file, expected.algorithm)
            .await
            .map_err(|e| FailureKind::StorageFailure {
                reason: e.to_string(),
            })?;
        if !actual.matches(&expected) {
            return Err(FailureKind::ChecksumMismatch {
                algorithm: expected.algorithm.to_string(),
                expected: expected.value,
                actual: actual.value,
            });
        }

        match read_package_metadata_async(working_file).await {
            Ok(Some(core)) => unit.record.metadata.apply_core_metadata(&core),
            Ok(None) => debug!(filename = unit.filename(), "no embedded metadata"),
            Err(e) => warn!(
                filename = unit.filename(),
                error = %e,
                "failed to inspect artifact, keeping manifest metadata"
            ),
        }

        unit.bookkeeping.storage_path = Some(self.store.storage_path_for(&unit));
        self.store
            .import_content(&unit, working_file)
            .await
            .map_err(|e| FailureKind::StorageFailure {
                reason: e.to_string(),
            })?;

        let storage_failure = |e: crate::Error| FailureKind::StorageFailure {
            reason: e.to_string(),
        };
        let saved = self.catalog.save(&unit).await.map_err(storage_failure)?;
        self.catalog
            .associate(self.repository, saved.unit_id())
            .await
            .map_err(storage_failure)?;

        Ok(match saved {
            SaveOutcome::Saved(_) => Committed::New,
            SaveOutcome::AlreadyPresent(_) => Committed::AlreadyPresent,
        })
    }
}

#[async_trait]
impl OutcomeHandler<Candidate> for CommitHandler<'_> {
    async fn handle(&mut self, outcome: DownloadOutcome<Candidate>) {
        let Candidate { unit, working_file } = outcome.tag;
        let filename = unit.filename().to_string();

        match outcome.result {
            Ok(_) => match self.commit(unit, &working_file).await {
                Ok(Committed::New) => {
                    debug!(filename = %filename, "artifact committed");
                    self.report.committed += 1;
                    self.event_tx
                        .send(Event::ArtifactCommitted { filename })
                        .ok();
                }
                Ok(Committed::AlreadyPresent) => {
                    debug!(filename = %filename, "artifact already present");
                    self.report.already_present += 1;
                    self.event_tx
                        .send(Event::ArtifactAlreadyPresent { filename })
                        .ok();
                }
                Err(kind) => self.fail(&filename, kind),
            },
            Err(e) => self.fail(&filename, (&e).into()),
        }

        discard_working_file(&working_file).await;
    }
}
