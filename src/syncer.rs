//! End-to-end sync orchestration.

use crate::catalog::Catalog;
use crate::config::Config;
use crate::db::Database;
use crate::error::{FailureKind, Result};
use crate::fetch::{ContentFetcher, MetadataFetcher};
use crate::report::{SyncFailure, SyncReport};
use crate::storage::ContentStore;
use crate::transport::{DownloadTransport, HttpTransport};
use crate::types::{Event, RepositoryId, SyncPhase};
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Capacity of the event channel; slow subscribers miss the oldest events
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Drives metadata discovery, content fetch and finalization for a repository
///
/// Cloning is cheap and clones share the cancellation token, the event
/// channel and the phase. Runs on one syncer are serialized.
#[derive(Clone)]
pub struct Syncer {
    config: Arc<Config>,
    catalog: Arc<dyn Catalog>,
    transport: Arc<dyn DownloadTransport>,
    store: ContentStore,
    event_tx: broadcast::Sender<Event>,
    phase_tx: Arc<watch::Sender<SyncPhase>>,
    cancel: CancellationToken,
    run_lock: Arc<Mutex<()>>,
}

impl Syncer {
    /// Open the catalog and HTTP transport described by `config`
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let db = Database::new(&config.persistence.database_path).await?;
        let transport = HttpTransport::new(&config.transport)?;
        Ok(Self::with_parts(config, Arc::new(db), Arc::new(transport)))
    }

    /// Build a syncer over an existing catalog and transport
    pub fn with_parts(
        config: Config,
        catalog: Arc<dyn Catalog>,
        transport: Arc<dyn DownloadTransport>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (phase_tx, _) = watch::channel(SyncPhase::Initialized);
        let store = ContentStore::new(config.persistence.content_root.clone());
        Self {
            config: Arc::new(config),
            catalog,
            transport,
            store,
            event_tx,
            phase_tx: Arc::new(phase_tx),
            cancel: CancellationToken::new(),
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Subscribe to sync events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Current phase of the latest run
    pub fn phase(&self) -> SyncPhase {
        *self.phase_tx.borrow()
    }

    /// Watch phase changes
    pub fn watch_phase(&self) -> watch::Receiver<SyncPhase> {
        self.phase_tx.subscribe()
    }

    /// Configuration this syncer runs with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Token that cancels this syncer's runs
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop issuing requests. Committed units are kept.
    ///
    /// Cancellation is permanent for this syncer and its clones.
    pub fn cancel(&self) {
        info!("sync cancellation requested");
        self.cancel.cancel();
    }

    /// Mirror every configured package into `repository`
    ///
    /// Returns `Err` only when the run cannot start: no feed configured, or the
    /// repository cannot be created. Everything else lands in the report.
    pub async fn sync(&self, repository: &RepositoryId) -> Result<SyncReport> {
        let _run = self.run_lock.lock().await;
        self.phase_tx.send_replace(SyncPhase::Initialized);

        let feed_base = self.config.feed_base()?;
        self.catalog.ensure_repository(repository).await?;
        let package_names = self.config.package_names.as_slice();
        info!(
            repository = %repository,
            feed = %feed_base,
            packages = package_names.len(),
            "starting sync"
        );

        // Metadata phase
        self.enter(repository, SyncPhase::MetadataPhase);
        let metadata = MetadataFetcher::new(
            self.transport.clone(),
            self.config.checksum.preference.clone(),
            self.event_tx.clone(),
        );
        let discovery = metadata
            .discover(&feed_base, package_names, &self.cancel)
            .await;

        let mut report = SyncReport {
            discovered: discovery.discovered,
            failures: discovery.failures,
            ..Default::default()
        };
        if self.cancel.is_cancelled() {
            return Ok(self.finish_cancelled(repository, report));
        }

        // Content phase
        self.enter(repository, SyncPhase::ContentPhase);
        let content = ContentFetcher::new(
            self.transport.clone(),
            self.catalog.clone(),
            self.store.clone(),
            self.event_tx.clone(),
        );
        let fetched = content
            .fetch(
                discovery.candidates,
                &self.config.working_dir,
                repository,
                &self.cancel,
            )
            .await;
        report.committed = fetched.committed;
        report.already_present = fetched.already_present;
        report.failures.extend(fetched.failures);
        if fetched.cancelled || self.cancel.is_cancelled() {
            return Ok(self.finish_cancelled(repository, report));
        }

        // Finalizing
        self.enter(repository, SyncPhase::Finalizing);
        match self.catalog.rebuild_counts(repository).await {
            Ok(count) => info!(repository = %repository, count, "content counts rebuilt"),
            Err(e) => {
                error!(repository = %repository, error = %e, "failed to rebuild content counts");
                report
                    .failures
                    .push(SyncFailure::finalize(repository.as_str(), FailureKind::from(&e)));
            }
        }

        self.enter(repository, SyncPhase::Done);
        self.announce_finish(repository, &report);
        Ok(report)
    }

    fn enter(&self, repository: &RepositoryId, next: SyncPhase) {
        let current = self.phase();
        if !current.can_transition_to(next) {
            warn!(from = %current, to = %next, "unexpected phase transition");
        }
        self.phase_tx.send_replace(next);
        info!(repository = %repository, phase = %next, "sync phase changed");
        self.event_tx
            .send(Event::PhaseChanged {
                repository: repository.clone(),
                phase: next,
            })
            .ok();
    }

    fn finish_cancelled(&self, repository: &RepositoryId, mut report: SyncReport) -> SyncReport {
        report.cancelled = true;
        self.enter(repository, SyncPhase::Cancelled);
        self.announce_finish(repository, &report);
        report
    }

    fn announce_finish(&self, repository: &RepositoryId, report: &SyncReport) {
        if report.success() {
            info!(
                repository = %repository,
                discovered = report.discovered,
                committed = report.committed,
                already_present = report.already_present,
                cancelled = report.cancelled,
                "sync finished"
            );
        } else {
            warn!(
                repository = %repository,
                discovered = report.discovered,
                committed = report.committed,
                failures = report.failures.len(),
                cancelled = report.cancelled,
                "sync finished with failures"
            );
        }
        self.event_tx
            .send(Event::SyncFinished {
                repository: repository.clone(),
                success: report.success(),
                cancelled: report.cancelled,
            })
            .ok();
    }
}
