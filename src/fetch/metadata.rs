//! Manifest discovery: package names in, candidate units out.

use crate::checksum::ChecksumType;
use crate::error::{FailureKind, ManifestError};
use crate::report::SyncFailure;
use crate::transport::{
    Destination, DownloadOutcome, DownloadRequest, DownloadTransport, OutcomeHandler, Payload,
    run_requests,
};
use crate::types::Event;
use crate::unit::{ArtifactRecord, PackageUnit};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// JSON manifest served at `<feed>pypi/<name>/json/`
#[derive(Debug, Deserialize)]
struct PackageManifest {
    #[serde(default)]
    info: Map<String, Value>,
    releases: BTreeMap<String, Vec<Map<String, Value>>>,
}

/// Records parsed out of one manifest
#[derive(Debug, Default)]
pub struct ParsedManifest {
    /// Release entries that became records, including those later rejected
    /// for lacking a usable digest
    pub records: usize,
    /// Records with a selected checksum, ready for download
    pub units: Vec<PackageUnit>,
    /// Entries that could not become candidates
    pub failures: Vec<SyncFailure>,
}

/// Parse a manifest body into candidate units
///
/// Fails as a whole only when the body is not a manifest at all. Individual
/// entries that are unusable are returned in `failures`.
pub fn parse_manifest(
    package: &str,
    body: &[u8],
    preference: &[ChecksumType],
) -> Result<ParsedManifest, ManifestError> {
    let manifest: PackageManifest = serde_json::from_slice(body)?;
    let mut parsed = ParsedManifest::default();

    for (version, entries) in &manifest.releases {
        for entry in entries {
            let record = match ArtifactRecord::from_manifest(&manifest.info, entry, version) {
                Ok(record) => record,
                Err(e) => {
                    parsed
                        .failures
                        .push(SyncFailure::metadata(package, (&e).into()));
                    continue;
                }
            };
            parsed.records += 1;

            match record.select_checksum(preference) {
                Ok(checksum) => parsed.units.push(PackageUnit::new(record, checksum)),
                Err(e) => parsed
                    .failures
                    .push(SyncFailure::metadata(record.filename.clone(), (&e).into())),
            }
        }
    }

    Ok(parsed)
}

/// Result of the metadata phase
#[derive(Debug, Default)]
pub struct Discovery {
    /// Release records found across all manifests
    pub discovered: usize,
    /// Candidates to download
    pub candidates: Vec<PackageUnit>,
    /// Per-package and per-entry failures
    pub failures: Vec<SyncFailure>,
}

/// Fetches manifests and turns them into candidate units
pub struct MetadataFetcher {
    transport: Arc<dyn DownloadTransport>,
    preference: Vec<ChecksumType>,
    event_tx: broadcast::Sender<Event>,
}

impl MetadataFetcher {
    /// Create a fetcher selecting checksums by `preference`
    pub fn new(
        transport: Arc<dyn DownloadTransport>,
        preference: Vec<ChecksumType>,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            transport,
            preference,
            event_tx,
        }
    }

    /// Fetch and parse the manifest of every package
    ///
    /// No request is issued once `cancel` fires; manifests already requested
    /// are still parsed. A failure for one package never stops discovery of
    /// the others. Release files are unique by filename across packages.
    pub async fn discover(
        &self,
        feed_base: &url::Url,
        package_names: &[String],
        cancel: &CancellationToken,
    ) -> Discovery {
        let mut handler = ManifestHandler {
            preference: &self.preference,
            event_tx: &self.event_tx,
            discovery: Discovery::default(),
            seen_filenames: HashSet::new(),
        };

        let mut requests = Vec::with_capacity(package_names.len());
        for name in package_names {
            match manifest_url(feed_base, name) {
                Ok(url) => requests.push(DownloadRequest {
                    url,
                    destination: Destination::Memory,
                    tag: name.clone(),
                }),
                Err(e) => handler.fail(
                    name,
                    FailureKind::TransportFailure {
                        reason: format!("invalid manifest URL: {e}"),
                    },
                ),
            }
        }

        run_requests(&self.transport, requests, cancel, &mut handler).await;

        let discovery = handler.discovery;
        info!(
            packages = package_names.len(),
            discovered = discovery.discovered,
            candidates = discovery.candidates.len(),
            failures = discovery.failures.len(),
            "metadata discovery finished"
        );
        discovery
    }
}

/// `<feed>pypi/<name>/json/`
pub fn manifest_url(feed_base: &url::Url, name: &str) -> Result<String, url::ParseError> {
    feed_base
        .join(&format!("pypi/{name}/json/"))
        .map(String::from)
}

struct ManifestHandler<'a> {
    preference: &'a [ChecksumType],
    event_tx: &'a broadcast::Sender<Event>,
    discovery: Discovery,
    seen_filenames: HashSet<String>,
}

impl ManifestHandler<'_> {
    fn fail(&mut self, package: &str, kind: FailureKind) {
        warn!(package = %package, error = %kind, "manifest failed");
        self.event_tx
            .send(Event::ManifestFailed {
                package: package.to_string(),
                failure: kind.clone(),
            })
            .ok();
        self.discovery
            .failures
            .push(SyncFailure::metadata(package, kind));
    }
}

#[async_trait]
impl OutcomeHandler<String> for ManifestHandler<'_> {
    async fn handle(&mut self, outcome: DownloadOutcome<String>) {
        let package = outcome.tag;

        let body = match outcome.result {
            Ok(Payload::Bytes(body)) => body,
            Ok(Payload::File { path, .. }) => {
                self.fail(
                    &package,
                    FailureKind::ParseFailure {
                        reason: format!("expected in-memory manifest, got file {}", path.display()),
                    },
                );
                return;
            }
            Err(e) => {
                self.fail(&package, (&e).into());
                return;
            }
        };

        let parsed = parse_manifest(&package, &body, self.preference);
        // Release the body before handling the next outcome
        drop(body);

        match parsed {
            Ok(parsed) => {
                debug!(
                    package = %package,
                    records = parsed.records,
                    "manifest parsed"
                );
                self.event_tx
                    .send(Event::ManifestProcessed {
                        package: package.clone(),
                        artifacts: parsed.records,
                    })
                    .ok();
                for failure in &parsed.failures {
                    warn!(subject = %failure.subject, error = %failure.kind, "release entry skipped");
                }
                // A filename already claimed by an earlier manifest is the same artifact
                let mut duplicates = 0;
                for unit in parsed.units {
                    if self.seen_filenames.insert(unit.filename().to_string()) {
                        self.discovery.candidates.push(unit);
                    } else {
                        debug!(filename = %unit.filename(), "duplicate release file skipped");
                        duplicates += 1;
                    }
                }
                self.discovery.discovered += parsed.records - duplicates;
                self.discovery.failures.extend(parsed.failures);
            }
            Err(e) => self.fail(&package, (&e).into()),
        }
    }
}
