//! Python package units.
//!
//! A unit is split in two:
//! - [`ArtifactRecord`] carries the public, upstream-described fields of one
//!   release file. It is a plain value; the catalog stores it as-is.
//! - [`UnitBookkeeping`] carries what the mirror itself tracks about the file:
//!   the authoritative checksum and where the bytes live in the content store.
//!
//! [`PackageUnit`] composes the two.

use crate::checksum::{Checksum, ChecksumType};
use crate::error::ManifestError;
use crate::inspect::CoreMetadata;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Upstream metadata fields shared by every release of a project
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageMetadata {
    /// Author name
    pub author: Option<String>,
    /// Author e-mail
    pub author_email: Option<String>,
    /// Maintainer name
    pub maintainer: Option<String>,
    /// Maintainer e-mail
    pub maintainer_email: Option<String>,
    /// One-line summary
    pub summary: Option<String>,
    /// Long description
    pub description: Option<String>,
    /// Project home page
    pub home_page: Option<String>,
    /// Download page
    pub download_url: Option<String>,
    /// License string
    pub license: Option<String>,
    /// Keywords, as published
    pub keywords: Option<String>,
    /// Core metadata version
    pub metadata_version: Option<String>,
    /// Supported Python versions specifier
    pub requires_python: Option<String>,
    /// Trove classifiers
    pub classifiers: Vec<String>,
    /// Dependency specifiers
    pub requires_dist: Vec<String>,
    /// External (non-Python) requirements, read from the artifact
    pub requires_external: Vec<String>,
    /// Supported platforms, read from the artifact
    pub platform: Vec<String>,
    /// Labelled project URLs
    pub project_urls: Vec<String>,
}

impl PackageMetadata {
    /// Overlay fields found in the artifact's embedded metadata.
    ///
    /// Only headers present in the artifact overwrite what the manifest said.
    pub fn apply_core_metadata(&mut self, core: &CoreMetadata) {
        let overlay = |slot: &mut Option<String>, header: &str| {
            if let Some(value) = core.first(header) {
                *slot = Some(value.to_string());
            }
        };
        overlay(&mut self.author, "Author");
        overlay(&mut self.author_email, "Author-email");
        overlay(&mut self.maintainer, "Maintainer");
        overlay(&mut self.maintainer_email, "Maintainer-email");
        overlay(&mut self.summary, "Summary");
        overlay(&mut self.home_page, "Home-page");
        overlay(&mut self.download_url, "Download-URL");
        overlay(&mut self.license, "License");
        overlay(&mut self.keywords, "Keywords");
        overlay(&mut self.metadata_version, "Metadata-Version");
        overlay(&mut self.requires_python, "Requires-Python");

        let overlay_list = |slot: &mut Vec<String>, header: &str| {
            let values = core.all(header);
            if !values.is_empty() {
                *slot = values.iter().map(|v| v.to_string()).collect();
            }
        };
        overlay_list(&mut self.classifiers, "Classifier");
        overlay_list(&mut self.requires_dist, "Requires-Dist");
        overlay_list(&mut self.requires_external, "Requires-External");
        overlay_list(&mut self.platform, "Platform");
        overlay_list(&mut self.project_urls, "Project-URL");
    }
}

/// One published release file of one package
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Project name
    pub name: String,
    /// Release version (the manifest's release key)
    pub version: String,
    /// File name, unique across the catalog
    pub filename: String,
    /// Source download URL
    pub url: String,
    /// Distribution type (`sdist`, `bdist_wheel`, ...)
    pub packagetype: Option<String>,
    /// Python tag the file was built for
    pub python_version: Option<String>,
    /// Size in bytes as published
    pub size: Option<u64>,
    /// Upload timestamp as published
    pub upload_time: Option<String>,
    /// Legacy MD5 digest field
    pub md5_digest: Option<String>,
    /// All published digests keyed by algorithm name
    pub digests: BTreeMap<String, String>,
    /// Project-level metadata
    pub metadata: PackageMetadata,
    /// Manifest keys with no typed field
    pub extra: BTreeMap<String, Value>,
}

/// Manifest keys dropped on import because the artifact itself is authoritative
const ARTIFACT_OWNED_KEYS: &[&str] = &["platform", "requires_external"];

impl ArtifactRecord {
    /// Build a record for one release entry.
    ///
    /// `info` fields are overlaid by `release` fields, and `version` is always
    /// the release key since `info` describes only the latest release.
    pub fn from_manifest(
        info: &Map<String, Value>,
        release: &Map<String, Value>,
        version: &str,
    ) -> Result<Self, ManifestError> {
        let mut merged = info.clone();
        for (key, value) in release {
            merged.insert(key.clone(), value.clone());
        }
        for key in ARTIFACT_OWNED_KEYS {
            merged.remove(*key);
        }
        merged.remove("version");

        let mut record = ArtifactRecord {
            version: version.to_string(),
            ..Default::default()
        };
        for (key, value) in merged {
            record.apply_field(key, value);
        }

        if record.filename.is_empty() {
            return Err(ManifestError::MissingFilename {
                version: version.to_string(),
            });
        }
        if !is_plain_filename(&record.filename) {
            return Err(ManifestError::InvalidFilename {
                filename: record.filename,
            });
        }
        if record.url.is_empty() {
            return Err(ManifestError::MissingUrl {
                filename: record.filename,
            });
        }
        Ok(record)
    }

    /// Map one manifest key onto its typed field, or keep it in `extra`
    fn apply_field(&mut self, key: String, value: Value) {
        let meta = &mut self.metadata;
        match key.as_str() {
            "name" => self.name = as_string(&value).unwrap_or_default(),
            "filename" => self.filename = as_string(&value).unwrap_or_default(),
            "url" => self.url = as_string(&value).unwrap_or_default(),
            "packagetype" => self.packagetype = as_string(&value),
            "python_version" => self.python_version = as_string(&value),
            "size" => self.size = value.as_u64(),
            "upload_time" => self.upload_time = as_string(&value),
            "md5_digest" => self.md5_digest = as_string(&value),
            "digests" => self.digests = as_string_map(&value),
            "author" => meta.author = as_string(&value),
            "author_email" => meta.author_email = as_string(&value),
            "maintainer" => meta.maintainer = as_string(&value),
            "maintainer_email" => meta.maintainer_email = as_string(&value),
            "summary" => meta.summary = as_string(&value),
            "description" => meta.description = as_string(&value),
            "home_page" => meta.home_page = as_string(&value),
            "download_url" => meta.download_url = as_string(&value),
            "license" => meta.license = as_string(&value),
            "keywords" => meta.keywords = as_string(&value),
            "metadata_version" => meta.metadata_version = as_string(&value),
            "requires_python" => meta.requires_python = as_string(&value),
            "classifiers" => meta.classifiers = as_string_list(&value),
            "requires_dist" => meta.requires_dist = as_string_list(&value),
            "project_urls" => meta.project_urls = as_project_urls(&value),
            _ => {
                self.extra.insert(key, value);
            }
        }
    }

    /// Upstream digest for `algorithm`, if the feed published one
    pub fn upstream_digest(&self, algorithm: ChecksumType) -> Option<Checksum> {
        let from_map = self
            .digests
            .get(algorithm.as_str())
            .filter(|v| !v.is_empty())
            .cloned();
        // Older manifests carry `<algo>_digest` fields beside the `digests` map
        let legacy = match algorithm {
            ChecksumType::Md5 => self.md5_digest.clone(),
            _ => self
                .extra
                .get(&format!("{}_digest", algorithm))
                .and_then(as_string),
        }
        .filter(|v| !v.is_empty());
        from_map
            .or(legacy)
            .map(|value| Checksum::new(algorithm, value))
    }

    /// First upstream digest in `preference` order
    pub fn select_checksum(&self, preference: &[ChecksumType]) -> Result<Checksum, ManifestError> {
        preference
            .iter()
            .find_map(|algorithm| self.upstream_digest(*algorithm))
            .ok_or_else(|| ManifestError::MissingDigest {
                filename: self.filename.clone(),
                algorithms: preference
                    .iter()
                    .map(ChecksumType::as_str)
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

/// Mirror-side state tracked for a unit
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitBookkeeping {
    /// Authoritative checksum the file is verified against
    pub checksum: Checksum,
    /// Final location in the content store, set when the unit is finalized
    pub storage_path: Option<PathBuf>,
}

/// A package unit: public record plus bookkeeping
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PackageUnit {
    /// Upstream description of the file
    pub record: ArtifactRecord,
    /// Mirror bookkeeping
    pub bookkeeping: UnitBookkeeping,
}

impl PackageUnit {
    /// Pair a record with its expected checksum
    pub fn new(record: ArtifactRecord, checksum: Checksum) -> Self {
        Self {
            record,
            bookkeeping: UnitBookkeeping {
                checksum,
                storage_path: None,
            },
        }
    }

    /// Catalog key
    pub fn filename(&self) -> &str {
        &self.record.filename
    }
}

/// Non-empty, not `.` or `..`, and free of separators and NUL
fn is_plain_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn as_string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(as_string).collect(),
        Value::String(s) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn as_string_map(value: &Value) -> BTreeMap<String, String> {
    match value {
        Value::Object(map) => map
            .iter()
            .filter_map(|(k, v)| as_string(v).map(|s| (k.clone(), s)))
            .collect(),
        _ => BTreeMap::new(),
    }
}

// Newer feeds publish `project_urls` as an object of label -> URL
fn as_project_urls(value: &Value) -> Vec<String> {
    match value {
        Value::Object(map) => map
            .iter()
            .filter_map(|(label, url)| as_string(url).map(|u| format!("{label}, {u}")))
            .collect(),
        other => as_string_list(other),
    }
}
