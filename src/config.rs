//! Configuration types for pypi-sync

use crate::checksum::ChecksumType;
use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    time::Duration,
};

/// Importer option naming the feed base URL
pub const KEY_FEED: &str = "feed";
/// Importer option holding the comma-separated package names
pub const KEY_PACKAGE_NAMES: &str = "package_names";

/// Main configuration for a sync run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the package index (e.g. `https://pypi.org/`)
    ///
    /// Required to start a sync; manifests are fetched from
    /// `<feed>pypi/<name>/json/`.
    #[serde(default)]
    pub feed: Option<String>,

    /// Packages to mirror (empty means sync nothing)
    #[serde(default)]
    pub package_names: PackageNames,

    /// Scratch directory for in-flight artifact downloads (default: "./working")
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,

    /// Catalog and content store locations
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// HTTP transport settings
    #[serde(default)]
    pub transport: TransportConfig,

    /// Artifact checksum selection
    #[serde(default)]
    pub checksum: ChecksumConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed: None,
            package_names: PackageNames::default(),
            working_dir: default_working_dir(),
            persistence: PersistenceConfig::default(),
            transport: TransportConfig::default(),
            checksum: ChecksumConfig::default(),
        }
    }
}

impl Config {
    /// Build a config from the flat key/value options an importer receives.
    ///
    /// Recognized keys are [`KEY_FEED`] and [`KEY_PACKAGE_NAMES`]; everything
    /// else keeps its default.
    pub fn from_options(options: &HashMap<String, String>) -> Self {
        Self {
            feed: options
                .get(KEY_FEED)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            package_names: options
                .get(KEY_PACKAGE_NAMES)
                .map(|s| PackageNames::parse(s))
                .unwrap_or_default(),
            ..Default::default()
        }
    }

    /// Load a config from a JSON file
    pub async fn load(path: &std::path::Path) -> Result<Self> {
        let content = tokio::fs::read(path).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read config '{}': {}", path.display(), e),
            ))
        })?;
        let config: Config = serde_json::from_slice(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that can never produce a working run
    pub fn validate(&self) -> Result<()> {
        if self.transport.max_concurrent == 0 {
            return Err(Error::config(
                "transport.max_concurrent",
                "must allow at least one concurrent download",
            ));
        }
        if self.checksum.preference.is_empty() {
            return Err(Error::config(
                "checksum.preference",
                "at least one checksum algorithm is required",
            ));
        }
        if let Some(feed) = &self.feed {
            url::Url::parse(feed)
                .map_err(|e| Error::config(KEY_FEED, format!("invalid feed URL '{feed}': {e}")))?;
        }
        Ok(())
    }

    /// Feed URL normalized to end with `/`, or a config error if unset
    pub fn feed_base(&self) -> Result<url::Url> {
        let feed = self
            .feed
            .as_deref()
            .ok_or_else(|| Error::config(KEY_FEED, "no feed URL configured"))?;
        let mut normalized = feed.to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        url::Url::parse(&normalized)
            .map_err(|e| Error::config(KEY_FEED, format!("invalid feed URL '{feed}': {e}")))
    }
}

/// List of package names to mirror
///
/// Deserializes from either a comma-separated string or a JSON array.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PackageNames(pub Vec<String>);

impl PackageNames {
    /// Parse a comma-separated list, trimming entries and dropping empty ones
    ///
    /// Names equal after normalization (`Foo_Bar` and `foo-bar`) are kept
    /// once, in the spelling first given.
    pub fn parse(raw: &str) -> Self {
        Self::from_entries(raw.split(','))
    }

    fn from_entries<'a>(entries: impl IntoIterator<Item = &'a str>) -> Self {
        let mut seen = HashSet::new();
        Self(
            entries
                .into_iter()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .filter(|s| seen.insert(normalize_name(s)))
                .map(String::from)
                .collect(),
        )
    }

    /// Names as a slice
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Whether no packages were requested
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for PackageNames {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Csv(String),
            List(Vec<String>),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Csv(s) => PackageNames::parse(&s),
            Raw::List(items) => PackageNames::from_entries(items.iter().map(String::as_str)),
        })
    }
}

/// Lowercase with runs of `-`, `_` and `.` collapsed to one `-`
pub fn normalize_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut in_separator = false;
    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            if !in_separator {
                normalized.push('-');
            }
            in_separator = true;
        } else {
            normalized.extend(c.to_lowercase());
            in_separator = false;
        }
    }
    normalized
}

/// Catalog and content storage locations
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Catalog database path (default: "./pypi-sync.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Root of the content-addressed store (default: "./content")
    #[serde(default = "default_content_root")]
    pub content_root: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            content_root: default_content_root(),
        }
    }
}

/// HTTP transport configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Maximum requests in flight at once (default: 5)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Per-request timeout (default: 300 seconds)
    #[serde(default = "default_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Retry policy for transient failures
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            timeout: default_timeout(),
            user_agent: default_user_agent(),
            retry: RetryConfig::default(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Which upstream digest identifies an artifact
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChecksumConfig {
    /// Algorithms in order of preference (default: sha512, sha256, md5)
    ///
    /// For each artifact the first algorithm the feed supplies a digest for
    /// becomes the checksum it is verified against and stored under.
    #[serde(default = "default_checksum_preference")]
    pub preference: Vec<ChecksumType>,
}

impl Default for ChecksumConfig {
    fn default() -> Self {
        Self {
            preference: default_checksum_preference(),
        }
    }
}

// Default value functions
fn default_working_dir() -> PathBuf {
    PathBuf::from("working")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("pypi-sync.db")
}

fn default_content_root() -> PathBuf {
    PathBuf::from("content")
}

fn default_max_concurrent() -> usize {
    5
}

fn default_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_user_agent() -> String {
    concat!("pypi-sync/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_checksum_preference() -> Vec<ChecksumType> {
    vec![ChecksumType::Sha512, ChecksumType::Sha256, ChecksumType::Md5]
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
