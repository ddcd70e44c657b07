//! Shared fixtures for pypi-sync integration tests

#![allow(dead_code)]

use pypi_sync::checksum::{ChecksumType, checksum_bytes};
use pypi_sync::config::RetryConfig;
use pypi_sync::{Config, Database, HttpTransport, PackageNames, Syncer};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const SAMPLE_PKG_INFO: &str = concat!(
    "Metadata-Version: 1.2\n",
    "Name: sampleproject\n",
    "Version: 1.0\n",
    "Summary: A sample Python project\n",
    "License: MIT\n",
    "Requires-Python: >=3.7\n",
    "Platform: any\n",
    "Classifier: Programming Language :: Python :: 3\n",
);

/// Gzipped sdist with `<top>/PKG-INFO`
pub fn sdist(top: &str, pkg_info: &str) -> Vec<u8> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    let mut header = tar::Header::new_gnu();
    header.set_size(pkg_info.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, format!("{top}/PKG-INFO"), pkg_info.as_bytes())
        .unwrap();
    builder.into_inner().unwrap().finish().unwrap()
}

pub fn md5_hex(data: &[u8]) -> String {
    checksum_bytes(data, ChecksumType::Md5).value
}

/// One release file entry as the JSON API returns it
pub fn release_entry(server: &MockServer, filename: &str, body: &[u8]) -> Value {
    json!({
        "filename": filename,
        "url": format!("{}/packages/{}", server.uri(), filename),
        "packagetype": "sdist",
        "size": body.len(),
        "md5_digest": md5_hex(body),
        "digests": {
            "md5": md5_hex(body),
            "sha256": checksum_bytes(body, ChecksumType::Sha256).value,
        },
    })
}

/// Serve `manifest` at `/pypi/<package>/json/`
pub async fn mount_manifest(server: &MockServer, package: &str, manifest: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/pypi/{package}/json/")))
        .respond_with(ResponseTemplate::new(200).set_body_json(manifest))
        .mount(server)
        .await;
}

/// Serve `body` at `/packages/<filename>`
pub async fn mount_artifact(server: &MockServer, filename: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(format!("/packages/{filename}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

/// Config pointing at `server`, with every path under `temp` and fast retries
pub fn test_config(server: &MockServer, temp: &TempDir, packages: &str) -> Config {
    let mut config = Config {
        feed: Some(server.uri()),
        package_names: PackageNames::parse(packages),
        working_dir: temp.path().join("working"),
        ..Default::default()
    };
    config.persistence.database_path = temp.path().join("catalog.db");
    config.persistence.content_root = temp.path().join("content");
    config.transport.timeout = Duration::from_secs(5);
    config.transport.retry = RetryConfig {
        max_attempts: 1,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config
}

/// Syncer over a database the test can also query
pub async fn syncer_with_db(config: Config) -> (Syncer, Arc<Database>) {
    let db = Arc::new(
        Database::new(&config.persistence.database_path)
            .await
            .unwrap(),
    );
    let transport = Arc::new(HttpTransport::new(&config.transport).unwrap());
    let syncer = Syncer::with_parts(config, db.clone(), transport);
    (syncer, db)
}
