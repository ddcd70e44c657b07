use crate::checksum::{Checksum, ChecksumType};
use crate::unit::{ArtifactRecord, PackageUnit};

mod close;

fn sample_unit(name: &str, version: &str, filename: &str) -> PackageUnit {
    let record = ArtifactRecord {
        name: name.to_string(),
        version: version.to_string(),
        filename: filename.to_string(),
        url: format!("https://files.example.org/packages/{filename}"),
        packagetype: Some("sdist".to_string()),
        size: Some(1024),
        ..Default::default()
    };
    PackageUnit::new(record, Checksum::new(ChecksumType::Sha256, "ab".repeat(32)))
}
