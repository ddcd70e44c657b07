//! Reading core metadata embedded in downloaded distributions.
//!
//! Supported layouts:
//! - sdist tarballs (`.tar.gz`, `.tgz`) and zips: `<project>-<version>/PKG-INFO`
//! - wheels (`.whl`): `<project>-<version>.dist-info/METADATA`
//! - eggs (`.egg`): `EGG-INFO/PKG-INFO`

use crate::error::StorageError;
use flate2::read::GzDecoder;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Upper bound on metadata file size read from an archive (4 MiB)
const MAX_METADATA_BYTES: u64 = 4 * 1024 * 1024;

/// Parsed core metadata headers (`Name`, `Version`, `Requires-Dist`, ...)
///
/// Header names are matched case-insensitively; repeated headers accumulate.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CoreMetadata {
    headers: BTreeMap<String, Vec<String>>,
}

impl CoreMetadata {
    /// Parse an RFC 822 style metadata document.
    ///
    /// Continuation lines (leading whitespace) are folded into the previous
    /// header. Text after the first blank line is the description body.
    pub fn parse(text: &str) -> Self {
        let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut last_key: Option<String> = None;
        let mut lines = text.lines();

        for line in lines.by_ref() {
            if line.trim().is_empty() {
                break;
            }
            if line.starts_with(' ') || line.starts_with('\t') {
                if let Some(values) = last_key.as_ref().and_then(|k| headers.get_mut(k))
                    && let Some(last) = values.last_mut()
                {
                    let continued = line.trim_start();
                    let continued = continued.strip_prefix('|').unwrap_or(continued);
                    last.push('\n');
                    last.push_str(continued);
                }
                continue;
            }
            if let Some((key, value)) = line.split_once(':') {
                let key = key.trim().to_ascii_lowercase();
                headers
                    .entry(key.clone())
                    .or_default()
                    .push(value.trim().to_string());
                last_key = Some(key);
            }
        }

        let body: Vec<&str> = lines.collect();
        let body = body.join("\n");
        if !body.trim().is_empty() && !headers.contains_key("description") {
            headers.insert("description".to_string(), vec![body.trim().to_string()]);
        }

        Self { headers }
    }

    /// First value of a header, skipping the `UNKNOWN` placeholder
    pub fn first(&self, header: &str) -> Option<&str> {
        self.headers
            .get(&header.to_ascii_lowercase())
            .and_then(|v| v.first())
            .map(String::as_str)
            .filter(|v| !v.is_empty() && *v != "UNKNOWN")
    }

    /// All values of a header, skipping the `UNKNOWN` placeholder
    pub fn all(&self, header: &str) -> Vec<&str> {
        self.headers
            .get(&header.to_ascii_lowercase())
            .map(|values| {
                values
                    .iter()
                    .map(String::as_str)
                    .filter(|v| !v.is_empty() && *v != "UNKNOWN")
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether no headers were found
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

/// Distribution archive layouts that carry metadata
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveKind {
    /// Gzipped tarball sdist
    TarGz,
    /// Zip sdist
    Zip,
    /// Wheel
    Wheel,
    /// Egg
    Egg,
}

impl ArchiveKind {
    /// Detect the layout from a filename
    pub fn from_filename(filename: &str) -> Option<Self> {
        let lower = filename.to_ascii_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(ArchiveKind::TarGz)
        } else if lower.ends_with(".whl") {
            Some(ArchiveKind::Wheel)
        } else if lower.ends_with(".egg") {
            Some(ArchiveKind::Egg)
        } else if lower.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else {
            None
        }
    }

    fn is_metadata_entry(&self, entry: &str) -> bool {
        let parts: Vec<&str> = entry.trim_start_matches("./").split('/').collect();
        match (self, parts.as_slice()) {
            (ArchiveKind::TarGz | ArchiveKind::Zip, [_, "PKG-INFO"]) => true,
            (ArchiveKind::Wheel, [dir, "METADATA"]) => dir.ends_with(".dist-info"),
            (ArchiveKind::Egg, ["EGG-INFO", "PKG-INFO"]) => true,
            _ => false,
        }
    }
}

/// Read the embedded metadata of a distribution file.
///
/// Returns `Ok(None)` for formats without a known metadata layout or archives
/// that do not contain one. Blocking; callers on the runtime should use
/// [`read_package_metadata_async`].
pub fn read_package_metadata(path: &Path) -> Result<Option<CoreMetadata>, StorageError> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let Some(kind) = ArchiveKind::from_filename(&filename) else {
        debug!(%filename, "no metadata layout for file type");
        return Ok(None);
    };

    let read_failed = |source| StorageError::ReadFailed {
        path: path.to_path_buf(),
        source,
    };
    let file = std::fs::File::open(path).map_err(read_failed)?;

    let text = match kind {
        ArchiveKind::TarGz => read_from_tar(file, kind).map_err(read_failed)?,
        ArchiveKind::Zip | ArchiveKind::Wheel | ArchiveKind::Egg => {
            read_from_zip(file, kind).map_err(read_failed)?
        }
    };

    Ok(text.map(|t| CoreMetadata::parse(&t)))
}

/// Async wrapper around [`read_package_metadata`]
pub async fn read_package_metadata_async(
    path: &Path,
) -> Result<Option<CoreMetadata>, StorageError> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || read_package_metadata(&owned))
        .await
        .map_err(|e| StorageError::ReadFailed {
            path: path.to_path_buf(),
            source: std::io::Error::other(format!("inspection task failed: {e}")),
        })?
}

fn read_from_tar(file: std::fs::File, kind: ArchiveKind) -> std::io::Result<Option<String>> {
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    for entry in archive.entries()? {
        let entry = entry?;
        let entry_path = entry.path()?.to_string_lossy().to_string();
        if kind.is_metadata_entry(&entry_path) {
            return read_limited(entry).map(Some);
        }
    }
    Ok(None)
}

fn read_from_zip(file: std::fs::File, kind: ArchiveKind) -> std::io::Result<Option<String>> {
    let mut archive = zip::ZipArchive::new(file).map_err(std::io::Error::other)?;
    let name = archive
        .file_names()
        .find(|name| kind.is_metadata_entry(name))
        .map(String::from);
    let Some(name) = name else {
        return Ok(None);
    };
    let entry = archive.by_name(&name).map_err(std::io::Error::other)?;
    read_limited(entry).map(Some)
}

fn read_limited(reader: impl Read) -> std::io::Result<String> {
    let mut buf = Vec::new();
    reader.take(MAX_METADATA_BYTES).read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    pub(crate) const PKG_INFO: &str = concat!(
        "Metadata-Version: 1.1\n",
        "Name: sampleproject\n",
        "Version: 1.0\n",
        "Summary: A sample Python project\n",
        "Author: The Python Packaging Authority\n",
        "License: MIT\n",
        "Platform: UNKNOWN\n",
        "Classifier: Programming Language :: Python\n",
        "Classifier: License :: OSI Approved :: MIT License\n",
        "Requires-External: libfoo\n",
        "Description: first line\n",
        "        |second line\n",
    );

    /// Build a gzipped sdist tarball containing `<top>/PKG-INFO`
    pub(crate) fn build_sdist(top: &str, pkg_info: &str) -> Vec<u8> {
        let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);

        let mut add = |path: &str, data: &[u8]| {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, data).unwrap();
        };
        add(&format!("{top}/setup.py"), b"from setuptools import setup\n");
        add(&format!("{top}/PKG-INFO"), pkg_info.as_bytes());

        builder.into_inner().unwrap().finish().unwrap()
    }

    fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            for (name, body) in entries {
                writer
                    .start_file(*name, zip::write::FileOptions::default())
                    .unwrap();
                writer.write_all(body.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn parse_folds_continuations_and_accumulates_repeats() {
        let meta = CoreMetadata::parse(PKG_INFO);
        assert_eq!(meta.first("name"), Some("sampleproject"));
        assert_eq!(meta.first("Summary"), Some("A sample Python project"));
        assert_eq!(meta.all("Classifier").len(), 2);
        assert_eq!(meta.first("Description"), Some("first line\nsecond line"));
        assert_eq!(meta.first("Platform"), None, "UNKNOWN is a placeholder");
        assert_eq!(meta.all("Requires-External"), vec!["libfoo"]);
    }

    #[test]
    fn parse_uses_body_as_description() {
        let meta = CoreMetadata::parse("Name: foo\nVersion: 1\n\nLong text here\nmore\n");
        assert_eq!(meta.first("description"), Some("Long text here\nmore"));
    }

    #[test]
    fn archive_kind_from_filename() {
        assert_eq!(ArchiveKind::from_filename("a-1.0.tar.gz"), Some(ArchiveKind::TarGz));
        assert_eq!(ArchiveKind::from_filename("a-1.0.TGZ"), Some(ArchiveKind::TarGz));
        assert_eq!(
            ArchiveKind::from_filename("a-1.0-py3-none-any.whl"),
            Some(ArchiveKind::Wheel)
        );
        assert_eq!(ArchiveKind::from_filename("a-1.0-py2.7.egg"), Some(ArchiveKind::Egg));
        assert_eq!(ArchiveKind::from_filename("a-1.0.zip"), Some(ArchiveKind::Zip));
        assert_eq!(ArchiveKind::from_filename("a-1.0.exe"), None);
    }

    #[test]
    fn reads_pkg_info_from_sdist_tarball() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sampleproject-1.0.tar.gz");
        std::fs::write(&path, build_sdist("sampleproject-1.0", PKG_INFO)).unwrap();

        let meta = read_package_metadata(&path).unwrap().unwrap();
        assert_eq!(meta.first("Version"), Some("1.0"));
        assert_eq!(meta.first("License"), Some("MIT"));
    }

    #[test]
    fn reads_metadata_from_wheel() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("foo-2.0-py3-none-any.whl");
        std::fs::write(
            &path,
            build_zip(&[
                ("foo/__init__.py", ""),
                (
                    "foo-2.0.dist-info/METADATA",
                    "Metadata-Version: 2.1\nName: foo\nVersion: 2.0\nRequires-Dist: bar>=1\n",
                ),
            ]),
        )
        .unwrap();

        let meta = read_package_metadata(&path).unwrap().unwrap();
        assert_eq!(meta.all("Requires-Dist"), vec!["bar>=1"]);
    }

    #[test]
    fn reads_pkg_info_from_egg() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("foo-2.0-py2.7.egg");
        std::fs::write(
            &path,
            build_zip(&[("EGG-INFO/PKG-INFO", "Name: foo\nVersion: 2.0\n")]),
        )
        .unwrap();

        let meta = read_package_metadata(&path).unwrap().unwrap();
        assert_eq!(meta.first("Name"), Some("foo"));
    }

    #[test]
    fn archive_without_metadata_yields_none() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("foo-1.0.zip");
        std::fs::write(&path, build_zip(&[("foo-1.0/setup.py", "")])).unwrap();
        assert!(read_package_metadata(&path).unwrap().is_none());

        let exe = temp.path().join("foo-1.0.win32.exe");
        std::fs::write(&exe, b"MZ").unwrap();
        assert!(read_package_metadata(&exe).unwrap().is_none());
    }

    #[test]
    fn corrupt_archive_is_read_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("broken-1.0.tar.gz");
        std::fs::write(&path, b"not a gzip stream").unwrap();
        assert!(read_package_metadata(&path).is_err());
    }
}
