//! Artifact digests.
//!
//! Upstream manifests may describe the same file with several digests of
//! different strength; [`ChecksumType`] names the algorithm and [`Checksum`]
//! pairs it with a lowercase hex value.

use crate::error::StorageError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::io::Read;
use std::path::Path;

/// Read buffer size for hashing (1 MiB)
const BUFFER_SIZE: usize = 1024 * 1024;

/// Supported digest algorithms
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumType {
    /// Legacy MD5, still the only digest on older releases
    Md5,
    /// SHA-256
    Sha256,
    /// SHA-512, the default for stored units
    #[default]
    Sha512,
}

impl ChecksumType {
    /// Lowercase algorithm name as used in manifests and storage paths
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumType::Md5 => "md5",
            ChecksumType::Sha256 => "sha256",
            ChecksumType::Sha512 => "sha512",
        }
    }

    /// Length of a hex digest for this algorithm
    pub fn hex_len(&self) -> usize {
        match self {
            ChecksumType::Md5 => 32,
            ChecksumType::Sha256 => 64,
            ChecksumType::Sha512 => 128,
        }
    }
}

impl std::fmt::Display for ChecksumType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChecksumType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(ChecksumType::Md5),
            "sha256" => Ok(ChecksumType::Sha256),
            "sha512" => Ok(ChecksumType::Sha512),
            other => Err(format!("unsupported checksum type: {other}")),
        }
    }
}

/// A digest value tagged with its algorithm
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    /// Algorithm that produced `value`
    pub algorithm: ChecksumType,
    /// Lowercase hex digest
    pub value: String,
}

impl Checksum {
    /// Create a checksum, normalizing the hex value to lowercase
    pub fn new(algorithm: ChecksumType, value: impl Into<String>) -> Self {
        Self {
            algorithm,
            value: value.into().trim().to_ascii_lowercase(),
        }
    }

    /// Whether `other` is the same algorithm and value
    pub fn matches(&self, other: &Checksum) -> bool {
        self.algorithm == other.algorithm && self.value == other.value
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.value)
    }
}

enum Hasher {
    Md5(md5::Context),
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Hasher {
    fn new(algorithm: ChecksumType) -> Self {
        match algorithm {
            ChecksumType::Md5 => Hasher::Md5(md5::Context::new()),
            ChecksumType::Sha256 => Hasher::Sha256(Sha256::new()),
            ChecksumType::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Md5(ctx) => ctx.consume(data),
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Hasher::Md5(ctx) => format!("{:x}", ctx.compute()),
            Hasher::Sha256(h) => format!("{:x}", h.finalize()),
            Hasher::Sha512(h) => format!("{:x}", h.finalize()),
        }
    }
}

/// Hash an in-memory buffer
pub fn checksum_bytes(data: &[u8], algorithm: ChecksumType) -> Checksum {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    Checksum::new(algorithm, hasher.finalize_hex())
}

/// Hash a file by streaming it through the chosen algorithm.
///
/// Blocking; call from `spawn_blocking` when on the async runtime.
pub fn checksum_file(path: &Path, algorithm: ChecksumType) -> Result<Checksum, StorageError> {
    let read_failed = |source| StorageError::ReadFailed {
        path: path.to_path_buf(),
        source,
    };

    let mut file = std::fs::File::open(path).map_err(read_failed)?;
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer).map_err(read_failed)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(Checksum::new(algorithm, hasher.finalize_hex()))
}

/// Async wrapper around [`checksum_file`] that hashes on the blocking pool
pub async fn checksum_file_async(
    path: &Path,
    algorithm: ChecksumType,
) -> Result<Checksum, StorageError> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || checksum_file(&owned, algorithm))
        .await
        .map_err(|e| StorageError::ReadFailed {
            path: path.to_path_buf(),
            source: std::io::Error::other(format!("hashing task failed: {e}")),
        })?
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn known_digests_of_hello_world() {
        let data = b"Hello World!";
        assert_eq!(
            checksum_bytes(data, ChecksumType::Md5).value,
            "ed076287532e86365e841e92bfc50d8c"
        );
        assert_eq!(
            checksum_bytes(data, ChecksumType::Sha256).value,
            "7f83b1657ff1fc53b92dc18148a1d65dfc2d4b1fa3d677284addd200126d9069"
        );
        assert_eq!(
            checksum_bytes(data, ChecksumType::Sha512).value,
            "861844d6704e8573fec34d967e20bcfef3d424cf48be04e6dc08f2bd58c729743371015ead891cc3cf1c9d34b49264b510751b1ff9e537937bc46b5d6ff4ecc8"
        );
    }

    #[test]
    fn file_checksum_matches_buffer_checksum() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("artifact.tar.gz");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"Hello").unwrap();
        file.write_all(b" World!").unwrap();
        drop(file);

        for algorithm in [ChecksumType::Md5, ChecksumType::Sha256, ChecksumType::Sha512] {
            let from_file = checksum_file(&path, algorithm).unwrap();
            assert_eq!(from_file, checksum_bytes(b"Hello World!", algorithm));
            assert_eq!(from_file.value.len(), algorithm.hex_len());
        }
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = checksum_file(Path::new("/nonexistent/artifact"), ChecksumType::Md5).unwrap_err();
        assert!(matches!(err, StorageError::ReadFailed { .. }));
    }

    #[test]
    fn checksum_type_parses_case_insensitively() {
        assert_eq!("MD5".parse::<ChecksumType>().unwrap(), ChecksumType::Md5);
        assert_eq!("sha512".parse::<ChecksumType>().unwrap(), ChecksumType::Sha512);
        assert!("crc32".parse::<ChecksumType>().is_err());
        assert_eq!(ChecksumType::default(), ChecksumType::Sha512);
    }

    #[test]
    fn checksum_value_is_normalized() {
        let a = Checksum::new(ChecksumType::Md5, " ABCDEF ");
        let b = Checksum::new(ChecksumType::Md5, "abcdef");
        assert!(a.matches(&b));
        assert!(!a.matches(&Checksum::new(ChecksumType::Sha256, "abcdef")));
    }

    #[tokio::test]
    async fn async_checksum_runs_on_blocking_pool() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("f");
        std::fs::write(&path, b"Hello World!").unwrap();
        let sum = checksum_file_async(&path, ChecksumType::Md5).await.unwrap();
        assert_eq!(sum.value, "ed076287532e86365e841e92bfc50d8c");
    }
}
