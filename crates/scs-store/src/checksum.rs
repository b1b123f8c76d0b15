//! Content checksums for snapshot archives and dump files.
//!
//! Stored checksums are written as `<algorithm>:<hex>`. A bare 64-digit hex
//! string is read as sha256, the format `sha256sum` and most capture tooling
//! emit.

use crate::StoreError;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Sha256,
    Blake3,
}

impl ChecksumAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Blake3 => "blake3",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    algorithm: ChecksumAlgorithm,
    hex: String,
}

impl Checksum {
    pub fn parse(input: &str) -> Result<Self, StoreError> {
        let trimmed = input.trim();
        let (algorithm, hex) = match trimmed.split_once(':') {
            Some(("sha256", hex)) => (ChecksumAlgorithm::Sha256, hex),
            Some(("blake3", hex)) => (ChecksumAlgorithm::Blake3, hex),
            Some(_) => return Err(StoreError::InvalidChecksum(trimmed.to_owned())),
            None => (ChecksumAlgorithm::Sha256, trimmed),
        };
        if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(StoreError::InvalidChecksum(trimmed.to_owned()));
        }
        Ok(Self {
            algorithm,
            hex: hex.to_ascii_lowercase(),
        })
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Hash a file, streaming its content.
    pub fn compute(algorithm: ChecksumAlgorithm, path: &Path) -> Result<Self, StoreError> {
        let mut file = File::open(path)?;
        let hex = match algorithm {
            ChecksumAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                io::copy(&mut file, &mut hasher)?;
                hex_encode(&hasher.finalize())
            }
            ChecksumAlgorithm::Blake3 => {
                let mut hasher = blake3::Hasher::new();
                io::copy(&mut file, &mut hasher)?;
                hasher.finalize().to_hex().to_string()
            }
        };
        Ok(Self { algorithm, hex })
    }

    /// Recompute the file's hash with this checksum's algorithm.
    pub fn verify_file(&self, path: &Path) -> Result<Result<(), Checksum>, StoreError> {
        let actual = Self::compute(self.algorithm, path)?;
        if actual == *self {
            Ok(Ok(()))
        } else {
            Ok(Err(actual))
        }
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.as_str(), self.hex)
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

/// Read a companion checksum file: `sha256sum` output (`<hex>  <name>`),
/// a prefixed `<algorithm>:<hex>`, or bare hex.
pub fn read_checksum_file(path: &Path) -> Result<Checksum, StoreError> {
    let content = fs::read_to_string(path)?;
    let token = content
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .and_then(|l| l.split_whitespace().next())
        .ok_or_else(|| StoreError::InvalidChecksum(format!("{} is empty", path.display())))?;
    Checksum::parse(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    // sha256("hello\n")
    const HELLO_SHA256: &str = "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03";

    fn hello_file() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        fs::write(&path, b"hello\n").unwrap();
        (dir, path)
    }

    #[test]
    fn sha256_of_known_content() {
        let (_dir, path) = hello_file();
        let sum = Checksum::compute(ChecksumAlgorithm::Sha256, &path).unwrap();
        assert_eq!(sum.hex(), HELLO_SHA256);
        assert_eq!(sum.to_string(), format!("sha256:{HELLO_SHA256}"));
    }

    #[test]
    fn blake3_matches_library() {
        let (_dir, path) = hello_file();
        let sum = Checksum::compute(ChecksumAlgorithm::Blake3, &path).unwrap();
        assert_eq!(sum.hex(), blake3::hash(b"hello\n").to_hex().as_str());
    }

    #[test]
    fn parse_accepts_prefixed_and_bare() {
        let bare = Checksum::parse(HELLO_SHA256).unwrap();
        assert_eq!(bare.algorithm(), ChecksumAlgorithm::Sha256);
        let upper = Checksum::parse(&format!("sha256:{}", HELLO_SHA256.to_uppercase())).unwrap();
        assert_eq!(upper, bare);
        let b3 = Checksum::parse(&format!("blake3:{HELLO_SHA256}")).unwrap();
        assert_eq!(b3.algorithm(), ChecksumAlgorithm::Blake3);
    }

    #[test]
    fn parse_rejects_malformed() {
        let not_hex = "g".repeat(64);
        for bad in ["", "md5:abcd", "sha256:xyz", "1234", not_hex.as_str()] {
            assert!(Checksum::parse(bad).is_err(), "{bad} accepted");
        }
    }

    #[test]
    fn verify_reports_actual_on_mismatch() {
        let (_dir, path) = hello_file();
        let good = Checksum::parse(HELLO_SHA256).unwrap();
        assert!(good.verify_file(&path).unwrap().is_ok());
        let bad = Checksum::parse(&"0".repeat(64)).unwrap();
        let actual = bad.verify_file(&path).unwrap().unwrap_err();
        assert_eq!(actual, good);
    }

    #[test]
    fn reads_sha256sum_format() {
        let (dir, _path) = hello_file();
        let sum_file = dir.path().join("hello.txt.sha256");
        fs::write(&sum_file, format!("{HELLO_SHA256}  hello.txt\n")).unwrap();
        assert_eq!(read_checksum_file(&sum_file).unwrap().hex(), HELLO_SHA256);

        fs::write(&sum_file, "\n\n").unwrap();
        assert!(read_checksum_file(&sum_file).is_err());
    }
}
