//! File-backed persistence and filesystem plumbing for scs.
//!
//! This crate provides the storage layer: `StoreLayout` for the directory
//! structure under the store root, `EntityStore` for checksummed JSON entity
//! records with atomic writes, checksum helpers for snapshot archives and
//! dumps, the deterministic tar/gzip archive codec, uniquely named temporary
//! `Workspace`s, advisory `FileLock`s, and the `ProgressTracker` that records
//! long-running operations.

pub mod archive;
pub mod checksum;
pub mod entity;
pub mod integrity;
pub mod layout;
pub mod lock;
pub mod progress;
pub mod uri;
pub mod workspace;

pub use archive::{is_gzip, pack_archive, pack_tar, unpack_archive};
pub use checksum::{read_checksum_file, Checksum, ChecksumAlgorithm};
pub use entity::{Entity, EntityStore};
pub use integrity::{verify_store_integrity, IntegrityFailure, IntegrityReport};
pub use layout::{StoreLayout, STORE_FORMAT_VERSION};
pub use lock::FileLock;
pub use progress::{
    OperationStatus, ProgressLog, ProgressReport, ProgressTracker, StepProgress, StepStatus,
};
pub use uri::resolve_storage_uri;
pub use workspace::Workspace;

use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

/// Write `content` to `dest` via a temp file in the same directory and an
/// atomic rename.
pub(crate) fn atomic_write(dest: &Path, content: &[u8]) -> Result<(), StoreError> {
    let dir = dest.parent().ok_or_else(|| {
        StoreError::Io(std::io::Error::other(format!(
            "{} has no parent directory",
            dest.display()
        )))
    })?;
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(dir)?;
    Ok(())
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("integrity check failed for {key}: expected {expected}, got {actual}")]
    IntegrityFailure {
        key: String,
        expected: String,
        actual: String,
    },
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
    #[error("lock acquisition failed: {0}")]
    LockFailed(String),
    #[error("store format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("invalid storage uri '{0}'")]
    InvalidUri(String),
    #[error("invalid checksum '{0}'")]
    InvalidChecksum(String),
    #[error("operation {0} not found")]
    OperationNotFound(String),
}
