//! `manifest.json` shipped inside every snapshot archive.
//!
//! The raw document is deserialized leniently (extra top-level keys such as
//! `createdAt` are ignored) and then validated into [`SnapshotManifest`].
//! A bundle name this build does not know is kept as [`EntryBundle::Unknown`]
//! so the restore can report that entry on its own.

use crate::bundle::ComponentBundle;
use crate::types::{ComponentId, MachineName};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Component as PathComponent, Path, PathBuf};
use thiserror::Error;

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse manifest: {0}")]
    ParseJson(#[from] serde_json::Error),
    #[error("manifest mapping must not be empty")]
    EmptyMapping,
    #[error("entry {index}: eid must be a positive integer, got {eid}")]
    InvalidEid { index: usize, eid: i64 },
    #[error("entry {index}: invalid machineName: {reason}")]
    InvalidMachineName { index: usize, reason: String },
    #[error("entry {index}: {field} '{path}' must be a non-empty relative path without '..'")]
    InvalidPath {
        index: usize,
        field: &'static str,
        path: String,
    },
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    mapping: Vec<RawEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEntry {
    bundle: String,
    eid: i64,
    machine_name: String,
    dump_file: String,
    #[serde(default)]
    checksum_file: Option<String>,
}

/// Bundle named by a manifest entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum EntryBundle {
    Known(ComponentBundle),
    Unknown(String),
}

impl EntryBundle {
    pub fn parse(raw: &str) -> Self {
        raw.parse()
            .map_or_else(|_| EntryBundle::Unknown(raw.to_owned()), EntryBundle::Known)
    }

    pub fn known(&self) -> Option<ComponentBundle> {
        match self {
            EntryBundle::Known(b) => Some(*b),
            EntryBundle::Unknown(_) => None,
        }
    }
}

impl fmt::Display for EntryBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryBundle::Known(b) => f.write_str(b.as_str()),
            EntryBundle::Unknown(raw) => f.write_str(raw),
        }
    }
}

impl From<ComponentBundle> for EntryBundle {
    fn from(b: ComponentBundle) -> Self {
        EntryBundle::Known(b)
    }
}

/// One component dump inside a snapshot archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub bundle: EntryBundle,
    pub eid: ComponentId,
    pub machine_name: MachineName,
    /// Relative to the manifest's directory.
    pub dump_file: PathBuf,
    pub checksum_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotManifest {
    pub mapping: Vec<ManifestEntry>,
}

impl SnapshotManifest {
    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }
}

fn validate_relative(index: usize, field: &'static str, raw: &str) -> Result<PathBuf, ManifestError> {
    let invalid = || ManifestError::InvalidPath {
        index,
        field,
        path: raw.to_owned(),
    };
    if raw.trim().is_empty() {
        return Err(invalid());
    }
    let path = Path::new(raw);
    let clean = path
        .components()
        .all(|c| matches!(c, PathComponent::Normal(_) | PathComponent::CurDir));
    if !clean {
        return Err(invalid());
    }
    Ok(path.to_path_buf())
}

fn validate_entry(index: usize, raw: RawEntry) -> Result<ManifestEntry, ManifestError> {
    let bundle = EntryBundle::parse(&raw.bundle);
    if raw.eid <= 0 {
        return Err(ManifestError::InvalidEid { index, eid: raw.eid });
    }
    let machine_name =
        MachineName::parse(&raw.machine_name).map_err(|e| ManifestError::InvalidMachineName {
            index,
            reason: e.to_string(),
        })?;
    let dump_file = validate_relative(index, "dumpFile", &raw.dump_file)?;
    let checksum_file = raw
        .checksum_file
        .as_deref()
        .map(|p| validate_relative(index, "checksumFile", p))
        .transpose()?;

    Ok(ManifestEntry {
        bundle,
        eid: ComponentId::new(raw.eid as u64),
        machine_name,
        dump_file,
        checksum_file,
    })
}

pub fn parse_manifest_str(input: &str) -> Result<SnapshotManifest, ManifestError> {
    let raw: RawManifest = serde_json::from_str(input)?;
    if raw.mapping.is_empty() {
        return Err(ManifestError::EmptyMapping);
    }
    let mapping = raw
        .mapping
        .into_iter()
        .enumerate()
        .map(|(i, entry)| validate_entry(i + 1, entry))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(SnapshotManifest { mapping })
}

pub fn parse_manifest_file(path: impl AsRef<Path>) -> Result<SnapshotManifest, ManifestError> {
    let content = fs::read_to_string(path)?;
    parse_manifest_str(&content)
}

/// Find `manifest.json` in an extracted archive: either at the root, or
/// inside the single top-level directory some archivers wrap content in.
///
/// Returns the manifest path; dump paths in the manifest are relative to
/// its parent directory.
pub fn locate_manifest(root: &Path) -> Option<PathBuf> {
    let direct = root.join(MANIFEST_FILE);
    if direct.is_file() {
        return Some(direct);
    }
    let mut dirs = fs::read_dir(root)
        .ok()?
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()));
    let only = dirs.next()?;
    if dirs.next().is_some() {
        return None;
    }
    let nested = only.path().join(MANIFEST_FILE);
    nested.is_file().then_some(nested)
}
