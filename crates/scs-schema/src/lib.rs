//! Identifiers, bundles, entity records, snapshot manifests and service
//! configuration for scs.
//!
//! This crate defines the schema layer: typed ids and DNS-safe machine names
//! (`MachineName`), the component/stack bundle taxonomy with its phase order
//! (`ComponentBundle`, `StackBundle`, `Phase`), persisted entity records
//! (`Component`, `Stack`, `Snapshot`), the `manifest.json` format carried in
//! snapshot archives, and the TOML service configuration (`ScsConfig`).

pub mod bundle;
pub mod config;
pub mod entity;
pub mod manifest;
pub mod types;

pub use bundle::{ComponentBundle, Phase, StackBundle, UnknownBundle};
pub use config::{
    ApplicationSection, ConfigError, ContainersSection, RestoreSection, ScsConfig, SqlSection,
    StoreSection, TriplestoreSection, CONFIG_ENV, DEFAULT_CONFIG_PATH,
};
pub use entity::{
    volume_name_for, Component, ComponentDraft, ComponentStatus, Snapshot, SnapshotDraft,
    SnapshotSubject, Stack, StackDraft,
};
pub use manifest::{
    locate_manifest, parse_manifest_file, parse_manifest_str, EntryBundle, ManifestEntry,
    ManifestError, SnapshotManifest, MANIFEST_FILE,
};
pub use types::{
    ComponentId, ContainerId, MachineName, NameError, Owner, SnapshotId, StackId, StorageUri,
    VolumeName,
};
