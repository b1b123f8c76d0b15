//! Orchestration core for scs.
//!
//! Ties the schema, store and runtime crates together: the
//! `ComponentProvisioner` (per-bundle strategy registry), the
//! `StackOrchestrator` (ordered phase sequencing with partial-failure
//! reports), the `SnapshotRestorePipeline` (verify, stage, unpack, dispatch)
//! and the `ContainerRestoreExecutor` that runs the backup/swap/rollback
//! script against a volume. Every orchestration method returns a
//! [`ScsResult`]; expected failures never surface as `Err` or panics.

pub mod actions;
pub mod executor;
pub mod lease;
pub mod lifecycle;
pub mod manager;
pub mod orchestrator;
pub mod provisioner;
pub mod restore;
pub mod result;

pub use actions::{ApplicationAction, FilesystemAction, SqlAction, TriplestoreAction};
pub use executor::{ContainerRestoreExecutor, RestoreDiagnostics, RestoreHandle, RestoreState};
pub use lease::{LeaseRecord, VolumeLease};
pub use lifecycle::validate_transition;
pub use manager::{Manager, SnapshotVerification, StackOutcome};
pub use orchestrator::{FlavourStack, PhaseReport, StackAction, StackBuild, StackOrchestrator};
pub use provisioner::{ActionOutput, ComponentAction, ComponentOutcome, ComponentProvisioner, CreateMode};
pub use restore::{EntryOutcome, RestoreReport, SnapshotRestorePipeline};
pub use result::ScsResult;

use scs_runtime::BackendError;
use scs_schema::{ConfigError, ManifestError, NameError, UnknownBundle};
use scs_store::StoreError;
use thiserror::Error;

/// Failure taxonomy of the orchestration layer.
///
/// Variants carry rendered strings rather than source errors so results
/// holding them can be cloned into partial reports and serialized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScsError {
    #[error("missing configuration: {0}")]
    MissingConfiguration(String),
    #[error("backend driver '{0}' is not available")]
    BackendUnavailable(String),
    #[error("unknown bundle '{0}'")]
    UnknownBundle(String),
    #[error("invalid machine name: {0}")]
    InvalidMachineName(String),
    #[error("component {0} not found")]
    ComponentNotFound(String),
    #[error("stack {0} not found")]
    StackNotFound(String),
    #[error("snapshot {0} not found")]
    SnapshotNotFound(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("{operation} failed: {detail}")]
    BackendRequestFailed { operation: String, detail: String },
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("workspace unavailable: {0}")]
    WorkspaceUnavailable(String),
    #[error("extraction failed: {0}")]
    ExtractionFailed(String),
    #[error("invalid manifest: {0}")]
    ManifestInvalid(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("a restore of {volume} is already in progress (run {run_id})")]
    RestoreInProgress { volume: String, run_id: String },
    #[error("restore failed: {0}")]
    RestoreFailed(String),
    #[error("restore incomplete: {0}")]
    RestoreIncomplete(String),
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("store error: {0}")]
    Store(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl ScsError {
    /// Stable machine-readable code, used in logs and JSON output.
    pub fn code(&self) -> &'static str {
        match self {
            ScsError::MissingConfiguration(_) => "missing_configuration",
            ScsError::BackendUnavailable(_) => "backend_unavailable",
            ScsError::UnknownBundle(_) => "unknown_bundle",
            ScsError::InvalidMachineName(_) => "invalid_machine_name",
            ScsError::ComponentNotFound(_) => "component_not_found",
            ScsError::StackNotFound(_) => "stack_not_found",
            ScsError::SnapshotNotFound(_) => "snapshot_not_found",
            ScsError::AlreadyExists(_) => "already_exists",
            ScsError::BackendRequestFailed { .. } => "backend_request_failed",
            ScsError::ChecksumMismatch { .. } => "checksum_mismatch",
            ScsError::FileNotFound(_) => "file_not_found",
            ScsError::WorkspaceUnavailable(_) => "workspace_unavailable",
            ScsError::ExtractionFailed(_) => "extraction_failed",
            ScsError::ManifestInvalid(_) => "manifest_invalid",
            ScsError::Unsupported(_) => "unsupported",
            ScsError::RestoreInProgress { .. } => "restore_in_progress",
            ScsError::RestoreFailed(_) => "restore_failed",
            ScsError::RestoreIncomplete(_) => "restore_incomplete",
            ScsError::InvalidTransition { .. } => "invalid_transition",
            ScsError::Store(_) => "store_error",
            ScsError::Unexpected(_) => "unexpected",
        }
    }

    /// Failures that abort a stack deletion. A missing component entity
    /// only leaves a dangling reference to clean up.
    pub fn is_fatal_for_delete(&self) -> bool {
        !matches!(self, ScsError::ComponentNotFound(_))
    }
}

impl From<StoreError> for ScsError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { kind: "component", id } => ScsError::ComponentNotFound(id),
            StoreError::NotFound { kind: "stack", id } => ScsError::StackNotFound(id),
            StoreError::NotFound { kind: "snapshot", id } => ScsError::SnapshotNotFound(id),
            other => ScsError::Store(other.to_string()),
        }
    }
}

impl From<BackendError> for ScsError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Unavailable(driver) => ScsError::BackendUnavailable(driver),
            BackendError::Request { operation, detail }
            | BackendError::InvalidResponse { operation, detail } => {
                ScsError::BackendRequestFailed { operation, detail }
            }
            BackendError::NotFound(what) => ScsError::BackendRequestFailed {
                operation: "lookup".to_owned(),
                detail: format!("not found: {what}"),
            },
            BackendError::Io(e) => ScsError::BackendRequestFailed {
                operation: "backend I/O".to_owned(),
                detail: e.to_string(),
            },
        }
    }
}

impl From<ManifestError> for ScsError {
    fn from(e: ManifestError) -> Self {
        ScsError::ManifestInvalid(e.to_string())
    }
}

impl From<ConfigError> for ScsError {
    fn from(e: ConfigError) -> Self {
        ScsError::MissingConfiguration(e.to_string())
    }
}

impl From<NameError> for ScsError {
    fn from(e: NameError) -> Self {
        ScsError::InvalidMachineName(e.to_string())
    }
}

impl From<UnknownBundle> for ScsError {
    fn from(e: UnknownBundle) -> Self {
        ScsError::UnknownBundle(e.0)
    }
}

impl From<std::io::Error> for ScsError {
    fn from(e: std::io::Error) -> Self {
        ScsError::Unexpected(e.to_string())
    }
}

impl From<serde_json::Error> for ScsError {
    fn from(e: serde_json::Error) -> Self {
        ScsError::Unexpected(format!("serialization: {e}"))
    }
}
