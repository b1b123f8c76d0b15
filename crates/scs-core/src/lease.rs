//! Per-component volume leases.
//!
//! A lease is a small JSON record under `leases/`, written and removed while
//! holding the component's `fs2` lock, so it outlives the process that
//! started the restore container and is visible to whoever polls it.

use crate::ScsError;
use scs_runtime::ContainerBackend;
use scs_schema::{ComponentId, ContainerId, MachineName};
use scs_store::{FileLock, StoreLayout};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// How long a lease whose container does not exist yet still holds the
/// volume. The owning run prepares its run dir before creating the container.
pub const SETUP_GRACE_SECS: i64 = 600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub run_id: String,
    pub component: ComponentId,
    /// Name of the restore container, known before it is created.
    pub container_name: String,
    pub acquired_at: String,
}

#[derive(Debug)]
pub struct VolumeLease {
    layout: StoreLayout,
    name: MachineName,
    run_id: String,
}

fn read_lease(path: &Path) -> Result<Option<LeaseRecord>, ScsError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    match serde_json::from_str(&content) {
        Ok(record) => Ok(Some(record)),
        Err(e) => {
            warn!("ignoring unreadable lease {}: {e}", path.display());
            Ok(None)
        }
    }
}

/// True while a lease without a container is younger than the grace window.
fn in_setup(record: &LeaseRecord) -> bool {
    chrono::DateTime::parse_from_rfc3339(&record.acquired_at).is_ok_and(|at| {
        chrono::Utc::now().signed_duration_since(at) < chrono::Duration::seconds(SETUP_GRACE_SECS)
    })
}

fn write_lease(path: &Path, record: &LeaseRecord) -> Result<(), ScsError> {
    let dir = path
        .parent()
        .ok_or_else(|| ScsError::Unexpected(format!("{} has no parent", path.display())))?;
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(serde_json::to_string_pretty(record)?.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| ScsError::from(e.error))?;
    Ok(())
}

impl VolumeLease {
    /// Claim the component's volume for `record.run_id`.
    ///
    /// An existing lease blocks the claim while its container is running or
    /// not yet started. A lease whose container was never created blocks for
    /// [`SETUP_GRACE_SECS`] after it was taken. Past that, or once the
    /// container exited, the lease is stale and taken over.
    pub fn acquire(
        layout: &StoreLayout,
        name: &MachineName,
        record: &LeaseRecord,
        containers: &dyn ContainerBackend,
    ) -> Result<Self, ScsError> {
        let _lock = FileLock::acquire(&layout.lock_file(name))?;
        let path = layout.lease_file(name);

        if let Some(existing) = read_lease(&path)? {
            let container = ContainerId::new(existing.container_name.as_str());
            match containers.inspect_container(&container)? {
                Some(state) if state.running || state.exit_code.is_none() => {
                    return Err(ScsError::RestoreInProgress {
                        volume: name.to_string(),
                        run_id: existing.run_id,
                    });
                }
                None if in_setup(&existing) => {
                    debug!("run {} on {name} has not created its container yet", existing.run_id);
                    return Err(ScsError::RestoreInProgress {
                        volume: name.to_string(),
                        run_id: existing.run_id,
                    });
                }
                _ => warn!(
                    "taking over stale restore lease of run {} on {name}",
                    existing.run_id
                ),
            }
        }

        write_lease(&path, record)?;
        debug!("lease on {name} taken by run {}", record.run_id);
        Ok(Self {
            layout: layout.clone(),
            name: name.clone(),
            run_id: record.run_id.clone(),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn release(self) -> Result<bool, ScsError> {
        Self::release_run(&self.layout, &self.name, &self.run_id)
    }

    /// Remove the lease if it still belongs to `run_id`. Returns whether a
    /// lease was removed.
    pub fn release_run(layout: &StoreLayout, name: &MachineName, run_id: &str) -> Result<bool, ScsError> {
        let _lock = FileLock::acquire(&layout.lock_file(name))?;
        let path = layout.lease_file(name);
        match read_lease(&path)? {
            Some(record) if record.run_id == run_id => {
                fs::remove_file(&path)?;
                debug!("lease on {name} released by run {run_id}");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn current(layout: &StoreLayout, name: &MachineName) -> Result<Option<LeaseRecord>, ScsError> {
        read_lease(&layout.lease_file(name))
    }
}
