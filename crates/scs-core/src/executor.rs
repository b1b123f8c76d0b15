//! Runs the backup/swap/rollback restore script in a one-shot container.

use crate::lease::{LeaseRecord, VolumeLease};
use crate::{ScsError, ScsResult};
use scs_runtime::restore_script::{
    CONTAINER_DUMP_DIR, CONTAINER_TARGET, CONTAINER_WORK, SCRIPT_FILE,
};
use scs_runtime::{
    build_restore_script, ContainerBackend, ContainerSpec, Mount, RestorePaths, RestoreScript,
    FAILURE_MARKER, SENTINEL_FILE,
};
use scs_schema::{Component, ComponentId, ContainerId, MachineName, RestoreSection, VolumeName};
use scs_store::StoreLayout;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

pub const HANDLE_FILE: &str = "handle.json";

/// Everything needed to follow a started restore, from any process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreHandle {
    pub run_id: String,
    pub component: ComponentId,
    pub machine_name: MachineName,
    pub volume: VolumeName,
    pub container_id: ContainerId,
    pub run_dir: PathBuf,
    pub sentinel: PathBuf,
    pub failure_marker: PathBuf,
    pub started_at: String,
}

impl RestoreHandle {
    pub fn handle_path(&self) -> PathBuf {
        self.run_dir.join(HANDLE_FILE)
    }

    pub fn save(&self) -> Result<(), ScsError> {
        let mut tmp = NamedTempFile::new_in(&self.run_dir)?;
        tmp.write_all(serde_json::to_string_pretty(self)?.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.handle_path())
            .map_err(|e| ScsError::from(e.error))?;
        Ok(())
    }

    /// Load from a handle file or from the run directory holding one.
    pub fn load(path: &Path) -> Result<Self, ScsError> {
        let file = if path.is_dir() {
            path.join(HANDLE_FILE)
        } else {
            path.to_path_buf()
        };
        if !file.is_file() {
            return Err(ScsError::FileNotFound(file.display().to_string()));
        }
        Ok(serde_json::from_str(&fs::read_to_string(&file)?)?)
    }
}

/// What a failed restore start left behind, for operators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreDiagnostics {
    pub run_id: Option<String>,
    pub volume: Option<VolumeName>,
    pub dump_file: PathBuf,
    pub run_dir: Option<PathBuf>,
    pub container_id: Option<ContainerId>,
    /// Raw backend error output.
    pub backend_output: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum RestoreState {
    Running,
    Completed {
        #[serde(rename = "finishedAt")]
        finished_at: String,
    },
}

pub struct ContainerRestoreExecutor {
    layout: StoreLayout,
    containers: Arc<dyn ContainerBackend>,
    image: String,
    owner: Option<(u32, u32)>,
}

impl ContainerRestoreExecutor {
    pub fn new(
        layout: StoreLayout,
        containers: Arc<dyn ContainerBackend>,
        restore: &RestoreSection,
    ) -> Self {
        let owner = match (restore.owner_uid, restore.owner_gid) {
            (Some(uid), Some(gid)) => Some((uid, gid)),
            (Some(uid), None) => Some((uid, uid)),
            _ => None,
        };
        Self {
            layout,
            containers,
            image: restore.image.clone(),
            owner,
        }
    }

    fn timestamp() -> String {
        chrono::Utc::now().format("%Y%m%d%H%M%S").to_string()
    }

    /// `<machine>-<timestamp>-<random>`: sortable and unique per invocation.
    fn new_run_id(name: &MachineName, timestamp: &str) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{name}-{timestamp}-{}", &suffix[..8])
    }

    /// Lay out `extract/`, `rollback/` and `dump/`, copy the dump in and
    /// write the script. Returns the dump's file name.
    fn prepare_run_dir(&self, run_dir: &Path, dump_file: &Path, timestamp: &str) -> Result<String, ScsError> {
        for sub in ["extract", "rollback", "dump"] {
            fs::create_dir_all(run_dir.join(sub))?;
        }
        let file_name = dump_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ScsError::FileNotFound(dump_file.display().to_string()))?;
        fs::copy(dump_file, run_dir.join("dump").join(&file_name))?;

        let script = build_restore_script(&RestoreScript {
            paths: RestorePaths::in_container(&file_name),
            owner: self.owner,
            timestamp: timestamp.to_owned(),
        });
        fs::write(run_dir.join(SCRIPT_FILE), script)?;
        Ok(file_name)
    }

    fn container_spec(&self, run_id: &str, component: &Component, run_dir: &Path) -> ContainerSpec {
        ContainerSpec {
            name: format!("scs-restore-{run_id}"),
            image: self.image.clone(),
            env: BTreeMap::new(),
            command: vec!["sh".to_owned(), format!("{CONTAINER_WORK}/{SCRIPT_FILE}")],
            mounts: vec![
                Mount::volume(component.volume_name(), CONTAINER_TARGET),
                Mount::bind(run_dir, CONTAINER_WORK, false),
                Mount::bind(run_dir.join("dump"), CONTAINER_DUMP_DIR, true),
            ],
            network: None,
            labels: BTreeMap::from([
                ("scs.restore.run".to_owned(), run_id.to_owned()),
                ("scs.component".to_owned(), component.id.to_string()),
            ]),
        }
    }

    fn release(&self, name: &MachineName, run_id: &str) {
        if let Err(e) = VolumeLease::release_run(&self.layout, name, run_id) {
            warn!("releasing restore lease of run {run_id}: {e}");
        }
    }

    /// Start restoring `dump_file` into the component's volume.
    ///
    /// Returns as soon as the container is running; follow it with
    /// [`poll`](Self::poll).
    pub fn restore_volume(
        &self,
        component: &Component,
        dump_file: &Path,
    ) -> ScsResult<RestoreHandle, RestoreDiagnostics> {
        let name = &component.machine_name;
        let volume = component.volume_name();
        let timestamp = Self::timestamp();
        let run_id = Self::new_run_id(name, &timestamp);
        let spec_name = format!("scs-restore-{run_id}");
        let mut diag = RestoreDiagnostics {
            run_id: Some(run_id.clone()),
            volume: Some(volume.clone()),
            dump_file: dump_file.to_path_buf(),
            ..RestoreDiagnostics::default()
        };
        info!("restoring {} into volume {volume} (run {run_id})", dump_file.display());

        if !dump_file.is_file() {
            return ScsResult::failure(ScsError::FileNotFound(dump_file.display().to_string()))
                .with_partial(diag);
        }

        let lease_record = LeaseRecord {
            run_id: run_id.clone(),
            component: component.id,
            container_name: spec_name,
            acquired_at: chrono::Utc::now().to_rfc3339(),
        };
        if let Err(e) = VolumeLease::acquire(&self.layout, name, &lease_record, self.containers.as_ref()) {
            return ScsResult::failure(e).with_partial(diag);
        }

        let run_dir = self.layout.restore_run_dir(&run_id);
        diag.run_dir = Some(run_dir.clone());
        if let Err(e) = self.prepare_run_dir(&run_dir, dump_file, &timestamp) {
            self.release(name, &run_id);
            return ScsResult::failure(ScsError::WorkspaceUnavailable(format!(
                "preparing {}: {e}",
                run_dir.display()
            )))
            .with_partial(diag);
        }
        debug!("restore run dir ready: {}", run_dir.display());

        let spec = self.container_spec(&run_id, component, &run_dir);
        let container_id = match self.containers.create_container(&spec) {
            Ok(id) => id,
            Err(e) => {
                warn!("creating restore container for {volume} failed: {e}");
                diag.backend_output = Some(e.to_string());
                self.release(name, &run_id);
                return ScsResult::failure(e.into()).with_partial(diag);
            }
        };
        diag.container_id = Some(container_id.clone());

        if let Err(e) = self.containers.start_container(&container_id) {
            warn!("starting restore container {container_id} failed: {e}");
            diag.backend_output = Some(e.to_string());
            if let Err(cleanup) = self.containers.remove_container(&container_id) {
                warn!("removing restore container {container_id}: {cleanup}");
            }
            self.release(name, &run_id);
            return ScsResult::failure(e.into()).with_partial(diag);
        }

        let handle = RestoreHandle {
            run_id,
            component: component.id,
            machine_name: name.clone(),
            volume: volume.clone(),
            container_id: container_id.clone(),
            sentinel: run_dir.join(SENTINEL_FILE),
            failure_marker: run_dir.join(FAILURE_MARKER),
            run_dir,
            started_at: chrono::Utc::now().to_rfc3339(),
        };
        if let Err(e) = handle.save() {
            warn!("persisting restore handle {}: {e}", handle.run_id);
        }
        ScsResult::success(
            handle,
            format!("restore container {container_id} started for volume {volume}"),
        )
    }

    /// Resolve a handle to its current state. Terminal states remove the
    /// container and release the volume lease.
    pub fn poll(&self, handle: &RestoreHandle) -> ScsResult<RestoreState> {
        if handle.sentinel.is_file() {
            let finished_at = fs::read_to_string(&handle.sentinel)
                .map(|s| s.trim().to_owned())
                .unwrap_or_default();
            self.finish(handle);
            return ScsResult::success(
                RestoreState::Completed { finished_at },
                format!("restore {} of {} completed", handle.run_id, handle.volume),
            );
        }
        if handle.failure_marker.is_file() {
            let reason = fs::read_to_string(&handle.failure_marker)
                .map(|s| s.trim().to_owned())
                .unwrap_or_default();
            self.finish(handle);
            return ScsResult::failure(ScsError::RestoreFailed(format!(
                "run {} rolled back: {reason}",
                handle.run_id
            )));
        }

        match self.containers.inspect_container(&handle.container_id) {
            Err(e) => ScsResult::failure(e.into()),
            Ok(None) => {
                self.finish(handle);
                ScsResult::failure(ScsError::RestoreFailed(format!(
                    "container {} is gone and left no {SENTINEL_FILE}",
                    handle.container_id
                )))
            }
            Ok(Some(state)) => match state.exit_code {
                None => ScsResult::success(
                    RestoreState::Running,
                    format!("restore {} is {}", handle.run_id, state.status),
                ),
                Some(code) => {
                    self.finish(handle);
                    ScsResult::failure(ScsError::RestoreFailed(format!(
                        "container {} exited with code {code} without writing {SENTINEL_FILE}",
                        handle.container_id
                    )))
                }
            },
        }
    }

    fn finish(&self, handle: &RestoreHandle) {
        if let Err(e) = self.containers.remove_container(&handle.container_id) {
            warn!("removing restore container {}: {e}", handle.container_id);
        }
        self.release(&handle.machine_name, &handle.run_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scs_runtime::MockContainerBackend;
    use scs_schema::{ComponentBundle, ComponentDraft, ComponentStatus, Owner};

    struct Fixture {
        dir: tempfile::TempDir,
        layout: StoreLayout,
        containers: Arc<MockContainerBackend>,
        executor: ContainerRestoreExecutor,
        component: Component,
        dump: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path().join("store"));
        layout.initialize().unwrap();
        let containers = Arc::new(MockContainerBackend::new());
        let restore = RestoreSection {
            image: "alpine:3.20".to_owned(),
            owner_uid: Some(33),
            owner_gid: None,
        };
        let executor = ContainerRestoreExecutor::new(layout.clone(), containers.clone(), &restore);
        let component = ComponentDraft::new(
            ComponentBundle::WisskiApp,
            MachineName::parse("demo-app").unwrap(),
            Owner::new("alice"),
        )
        .into_component(ComponentId::new(3), ComponentStatus::Running);
        let dump = dir.path().join("files.tar.gz");
        fs::write(&dump, b"dump bytes").unwrap();
        Fixture {
            dir,
            layout,
            containers,
            executor,
            component,
            dump,
        }
    }

    #[test]
    fn start_lays_out_run_dir_and_mounts() {
        let fx = fixture();
        let r = fx.executor.restore_volume(&fx.component, &fx.dump);
        assert!(r.is_success(), "{}", r.message());
        let handle = r.data().unwrap();

        assert!(handle.run_dir.starts_with(fx.layout.restores_dir()));
        assert!(handle.run_id.starts_with("demo-app-"));
        assert_eq!(
            fs::read(handle.run_dir.join("dump/files.tar.gz")).unwrap(),
            b"dump bytes"
        );
        let script = fs::read_to_string(handle.run_dir.join(SCRIPT_FILE)).unwrap();
        assert!(script.contains("chown -R 33:33"));
        assert!(handle.run_dir.join("extract").is_dir());
        assert!(handle.run_dir.join("rollback").is_dir());

        let spec = fx.containers.container_spec(handle.container_id.as_str()).unwrap();
        assert_eq!(spec.image, "alpine:3.20");
        assert_eq!(spec.command, vec!["sh", "/restore/work/restore.sh"]);
        assert!(spec
            .mounts
            .contains(&Mount::volume(VolumeName::new("demo-app-data"), CONTAINER_TARGET)));
        assert!(spec
            .mounts
            .contains(&Mount::bind(handle.run_dir.join("dump"), CONTAINER_DUMP_DIR, true)));

        let loaded = RestoreHandle::load(&handle.run_dir).unwrap();
        assert_eq!(&loaded, handle);
    }

    #[test]
    fn second_restore_on_same_volume_is_rejected() {
        let fx = fixture();
        assert!(fx.executor.restore_volume(&fx.component, &fx.dump).is_success());
        let r = fx.executor.restore_volume(&fx.component, &fx.dump);
        assert_eq!(r.error().map(ScsError::code), Some("restore_in_progress"));
        assert_eq!(fx.containers.container_names().len(), 1);
    }

    #[test]
    fn lease_of_run_still_preparing_blocks_restore() {
        let fx = fixture();
        let pending = LeaseRecord {
            run_id: "demo-app-other".to_owned(),
            component: fx.component.id,
            container_name: "scs-restore-demo-app-other".to_owned(),
            acquired_at: chrono::Utc::now().to_rfc3339(),
        };
        VolumeLease::acquire(&fx.layout, &fx.component.machine_name, &pending, fx.containers.as_ref())
            .unwrap();

        let r = fx.executor.restore_volume(&fx.component, &fx.dump);
        assert_eq!(r.error().map(ScsError::code), Some("restore_in_progress"));
        assert!(fx.containers.container_names().is_empty());
        assert_eq!(
            VolumeLease::current(&fx.layout, &fx.component.machine_name)
                .unwrap()
                .unwrap()
                .run_id,
            "demo-app-other"
        );
    }

    #[test]
    fn create_failure_reports_diagnostics_and_releases_lease() {
        let fx = fixture();
        fx.containers.fail_on("create_container");
        let r = fx.executor.restore_volume(&fx.component, &fx.dump);
        assert_eq!(r.error().map(ScsError::code), Some("backend_request_failed"));
        let diag = r.partial().unwrap();
        assert!(diag.backend_output.as_deref().unwrap().contains("mock failure injected"));
        assert!(diag.run_dir.is_some());
        assert!(diag.container_id.is_none());
        assert!(VolumeLease::current(&fx.layout, &fx.component.machine_name)
            .unwrap()
            .is_none());
    }

    #[test]
    fn start_failure_removes_container() {
        let fx = fixture();
        fx.containers.fail_on("start_container");
        let r = fx.executor.restore_volume(&fx.component, &fx.dump);
        assert!(r.is_failure());
        assert!(r.partial().unwrap().container_id.is_some());
        assert!(fx.containers.container_names().is_empty());
    }

    #[test]
    fn missing_dump_is_file_not_found() {
        let fx = fixture();
        let r = fx
            .executor
            .restore_volume(&fx.component, &fx.dir.path().join("absent.tar"));
        assert_eq!(r.error().map(ScsError::code), Some("file_not_found"));
    }

    #[test]
    fn poll_follows_markers_and_exit_codes() {
        let fx = fixture();
        let handle = fx
            .executor
            .restore_volume(&fx.component, &fx.dump)
            .into_data()
            .unwrap();
        assert_eq!(
            fx.executor.poll(&handle).into_data(),
            Some(RestoreState::Running)
        );

        fs::write(&handle.sentinel, "2024-05-01T10:00:00Z\n").unwrap();
        let done = fx.executor.poll(&handle);
        assert_eq!(
            done.into_data(),
            Some(RestoreState::Completed {
                finished_at: "2024-05-01T10:00:00Z".to_owned()
            })
        );
        assert!(fx.containers.container_names().is_empty());
        assert!(VolumeLease::current(&fx.layout, &fx.component.machine_name)
            .unwrap()
            .is_none());
    }

    #[test]
    fn poll_reports_rollback_marker() {
        let fx = fixture();
        let handle = fx
            .executor
            .restore_volume(&fx.component, &fx.dump)
            .into_data()
            .unwrap();
        fs::write(&handle.failure_marker, "extracting dump failed\n").unwrap();
        let r = fx.executor.poll(&handle);
        assert_eq!(r.error().map(ScsError::code), Some("restore_failed"));
        assert!(r.message().contains("extracting dump failed"));
    }

    #[test]
    fn poll_reports_exit_without_sentinel() {
        let fx = fixture();
        let handle = fx
            .executor
            .restore_volume(&fx.component, &fx.dump)
            .into_data()
            .unwrap();
        fx.containers.finish_container(&handle.container_id, 2);
        let r = fx.executor.poll(&handle);
        assert!(r.message().contains("exited with code 2"));
        // The lease is gone, so a new restore may start.
        assert!(fx.executor.restore_volume(&fx.component, &fx.dump).is_success());
    }
}
