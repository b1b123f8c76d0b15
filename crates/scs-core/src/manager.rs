use crate::executor::{ContainerRestoreExecutor, RestoreHandle, RestoreState};
use crate::orchestrator::{PhaseReport, StackOrchestrator};
use crate::provisioner::{ComponentOutcome, ComponentProvisioner};
use crate::restore::{RestoreReport, SnapshotRestorePipeline};
use crate::{ScsError, ScsResult};
use scs_runtime::BackendSet;
use scs_schema::{
    Component, ComponentId, MachineName, Owner, ScsConfig, Snapshot, SnapshotDraft, SnapshotId, SnapshotSubject,
    Stack, StackBundle, StackDraft, StackId, StorageUri,
};
use scs_store::{
    resolve_storage_uri, verify_store_integrity, Checksum, ChecksumAlgorithm, EntityStore, FileLock,
    IntegrityReport, ProgressReport, ProgressTracker, StoreLayout,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Finished progress records older than this are pruned on open.
const PROGRESS_RETENTION_DAYS: i64 = 7;

/// Lock serializing entity mutations across processes. Not a valid machine
/// name, so it never collides with a volume lock.
const STORE_LOCK: &str = ".store";

/// A stack record together with the phases run for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StackOutcome {
    pub stack: Stack,
    pub report: PhaseReport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotVerification {
    pub snapshot: SnapshotId,
    pub path: PathBuf,
    pub expected: String,
    pub actual: String,
    pub matches: bool,
}

/// Entry point wiring the store, the backends and the orchestration
/// services together.
pub struct Manager {
    config: ScsConfig,
    layout: StoreLayout,
    provisioner: Arc<ComponentProvisioner>,
    orchestrator: StackOrchestrator,
    pipeline: SnapshotRestorePipeline,
    executor: Option<Arc<ContainerRestoreExecutor>>,
    snapshots: EntityStore<Snapshot>,
    progress: ProgressTracker,
}

impl Manager {
    /// Build the backends the configuration names and open the store.
    pub fn open(config: ScsConfig) -> Result<Self, ScsError> {
        let backends = BackendSet::from_config(&config)?;
        Self::with_backends(config, &backends)
    }

    pub fn with_backends(config: ScsConfig, backends: &BackendSet) -> Result<Self, ScsError> {
        let layout = StoreLayout::new(&config.store.root);
        layout.initialize()?;
        info!("store opened at {}", layout.root().display());

        let progress = ProgressTracker::new(&layout);
        match progress.prune(chrono::Duration::days(PROGRESS_RETENTION_DAYS)) {
            Ok(0) => {}
            Ok(n) => debug!("pruned {n} finished progress records"),
            Err(e) => warn!("pruning progress records failed: {e}"),
        }

        let executor = backends.containers.as_ref().map(|containers| {
            Arc::new(ContainerRestoreExecutor::new(
                layout.clone(),
                Arc::clone(containers),
                &config.restore(),
            ))
        });
        let provisioner = Arc::new(ComponentProvisioner::from_backends(
            EntityStore::new(layout.clone()),
            &config,
            backends,
            executor.clone(),
        ));
        let stacks = EntityStore::<Stack>::new(layout.clone());
        let orchestrator = StackOrchestrator::new(Arc::clone(&provisioner), stacks.clone())
            .with_progress(progress.clone());
        let pipeline = SnapshotRestorePipeline::new(layout.clone(), Arc::clone(&provisioner), stacks)
            .with_progress(progress.clone());

        Ok(Self {
            config,
            snapshots: EntityStore::new(layout.clone()),
            layout,
            provisioner,
            orchestrator,
            pipeline,
            executor,
            progress,
        })
    }

    pub fn config(&self) -> &ScsConfig {
        &self.config
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn provisioner(&self) -> &ComponentProvisioner {
        &self.provisioner
    }

    pub fn orchestrator(&self) -> &StackOrchestrator {
        &self.orchestrator
    }

    pub fn pipeline(&self) -> &SnapshotRestorePipeline {
        &self.pipeline
    }

    pub fn executor(&self) -> Option<&ContainerRestoreExecutor> {
        self.executor.as_deref()
    }

    pub fn snapshots(&self) -> &EntityStore<Snapshot> {
        &self.snapshots
    }

    fn lock_store(&self) -> Result<FileLock, ScsError> {
        Ok(FileLock::acquire(&self.layout.lock_file(STORE_LOCK))?)
    }

    /// Record a new stack and provision its members.
    ///
    /// The stack record is written before the first phase runs, so a
    /// failed creation leaves a stack listing whatever was created.
    pub fn create_stack(&self, bundle: &str, name: &str, owner: &str, label: Option<&str>) -> ScsResult<StackOutcome> {
        let stack = match self.record_stack(bundle, name, owner, label) {
            Ok(s) => s,
            Err(e) => return ScsResult::failure(e),
        };
        let _lock = match self.lock_store() {
            Ok(l) => l,
            Err(e) => return ScsResult::failure(e),
        };
        let result = self.orchestrator.create_stack(&stack);
        let stack = self.orchestrator.stacks().get(stack.id).ok().flatten().unwrap_or(stack);
        match result {
            ScsResult::Success { data, message } => ScsResult::success(StackOutcome { stack, report: data }, message),
            ScsResult::Failure {
                error,
                message,
                partial,
            } => {
                let outcome = StackOutcome {
                    stack,
                    report: partial.unwrap_or_default(),
                };
                ScsResult::failure(error).with_message(message).with_partial(outcome)
            }
        }
    }

    fn record_stack(&self, bundle: &str, name: &str, owner: &str, label: Option<&str>) -> Result<Stack, ScsError> {
        let bundle: StackBundle = bundle.parse()?;
        let machine_name = MachineName::parse(name)?;
        let _lock = self.lock_store()?;
        let stacks = self.orchestrator.stacks();
        if let Some(existing) = stacks.find_one(|s| s.machine_name == machine_name)? {
            return Err(ScsError::AlreadyExists(format!(
                "stack '{machine_name}' (id {})",
                existing.id
            )));
        }
        let mut draft = StackDraft::new(bundle, machine_name, Owner::new(owner));
        if let Some(label) = label {
            label.clone_into(&mut draft.label);
        }
        let stack = stacks.insert_with(|id| draft.into_stack(id))?;
        info!("recorded {} stack {} '{}'", stack.bundle, stack.id, stack.machine_name);
        Ok(stack)
    }

    /// Deleting a stack that no longer exists succeeds.
    pub fn delete_stack(&self, id: StackId) -> ScsResult<PhaseReport> {
        let _lock = match self.lock_store() {
            Ok(l) => l,
            Err(e) => return ScsResult::failure(e),
        };
        match self.orchestrator.stacks().get(id) {
            Ok(Some(stack)) => self.orchestrator.delete_stack(&stack),
            Ok(None) => ScsResult::success(PhaseReport::default(), format!("stack {id} already deleted")),
            Err(e) => ScsResult::failure(e.into()),
        }
    }

    pub fn list_stacks(&self) -> Result<Vec<Stack>, ScsError> {
        Ok(self.orchestrator.stacks().list()?)
    }

    pub fn list_components(&self) -> Result<Vec<Component>, ScsError> {
        Ok(self.provisioner.components().list()?)
    }

    /// Delete one component and drop it from every stack that includes it.
    /// `None` in the result means it was already gone.
    pub fn delete_component(&self, id: ComponentId) -> ScsResult<Option<ComponentOutcome>> {
        let _lock = match self.lock_store() {
            Ok(l) => l,
            Err(e) => return ScsResult::failure(e),
        };
        let component = match self.provisioner.components().get(id) {
            Ok(Some(c)) => c,
            Ok(None) => {
                if let Err(e) = self.detach_everywhere(id) {
                    return ScsResult::failure(e);
                }
                return ScsResult::success(None, format!("component {id} already deleted"));
            }
            Err(e) => return ScsResult::failure(e.into()),
        };
        match self.provisioner.delete(&component) {
            ScsResult::Success { data, message } => match self.detach_everywhere(id) {
                Ok(()) => ScsResult::success(Some(data), message),
                Err(e) => ScsResult::failure(e),
            },
            ScsResult::Failure {
                error,
                message,
                partial,
            } => ScsResult::Failure {
                error,
                message,
                partial: partial.map(Some),
            },
        }
    }

    fn detach_everywhere(&self, id: ComponentId) -> Result<(), ScsError> {
        let stacks = self.orchestrator.stacks();
        for mut stack in stacks.find(|s| s.includes(id))? {
            stack.exclude(id);
            stack.updated_at = chrono::Utc::now().to_rfc3339();
            stacks.save(&stack)?;
            debug!("removed component {id} from stack {}", stack.id);
        }
        Ok(())
    }

    /// Record an existing archive as a snapshot. Without an explicit checksum
    /// the archive's sha256 is stored.
    pub fn register_snapshot(
        &self,
        subject: SnapshotSubject,
        label: &str,
        owner: &str,
        file: StorageUri,
        checksum: Option<&str>,
    ) -> ScsResult<Snapshot> {
        match self.try_register_snapshot(subject, label, owner, file, checksum) {
            Ok(snapshot) => {
                let message = format!("snapshot {} registered", snapshot.id);
                ScsResult::success(snapshot, message)
            }
            Err(e) => ScsResult::failure(e),
        }
    }

    fn try_register_snapshot(
        &self,
        subject: SnapshotSubject,
        label: &str,
        owner: &str,
        file: StorageUri,
        checksum: Option<&str>,
    ) -> Result<Snapshot, ScsError> {
        let _lock = self.lock_store()?;
        match subject {
            SnapshotSubject::Component(id) if !self.provisioner.components().exists(id) => {
                return Err(ScsError::ComponentNotFound(id.to_string()))
            }
            SnapshotSubject::Stack(id) if !self.orchestrator.stacks().exists(id) => {
                return Err(ScsError::StackNotFound(id.to_string()))
            }
            _ => {}
        }
        let path = self.archive_path(&file)?;
        let checksum = match checksum {
            Some(raw) => Checksum::parse(raw)?,
            None => Checksum::compute(ChecksumAlgorithm::Sha256, &path)?,
        };
        let draft = SnapshotDraft {
            subject,
            label: label.to_owned(),
            owner: Owner::new(owner),
            file,
            checksum: checksum.to_string(),
        };
        let snapshot = self.snapshots.insert_with(|id| draft.into_snapshot(id))?;
        info!("registered snapshot {} of {:?}", snapshot.id, snapshot.subject);
        Ok(snapshot)
    }

    fn archive_path(&self, file: &StorageUri) -> Result<PathBuf, ScsError> {
        let path = resolve_storage_uri(&self.layout, file).map_err(|e| ScsError::FileNotFound(e.to_string()))?;
        if !path.is_file() {
            return Err(ScsError::FileNotFound(path.display().to_string()));
        }
        Ok(path)
    }

    fn snapshot(&self, id: SnapshotId) -> Result<Snapshot, ScsError> {
        self.snapshots
            .get(id)?
            .ok_or_else(|| ScsError::SnapshotNotFound(id.to_string()))
    }

    pub fn restore_snapshot(&self, id: SnapshotId) -> ScsResult<RestoreReport> {
        match self.snapshot(id) {
            Ok(snapshot) => self.pipeline.restore(&snapshot),
            Err(e) => ScsResult::failure(e),
        }
    }

    /// Recompute the archive checksum with the stored algorithm.
    pub fn verify_snapshot(&self, id: SnapshotId) -> ScsResult<SnapshotVerification> {
        let verification = self.snapshot(id).and_then(|s| self.verification(&s));
        match verification {
            Ok(v) if v.matches => ScsResult::success(v, format!("snapshot {id} checksum matches")),
            Ok(v) => {
                let error = ScsError::ChecksumMismatch {
                    path: v.path.display().to_string(),
                    expected: v.expected.clone(),
                    actual: v.actual.clone(),
                };
                ScsResult::failure(error).with_partial(v)
            }
            Err(e) => ScsResult::failure(e),
        }
    }

    fn verification(&self, snapshot: &Snapshot) -> Result<SnapshotVerification, ScsError> {
        let path = self.archive_path(&snapshot.file)?;
        let algorithm = Checksum::parse(&snapshot.checksum)
            .map_or(ChecksumAlgorithm::Sha256, |c| c.algorithm());
        let actual = Checksum::compute(algorithm, &path)?;
        let matches = Checksum::parse(&snapshot.checksum).is_ok_and(|c| c == actual);
        Ok(SnapshotVerification {
            snapshot: snapshot.id,
            path,
            expected: snapshot.checksum.clone(),
            actual: actual.to_string(),
            matches,
        })
    }

    /// Rewrite the stored checksum from the archive as it is now.
    pub fn repair_snapshot_checksum(&self, id: SnapshotId) -> ScsResult<Snapshot> {
        match self.try_repair_checksum(id) {
            Ok((snapshot, true)) => ScsResult::success(snapshot, format!("snapshot {id} checksum rewritten")),
            Ok((snapshot, false)) => ScsResult::success(snapshot, format!("snapshot {id} checksum already correct")),
            Err(e) => ScsResult::failure(e),
        }
    }

    fn try_repair_checksum(&self, id: SnapshotId) -> Result<(Snapshot, bool), ScsError> {
        let _lock = self.lock_store()?;
        let mut snapshot = self.snapshot(id)?;
        let verification = self.verification(&snapshot)?;
        if verification.matches {
            return Ok((snapshot, false));
        }
        warn!(
            "rewriting checksum of snapshot {id}: {} -> {}",
            snapshot.checksum, verification.actual
        );
        snapshot.checksum = verification.actual;
        self.snapshots.save(&snapshot)?;
        Ok((snapshot, true))
    }

    pub fn verify_store(&self) -> Result<IntegrityReport, ScsError> {
        Ok(verify_store_integrity(&self.layout)?)
    }

    pub fn progress(&self, operation: &str) -> Result<ProgressReport, ScsError> {
        Ok(self.progress.get_progress(operation)?)
    }

    pub fn list_progress(&self) -> Result<Vec<ProgressReport>, ScsError> {
        Ok(self.progress.list()?)
    }

    /// Poll a restore started by this or another process.
    pub fn restore_status(&self, handle: &Path) -> ScsResult<RestoreState> {
        let Some(executor) = self.executor() else {
            return ScsResult::failure(ScsError::MissingConfiguration(
                "[containers] section".to_owned(),
            ));
        };
        match RestoreHandle::load(handle) {
            Ok(h) => executor.poll(&h),
            Err(e) => ScsResult::failure(e),
        }
    }
}
