//! Snapshot restore: verify, stage, unpack, read the manifest, dispatch.

use crate::executor::{RestoreDiagnostics, RestoreHandle};
use crate::provisioner::ComponentProvisioner;
use crate::{ScsError, ScsResult};
use scs_schema::{
    locate_manifest, parse_manifest_file, ComponentBundle, ComponentId, EntryBundle, MachineName, ManifestEntry,
    Snapshot, SnapshotId, SnapshotSubject, Stack,
};
use scs_store::{
    read_checksum_file, resolve_storage_uri, unpack_archive, Checksum, EntityStore, ProgressTracker, StoreError,
    StoreLayout, Workspace,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const STAGES: [&str; 5] = ["verify", "stage", "unpack", "manifest", "dispatch"];

/// Result of restoring one manifest entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryOutcome {
    /// 1-based position in the manifest.
    pub index: usize,
    pub bundle: EntryBundle,
    pub eid: ComponentId,
    pub machine_name: MachineName,
    pub result: ScsResult<RestoreHandle, RestoreDiagnostics>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub snapshot: SnapshotId,
    pub entries: Vec<EntryOutcome>,
}

impl RestoreReport {
    pub fn failed(&self) -> impl Iterator<Item = &EntryOutcome> {
        self.entries.iter().filter(|e| e.result.is_failure())
    }

    /// Handles of every restore container that was started.
    pub fn handles(&self) -> impl Iterator<Item = &RestoreHandle> {
        self.entries.iter().filter_map(|e| e.result.data())
    }
}

pub struct SnapshotRestorePipeline {
    layout: StoreLayout,
    provisioner: Arc<ComponentProvisioner>,
    stacks: EntityStore<Stack>,
    progress: Option<ProgressTracker>,
}

/// Stage failure; the workspace guard is dropped on the way out.
type Stage<T> = Result<T, ScsError>;

impl SnapshotRestorePipeline {
    pub fn new(layout: StoreLayout, provisioner: Arc<ComponentProvisioner>, stacks: EntityStore<Stack>) -> Self {
        Self {
            layout,
            provisioner,
            stacks,
            progress: None,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: ProgressTracker) -> Self {
        self.progress = Some(progress);
        self
    }

    fn track(&self, op: Option<&String>, update: impl FnOnce(&ProgressTracker, &str) -> Result<(), StoreError>) {
        if let (Some(tracker), Some(id)) = (self.progress.as_ref(), op) {
            if let Err(e) = update(tracker, id) {
                warn!("updating progress of {id}: {e}");
            }
        }
    }

    /// Restore every component dump in the snapshot archive.
    ///
    /// Archive-level failures (missing file, checksum mismatch, unreadable
    /// archive or manifest) stop before any component is touched. Entry-level
    /// failures are collected: remaining entries are still attempted and the
    /// overall result is `RestoreIncomplete` with all outcomes as partial data.
    pub fn restore(&self, snapshot: &Snapshot) -> ScsResult<RestoreReport> {
        info!("restoring snapshot {} from {}", snapshot.id, snapshot.file);
        let op = self.progress.as_ref().and_then(|t| {
            t.start_operation(&format!("restore snapshot {}", snapshot.id), &STAGES)
                .map_err(|e| warn!("progress tracking unavailable: {e}"))
                .ok()
        });

        let result = self.run(snapshot, op.as_ref());
        match &result {
            ScsResult::Success { message, .. } => {
                info!("{message}");
                self.track(op.as_ref(), ProgressTracker::complete_operation);
            }
            ScsResult::Failure { message, .. } => {
                warn!("restoring snapshot {} failed: {message}", snapshot.id);
                self.track(op.as_ref(), |t, id| t.fail_operation(id, message));
            }
        }
        result
    }

    fn run(&self, snapshot: &Snapshot, op: Option<&String>) -> ScsResult<RestoreReport> {
        let subject_stack = match self.subject_stack(snapshot) {
            Ok(s) => s,
            Err(e) => return ScsResult::failure(e),
        };

        self.track(op, |t, id| t.set_current_step(id, "verify"));
        let archive = match self.verify_archive(snapshot) {
            Ok(path) => path,
            Err(e) => return ScsResult::failure(e),
        };
        self.track(op, |t, id| t.complete_step(id, "verify"));

        self.track(op, |t, id| t.set_current_step(id, "stage"));
        let workspace = match Workspace::create(&self.layout, &format!("restore-{}", snapshot.id)) {
            Ok(w) => w,
            Err(e) => return ScsResult::failure(ScsError::WorkspaceUnavailable(e.to_string())),
        };
        self.track(op, |t, id| t.complete_step(id, "stage"));

        self.track(op, |t, id| t.set_current_step(id, "unpack"));
        if let Err(e) = unpack_archive(&archive, workspace.path()) {
            return ScsResult::failure(ScsError::ExtractionFailed(format!("{}: {e}", archive.display())));
        }
        self.track(op, |t, id| t.complete_step(id, "unpack"));

        self.track(op, |t, id| t.set_current_step(id, "manifest"));
        let (base, manifest) = match locate_manifest(workspace.path()) {
            Some(path) => match parse_manifest_file(&path) {
                Ok(m) => (path.parent().map(Path::to_path_buf).unwrap_or_default(), m),
                Err(e) => return ScsResult::failure(e.into()),
            },
            None => {
                return ScsResult::failure(ScsError::ManifestInvalid(
                    "no manifest.json in archive".to_owned(),
                ))
            }
        };
        debug!("manifest lists {} entries", manifest.len());
        self.track(op, |t, id| t.complete_step(id, "manifest"));

        self.track(op, |t, id| t.set_current_step(id, "dispatch"));
        let entries: Vec<EntryOutcome> = manifest
            .mapping
            .iter()
            .enumerate()
            .map(|(i, entry)| EntryOutcome {
                index: i + 1,
                bundle: entry.bundle.clone(),
                eid: entry.eid,
                machine_name: entry.machine_name.clone(),
                result: self.restore_entry(snapshot, subject_stack.as_ref(), &base, entry),
            })
            .collect();
        drop(workspace);

        let report = RestoreReport {
            snapshot: snapshot.id,
            entries,
        };
        let failures: Vec<String> = report
            .failed()
            .map(|e| format!("entry {} ({}): {}", e.index, e.machine_name, e.result.message()))
            .collect();
        if failures.is_empty() {
            let count = report.entries.len();
            return ScsResult::success(
                report,
                format!("snapshot {} restore started for {count} entries", snapshot.id),
            );
        }
        let error = ScsError::RestoreIncomplete(failures.join("; "));
        let message = format!(
            "{} of {} entries of snapshot {} failed: {}",
            failures.len(),
            report.entries.len(),
            snapshot.id,
            failures.join("; ")
        );
        ScsResult::failure(error).with_message(message).with_partial(report)
    }

    fn subject_stack(&self, snapshot: &Snapshot) -> Stage<Option<Stack>> {
        match snapshot.subject {
            SnapshotSubject::Stack(id) => match self.stacks.get(id)? {
                Some(stack) => Ok(Some(stack)),
                None => Err(ScsError::StackNotFound(id.to_string())),
            },
            SnapshotSubject::Component(_) => Ok(None),
        }
    }

    /// Resolve the archive and check it against the stored checksum before
    /// anything reads its content.
    fn verify_archive(&self, snapshot: &Snapshot) -> Stage<PathBuf> {
        let path = resolve_storage_uri(&self.layout, &snapshot.file)
            .map_err(|e| ScsError::FileNotFound(e.to_string()))?;
        if !path.is_file() {
            return Err(ScsError::FileNotFound(path.display().to_string()));
        }
        let expected = Checksum::parse(&snapshot.checksum).map_err(|e| ScsError::ChecksumMismatch {
            path: path.display().to_string(),
            expected: snapshot.checksum.clone(),
            actual: format!("unverifiable ({e})"),
        })?;
        match expected.verify_file(&path)? {
            Ok(()) => {
                debug!("archive {} matches {expected}", path.display());
                Ok(path)
            }
            Err(actual) => Err(ScsError::ChecksumMismatch {
                path: path.display().to_string(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            }),
        }
    }

    fn restore_entry(
        &self,
        snapshot: &Snapshot,
        stack: Option<&Stack>,
        base: &Path,
        entry: &ManifestEntry,
    ) -> ScsResult<RestoreHandle, RestoreDiagnostics> {
        debug!("restoring {} entry {} '{}'", entry.bundle, entry.eid, entry.machine_name);
        let dump = base.join(&entry.dump_file);
        let checked = known_bundle(entry).and_then(|bundle| {
            self.check_dump(base, &dump, entry)?;
            Ok((bundle, self.target_component(snapshot, stack, bundle, entry)?))
        });
        let (bundle, component) = match checked {
            Ok(c) => c,
            Err(e) => {
                return ScsResult::failure(e).with_partial(RestoreDiagnostics {
                    dump_file: dump,
                    ..RestoreDiagnostics::default()
                })
            }
        };
        match self.provisioner.action(bundle) {
            Ok(action) => action.restore(&component, &dump),
            Err(e) => ScsResult::failure(e),
        }
    }

    fn check_dump(&self, base: &Path, dump: &Path, entry: &ManifestEntry) -> Stage<()> {
        if !dump.is_file() {
            return Err(ScsError::FileNotFound(entry.dump_file.display().to_string()));
        }
        let Some(checksum_file) = &entry.checksum_file else {
            return Ok(());
        };
        let mismatch = |expected: String, actual: String| ScsError::ChecksumMismatch {
            path: entry.dump_file.display().to_string(),
            expected,
            actual,
        };
        let expected = read_checksum_file(&base.join(checksum_file))
            .map_err(|e| mismatch(checksum_file.display().to_string(), format!("unverifiable ({e})")))?;
        match expected.verify_file(dump)? {
            Ok(()) => Ok(()),
            Err(actual) => Err(mismatch(expected.to_string(), actual.to_string())),
        }
    }

    /// The entity the entry restores into, which must match the entry and
    /// belong to the snapshot's subject.
    fn target_component(
        &self,
        snapshot: &Snapshot,
        stack: Option<&Stack>,
        bundle: ComponentBundle,
        entry: &ManifestEntry,
    ) -> Stage<scs_schema::Component> {
        let component = self
            .provisioner
            .components()
            .get(entry.eid)?
            .ok_or_else(|| ScsError::ComponentNotFound(entry.eid.to_string()))?;
        if component.machine_name != entry.machine_name || component.bundle != bundle {
            return Err(ScsError::ComponentNotFound(format!(
                "{} as {} '{}' (found {} '{}')",
                entry.eid, entry.bundle, entry.machine_name, component.bundle, component.machine_name
            )));
        }
        let belongs = match (snapshot.subject, stack) {
            (SnapshotSubject::Stack(_), Some(stack)) => stack.includes(component.id),
            (SnapshotSubject::Component(id), _) => id == component.id,
            (SnapshotSubject::Stack(_), None) => false,
        };
        if !belongs {
            return Err(ScsError::ComponentNotFound(format!(
                "{} in the subject of snapshot {}",
                entry.eid, snapshot.id
            )));
        }
        Ok(component)
    }
}

fn known_bundle(entry: &ManifestEntry) -> Stage<ComponentBundle> {
    entry
        .bundle
        .known()
        .ok_or_else(|| ScsError::Unsupported(format!("restoring bundle '{}'", entry.bundle)))
}
