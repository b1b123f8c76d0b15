//! Ordered creation and teardown of composite stacks.

use crate::provisioner::{ComponentOutcome, ComponentProvisioner, CreateMode};
use crate::{ScsError, ScsResult};
use scs_schema::{Component, ComponentBundle, ComponentDraft, ComponentId, MachineName, Phase, Stack, StackBundle};
use scs_store::{EntityStore, ProgressTracker, StoreError};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Strategy for one stack flavour.
pub trait StackAction: Send + Sync {
    fn bundle(&self) -> StackBundle;

    /// Member bundles in creation order.
    fn members(&self) -> &[ComponentBundle];

    fn member_name(&self, stack: &Stack, bundle: ComponentBundle) -> Result<MachineName, ScsError> {
        let suffix = match bundle {
            ComponentBundle::Sql => "sql",
            ComponentBundle::Triplestore => "ts",
            ComponentBundle::Filesystem => "share",
            _ => "app",
        };
        Ok(stack.machine_name.with_suffix(suffix)?)
    }
}

/// The built-in flavours, whose members come from [`StackBundle::members`].
pub struct FlavourStack {
    bundle: StackBundle,
}

impl FlavourStack {
    pub fn new(bundle: StackBundle) -> Self {
        Self { bundle }
    }
}

impl StackAction for FlavourStack {
    fn bundle(&self) -> StackBundle {
        self.bundle
    }

    fn members(&self) -> &[ComponentBundle] {
        self.bundle.members()
    }
}

/// Per-phase sub-results of a stack operation.
///
/// A phase mapped to `None` was never attempted (or, on delete, had no
/// component left to remove).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseReport {
    results: BTreeMap<Phase, Option<ScsResult<ComponentOutcome>>>,
    /// Delete only: references dropped because the entity was already gone.
    pub cleaned_references: Vec<ComponentId>,
    /// Delete only: components torn down by this call.
    pub deleted: Vec<ComponentId>,
    /// Delete only: components still attached when the call returned.
    pub remaining: Vec<ComponentId>,
}

impl PhaseReport {
    fn planned(phases: impl IntoIterator<Item = Phase>) -> Self {
        Self {
            results: phases.into_iter().map(|p| (p, None)).collect(),
            ..Self::default()
        }
    }

    fn record(&mut self, phase: Phase, result: ScsResult<ComponentOutcome>) {
        self.results.insert(phase, Some(result));
    }

    /// `None` for an unplanned phase as well as for an unattempted one.
    pub fn get(&self, phase: Phase) -> Option<&ScsResult<ComponentOutcome>> {
        self.results.get(&phase).and_then(Option::as_ref)
    }

    pub fn is_planned(&self, phase: Phase) -> bool {
        self.results.contains_key(&phase)
    }

    pub fn phases(&self) -> impl Iterator<Item = Phase> + '_ {
        self.results.keys().copied()
    }

    fn refresh(&mut self, component: &Component) {
        for result in self.results.values_mut().flatten() {
            if let ScsResult::Success { data, .. } = result {
                if data.component.id == component.id {
                    data.component = component.clone();
                }
            }
        }
    }
}

impl Serialize for PhaseReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for (phase, result) in &self.results {
            map.serialize_entry(phase.result_key(), result)?;
        }
        if !self.cleaned_references.is_empty() {
            map.serialize_entry("cleanedReferences", &self.cleaned_references)?;
        }
        if !self.deleted.is_empty() {
            map.serialize_entry("deleted", &self.deleted)?;
        }
        if !self.remaining.is_empty() {
            map.serialize_entry("remaining", &self.remaining)?;
        }
        map.end()
    }
}

/// Accumulator threaded through the phases of one stack operation.
#[derive(Debug, Clone)]
pub struct StackBuild {
    pub stack: Stack,
    pub report: PhaseReport,
    /// Members created or found so far, in phase order.
    pub members: Vec<Component>,
    links: BTreeMap<String, String>,
}

impl StackBuild {
    pub fn new(stack: Stack, phases: impl IntoIterator<Item = Phase>) -> Self {
        Self {
            stack,
            report: PhaseReport::planned(phases),
            members: Vec::new(),
            links: BTreeMap::new(),
        }
    }
}

pub struct StackOrchestrator {
    provisioner: Arc<ComponentProvisioner>,
    stacks: EntityStore<Stack>,
    actions: BTreeMap<StackBundle, Arc<dyn StackAction>>,
    progress: Option<ProgressTracker>,
}

impl StackOrchestrator {
    /// An orchestrator with every built-in flavour registered.
    pub fn new(provisioner: Arc<ComponentProvisioner>, stacks: EntityStore<Stack>) -> Self {
        let mut orchestrator = Self::without_flavours(provisioner, stacks);
        for bundle in StackBundle::ALL {
            orchestrator.register(Arc::new(FlavourStack::new(bundle)));
        }
        orchestrator
    }

    pub fn without_flavours(provisioner: Arc<ComponentProvisioner>, stacks: EntityStore<Stack>) -> Self {
        Self {
            provisioner,
            stacks,
            actions: BTreeMap::new(),
            progress: None,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: ProgressTracker) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn register(&mut self, action: Arc<dyn StackAction>) {
        self.actions.insert(action.bundle(), action);
    }

    pub fn stacks(&self) -> &EntityStore<Stack> {
        &self.stacks
    }

    pub fn provisioner(&self) -> &ComponentProvisioner {
        &self.provisioner
    }

    fn action(&self, bundle: StackBundle) -> Result<Arc<dyn StackAction>, ScsError> {
        self.actions
            .get(&bundle)
            .cloned()
            .ok_or_else(|| ScsError::UnknownBundle(bundle.to_string()))
    }

    /// Add a member to the stack and persist it.
    pub fn attach_component(&self, build: &mut StackBuild, component: Component) -> Result<(), ScsError> {
        if build.stack.include(component.id) {
            build.stack.updated_at = chrono::Utc::now().to_rfc3339();
            self.stacks.save(&build.stack)?;
            debug!("attached component {} to stack {}", component.id, build.stack.id);
        }
        build.members.push(component);
        Ok(())
    }

    /// Drop a member reference from the stack and persist it.
    pub fn detach_component(&self, build: &mut StackBuild, id: ComponentId) -> Result<(), ScsError> {
        if build.stack.exclude(id) {
            build.stack.updated_at = chrono::Utc::now().to_rfc3339();
            self.stacks.save(&build.stack)?;
            debug!("detached component {id} from stack {}", build.stack.id);
        }
        build.members.retain(|c| c.id != id);
        Ok(())
    }

    fn track_start(&self, label: &str, phases: &[Phase]) -> Option<String> {
        let tracker = self.progress.as_ref()?;
        let steps: Vec<&str> = phases.iter().map(|p| p.as_str()).collect();
        match tracker.start_operation(label, &steps) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("progress tracking unavailable: {e}");
                None
            }
        }
    }

    fn track(&self, op: Option<&String>, update: impl FnOnce(&ProgressTracker, &str) -> Result<(), StoreError>) {
        if let (Some(tracker), Some(id)) = (self.progress.as_ref(), op) {
            if let Err(e) = update(tracker, id) {
                warn!("updating progress of {id}: {e}");
            }
        }
    }

    fn abort(
        &self,
        op: Option<&String>,
        build: StackBuild,
        error: ScsError,
        message: String,
    ) -> ScsResult<PhaseReport> {
        warn!("{message}");
        self.track(op, |t, id| t.fail_operation(id, &message));
        ScsResult::failure(error)
            .with_message(message)
            .with_partial(build.report)
    }

    /// Provision every member phase in order, stopping at the first failure.
    ///
    /// Members created before a failure stay attached; the partial report
    /// holds their results and `None` for phases never reached. Running it
    /// again on the same stack reuses the attached members.
    pub fn create_stack(&self, stack: &Stack) -> ScsResult<PhaseReport> {
        info!("creating {} stack {} '{}'", stack.bundle, stack.id, stack.machine_name);
        let action = match self.action(stack.bundle) {
            Ok(a) => a,
            Err(e) => return ScsResult::failure(e),
        };
        let members = action.members().to_vec();
        let phases: Vec<Phase> = members.iter().map(|b| b.phase()).collect();
        let op = self.track_start(&format!("create stack {}", stack.machine_name), &phases);
        let mut build = StackBuild::new(stack.clone(), phases);

        for bundle in members {
            let phase = bundle.phase();
            self.track(op.as_ref(), |t, id| t.set_current_step(id, phase.as_str()));
            let result = match self.create_member(&mut build, action.as_ref(), bundle) {
                Ok(r) => r,
                Err(e) => {
                    let message = format!("{phase} phase of stack '{}' failed: {e}", stack.machine_name);
                    return self.abort(op.as_ref(), build, e, message);
                }
            };
            let failed = result.error().cloned();
            let detail = result.message().to_owned();
            build.report.record(phase, result);
            if let Some(error) = failed {
                let message = format!("{phase} phase of stack '{}' failed: {detail}", stack.machine_name);
                return self.abort(op.as_ref(), build, error, message);
            }
            self.track(op.as_ref(), |t, id| t.complete_step(id, phase.as_str()));
        }

        if let Err(e) = self.link_members(&mut build) {
            let message = format!("linking members of stack '{}' failed: {e}", stack.machine_name);
            return self.abort(op.as_ref(), build, e, message);
        }
        self.track(op.as_ref(), ProgressTracker::complete_operation);
        let message = format!(
            "stack '{}' created with {} components",
            stack.machine_name,
            build.members.len()
        );
        info!("{message}");
        ScsResult::success(build.report, message)
    }

    /// One creation phase. `Err` is reserved for store failures while
    /// recording the member; backend failures come back as a failed result.
    fn create_member(
        &self,
        build: &mut StackBuild,
        action: &dyn StackAction,
        bundle: ComponentBundle,
    ) -> Result<ScsResult<ComponentOutcome>, ScsError> {
        if let Some(existing) = self.attached_member(&build.stack, bundle)? {
            let link_env = match self
                .provisioner
                .action(bundle)
                .and_then(|a| a.reuse(&existing.machine_name))
            {
                Ok(env) => env,
                Err(e) => {
                    let message = format!("reusing {bundle} '{}' failed: {e}", existing.machine_name);
                    return Ok(ScsResult::failure(e).with_message(message));
                }
            };
            let message = format!("{bundle} '{}' already attached", existing.machine_name);
            build.links.extend(link_env.clone());
            build.members.push(existing.clone());
            return Ok(ScsResult::success(
                ComponentOutcome {
                    component: existing,
                    link_env,
                },
                message,
            ));
        }

        let name = match action.member_name(&build.stack, bundle) {
            Ok(n) => n,
            Err(e) => return Ok(ScsResult::failure(e)),
        };
        let draft = ComponentDraft::new(bundle, name, build.stack.owner.clone())
            .with_label(format!("{} {}", build.stack.label, bundle.phase()));
        // Only applications consume the connection settings of their siblings.
        let links = if bundle.is_application() {
            build.links.clone()
        } else {
            BTreeMap::new()
        };
        let result = self
            .provisioner
            .create_linked(draft, CreateMode::ReuseExisting, &links);
        if let Some(outcome) = result.data() {
            build.links.extend(outcome.link_env.clone());
            self.attach_component(build, outcome.component.clone())?;
        }
        Ok(result)
    }

    fn attached_member(&self, stack: &Stack, bundle: ComponentBundle) -> Result<Option<Component>, ScsError> {
        for id in &stack.included_components {
            if let Some(component) = self.provisioner.components().get(*id)? {
                if component.bundle == bundle {
                    return Ok(Some(component));
                }
            }
        }
        Ok(None)
    }

    /// Connect supporting members to the application and back.
    fn link_members(&self, build: &mut StackBuild) -> Result<(), ScsError> {
        let (apps, supporting): (Vec<ComponentId>, Vec<ComponentId>) = {
            let (a, s): (Vec<&Component>, Vec<&Component>) =
                build.members.iter().partition(|c| c.bundle.is_application());
            (a.iter().map(|c| c.id).collect(), s.iter().map(|c| c.id).collect())
        };
        let now = chrono::Utc::now().to_rfc3339();
        for member in &mut build.members {
            let peers = if member.bundle.is_application() {
                &supporting
            } else {
                &apps
            };
            let mut changed = false;
            for peer in peers {
                if !member.connected_components.contains(peer) {
                    member.connected_components.push(*peer);
                    changed = true;
                }
            }
            if changed {
                member.updated_at.clone_from(&now);
                self.provisioner.components().save(member)?;
                build.report.refresh(member);
            }
        }
        Ok(())
    }

    /// Tear down every member in reverse phase order, then the stack record.
    ///
    /// References to components that no longer exist are dropped without
    /// failing. The first real failure aborts; members already deleted stay
    /// deleted and the partial report lists those still attached.
    pub fn delete_stack(&self, stack: &Stack) -> ScsResult<PhaseReport> {
        info!("deleting {} stack {} '{}'", stack.bundle, stack.id, stack.machine_name);
        let current = match self.stacks.get(stack.id) {
            Ok(Some(s)) => s,
            Ok(None) => return ScsResult::failure(ScsError::StackNotFound(stack.id.to_string())),
            Err(e) => return ScsResult::failure(e.into()),
        };
        let planned: Vec<Phase> = match self.action(current.bundle) {
            Ok(action) => action.members().iter().map(|b| b.phase()).collect(),
            Err(_) => Vec::new(),
        };
        let mut members = Vec::new();
        let mut build = StackBuild::new(current.clone(), planned);

        for id in &current.included_components {
            match self.provisioner.components().get(*id) {
                Ok(Some(component)) => members.push(component),
                Ok(None) => {
                    debug!("stack {} references missing component {id}", current.id);
                    build.report.cleaned_references.push(*id);
                }
                Err(e) => return ScsResult::failure(e.into()),
            }
        }
        for id in build.report.cleaned_references.clone() {
            if let Err(e) = self.detach_component(&mut build, id) {
                return ScsResult::failure(e).with_partial(build.report);
            }
        }

        members.sort_by_key(|c| std::cmp::Reverse(c.bundle.phase()));
        let mut phases: Vec<Phase> = members.iter().map(|c| c.bundle.phase()).collect();
        phases.dedup();
        let op = self.track_start(&format!("delete stack {}", current.machine_name), &phases);

        for component in members {
            let phase = component.bundle.phase();
            self.track(op.as_ref(), |t, id| t.set_current_step(id, phase.as_str()));
            let result = self.provisioner.delete(&component);
            let error = result.error().cloned();
            let detail = result.message().to_owned();
            build.report.record(phase, result);
            match error {
                None => {
                    build.report.deleted.push(component.id);
                }
                Some(error) if !error.is_fatal_for_delete() => {
                    build.report.cleaned_references.push(component.id);
                }
                Some(error) => {
                    build.report.remaining = build.stack.included_components.clone();
                    let message = format!(
                        "{phase} phase of deleting stack '{}' failed: {detail}",
                        current.machine_name
                    );
                    return self.abort(op.as_ref(), build, error, message);
                }
            }
            if let Err(e) = self.detach_component(&mut build, component.id) {
                build.report.remaining = build.stack.included_components.clone();
                let message = format!("detaching {} from stack '{}' failed: {e}", component.id, current.machine_name);
                return self.abort(op.as_ref(), build, e, message);
            }
            self.track(op.as_ref(), |t, id| t.complete_step(id, phase.as_str()));
        }

        if let Err(e) = self.stacks.delete(current.id) {
            let message = format!("removing stack record {} failed: {e}", current.id);
            return self.abort(op.as_ref(), build, e.into(), message);
        }
        self.track(op.as_ref(), ProgressTracker::complete_operation);
        let message = format!(
            "stack '{}' deleted ({} components removed)",
            current.machine_name,
            build.report.deleted.len()
        );
        info!("{message}");
        ScsResult::success(build.report, message)
    }
}
