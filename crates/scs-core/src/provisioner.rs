//! Per-bundle provisioning of single components.

use crate::actions::{ApplicationAction, FilesystemAction, SqlAction, TriplestoreAction};
use crate::executor::{ContainerRestoreExecutor, RestoreDiagnostics, RestoreHandle};
use crate::lifecycle::validate_transition;
use crate::{ScsError, ScsResult};
use scs_runtime::BackendSet;
use scs_schema::{Component, ComponentBundle, ComponentDraft, ComponentStatus, MachineName, ScsConfig};
use scs_store::EntityStore;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// What a successful backend call produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionOutput {
    pub message: String,
    /// Connection settings for components linked to this one. May hold
    /// credentials, so it is never persisted or serialized.
    pub env: BTreeMap<String, String>,
}

/// Backend strategy for one component bundle.
pub trait ComponentAction: Send + Sync {
    fn bundle(&self) -> ComponentBundle;

    /// Whether the primary backing resource exists.
    fn exists(&self, name: &MachineName) -> Result<bool, ScsError>;

    /// Whether anything of the component is left to tear down.
    fn any_remaining(&self, name: &MachineName) -> Result<bool, ScsError> {
        self.exists(name)
    }

    /// `links` holds the connection settings of components created before
    /// this one in the same stack.
    fn create(
        &self,
        name: &MachineName,
        label: &str,
        links: &BTreeMap<String, String>,
    ) -> Result<ActionOutput, ScsError>;

    fn delete(&self, name: &MachineName) -> Result<String, ScsError>;

    /// Connection settings of an existing resource, without secrets.
    fn link_env(&self, _name: &MachineName) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    /// Connection settings for adopting an existing resource. Credentials
    /// are never stored, so actions that hand out secrets issue fresh ones.
    fn reuse(&self, name: &MachineName) -> Result<BTreeMap<String, String>, ScsError> {
        Ok(self.link_env(name))
    }

    fn restore(
        &self,
        component: &Component,
        _dump_file: &Path,
    ) -> ScsResult<RestoreHandle, RestoreDiagnostics> {
        ScsResult::failure(ScsError::Unsupported(format!(
            "restoring {} components",
            component.bundle
        )))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CreateMode {
    /// An existing backing resource is adopted and reported as success.
    #[default]
    ReuseExisting,
    /// An existing backing resource is an `AlreadyExists` failure.
    RequireFresh,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentOutcome {
    pub component: Component,
    #[serde(skip)]
    pub link_env: BTreeMap<String, String>,
}

impl ComponentOutcome {
    fn of(component: Component) -> Self {
        Self {
            component,
            link_env: BTreeMap::new(),
        }
    }
}

pub struct ComponentProvisioner {
    components: EntityStore<Component>,
    actions: BTreeMap<ComponentBundle, Arc<dyn ComponentAction>>,
}

impl ComponentProvisioner {
    /// A provisioner with no registered actions.
    pub fn new(components: EntityStore<Component>) -> Self {
        Self {
            components,
            actions: BTreeMap::new(),
        }
    }

    /// Register the actions the configured backends support. Bundles whose
    /// backend or application image is not configured stay unregistered and
    /// report `MissingConfiguration` when used.
    pub fn from_backends(
        components: EntityStore<Component>,
        config: &ScsConfig,
        backends: &BackendSet,
        executor: Option<Arc<ContainerRestoreExecutor>>,
    ) -> Self {
        let mut provisioner = Self::new(components);
        if let (Some(sql), Some(section)) = (&backends.sql, &config.sql) {
            provisioner.register(Arc::new(SqlAction::new(
                Arc::clone(sql),
                &section.host,
                section.port,
            )));
        }
        if let (Some(ts), Some(section)) = (&backends.triplestore, &config.triplestore) {
            provisioner.register(Arc::new(TriplestoreAction::new(Arc::clone(ts), &section.url)));
        }
        if let Some(containers) = &backends.containers {
            provisioner.register(Arc::new(FilesystemAction::new(
                Arc::clone(containers),
                executor.clone(),
            )));
            let network = config.containers.as_ref().and_then(|c| c.network.clone());
            for bundle in ComponentBundle::ALL.into_iter().filter(|b| b.is_application()) {
                match config.application(bundle) {
                    Ok(app) => provisioner.register(Arc::new(ApplicationAction::new(
                        bundle,
                        Arc::clone(containers),
                        app,
                        network.clone(),
                        executor.clone(),
                    ))),
                    Err(e) => warn!("{bundle} not available: {e}"),
                }
            }
        }
        provisioner
    }

    pub fn register(&mut self, action: Arc<dyn ComponentAction>) {
        self.actions.insert(action.bundle(), action);
    }

    pub fn components(&self) -> &EntityStore<Component> {
        &self.components
    }

    pub fn action(&self, bundle: ComponentBundle) -> Result<&dyn ComponentAction, ScsError> {
        self.actions
            .get(&bundle)
            .map(AsRef::as_ref)
            .ok_or_else(|| {
                ScsError::MissingConfiguration(format!("no backend configured for {bundle} components"))
            })
    }

    pub fn exists(&self, bundle: ComponentBundle, name: &MachineName) -> Result<bool, ScsError> {
        self.action(bundle)?.exists(name)
    }

    pub fn create(&self, draft: ComponentDraft, mode: CreateMode) -> ScsResult<ComponentOutcome> {
        self.create_linked(draft, mode, &BTreeMap::new())
    }

    /// Provision the backing resource and record the component entity.
    pub fn create_linked(
        &self,
        draft: ComponentDraft,
        mode: CreateMode,
        links: &BTreeMap<String, String>,
    ) -> ScsResult<ComponentOutcome> {
        let bundle = draft.bundle;
        let name = draft.machine_name.clone();
        info!("creating {bundle} component '{name}'");

        let action = match self.action(bundle) {
            Ok(a) => a,
            Err(e) => return ScsResult::failure(e),
        };
        match self.components.find_one(|c| c.machine_name == name) {
            Ok(Some(existing)) => {
                return ScsResult::failure(ScsError::AlreadyExists(format!(
                    "component '{name}' (id {})",
                    existing.id
                )))
            }
            Ok(None) => {}
            Err(e) => return ScsResult::failure(e.into()),
        }

        let present = match action.exists(&name) {
            Ok(p) => p,
            Err(e) => {
                warn!("checking {bundle} '{name}' failed: {e}");
                return ScsResult::failure(e);
            }
        };
        let output = if present {
            if mode == CreateMode::RequireFresh {
                return ScsResult::failure(ScsError::AlreadyExists(format!(
                    "{bundle} resource '{name}'"
                )));
            }
            match action.reuse(&name) {
                Ok(env) => ActionOutput {
                    message: format!("{bundle} '{name}' already exists, reusing it"),
                    env,
                },
                Err(e) => {
                    warn!("reusing {bundle} '{name}' failed: {e}");
                    let message = format!("reusing {bundle} component '{name}' failed: {e}");
                    return ScsResult::failure(e).with_message(message);
                }
            }
        } else {
            match action.create(&name, &draft.label, links) {
                Ok(o) => o,
                Err(e) => {
                    warn!("creating {bundle} '{name}' failed: {e}");
                    let message = format!("creating {bundle} component '{name}' failed: {e}");
                    return ScsResult::failure(e).with_message(message);
                }
            }
        };

        match self
            .components
            .insert_with(|id| draft.into_component(id, ComponentStatus::Running))
        {
            Ok(component) => {
                info!("{bundle} component '{name}' recorded as {}", component.id);
                ScsResult::success(
                    ComponentOutcome {
                        component,
                        link_env: output.env,
                    },
                    output.message,
                )
            }
            Err(e) => ScsResult::failure(e.into()),
        }
    }

    /// Tear down the backing resource and remove the entity.
    ///
    /// A missing entity is `ComponentNotFound`; a missing backing resource is
    /// success ("already deleted"). Backend failures mark the component
    /// `failed` and return the raw backend output.
    pub fn delete(&self, component: &Component) -> ScsResult<ComponentOutcome> {
        let bundle = component.bundle;
        info!("deleting {bundle} component {} '{}'", component.id, component.machine_name);

        let action = match self.action(bundle) {
            Ok(a) => a,
            Err(e) => return ScsResult::failure(e),
        };
        let mut current = match self.components.get(component.id) {
            Ok(Some(c)) => c,
            Ok(None) => {
                return ScsResult::failure(ScsError::ComponentNotFound(component.id.to_string()))
            }
            Err(e) => return ScsResult::failure(e.into()),
        };
        if let Err(e) = validate_transition(current.status, ComponentStatus::Deleting) {
            return ScsResult::failure(e);
        }

        let name = current.machine_name.clone();
        let present = match action.any_remaining(&name) {
            Ok(p) => p,
            Err(e) => return self.fail_delete(current, e),
        };
        if !present {
            if let Err(e) = self.components.delete(current.id) {
                return ScsResult::failure(e.into());
            }
            return ScsResult::success(
                ComponentOutcome::of(current),
                format!("{bundle} '{name}' already deleted"),
            );
        }

        current.status = ComponentStatus::Deleting;
        current.updated_at = chrono::Utc::now().to_rfc3339();
        if let Err(e) = self.components.save(&current) {
            return ScsResult::failure(e.into());
        }
        match action.delete(&name) {
            Ok(message) => match self.components.delete(current.id) {
                Ok(()) => ScsResult::success(ComponentOutcome::of(current), message),
                Err(e) => ScsResult::failure(e.into()),
            },
            Err(e) => self.fail_delete(current, e),
        }
    }

    fn fail_delete(&self, mut component: Component, error: ScsError) -> ScsResult<ComponentOutcome> {
        warn!(
            "deleting {} '{}' failed: {error}",
            component.bundle, component.machine_name
        );
        if validate_transition(component.status, ComponentStatus::Failed).is_ok() {
            component.status = ComponentStatus::Failed;
            component.updated_at = chrono::Utc::now().to_rfc3339();
            if let Err(e) = self.components.save(&component) {
                warn!("recording failed status of {} failed: {e}", component.id);
            }
        }
        let message = format!(
            "deleting {} component '{}' failed: {error}",
            component.bundle, component.machine_name
        );
        ScsResult::failure(error)
            .with_message(message)
            .with_partial(ComponentOutcome::of(component))
    }
}
