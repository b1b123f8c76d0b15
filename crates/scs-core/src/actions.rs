//! Component actions backed by the runtime clients.

use crate::executor::{ContainerRestoreExecutor, RestoreDiagnostics, RestoreHandle};
use crate::provisioner::{ActionOutput, ComponentAction};
use crate::{ScsError, ScsResult};
use scs_runtime::{ContainerBackend, ContainerSpec, Mount, SqlBackend, TriplestoreBackend};
use scs_schema::{
    volume_name_for, ApplicationSection, Component, ComponentBundle, ContainerId, MachineName,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

fn generate_password() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn restore_with(
    executor: Option<&Arc<ContainerRestoreExecutor>>,
    component: &Component,
    dump_file: &Path,
) -> ScsResult<RestoreHandle, RestoreDiagnostics> {
    match executor {
        Some(executor) => executor.restore_volume(component, dump_file),
        None => ScsResult::failure(ScsError::MissingConfiguration(
            "no container backend configured for volume restores".to_owned(),
        )),
    }
}

/// Database plus a dedicated user owning it.
pub struct SqlAction {
    sql: Arc<dyn SqlBackend>,
    host: String,
    port: u16,
}

impl SqlAction {
    pub fn new(sql: Arc<dyn SqlBackend>, host: &str, port: u16) -> Self {
        Self {
            sql,
            host: host.to_owned(),
            port,
        }
    }
}

impl ComponentAction for SqlAction {
    fn bundle(&self) -> ComponentBundle {
        ComponentBundle::Sql
    }

    fn exists(&self, name: &MachineName) -> Result<bool, ScsError> {
        Ok(self.sql.database_exists(&name.to_identifier())?)
    }

    fn create(
        &self,
        name: &MachineName,
        _label: &str,
        _links: &BTreeMap<String, String>,
    ) -> Result<ActionOutput, ScsError> {
        let database = name.to_identifier();
        self.sql.create_database(&database)?;
        let password = generate_password();
        if let Err(e) = self.sql.create_user(&database, &password, &database) {
            if let Err(cleanup) = self.sql.delete_database(&database) {
                warn!("dropping database {database} after failed user creation: {cleanup}");
            }
            return Err(e.into());
        }
        let mut env = self.link_env(name);
        env.insert("DB_PASSWORD".to_owned(), password);
        Ok(ActionOutput {
            message: format!("created database {database} with user {database}"),
            env,
        })
    }

    fn delete(&self, name: &MachineName) -> Result<String, ScsError> {
        let database = name.to_identifier();
        self.sql.delete_user(&database)?;
        self.sql.delete_database(&database)?;
        Ok(format!("dropped database {database} and user {database}"))
    }

    fn link_env(&self, name: &MachineName) -> BTreeMap<String, String> {
        let database = name.to_identifier();
        BTreeMap::from([
            ("DB_HOST".to_owned(), self.host.clone()),
            ("DB_PORT".to_owned(), self.port.to_string()),
            ("DB_NAME".to_owned(), database.clone()),
            ("DB_USER".to_owned(), database),
        ])
    }

    /// The password of an adopted database is unknown, so the user's
    /// password is rotated and the new one handed to the linked components.
    fn reuse(&self, name: &MachineName) -> Result<BTreeMap<String, String>, ScsError> {
        let database = name.to_identifier();
        let password = generate_password();
        self.sql.reset_user(&database, &password, &database)?;
        debug!("rotated password of user {database}");
        let mut env = self.link_env(name);
        env.insert("DB_PASSWORD".to_owned(), password);
        Ok(env)
    }
}

pub struct TriplestoreAction {
    triplestore: Arc<dyn TriplestoreBackend>,
    url: String,
}

impl TriplestoreAction {
    pub fn new(triplestore: Arc<dyn TriplestoreBackend>, url: &str) -> Self {
        Self {
            triplestore,
            url: url.trim_end_matches('/').to_owned(),
        }
    }
}

impl ComponentAction for TriplestoreAction {
    fn bundle(&self) -> ComponentBundle {
        ComponentBundle::Triplestore
    }

    fn exists(&self, name: &MachineName) -> Result<bool, ScsError> {
        Ok(self.triplestore.repository_exists(name)?)
    }

    fn create(
        &self,
        name: &MachineName,
        label: &str,
        _links: &BTreeMap<String, String>,
    ) -> Result<ActionOutput, ScsError> {
        self.triplestore.create_repository(name, label)?;
        Ok(ActionOutput {
            message: format!("created repository {name}"),
            env: self.link_env(name),
        })
    }

    fn delete(&self, name: &MachineName) -> Result<String, ScsError> {
        self.triplestore.delete_repository(name)?;
        Ok(format!("deleted repository {name}"))
    }

    fn link_env(&self, name: &MachineName) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("TS_REPOSITORY".to_owned(), name.to_string()),
            (
                "TS_ENDPOINT".to_owned(),
                format!("{}/repositories/{name}", self.url),
            ),
        ])
    }
}

/// A shared named volume.
pub struct FilesystemAction {
    containers: Arc<dyn ContainerBackend>,
    executor: Option<Arc<ContainerRestoreExecutor>>,
}

impl FilesystemAction {
    pub fn new(
        containers: Arc<dyn ContainerBackend>,
        executor: Option<Arc<ContainerRestoreExecutor>>,
    ) -> Self {
        Self {
            containers,
            executor,
        }
    }
}

impl ComponentAction for FilesystemAction {
    fn bundle(&self) -> ComponentBundle {
        ComponentBundle::Filesystem
    }

    fn exists(&self, name: &MachineName) -> Result<bool, ScsError> {
        let volume = volume_name_for(ComponentBundle::Filesystem, name);
        Ok(self.containers.volume_exists(&volume)?)
    }

    fn create(
        &self,
        name: &MachineName,
        _label: &str,
        _links: &BTreeMap<String, String>,
    ) -> Result<ActionOutput, ScsError> {
        let volume = volume_name_for(ComponentBundle::Filesystem, name);
        self.containers.create_volume(&volume)?;
        Ok(ActionOutput {
            message: format!("created volume {volume}"),
            env: self.link_env(name),
        })
    }

    fn delete(&self, name: &MachineName) -> Result<String, ScsError> {
        let volume = volume_name_for(ComponentBundle::Filesystem, name);
        self.containers.remove_volume(&volume)?;
        Ok(format!("removed volume {volume}"))
    }

    fn link_env(&self, name: &MachineName) -> BTreeMap<String, String> {
        BTreeMap::from([(
            "FILES_VOLUME".to_owned(),
            volume_name_for(ComponentBundle::Filesystem, name).into_inner(),
        )])
    }

    fn restore(
        &self,
        component: &Component,
        dump_file: &Path,
    ) -> ScsResult<RestoreHandle, RestoreDiagnostics> {
        restore_with(self.executor.as_ref(), component, dump_file)
    }
}

/// An application container with its own data volume.
pub struct ApplicationAction {
    bundle: ComponentBundle,
    containers: Arc<dyn ContainerBackend>,
    image: String,
    env: BTreeMap<String, String>,
    network: Option<String>,
    executor: Option<Arc<ContainerRestoreExecutor>>,
}

impl ApplicationAction {
    pub fn new(
        bundle: ComponentBundle,
        containers: Arc<dyn ContainerBackend>,
        app: &ApplicationSection,
        network: Option<String>,
        executor: Option<Arc<ContainerRestoreExecutor>>,
    ) -> Self {
        Self {
            bundle,
            containers,
            image: app.image.clone(),
            env: app.env.clone(),
            network,
            executor,
        }
    }

    /// Where the data volume is mounted in the application container.
    fn data_mount(&self) -> &'static str {
        match self.bundle {
            ComponentBundle::JupyterApp => "/home/jovyan/work",
            _ => "/var/www/html",
        }
    }

    fn spec(&self, name: &MachineName, label: &str, links: &BTreeMap<String, String>) -> ContainerSpec {
        let mut env = self.env.clone();
        env.extend(links.iter().map(|(k, v)| (k.clone(), v.clone())));
        env.insert("SCS_MACHINE_NAME".to_owned(), name.to_string());
        env.insert("SCS_LABEL".to_owned(), label.to_owned());
        ContainerSpec {
            name: name.to_string(),
            image: self.image.clone(),
            env,
            command: Vec::new(),
            mounts: vec![Mount::volume(
                volume_name_for(self.bundle, name),
                self.data_mount(),
            )],
            network: self.network.clone(),
            labels: BTreeMap::from([
                ("scs.bundle".to_owned(), self.bundle.to_string()),
                ("scs.machine-name".to_owned(), name.to_string()),
            ]),
        }
    }
}

impl ComponentAction for ApplicationAction {
    fn bundle(&self) -> ComponentBundle {
        self.bundle
    }

    fn exists(&self, name: &MachineName) -> Result<bool, ScsError> {
        Ok(self.containers.container_exists(&ContainerId::new(name.as_str()))?)
    }

    fn any_remaining(&self, name: &MachineName) -> Result<bool, ScsError> {
        Ok(self.exists(name)?
            || self
                .containers
                .volume_exists(&volume_name_for(self.bundle, name))?)
    }

    fn create(
        &self,
        name: &MachineName,
        label: &str,
        links: &BTreeMap<String, String>,
    ) -> Result<ActionOutput, ScsError> {
        let volume = volume_name_for(self.bundle, name);
        if self.containers.volume_exists(&volume)? {
            debug!("volume {volume} already present");
        } else {
            self.containers.create_volume(&volume)?;
        }
        let id = self.containers.create_container(&self.spec(name, label, links))?;
        if let Err(e) = self.containers.start_container(&id) {
            if let Err(cleanup) = self.containers.remove_container(&id) {
                warn!("removing unstarted container {id}: {cleanup}");
            }
            return Err(e.into());
        }
        Ok(ActionOutput {
            message: format!("started container {name} ({id}) on volume {volume}"),
            env: self.link_env(name),
        })
    }

    fn delete(&self, name: &MachineName) -> Result<String, ScsError> {
        let volume = volume_name_for(self.bundle, name);
        self.containers
            .remove_container(&ContainerId::new(name.as_str()))?;
        self.containers.remove_volume(&volume)?;
        Ok(format!("removed container {name} and volume {volume}"))
    }

    fn link_env(&self, name: &MachineName) -> BTreeMap<String, String> {
        BTreeMap::from([("APP_CONTAINER".to_owned(), name.to_string())])
    }

    fn restore(
        &self,
        component: &Component,
        dump_file: &Path,
    ) -> ScsResult<RestoreHandle, RestoreDiagnostics> {
        restore_with(self.executor.as_ref(), component, dump_file)
    }
}
