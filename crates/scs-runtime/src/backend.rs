use crate::BackendError;
use scs_schema::{ContainerId, ScsConfig, VolumeName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Relational database server administration.
pub trait SqlBackend: Send + Sync {
    fn name(&self) -> &str;

    fn database_exists(&self, database: &str) -> Result<bool, BackendError>;

    fn create_database(&self, database: &str) -> Result<(), BackendError>;

    fn delete_database(&self, database: &str) -> Result<(), BackendError>;

    /// Create `user` with `password` and grant it all privileges on `database`.
    fn create_user(&self, user: &str, password: &str, database: &str) -> Result<(), BackendError>;

    /// Create `user` if it is missing, set its password to `password` and
    /// grant it all privileges on `database`.
    fn reset_user(&self, user: &str, password: &str, database: &str) -> Result<(), BackendError>;

    /// Dropping an absent user is not an error.
    fn delete_user(&self, user: &str) -> Result<(), BackendError>;
}

/// RDF triplestore repository administration.
pub trait TriplestoreBackend: Send + Sync {
    fn name(&self) -> &str;

    fn repository_exists(&self, id: &str) -> Result<bool, BackendError>;

    fn create_repository(&self, id: &str, title: &str) -> Result<(), BackendError>;

    fn delete_repository(&self, id: &str) -> Result<(), BackendError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MountSource {
    Volume(VolumeName),
    Bind(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub source: MountSource,
    pub target: String,
    pub read_only: bool,
}

impl Mount {
    pub fn volume(name: VolumeName, target: impl Into<String>) -> Self {
        Self {
            source: MountSource::Volume(name),
            target: target.into(),
            read_only: false,
        }
    }

    pub fn bind(path: impl Into<PathBuf>, target: impl Into<String>, read_only: bool) -> Self {
        Self {
            source: MountSource::Bind(path.into()),
            target: target.into(),
            read_only,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub mounts: Vec<Mount>,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerState {
    pub id: ContainerId,
    pub running: bool,
    /// Set once the container has exited.
    pub exit_code: Option<i64>,
    pub status: String,
}

/// Container engine API: containers and named volumes.
pub trait ContainerBackend: Send + Sync {
    fn name(&self) -> &str;

    fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerId, BackendError>;

    fn start_container(&self, id: &ContainerId) -> Result<(), BackendError>;

    /// `Ok(None)` when the container does not exist.
    fn inspect_container(&self, id: &ContainerId) -> Result<Option<ContainerState>, BackendError>;

    /// Force-remove. Removing an absent container is not an error.
    fn remove_container(&self, id: &ContainerId) -> Result<(), BackendError>;

    fn container_exists(&self, id: &ContainerId) -> Result<bool, BackendError> {
        Ok(self.inspect_container(id)?.is_some())
    }

    fn volume_exists(&self, name: &VolumeName) -> Result<bool, BackendError>;

    fn create_volume(&self, name: &VolumeName) -> Result<(), BackendError>;

    /// Removing an absent volume is not an error.
    fn remove_volume(&self, name: &VolumeName) -> Result<(), BackendError>;
}

/// The backends configured for this installation.
///
/// A section absent from the configuration leaves its backend `None`; the
/// operations needing it report the missing configuration when they run.
#[derive(Clone, Default)]
pub struct BackendSet {
    pub sql: Option<Arc<dyn SqlBackend>>,
    pub triplestore: Option<Arc<dyn TriplestoreBackend>>,
    pub containers: Option<Arc<dyn ContainerBackend>>,
}

impl std::fmt::Debug for BackendSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSet")
            .field("sql", &self.sql.as_ref().map(|b| b.name().to_owned()))
            .field(
                "triplestore",
                &self.triplestore.as_ref().map(|b| b.name().to_owned()),
            )
            .field(
                "containers",
                &self.containers.as_ref().map(|b| b.name().to_owned()),
            )
            .finish()
    }
}

impl BackendSet {
    /// Every backend on its in-memory mock.
    pub fn mock() -> Self {
        Self {
            sql: Some(Arc::new(crate::mock::MockSqlBackend::new())),
            triplestore: Some(Arc::new(crate::mock::MockTriplestoreBackend::new())),
            containers: Some(Arc::new(crate::mock::MockContainerBackend::new())),
        }
    }

    pub fn from_config(config: &ScsConfig) -> Result<Self, BackendError> {
        let sql = config.sql.as_ref().map(select_sql_backend).transpose()?;
        let triplestore = config
            .triplestore
            .as_ref()
            .map(select_triplestore_backend)
            .transpose()?;
        let containers = config
            .containers
            .as_ref()
            .map(select_container_backend)
            .transpose()?;
        Ok(Self {
            sql,
            triplestore,
            containers,
        })
    }
}

pub fn select_sql_backend(
    section: &scs_schema::SqlSection,
) -> Result<Arc<dyn SqlBackend>, BackendError> {
    match section.driver.as_str() {
        "cli" => Ok(Arc::new(crate::mysql::MysqlCliBackend::new(section.clone()))),
        "mock" => Ok(Arc::new(crate::mock::MockSqlBackend::new())),
        other => Err(BackendError::Unavailable(other.to_owned())),
    }
}

pub fn select_triplestore_backend(
    section: &scs_schema::TriplestoreSection,
) -> Result<Arc<dyn TriplestoreBackend>, BackendError> {
    match section.driver.as_str() {
        "http" => Ok(Arc::new(crate::graphdb::GraphDbBackend::new(
            &section.url,
            section.token.clone(),
        ))),
        "mock" => Ok(Arc::new(crate::mock::MockTriplestoreBackend::new())),
        other => Err(BackendError::Unavailable(other.to_owned())),
    }
}

pub fn select_container_backend(
    section: &scs_schema::ContainersSection,
) -> Result<Arc<dyn ContainerBackend>, BackendError> {
    match section.driver.as_str() {
        "http" => Ok(Arc::new(crate::docker::DockerApiBackend::new(
            &section.url,
            section.token.clone(),
        ))),
        "mock" => Ok(Arc::new(crate::mock::MockContainerBackend::new())),
        other => Err(BackendError::Unavailable(other.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_config_selects_mocks() {
        let set = BackendSet::from_config(&ScsConfig::mock("/tmp/scs")).unwrap();
        assert_eq!(set.sql.as_ref().unwrap().name(), "mock");
        assert_eq!(set.triplestore.as_ref().unwrap().name(), "mock");
        assert_eq!(set.containers.as_ref().unwrap().name(), "mock");
    }

    #[test]
    fn production_drivers_are_selectable() {
        let config = ScsConfig::parse(
            r#"
[store]
root = "/tmp/scs"
[sql]
driver = "cli"
[triplestore]
url = "http://ts:7200"
[containers]
url = "http://docker:2375"
"#,
        )
        .unwrap();
        let set = BackendSet::from_config(&config).unwrap();
        assert_eq!(set.sql.as_ref().unwrap().name(), "mysql-cli");
        assert_eq!(set.triplestore.as_ref().unwrap().name(), "graphdb");
        assert_eq!(set.containers.as_ref().unwrap().name(), "docker");
    }

    #[test]
    fn absent_sections_leave_backends_unset() {
        let config = ScsConfig::parse("[store]\nroot = \"/tmp/scs\"\n").unwrap();
        let set = BackendSet::from_config(&config).unwrap();
        assert!(set.sql.is_none());
        assert!(set.triplestore.is_none());
        assert!(set.containers.is_none());
    }

    #[test]
    fn unknown_driver_fails() {
        let mut config = ScsConfig::mock("/tmp/scs");
        if let Some(sql) = config.sql.as_mut() {
            sql.driver = "postgres".to_owned();
        }
        assert!(matches!(
            BackendSet::from_config(&config),
            Err(BackendError::Unavailable(d)) if d == "postgres"
        ));
    }

    #[test]
    fn mount_constructors() {
        let m = Mount::volume(VolumeName::new("demo-data"), "/restore/target");
        assert!(!m.read_only);
        let b = Mount::bind("/srv/run", "/restore/dump", true);
        assert_eq!(b.source, MountSource::Bind(PathBuf::from("/srv/run")));
        assert!(b.read_only);
    }
}
