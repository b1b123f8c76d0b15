//! In-memory backends for tests and the `mock` driver.
//!
//! Each mock records the calls it receives and can be told to fail a named
//! operation (`fail_on("create_database")`), returning a
//! [`BackendError::Request`] with a recognisable raw output.

use crate::backend::{ContainerBackend, ContainerSpec, ContainerState, SqlBackend, TriplestoreBackend};
use crate::BackendError;
use scs_schema::{ContainerId, VolumeName};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>, BackendError> {
    m.lock()
        .map_err(|e| BackendError::request("mock", format!("mutex poisoned: {e}")))
}

/// Call log and failure switches shared by all mocks.
#[derive(Default)]
struct Faults {
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl Faults {
    fn enter(&self, operation: &str, target: &str) -> Result<(), BackendError> {
        lock(&self.calls)?.push(format!("{operation} {target}"));
        if lock(&self.failing)?.contains(operation) {
            return Err(BackendError::request(
                format!("{operation} {target}"),
                format!("mock failure injected for {operation}"),
            ));
        }
        Ok(())
    }

    fn fail_on(&self, operation: &str) {
        if let Ok(mut f) = self.failing.lock() {
            f.insert(operation.to_owned());
        }
    }

    fn clear_failures(&self) {
        if let Ok(mut f) = self.failing.lock() {
            f.clear();
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[derive(Default)]
pub struct MockSqlBackend {
    databases: Mutex<HashSet<String>>,
    users: Mutex<HashMap<String, String>>,
    faults: Faults,
}

impl MockSqlBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, operation: &str) {
        self.faults.fail_on(operation);
    }

    pub fn clear_failures(&self) {
        self.faults.clear_failures();
    }

    pub fn calls(&self) -> Vec<String> {
        self.faults.calls()
    }

    pub fn has_database(&self, name: &str) -> bool {
        self.databases.lock().is_ok_and(|d| d.contains(name))
    }

    pub fn has_user(&self, name: &str) -> bool {
        self.users.lock().is_ok_and(|u| u.contains_key(name))
    }

    pub fn password_of(&self, name: &str) -> Option<String> {
        self.users.lock().ok().and_then(|u| u.get(name).cloned())
    }

    /// Simulate a database that exists outside scs' records.
    pub fn seed_database(&self, name: &str) {
        if let Ok(mut d) = self.databases.lock() {
            d.insert(name.to_owned());
        }
    }
}

impl SqlBackend for MockSqlBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn database_exists(&self, database: &str) -> Result<bool, BackendError> {
        self.faults.enter("database_exists", database)?;
        Ok(lock(&self.databases)?.contains(database))
    }

    fn create_database(&self, database: &str) -> Result<(), BackendError> {
        self.faults.enter("create_database", database)?;
        lock(&self.databases)?.insert(database.to_owned());
        Ok(())
    }

    fn delete_database(&self, database: &str) -> Result<(), BackendError> {
        self.faults.enter("delete_database", database)?;
        lock(&self.databases)?.remove(database);
        Ok(())
    }

    fn create_user(&self, user: &str, password: &str, database: &str) -> Result<(), BackendError> {
        self.faults.enter("create_user", user)?;
        if !lock(&self.databases)?.contains(database) {
            return Err(BackendError::request(
                format!("create_user {user}"),
                format!("ERROR 1049: Unknown database '{database}'"),
            ));
        }
        lock(&self.users)?.insert(user.to_owned(), password.to_owned());
        Ok(())
    }

    fn reset_user(&self, user: &str, password: &str, database: &str) -> Result<(), BackendError> {
        self.faults.enter("reset_user", user)?;
        if !lock(&self.databases)?.contains(database) {
            return Err(BackendError::request(
                format!("reset_user {user}"),
                format!("ERROR 1049: Unknown database '{database}'"),
            ));
        }
        lock(&self.users)?.insert(user.to_owned(), password.to_owned());
        Ok(())
    }

    fn delete_user(&self, user: &str) -> Result<(), BackendError> {
        self.faults.enter("delete_user", user)?;
        lock(&self.users)?.remove(user);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockTriplestoreBackend {
    repositories: Mutex<HashSet<String>>,
    faults: Faults,
}

impl MockTriplestoreBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, operation: &str) {
        self.faults.fail_on(operation);
    }

    pub fn clear_failures(&self) {
        self.faults.clear_failures();
    }

    pub fn calls(&self) -> Vec<String> {
        self.faults.calls()
    }

    pub fn has_repository(&self, id: &str) -> bool {
        self.repositories.lock().is_ok_and(|r| r.contains(id))
    }
}

impl TriplestoreBackend for MockTriplestoreBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn repository_exists(&self, id: &str) -> Result<bool, BackendError> {
        self.faults.enter("repository_exists", id)?;
        Ok(lock(&self.repositories)?.contains(id))
    }

    fn create_repository(&self, id: &str, _title: &str) -> Result<(), BackendError> {
        self.faults.enter("create_repository", id)?;
        lock(&self.repositories)?.insert(id.to_owned());
        Ok(())
    }

    fn delete_repository(&self, id: &str) -> Result<(), BackendError> {
        self.faults.enter("delete_repository", id)?;
        lock(&self.repositories)?.remove(id);
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct MockContainer {
    spec: ContainerSpec,
    state: ContainerState,
}

/// Containers never execute anything: after `start_container` they report
/// running until a test calls [`finish_container`](Self::finish_container).
#[derive(Default)]
pub struct MockContainerBackend {
    containers: Mutex<HashMap<String, MockContainer>>,
    volumes: Mutex<HashSet<String>>,
    next_id: Mutex<u64>,
    faults: Faults,
}

impl MockContainerBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, operation: &str) {
        self.faults.fail_on(operation);
    }

    pub fn clear_failures(&self) {
        self.faults.clear_failures();
    }

    pub fn calls(&self) -> Vec<String> {
        self.faults.calls()
    }

    pub fn has_volume(&self, name: &str) -> bool {
        self.volumes.lock().is_ok_and(|v| v.contains(name))
    }

    /// Spec the container was created with, looked up by id or name.
    pub fn container_spec(&self, id_or_name: &str) -> Option<ContainerSpec> {
        let containers = self.containers.lock().ok()?;
        containers
            .get(id_or_name)
            .or_else(|| containers.values().find(|c| c.spec.name == id_or_name))
            .map(|c| c.spec.clone())
    }

    pub fn container_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .containers
            .lock()
            .map(|c| c.values().map(|c| c.spec.name.clone()).collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Mark a container exited with `exit_code`.
    pub fn finish_container(&self, id: &ContainerId, exit_code: i64) {
        if let Ok(mut containers) = self.containers.lock() {
            if let Some(c) = containers.get_mut(id.as_str()) {
                c.state.running = false;
                c.state.exit_code = Some(exit_code);
                c.state.status = "exited".to_owned();
            }
        }
    }

    fn resolve_key(containers: &HashMap<String, MockContainer>, id: &ContainerId) -> Option<String> {
        if containers.contains_key(id.as_str()) {
            return Some(id.to_string());
        }
        containers
            .iter()
            .find(|(_, c)| c.spec.name == id.as_str())
            .map(|(k, _)| k.clone())
    }
}

impl ContainerBackend for MockContainerBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerId, BackendError> {
        self.faults.enter("create_container", &spec.name)?;
        let mut containers = lock(&self.containers)?;
        if containers.values().any(|c| c.spec.name == spec.name) {
            return Err(BackendError::request(
                format!("create_container {}", spec.name),
                format!("Conflict. The container name \"/{}\" is already in use", spec.name),
            ));
        }
        let id = {
            let mut next = lock(&self.next_id)?;
            *next += 1;
            ContainerId::new(format!("mock{:012x}", *next))
        };
        containers.insert(
            id.to_string(),
            MockContainer {
                spec: spec.clone(),
                state: ContainerState {
                    id: id.clone(),
                    running: false,
                    exit_code: None,
                    status: "created".to_owned(),
                },
            },
        );
        Ok(id)
    }

    fn start_container(&self, id: &ContainerId) -> Result<(), BackendError> {
        self.faults.enter("start_container", id)?;
        let mut containers = lock(&self.containers)?;
        let key = Self::resolve_key(&containers, id)
            .ok_or_else(|| BackendError::NotFound(format!("container {id}")))?;
        if let Some(c) = containers.get_mut(&key) {
            c.state.running = true;
            c.state.status = "running".to_owned();
        }
        Ok(())
    }

    fn inspect_container(&self, id: &ContainerId) -> Result<Option<ContainerState>, BackendError> {
        self.faults.enter("inspect_container", id)?;
        let containers = lock(&self.containers)?;
        Ok(Self::resolve_key(&containers, id)
            .and_then(|k| containers.get(&k))
            .map(|c| c.state.clone()))
    }

    fn remove_container(&self, id: &ContainerId) -> Result<(), BackendError> {
        self.faults.enter("remove_container", id)?;
        let mut containers = lock(&self.containers)?;
        if let Some(key) = Self::resolve_key(&containers, id) {
            containers.remove(&key);
        }
        Ok(())
    }

    fn volume_exists(&self, name: &VolumeName) -> Result<bool, BackendError> {
        self.faults.enter("volume_exists", name)?;
        Ok(lock(&self.volumes)?.contains(name.as_str()))
    }

    fn create_volume(&self, name: &VolumeName) -> Result<(), BackendError> {
        self.faults.enter("create_volume", name)?;
        lock(&self.volumes)?.insert(name.to_string());
        Ok(())
    }

    fn remove_volume(&self, name: &VolumeName) -> Result<(), BackendError> {
        self.faults.enter("remove_volume", name)?;
        lock(&self.volumes)?.remove(name.as_str());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_mock_tracks_databases_and_users() {
        let sql = MockSqlBackend::new();
        sql.create_database("demo_sql").unwrap();
        assert!(sql.database_exists("demo_sql").unwrap());
        sql.create_user("demo_sql", "pw", "demo_sql").unwrap();
        assert!(sql.has_user("demo_sql"));
        sql.delete_user("demo_sql").unwrap();
        sql.delete_database("demo_sql").unwrap();
        assert!(!sql.has_database("demo_sql"));
        assert_eq!(sql.calls().len(), 5);
    }

    #[test]
    fn sql_mock_rejects_user_for_unknown_database() {
        let sql = MockSqlBackend::new();
        let err = sql.create_user("u", "pw", "missing").unwrap_err();
        assert!(err.to_string().contains("Unknown database"));
    }

    #[test]
    fn injected_failure_carries_raw_output() {
        let ts = MockTriplestoreBackend::new();
        ts.fail_on("create_repository");
        let err = ts.create_repository("demo-ts", "Demo").unwrap_err();
        assert!(err.to_string().contains("mock failure injected"));
        assert!(!ts.has_repository("demo-ts"));
        ts.clear_failures();
        ts.create_repository("demo-ts", "Demo").unwrap();
        assert!(ts.repository_exists("demo-ts").unwrap());
    }

    #[test]
    fn container_lifecycle() {
        let docker = MockContainerBackend::new();
        let spec = ContainerSpec {
            name: "demo-app".to_owned(),
            image: "wisski:test".to_owned(),
            ..ContainerSpec::default()
        };
        let id = docker.create_container(&spec).unwrap();
        assert_eq!(
            docker.inspect_container(&id).unwrap().unwrap().status,
            "created"
        );
        docker.start_container(&id).unwrap();
        assert!(docker.inspect_container(&id).unwrap().unwrap().running);
        // Lookup by name works as with the real engine.
        assert!(docker
            .container_exists(&ContainerId::new("demo-app"))
            .unwrap());

        docker.finish_container(&id, 3);
        let state = docker.inspect_container(&id).unwrap().unwrap();
        assert!(!state.running);
        assert_eq!(state.exit_code, Some(3));

        assert!(docker.create_container(&spec).is_err());
        docker.remove_container(&id).unwrap();
        assert!(docker.inspect_container(&id).unwrap().is_none());
        docker.remove_container(&id).unwrap();
    }

    #[test]
    fn volumes() {
        let docker = MockContainerBackend::new();
        let name = VolumeName::new("demo-files");
        assert!(!docker.volume_exists(&name).unwrap());
        docker.create_volume(&name).unwrap();
        assert!(docker.has_volume("demo-files"));
        docker.remove_volume(&name).unwrap();
        docker.remove_volume(&name).unwrap();
        assert!(!docker.has_volume("demo-files"));
    }
}
