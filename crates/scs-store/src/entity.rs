use crate::layout::StoreLayout;
use crate::lock::FileLock;
use crate::{atomic_write, StoreError};
use scs_schema::{Component, ComponentId, Snapshot, SnapshotId, Stack, StackId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::marker::PhantomData;
use std::path::PathBuf;
use tracing::{debug, warn};

const COUNTER_FILE: &str = ".next-id";
const LOCK_FILE: &str = ".lock";

/// A record kept in an [`EntityStore`].
pub trait Entity: Serialize + DeserializeOwned + Clone {
    /// Directory name under `entities/`.
    const KIND: &'static str;
    type Id: Copy + fmt::Display + From<u64>;

    fn id(&self) -> Self::Id;
}

impl Entity for Component {
    const KIND: &'static str = "component";
    type Id = ComponentId;

    fn id(&self) -> ComponentId {
        self.id
    }
}

impl Entity for Stack {
    const KIND: &'static str = "stack";
    type Id = StackId;

    fn id(&self) -> StackId {
        self.id
    }
}

impl Entity for Snapshot {
    const KIND: &'static str = "snapshot";
    type Id = SnapshotId;

    fn id(&self) -> SnapshotId {
        self.id
    }
}

/// On-disk form: the record plus a blake3 checksum over its canonical JSON.
#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    checksum: String,
    record: T,
}

#[derive(Serialize, Deserialize)]
struct Counter {
    next: u64,
}

fn compute_checksum<T: Serialize>(record: &T) -> Result<String, StoreError> {
    let json = serde_json::to_string_pretty(record)?;
    Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
}

/// Keyed store of one entity kind, one JSON file per record.
pub struct EntityStore<T: Entity> {
    layout: StoreLayout,
    _kind: PhantomData<T>,
}

impl<T: Entity> Clone for EntityStore<T> {
    fn clone(&self) -> Self {
        Self::new(self.layout.clone())
    }
}

impl<T: Entity> EntityStore<T> {
    pub fn new(layout: StoreLayout) -> Self {
        Self {
            layout,
            _kind: PhantomData,
        }
    }

    fn dir(&self) -> PathBuf {
        self.layout.entity_dir(T::KIND)
    }

    fn path(&self, id: T::Id) -> PathBuf {
        self.dir().join(format!("{id}.json"))
    }

    fn key(id: T::Id) -> String {
        format!("{}/{id}", T::KIND)
    }

    pub fn save(&self, record: &T) -> Result<(), StoreError> {
        let envelope = Envelope {
            checksum: compute_checksum(record)?,
            record,
        };
        let content = serde_json::to_string_pretty(&envelope)?;
        atomic_write(&self.path(record.id()), content.as_bytes())?;
        debug!("saved {}", Self::key(record.id()));
        Ok(())
    }

    /// Allocate the next id and persist the record `build` produces for it.
    ///
    /// Ids are never reused, even after the record with the highest id is
    /// deleted.
    pub fn insert_with(&self, build: impl FnOnce(T::Id) -> T) -> Result<T, StoreError> {
        let dir = self.dir();
        fs::create_dir_all(&dir)?;
        let _lock = FileLock::acquire(&dir.join(LOCK_FILE))?;

        let counter_path = dir.join(COUNTER_FILE);
        let next = if counter_path.exists() {
            let counter: Counter = serde_json::from_str(&fs::read_to_string(&counter_path)?)?;
            counter.next
        } else {
            1
        };
        let record = build(T::Id::from(next));
        self.save(&record)?;
        let bumped = serde_json::to_string(&Counter { next: next + 1 })?;
        atomic_write(&counter_path, bumped.as_bytes())?;
        Ok(record)
    }

    pub fn load(&self, id: T::Id) -> Result<T, StoreError> {
        let path = self.path(id);
        if !path.exists() {
            return Err(StoreError::NotFound {
                kind: T::KIND,
                id: id.to_string(),
            });
        }
        let content = fs::read_to_string(&path)?;
        let envelope: Envelope<T> = serde_json::from_str(&content)?;
        let actual = compute_checksum(&envelope.record)?;
        if actual != envelope.checksum {
            return Err(StoreError::IntegrityFailure {
                key: Self::key(id),
                expected: envelope.checksum,
                actual,
            });
        }
        Ok(envelope.record)
    }

    /// `Ok(None)` when the record does not exist.
    pub fn get(&self, id: T::Id) -> Result<Option<T>, StoreError> {
        match self.load(id) {
            Ok(record) => Ok(Some(record)),
            Err(StoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn exists(&self, id: T::Id) -> bool {
        self.path(id).exists()
    }

    /// Removing an absent record is not an error.
    pub fn delete(&self, id: T::Id) -> Result<(), StoreError> {
        let path = self.path(id);
        if path.exists() {
            fs::remove_file(path)?;
            debug!("deleted {}", Self::key(id));
        }
        Ok(())
    }

    fn record_ids(&self) -> Result<Vec<u64>, StoreError> {
        let dir = self.dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            if let Ok(id) = stem.parse::<u64>() {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// All readable records in id order; corrupted ones are logged and skipped.
    pub fn list(&self) -> Result<Vec<T>, StoreError> {
        let mut results = Vec::new();
        for id in self.record_ids()? {
            match self.load(T::Id::from(id)) {
                Ok(record) => results.push(record),
                Err(e) => warn!("skipping corrupted {} record {id}: {e}", T::KIND),
            }
        }
        Ok(results)
    }

    /// Like `list()`, but surfaces per-record failures.
    #[allow(clippy::type_complexity)]
    pub fn list_with_errors(&self) -> Result<Vec<Result<T, (String, StoreError)>>, StoreError> {
        Ok(self
            .record_ids()?
            .into_iter()
            .map(|id| {
                let id = T::Id::from(id);
                self.load(id).map_err(|e| (Self::key(id), e))
            })
            .collect())
    }

    pub fn find(&self, predicate: impl Fn(&T) -> bool) -> Result<Vec<T>, StoreError> {
        Ok(self.list()?.into_iter().filter(|r| predicate(r)).collect())
    }

    pub fn find_one(&self, predicate: impl Fn(&T) -> bool) -> Result<Option<T>, StoreError> {
        Ok(self.list()?.into_iter().find(|r| predicate(r)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scs_schema::{ComponentBundle, ComponentDraft, ComponentStatus, MachineName, Owner};

    fn store() -> (tempfile::TempDir, EntityStore<Component>) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        (dir, EntityStore::new(layout))
    }

    fn draft(name: &str) -> ComponentDraft {
        ComponentDraft::new(
            ComponentBundle::Sql,
            MachineName::parse(name).unwrap(),
            Owner::new("alice"),
        )
    }

    #[test]
    fn insert_allocates_sequential_ids() {
        let (_dir, store) = store();
        let a = store
            .insert_with(|id| draft("a").into_component(id, ComponentStatus::Running))
            .unwrap();
        let b = store
            .insert_with(|id| draft("b").into_component(id, ComponentStatus::Running))
            .unwrap();
        assert_eq!(a.id, ComponentId::new(1));
        assert_eq!(b.id, ComponentId::new(2));
        assert_eq!(store.load(b.id).unwrap(), b);
    }

    #[test]
    fn ids_are_not_reused_after_delete() {
        let (_dir, store) = store();
        let a = store
            .insert_with(|id| draft("a").into_component(id, ComponentStatus::Running))
            .unwrap();
        store.delete(a.id).unwrap();
        let b = store
            .insert_with(|id| draft("b").into_component(id, ComponentStatus::Running))
            .unwrap();
        assert_eq!(b.id, ComponentId::new(2));
    }

    #[test]
    fn load_missing_is_not_found() {
        let (_dir, store) = store();
        assert!(matches!(
            store.load(ComponentId::new(9)),
            Err(StoreError::NotFound {
                kind: "component",
                ..
            })
        ));
        assert!(store.get(ComponentId::new(9)).unwrap().is_none());
        store.delete(ComponentId::new(9)).unwrap();
    }

    #[test]
    fn tampered_record_fails_checksum() {
        let (dir, store) = store();
        let c = store
            .insert_with(|id| draft("a").into_component(id, ComponentStatus::Running))
            .unwrap();
        let path = dir.path().join("entities/component/1.json");
        let content = fs::read_to_string(&path).unwrap();
        fs::write(&path, content.replace("\"alice\"", "\"mallory\"")).unwrap();
        assert!(matches!(
            store.load(c.id),
            Err(StoreError::IntegrityFailure { .. })
        ));
        assert!(store.list().unwrap().is_empty());
        let with_errors = store.list_with_errors().unwrap();
        assert_eq!(with_errors.len(), 1);
        assert!(with_errors[0].is_err());
    }

    #[test]
    fn find_filters_records() {
        let (_dir, store) = store();
        for name in ["x-sql", "y-sql", "x-app"] {
            store
                .insert_with(|id| draft(name).into_component(id, ComponentStatus::Running))
                .unwrap();
        }
        let xs = store.find(|c| c.machine_name.starts_with("x-")).unwrap();
        assert_eq!(xs.len(), 2);
        let y = store
            .find_one(|c| c.machine_name.as_str() == "y-sql")
            .unwrap()
            .unwrap();
        assert_eq!(y.id, ComponentId::new(2));
    }

    #[test]
    fn save_overwrites_existing_record() {
        let (_dir, store) = store();
        let mut c = store
            .insert_with(|id| draft("a").into_component(id, ComponentStatus::Provisioning))
            .unwrap();
        c.status = ComponentStatus::Running;
        store.save(&c).unwrap();
        assert_eq!(
            store.load(c.id).unwrap().status,
            ComponentStatus::Running
        );
        assert_eq!(store.list().unwrap().len(), 1);
    }
}
