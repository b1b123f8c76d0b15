use crate::bundle::{ComponentBundle, StackBundle};
use crate::types::{ComponentId, MachineName, Owner, SnapshotId, StackId, StorageUri, VolumeName};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Pending,
    Provisioning,
    Running,
    Failed,
    Deleting,
}

impl std::fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComponentStatus::Pending => write!(f, "pending"),
            ComponentStatus::Provisioning => write!(f, "provisioning"),
            ComponentStatus::Running => write!(f, "running"),
            ComponentStatus::Failed => write!(f, "failed"),
            ComponentStatus::Deleting => write!(f, "deleting"),
        }
    }
}

/// A single typed backing resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub id: ComponentId,
    pub bundle: ComponentBundle,
    pub machine_name: MachineName,
    pub label: String,
    pub owner: Owner,
    pub status: ComponentStatus,
    #[serde(default)]
    pub connected_components: Vec<ComponentId>,
    pub created_at: String,
    pub updated_at: String,
}

impl Component {
    /// Volume holding the component's file state (application data or share).
    pub fn volume_name(&self) -> VolumeName {
        volume_name_for(self.bundle, &self.machine_name)
    }
}

pub fn volume_name_for(bundle: ComponentBundle, name: &MachineName) -> VolumeName {
    let suffix = if bundle == ComponentBundle::Filesystem {
        "files"
    } else {
        "data"
    };
    VolumeName::new(format!("{name}-{suffix}"))
}

/// Request to provision a component; the provisioner assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentDraft {
    pub bundle: ComponentBundle,
    pub machine_name: MachineName,
    pub label: String,
    pub owner: Owner,
}

impl ComponentDraft {
    pub fn new(bundle: ComponentBundle, machine_name: MachineName, owner: Owner) -> Self {
        let label = machine_name.to_string();
        Self {
            bundle,
            machine_name,
            label,
            owner,
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn into_component(self, id: ComponentId, status: ComponentStatus) -> Component {
        let now = chrono::Utc::now().to_rfc3339();
        Component {
            id,
            bundle: self.bundle,
            machine_name: self.machine_name,
            label: self.label,
            owner: self.owner,
            status,
            connected_components: Vec::new(),
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

/// A named composite of components forming one user-facing environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stack {
    pub id: StackId,
    pub bundle: StackBundle,
    pub machine_name: MachineName,
    pub label: String,
    pub owner: Owner,
    #[serde(default)]
    pub included_components: Vec<ComponentId>,
    pub created_at: String,
    pub updated_at: String,
}

impl Stack {
    pub fn includes(&self, id: ComponentId) -> bool {
        self.included_components.contains(&id)
    }

    /// Returns false if the id was already included.
    pub fn include(&mut self, id: ComponentId) -> bool {
        if self.includes(id) {
            return false;
        }
        self.included_components.push(id);
        true
    }

    /// Returns false if the id was not included.
    pub fn exclude(&mut self, id: ComponentId) -> bool {
        let before = self.included_components.len();
        self.included_components.retain(|c| *c != id);
        before != self.included_components.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackDraft {
    pub bundle: StackBundle,
    pub machine_name: MachineName,
    pub label: String,
    pub owner: Owner,
}

impl StackDraft {
    pub fn new(bundle: StackBundle, machine_name: MachineName, owner: Owner) -> Self {
        let label = machine_name.to_string();
        Self {
            bundle,
            machine_name,
            label,
            owner,
        }
    }

    pub fn into_stack(self, id: StackId) -> Stack {
        let now = chrono::Utc::now().to_rfc3339();
        Stack {
            id,
            bundle: self.bundle,
            machine_name: self.machine_name,
            label: self.label,
            owner: self.owner,
            included_components: Vec::new(),
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

/// What a snapshot was taken from. A snapshot belongs to exactly one of the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "id")]
pub enum SnapshotSubject {
    Component(ComponentId),
    Stack(StackId),
}

/// Immutable, checksummed archive of component or stack state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub subject: SnapshotSubject,
    pub label: String,
    pub owner: Owner,
    pub file: StorageUri,
    pub checksum: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotDraft {
    pub subject: SnapshotSubject,
    pub label: String,
    pub owner: Owner,
    pub file: StorageUri,
    pub checksum: String,
}

impl SnapshotDraft {
    pub fn into_snapshot(self, id: SnapshotId) -> Snapshot {
        Snapshot {
            id,
            subject: self.subject,
            label: self.label,
            owner: self.owner,
            file: self.file,
            checksum: self.checksum,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack() -> Stack {
        StackDraft::new(
            StackBundle::Wisski,
            MachineName::parse("demo").unwrap(),
            Owner::new("alice"),
        )
        .into_stack(StackId::new(1))
    }

    #[test]
    fn include_is_deduplicated() {
        let mut s = stack();
        assert!(s.include(ComponentId::new(1)));
        assert!(!s.include(ComponentId::new(1)));
        assert!(s.include(ComponentId::new(2)));
        assert_eq!(
            s.included_components,
            vec![ComponentId::new(1), ComponentId::new(2)]
        );
    }

    #[test]
    fn exclude_reports_change() {
        let mut s = stack();
        s.include(ComponentId::new(5));
        assert!(s.exclude(ComponentId::new(5)));
        assert!(!s.exclude(ComponentId::new(5)));
        assert!(s.included_components.is_empty());
    }

    #[test]
    fn volume_names_per_bundle() {
        let name = MachineName::parse("demo-app").unwrap();
        assert_eq!(
            volume_name_for(ComponentBundle::WisskiApp, &name).as_str(),
            "demo-app-data"
        );
        assert_eq!(
            volume_name_for(ComponentBundle::Filesystem, &name).as_str(),
            "demo-app-files"
        );
    }

    #[test]
    fn snapshot_subject_serde_shape() {
        let json = serde_json::to_value(SnapshotSubject::Stack(StackId::new(9))).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "stack", "id": 9}));
    }

    #[test]
    fn draft_default_label_is_machine_name() {
        let draft = ComponentDraft::new(
            ComponentBundle::Sql,
            MachineName::parse("demo-sql").unwrap(),
            Owner::new("alice"),
        );
        assert_eq!(draft.label, "demo-sql");
        let c = draft.with_label("Demo DB").into_component(ComponentId::new(3), ComponentStatus::Running);
        assert_eq!(c.label, "Demo DB");
        assert!(c.connected_components.is_empty());
    }
}
