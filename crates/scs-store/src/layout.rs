use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Current store format version. Incremented on incompatible layout changes.
pub const STORE_FORMAT_VERSION: u32 = 1;
const VERSION_FILE: &str = "version";

/// Directory layout under the scs store root.
///
/// ```text
/// <root>/
///   version
///   entities/<kind>/<id>.json
///   files/{private,public}/…      storage-URI targets (snapshot archives)
///   staging/                      temp workspaces
///   restores/<run-id>/            restore container run directories
///   locks/<machine>.lock
///   leases/<machine>.json
///   progress/<operation-id>.json
/// ```
///
/// Subdirectories are created on [`initialize`](Self::initialize).
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreVersion {
    format_version: u32,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn entities_dir(&self) -> PathBuf {
        self.root.join("entities")
    }

    #[inline]
    pub fn entity_dir(&self, kind: &str) -> PathBuf {
        self.entities_dir().join(kind)
    }

    #[inline]
    pub fn private_files_dir(&self) -> PathBuf {
        self.root.join("files").join("private")
    }

    #[inline]
    pub fn public_files_dir(&self) -> PathBuf {
        self.root.join("files").join("public")
    }

    /// Parent of per-invocation temp workspaces.
    #[inline]
    pub fn staging_dir(&self) -> PathBuf {
        self.root.join("staging")
    }

    #[inline]
    pub fn restores_dir(&self) -> PathBuf {
        self.root.join("restores")
    }

    #[inline]
    pub fn restore_run_dir(&self, run_id: &str) -> PathBuf {
        self.restores_dir().join(run_id)
    }

    #[inline]
    pub fn lock_file(&self, name: &str) -> PathBuf {
        self.root.join("locks").join(format!("{name}.lock"))
    }

    #[inline]
    pub fn leases_dir(&self) -> PathBuf {
        self.root.join("leases")
    }

    #[inline]
    pub fn lease_file(&self, name: &str) -> PathBuf {
        self.leases_dir().join(format!("{name}.json"))
    }

    #[inline]
    pub fn progress_dir(&self) -> PathBuf {
        self.root.join("progress")
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        for dir in [
            self.entities_dir(),
            self.private_files_dir(),
            self.public_files_dir(),
            self.staging_dir(),
            self.restores_dir(),
            self.root.join("locks"),
            self.leases_dir(),
            self.progress_dir(),
        ] {
            fs::create_dir_all(dir)?;
        }

        let version_path = self.root.join(VERSION_FILE);
        if version_path.exists() {
            self.verify_version()?;
        } else {
            let ver = StoreVersion {
                format_version: STORE_FORMAT_VERSION,
            };
            let content = serde_json::to_string_pretty(&ver)?;
            crate::atomic_write(&version_path, content.as_bytes())?;
        }
        Ok(())
    }

    pub fn verify_version(&self) -> Result<(), StoreError> {
        let content = fs::read_to_string(self.root.join(VERSION_FILE))?;
        let ver: StoreVersion = serde_json::from_str(&content)?;
        if ver.format_version != STORE_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: STORE_FORMAT_VERSION,
                found: ver.format_version,
            });
        }
        Ok(())
    }
}
