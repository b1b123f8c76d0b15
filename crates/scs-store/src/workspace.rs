use crate::layout::StoreLayout;
use crate::StoreError;
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use tracing::{debug, warn};

/// Uniquely named scratch directory under the store's staging area.
///
/// The directory and everything in it is removed when the workspace is
/// dropped, whichever way the owning operation exits.
#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
}

impl Workspace {
    pub fn create(layout: &StoreLayout, prefix: &str) -> Result<Self, StoreError> {
        let staging = layout.staging_dir();
        fs::create_dir_all(&staging)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{prefix}-"))
            .tempdir_in(&staging)?;
        debug!("workspace created: {}", dir.path().display());
        Ok(Self { dir: Some(dir) })
    }

    pub fn path(&self) -> &Path {
        self.dir
            .as_ref()
            .map_or_else(|| Path::new(""), TempDir::path)
    }

    /// Remove the workspace now, reporting failures instead of logging them.
    pub fn close(mut self) -> Result<(), StoreError> {
        if let Some(dir) = self.dir.take() {
            dir.close()?;
        }
        Ok(())
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!("failed to remove workspace {}: {e}", path.display());
            }
        }
    }
}
