//! Progress records for long-running operations (stack create/delete,
//! snapshot restore), one JSON file per operation.
//!
//! Progress is informational: callers report into it, nothing reads it back
//! to make decisions.

use crate::layout::StoreLayout;
use crate::{atomic_write, StoreError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationStatus::Running => write!(f, "running"),
            OperationStatus::Completed => write!(f, "completed"),
            OperationStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepProgress {
    pub name: String,
    pub status: StepStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressLog {
    pub timestamp: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OperationRecord {
    id: String,
    label: String,
    status: OperationStatus,
    current_step: Option<String>,
    steps: Vec<StepProgress>,
    logs: Vec<ProgressLog>,
    started_at: String,
    updated_at: String,
}

/// Snapshot of an operation's progress for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressReport {
    pub id: String,
    pub label: String,
    pub status: OperationStatus,
    pub percentage: u8,
    pub current_step: Option<String>,
    pub steps: Vec<StepProgress>,
    pub logs: Vec<ProgressLog>,
}

#[derive(Debug, Clone)]
pub struct ProgressTracker {
    dir: PathBuf,
}

impl ProgressTracker {
    pub fn new(layout: &StoreLayout) -> Self {
        Self {
            dir: layout.progress_dir(),
        }
    }

    fn entry_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn read(&self, id: &str) -> Result<OperationRecord, StoreError> {
        let path = self.entry_path(id);
        if !path.exists() {
            return Err(StoreError::OperationNotFound(id.to_owned()));
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    fn write(&self, record: &OperationRecord) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(record)?;
        atomic_write(&self.entry_path(&record.id), content.as_bytes())
    }

    fn update(
        &self,
        id: &str,
        message: Option<String>,
        f: impl FnOnce(&mut OperationRecord),
    ) -> Result<(), StoreError> {
        let mut record = self.read(id)?;
        f(&mut record);
        let now = chrono::Utc::now().to_rfc3339();
        if let Some(message) = message {
            record.logs.push(ProgressLog {
                timestamp: now.clone(),
                message,
            });
        }
        record.updated_at = now;
        self.write(&record)
    }

    fn set_step(record: &mut OperationRecord, step: &str, status: StepStatus) {
        match record.steps.iter_mut().find(|s| s.name == step) {
            Some(s) => s.status = status,
            None => record.steps.push(StepProgress {
                name: step.to_owned(),
                status,
            }),
        }
    }

    /// Register a new operation with its planned steps. Returns its id.
    pub fn start_operation(&self, label: &str, steps: &[&str]) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let record = OperationRecord {
            id: id.clone(),
            label: label.to_owned(),
            status: OperationStatus::Running,
            current_step: None,
            steps: steps
                .iter()
                .map(|s| StepProgress {
                    name: (*s).to_owned(),
                    status: StepStatus::Pending,
                })
                .collect(),
            logs: vec![ProgressLog {
                timestamp: now.clone(),
                message: format!("{label} started"),
            }],
            started_at: now.clone(),
            updated_at: now,
        };
        self.write(&record)?;
        debug!("progress: started {label} ({id})");
        Ok(id)
    }

    pub fn set_current_step(&self, id: &str, step: &str) -> Result<(), StoreError> {
        self.update(id, Some(format!("{step} running")), |r| {
            Self::set_step(r, step, StepStatus::Running);
            r.current_step = Some(step.to_owned());
        })
    }

    pub fn complete_step(&self, id: &str, step: &str) -> Result<(), StoreError> {
        self.update(id, Some(format!("{step} completed")), |r| {
            Self::set_step(r, step, StepStatus::Completed);
        })
    }

    pub fn skip_step(&self, id: &str, step: &str) -> Result<(), StoreError> {
        self.update(id, Some(format!("{step} skipped")), |r| {
            Self::set_step(r, step, StepStatus::Skipped);
        })
    }

    /// Mark the operation failed; the current step, if any, fails with it.
    pub fn fail_operation(&self, id: &str, message: &str) -> Result<(), StoreError> {
        self.update(id, Some(message.to_owned()), |r| {
            if let Some(step) = r.current_step.clone() {
                Self::set_step(r, &step, StepStatus::Failed);
            }
            r.status = OperationStatus::Failed;
        })
    }

    pub fn complete_operation(&self, id: &str) -> Result<(), StoreError> {
        self.update(id, Some("completed".to_owned()), |r| {
            r.status = OperationStatus::Completed;
            r.current_step = None;
        })
    }

    pub fn get_progress(&self, id: &str) -> Result<ProgressReport, StoreError> {
        self.read(id).map(Self::report)
    }

    /// Every recorded operation, most recently started first.
    pub fn list(&self) -> Result<Vec<ProgressReport>, StoreError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(StoreError::from)
                .and_then(|c| serde_json::from_str::<OperationRecord>(&c).map_err(StoreError::from))
            {
                Ok(record) => records.push(record),
                Err(e) => debug!("skipping progress record {}: {e}", path.display()),
            }
        }
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(records.into_iter().map(Self::report).collect())
    }

    fn report(record: OperationRecord) -> ProgressReport {
        let done = record
            .steps
            .iter()
            .filter(|s| matches!(s.status, StepStatus::Completed | StepStatus::Skipped))
            .count();
        let percentage = match record.status {
            OperationStatus::Completed => 100,
            _ if record.steps.is_empty() => 0,
            _ => (done * 100 / record.steps.len()) as u8,
        };
        ProgressReport {
            id: record.id,
            label: record.label,
            status: record.status,
            percentage,
            current_step: record.current_step,
            steps: record.steps,
            logs: record.logs,
        }
    }

    /// Delete finished operations last updated more than `older_than` ago.
    /// Returns how many were removed.
    pub fn prune(&self, older_than: chrono::Duration) -> Result<usize, StoreError> {
        if !self.dir.exists() {
            return Ok(0);
        }
        let cutoff = chrono::Utc::now() - older_than;
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let record: OperationRecord = match fs::read_to_string(&path)
                .map_err(StoreError::from)
                .and_then(|c| serde_json::from_str(&c).map_err(StoreError::from))
            {
                Ok(r) => r,
                Err(e) => {
                    warn!("removing unreadable progress record {}: {e}", path.display());
                    fs::remove_file(&path)?;
                    removed += 1;
                    continue;
                }
            };
            if record.status == OperationStatus::Running {
                continue;
            }
            let stale = chrono::DateTime::parse_from_rfc3339(&record.updated_at)
                .is_ok_and(|t| t < cutoff);
            if stale {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> (tempfile::TempDir, ProgressTracker) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        (dir, ProgressTracker::new(&layout))
    }

    #[test]
    fn tracks_steps_and_percentage() {
        let (_dir, tracker) = tracker();
        let id = tracker
            .start_operation("create stack demo", &["sql", "triplestore", "application"])
            .unwrap();
        let report = tracker.get_progress(&id).unwrap();
        assert_eq!(report.status, OperationStatus::Running);
        assert_eq!(report.percentage, 0);

        tracker.set_current_step(&id, "sql").unwrap();
        assert_eq!(
            tracker.get_progress(&id).unwrap().current_step.as_deref(),
            Some("sql")
        );
        tracker.complete_step(&id, "sql").unwrap();
        tracker.skip_step(&id, "triplestore").unwrap();
        let report = tracker.get_progress(&id).unwrap();
        assert_eq!(report.percentage, 66);
        assert_eq!(report.steps[1].status, StepStatus::Skipped);

        tracker.complete_operation(&id).unwrap();
        let report = tracker.get_progress(&id).unwrap();
        assert_eq!(report.status, OperationStatus::Completed);
        assert_eq!(report.percentage, 100);
        assert!(report.logs.len() >= 5);
    }

    #[test]
    fn failure_marks_current_step() {
        let (_dir, tracker) = tracker();
        let id = tracker.start_operation("restore", &["verify", "extract"]).unwrap();
        tracker.set_current_step(&id, "verify").unwrap();
        tracker.fail_operation(&id, "checksum mismatch").unwrap();
        let report = tracker.get_progress(&id).unwrap();
        assert_eq!(report.status, OperationStatus::Failed);
        assert_eq!(report.steps[0].status, StepStatus::Failed);
        assert_eq!(report.steps[1].status, StepStatus::Pending);
        assert_eq!(
            report.logs.last().map(|l| l.message.as_str()),
            Some("checksum mismatch")
        );
    }

    #[test]
    fn list_returns_every_operation() {
        let (_dir, tracker) = tracker();
        assert!(tracker.list().unwrap().is_empty());
        let first = tracker.start_operation("create stack a", &["sql"]).unwrap();
        let second = tracker.start_operation("delete stack b", &["app"]).unwrap();
        tracker.complete_operation(&first).unwrap();
        let ids: Vec<String> = tracker.list().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&first));
        assert!(ids.contains(&second));
    }

    #[test]
    fn unknown_operation_is_error() {
        let (_dir, tracker) = tracker();
        assert!(matches!(
            tracker.get_progress("nope"),
            Err(StoreError::OperationNotFound(_))
        ));
        assert!(tracker.complete_step("nope", "x").is_err());
    }

    #[test]
    fn prune_removes_only_finished_operations() {
        let (_dir, tracker) = tracker();
        let running = tracker.start_operation("a", &["x"]).unwrap();
        let done = tracker.start_operation("b", &["x"]).unwrap();
        tracker.complete_operation(&done).unwrap();

        assert_eq!(tracker.prune(chrono::Duration::hours(1)).unwrap(), 0);
        assert_eq!(tracker.prune(chrono::Duration::seconds(-60)).unwrap(), 1);
        assert!(tracker.get_progress(&running).is_ok());
        assert!(tracker.get_progress(&done).is_err());
    }
}
