use crate::entity::{Entity, EntityStore};
use crate::layout::StoreLayout;
use crate::StoreError;
use scs_schema::{Component, Snapshot, Stack};
use serde::Serialize;

#[derive(Debug, Default, Serialize)]
pub struct IntegrityReport {
    pub checked: usize,
    pub passed: usize,
    pub failed: Vec<IntegrityFailure>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Serialize)]
pub struct IntegrityFailure {
    /// `<kind>/<id>` of the failing record.
    pub key: String,
    pub reason: String,
}

fn check_kind<T: Entity>(layout: &StoreLayout, report: &mut IntegrityReport) -> Result<(), StoreError> {
    for result in EntityStore::<T>::new(layout.clone()).list_with_errors()? {
        report.checked += 1;
        match result {
            Ok(_) => report.passed += 1,
            Err((key, StoreError::IntegrityFailure { actual, .. })) => {
                report.failed.push(IntegrityFailure {
                    key,
                    reason: format!("checksum mismatch: got {actual}"),
                });
            }
            Err((key, e)) => report.failed.push(IntegrityFailure {
                key,
                reason: format!("read error: {e}"),
            }),
        }
    }
    Ok(())
}

/// Re-read every entity record, verifying the embedded checksums.
pub fn verify_store_integrity(layout: &StoreLayout) -> Result<IntegrityReport, StoreError> {
    let mut report = IntegrityReport::default();
    check_kind::<Component>(layout, &mut report)?;
    check_kind::<Stack>(layout, &mut report)?;
    check_kind::<Snapshot>(layout, &mut report)?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scs_schema::{MachineName, Owner, StackBundle, StackDraft};
    use std::fs;

    fn seeded() -> (tempfile::TempDir, StoreLayout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        let stacks = EntityStore::<Stack>::new(layout.clone());
        for name in ["one", "two"] {
            stacks
                .insert_with(|id| {
                    StackDraft::new(
                        StackBundle::Wisski,
                        MachineName::parse(name).unwrap(),
                        Owner::new("alice"),
                    )
                    .into_stack(id)
                })
                .unwrap();
        }
        (dir, layout)
    }

    #[test]
    fn clean_store_passes() {
        let (_dir, layout) = seeded();
        let report = verify_store_integrity(&layout).unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.passed, 2);
        assert!(report.is_clean());
    }

    #[test]
    fn tampered_and_unparsable_records_reported() {
        let (dir, layout) = seeded();
        let first = dir.path().join("entities/stack/1.json");
        let content = fs::read_to_string(&first).unwrap();
        fs::write(&first, content.replace("\"one\"", "\"uno\"")).unwrap();
        fs::write(dir.path().join("entities/stack/2.json"), b"{not json").unwrap();

        let report = verify_store_integrity(&layout).unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.passed, 0);
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.failed[0].key, "stack/1");
        assert!(report.failed[0].reason.contains("checksum mismatch"));
        assert!(report.failed[1].reason.contains("read error"));
    }
}
