use super::{colorize_status, emit, maybe_spinner, parse_id};
use clap::Subcommand;
use scs_core::{Manager, RestoreReport, ScsResult, SnapshotVerification};
use scs_schema::{Snapshot, SnapshotId, SnapshotSubject, StorageUri};

#[derive(Debug, Subcommand)]
pub enum SnapshotCommand {
    /// Record an existing archive as a snapshot of a stack or component.
    Register {
        #[arg(long, conflicts_with = "component", required_unless_present = "component")]
        stack: Option<String>,
        #[arg(long)]
        component: Option<String>,
        /// Archive location: private://…, public://… or an absolute path.
        #[arg(long)]
        file: String,
        #[arg(long)]
        label: String,
        #[arg(long)]
        owner: String,
        /// Expected checksum (`sha256:<hex>`); computed from the archive when omitted.
        #[arg(long)]
        checksum: Option<String>,
    },
    /// Compare the archive against its recorded checksum.
    Verify { id: String },
    /// Rewrite the recorded checksum from the archive on disk.
    RepairChecksum { id: String },
    /// Verify, unpack and restore every manifest entry.
    Restore { id: String },
}

pub fn run(manager: &Manager, command: SnapshotCommand, json: bool) -> Result<u8, String> {
    match command {
        SnapshotCommand::Register {
            stack,
            component,
            file,
            label,
            owner,
            checksum,
        } => {
            let subject = match (stack, component) {
                (Some(id), _) => SnapshotSubject::Stack(parse_id("stack", &id)?),
                (None, Some(id)) => SnapshotSubject::Component(parse_id("component", &id)?),
                (None, None) => return Err("one of --stack or --component is required".to_owned()),
            };
            let result = manager.register_snapshot(
                subject,
                &label,
                &owner,
                StorageUri::new(file),
                checksum.as_deref(),
            );
            emit(&result, json, None, print_snapshot, print_snapshot)
        }
        SnapshotCommand::Verify { id } => {
            let id: SnapshotId = parse_id("snapshot", &id)?;
            let result = manager.verify_snapshot(id);
            emit(&result, json, None, print_verification, print_verification)
        }
        SnapshotCommand::RepairChecksum { id } => {
            let id: SnapshotId = parse_id("snapshot", &id)?;
            let result = manager.repair_snapshot_checksum(id);
            emit(&result, json, None, print_snapshot, print_snapshot)
        }
        SnapshotCommand::Restore { id } => {
            let id: SnapshotId = parse_id("snapshot", &id)?;
            let pb = maybe_spinner(json, &format!("restoring snapshot {id}..."));
            let result = manager.restore_snapshot(id);
            emit(&result, json, pb.as_ref(), print_report, print_report)
        }
    }
}

fn print_snapshot(snapshot: &Snapshot) {
    println!("  id:       {}", snapshot.id);
    println!("  file:     {}", snapshot.file);
    println!("  checksum: {}", snapshot.checksum);
}

fn print_verification(v: &SnapshotVerification) {
    println!("  path:     {}", v.path.display());
    println!("  expected: {}", v.expected);
    println!("  actual:   {}", v.actual);
}

fn print_report(report: &RestoreReport) {
    for entry in &report.entries {
        match &entry.result {
            ScsResult::Success { data, .. } => println!(
                "  [{}] {} {}: {} (handle {})",
                entry.index,
                entry.bundle,
                entry.machine_name,
                colorize_status("running"),
                data.handle_path().display()
            ),
            ScsResult::Failure { message, .. } => println!(
                "  [{}] {} {}: {} {message}",
                entry.index,
                entry.bundle,
                entry.machine_name,
                colorize_status("failed")
            ),
        }
    }
}
