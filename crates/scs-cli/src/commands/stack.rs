use super::{colorize_status, emit, json_pretty, maybe_spinner, parse_id, EXIT_SUCCESS};
use clap::Subcommand;
use scs_core::{Manager, PhaseReport, ScsResult, StackOutcome};
use scs_schema::StackId;

#[derive(Debug, Subcommand)]
pub enum StackCommand {
    /// Create a stack and provision its components in phase order.
    Create {
        /// Stack flavour: wisski, jupyter or nextcloud.
        #[arg(long)]
        bundle: String,
        /// Machine name; components derive their names from it.
        #[arg(long)]
        name: String,
        #[arg(long)]
        owner: String,
        #[arg(long)]
        label: Option<String>,
    },
    /// Tear down a stack's components in reverse phase order.
    Delete { id: String },
    List,
}

pub fn run(manager: &Manager, command: StackCommand, json: bool) -> Result<u8, String> {
    match command {
        StackCommand::Create {
            bundle,
            name,
            owner,
            label,
        } => {
            let pb = maybe_spinner(json, &format!("creating {bundle} stack '{name}'..."));
            let result = manager.create_stack(&bundle, &name, &owner, label.as_deref());
            emit(
                &result,
                json,
                pb.as_ref(),
                |outcome: &StackOutcome| {
                    println!("stack id: {}", outcome.stack.id);
                    print_phases(&outcome.report);
                },
                |outcome: &StackOutcome| print_phases(&outcome.report),
            )
        }
        StackCommand::Delete { id } => {
            let id: StackId = parse_id("stack", &id)?;
            let pb = maybe_spinner(json, &format!("deleting stack {id}..."));
            let result = manager.delete_stack(id);
            emit(&result, json, pb.as_ref(), print_phases, print_phases)
        }
        StackCommand::List => {
            let stacks = manager.list_stacks().map_err(|e| e.to_string())?;
            if json {
                println!("{}", json_pretty(&stacks)?);
            } else if stacks.is_empty() {
                println!("no stacks found");
            } else {
                println!("{:<6} {:<10} {:<24} {:<16} COMPONENTS", "ID", "BUNDLE", "NAME", "OWNER");
                for stack in &stacks {
                    let members: Vec<String> = stack
                        .included_components
                        .iter()
                        .map(ToString::to_string)
                        .collect();
                    println!(
                        "{:<6} {:<10} {:<24} {:<16} {}",
                        stack.id.get(),
                        stack.bundle.as_str(),
                        stack.machine_name.as_str(),
                        stack.owner.as_str(),
                        members.join(",")
                    );
                }
            }
            Ok(EXIT_SUCCESS)
        }
    }
}

fn print_phases(report: &PhaseReport) {
    for phase in report.phases() {
        match report.get(phase) {
            None => println!("  {:<12} -", phase.as_str()),
            Some(ScsResult::Success { data, .. }) => println!(
                "  {:<12} {} {} ({})",
                phase.as_str(),
                data.component.id,
                data.component.machine_name,
                colorize_status(&data.component.status.to_string())
            ),
            Some(ScsResult::Failure { message, .. }) => {
                println!("  {:<12} {}: {message}", phase.as_str(), colorize_status("failed"));
            }
        }
    }
    if !report.deleted.is_empty() {
        println!("  deleted: {}", join_ids(&report.deleted));
    }
    if !report.cleaned_references.is_empty() {
        println!("  cleaned references: {}", join_ids(&report.cleaned_references));
    }
    if !report.remaining.is_empty() {
        println!("  still attached: {}", join_ids(&report.remaining));
    }
}

fn join_ids(ids: &[impl ToString]) -> String {
    ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}
