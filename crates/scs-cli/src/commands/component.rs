use super::{colorize_status, emit, json_pretty, parse_id, EXIT_SUCCESS};
use clap::Subcommand;
use scs_core::{ComponentOutcome, Manager};
use scs_schema::ComponentId;

#[derive(Debug, Subcommand)]
pub enum ComponentCommand {
    List,
    /// Remove the backing resource and drop the component from its stacks.
    Delete { id: String },
}

pub fn run(manager: &Manager, command: ComponentCommand, json: bool) -> Result<u8, String> {
    match command {
        ComponentCommand::List => {
            let components = manager.list_components().map_err(|e| e.to_string())?;
            if json {
                println!("{}", json_pretty(&components)?);
            } else if components.is_empty() {
                println!("no components found");
            } else {
                println!("{:<6} {:<14} {:<24} {:<14} OWNER", "ID", "BUNDLE", "NAME", "STATUS");
                for c in &components {
                    println!(
                        "{:<6} {:<14} {:<24} {:<14} {}",
                        c.id.get(),
                        c.bundle.as_str(),
                        c.machine_name.as_str(),
                        colorize_status(&c.status.to_string()),
                        c.owner
                    );
                }
            }
            Ok(EXIT_SUCCESS)
        }
        ComponentCommand::Delete { id } => {
            let id: ComponentId = parse_id("component", &id)?;
            let result = manager.delete_component(id);
            emit(
                &result,
                json,
                None,
                |_| {},
                |partial: &Option<ComponentOutcome>| {
                    if let Some(outcome) = partial {
                        println!(
                            "component {} left as {}",
                            outcome.component.id,
                            colorize_status(&outcome.component.status.to_string())
                        );
                    }
                },
            )
        }
    }
}
