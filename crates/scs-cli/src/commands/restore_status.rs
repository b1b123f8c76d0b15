use super::emit;
use scs_core::{Manager, RestoreState};
use std::path::Path;

pub fn run(manager: &Manager, handle: &Path, json: bool) -> Result<u8, String> {
    let result = manager.restore_status(handle);
    emit(&result, json, None, print_state, print_state)
}

fn print_state(state: &RestoreState) {
    match state {
        RestoreState::Running => println!("  state: running"),
        RestoreState::Completed { finished_at } => println!("  state: completed at {finished_at}"),
    }
}
