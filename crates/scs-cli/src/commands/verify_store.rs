use super::{json_pretty, EXIT_STORE_ERROR, EXIT_SUCCESS};
use scs_core::Manager;

pub fn run(manager: &Manager, json: bool) -> Result<u8, String> {
    let report = manager.verify_store().map_err(|e| e.to_string())?;

    if json {
        println!("{}", json_pretty(&report)?);
    } else {
        println!(
            "store integrity: {}/{} records passed",
            report.passed, report.checked
        );
        for f in &report.failed {
            println!("  FAIL {}: {}", f.key, f.reason);
        }
    }

    if report.is_clean() {
        Ok(EXIT_SUCCESS)
    } else {
        Ok(EXIT_STORE_ERROR)
    }
}
