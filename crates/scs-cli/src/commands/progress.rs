use super::{colorize_status, json_pretty, EXIT_SUCCESS};
use scs_core::Manager;

pub fn run(manager: &Manager, operation: Option<&str>, json: bool) -> Result<u8, String> {
    let Some(operation) = operation else {
        let reports = manager.list_progress().map_err(|e| e.to_string())?;
        if json {
            println!("{}", json_pretty(&reports)?);
        } else if reports.is_empty() {
            println!("no operations recorded");
        } else {
            println!("{:<38} {:<10} {:>4}  LABEL", "OPERATION", "STATUS", "%");
            for r in &reports {
                println!(
                    "{:<38} {:<10} {:>4}  {}",
                    r.id,
                    colorize_status(&r.status.to_string()),
                    r.percentage,
                    r.label
                );
            }
        }
        return Ok(EXIT_SUCCESS);
    };

    let report = manager.progress(operation).map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&report)?);
        return Ok(EXIT_SUCCESS);
    }
    println!(
        "{}: {} ({}%)",
        report.label,
        colorize_status(&report.status.to_string()),
        report.percentage
    );
    if let Some(step) = &report.current_step {
        println!("  current step: {step}");
    }
    for log in &report.logs {
        println!("  {} {}", log.timestamp, log.message);
    }
    Ok(EXIT_SUCCESS)
}
