pub mod component;
pub mod progress;
pub mod restore_status;
pub mod snapshot;
pub mod stack;
pub mod verify_store;

use indicatif::{ProgressBar, ProgressStyle};
use scs_core::{ScsError, ScsResult};
use serde::Serialize;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;

pub fn json_pretty(value: &impl Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        style("{spinner:.cyan} {msg}")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(style("{msg}"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(style("{msg}"));
    pb.finish_with_message(format!("✗ {msg}"));
}

/// Spinner for human output only; JSON output stays clean.
pub fn maybe_spinner(json: bool, msg: &str) -> Option<ProgressBar> {
    (!json).then(|| spinner(msg))
}

pub fn colorize_status(status: &str) -> String {
    use console::Style;
    match status {
        "running" | "completed" => Style::new().green().apply_to(status).to_string(),
        "provisioning" => Style::new().cyan().bold().apply_to(status).to_string(),
        "pending" => Style::new().yellow().apply_to(status).to_string(),
        "failed" => Style::new().red().bold().apply_to(status).to_string(),
        "deleting" => Style::new().dim().apply_to(status).to_string(),
        other => other.to_owned(),
    }
}

pub fn exit_code_for(error: &ScsError) -> u8 {
    match error {
        ScsError::MissingConfiguration(_) | ScsError::BackendUnavailable(_) => EXIT_CONFIG_ERROR,
        ScsError::Store(_) => EXIT_STORE_ERROR,
        _ => EXIT_FAILURE,
    }
}

pub fn parse_id<T: std::str::FromStr>(kind: &str, raw: &str) -> Result<T, String> {
    raw.parse()
        .map_err(|_| format!("invalid {kind} id '{raw}'"))
}

/// Print an orchestration result and pick the exit code.
///
/// JSON mode prints the whole envelope, partial progress included. Human
/// mode prints the message and hands the payload to `show`, or the partial
/// progress to `show_partial` on failure.
pub fn emit<T: Serialize, P: Serialize>(
    result: &ScsResult<T, P>,
    json: bool,
    pb: Option<&ProgressBar>,
    show: impl FnOnce(&T),
    show_partial: impl FnOnce(&P),
) -> Result<u8, String> {
    if json {
        if let Some(pb) = pb {
            pb.finish_and_clear();
        }
        println!("{}", json_pretty(result)?);
        return Ok(result.error().map_or(EXIT_SUCCESS, exit_code_for));
    }
    match result {
        ScsResult::Success { data, message } => {
            match pb {
                Some(pb) => spin_ok(pb, message),
                None => println!("{message}"),
            }
            show(data);
            Ok(EXIT_SUCCESS)
        }
        ScsResult::Failure {
            error,
            message,
            partial,
        } => {
            if let Some(pb) = pb {
                spin_fail(pb, message);
            }
            if let Some(partial) = partial {
                show_partial(partial);
            }
            eprintln!("error: {message}");
            Ok(exit_code_for(error))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_pretty_serializes_object() {
        let val = serde_json::json!({"key": "value"});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"key\""));
        assert!(result.contains("\"value\""));
    }

    #[test]
    fn colorize_status_keeps_text() {
        for status in ["pending", "provisioning", "running", "failed", "deleting", "completed"] {
            assert!(colorize_status(status).contains(status));
        }
        assert_eq!(colorize_status("unknown"), "unknown");
    }

    #[test]
    fn exit_codes_are_distinct() {
        assert_ne!(EXIT_SUCCESS, EXIT_FAILURE);
        assert_ne!(EXIT_FAILURE, EXIT_CONFIG_ERROR);
        assert_ne!(EXIT_CONFIG_ERROR, EXIT_STORE_ERROR);
    }

    #[test]
    fn errors_map_to_exit_codes() {
        assert_eq!(
            exit_code_for(&ScsError::MissingConfiguration("[sql] section".to_owned())),
            EXIT_CONFIG_ERROR
        );
        assert_eq!(exit_code_for(&ScsError::Store("disk full".to_owned())), EXIT_STORE_ERROR);
        assert_eq!(
            exit_code_for(&ScsError::StackNotFound("4".to_owned())),
            EXIT_FAILURE
        );
    }

    #[test]
    fn parse_id_reports_kind() {
        let id: scs_schema::StackId = parse_id("stack", " 12 ").unwrap();
        assert_eq!(id.get(), 12);
        let err = parse_id::<scs_schema::StackId>("stack", "twelve").unwrap_err();
        assert_eq!(err, "invalid stack id 'twelve'");
    }

    #[test]
    fn failed_result_exits_nonzero_in_json_mode() {
        let result: ScsResult<u32> = ScsResult::failure(ScsError::Store("locked".to_owned()));
        let code = emit(&result, true, None, |_| {}, |_| {}).unwrap();
        assert_eq!(code, EXIT_STORE_ERROR);
    }

    #[test]
    fn spinner_finishes() {
        let pb = spinner("testing...");
        spin_ok(&pb, "done");
        assert!(pb.is_finished());
        let pb = spinner("testing...");
        spin_fail(&pb, "failed");
        assert!(pb.is_finished());
    }
}
