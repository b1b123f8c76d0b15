mod commands;

use clap::{Parser, Subcommand};
use commands::{EXIT_CONFIG_ERROR, EXIT_FAILURE, EXIT_STORE_ERROR};
use scs_core::Manager;
use scs_schema::{ScsConfig, CONFIG_ENV, DEFAULT_CONFIG_PATH};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;

#[derive(Debug, Parser)]
#[command(
    name = "scs",
    version,
    about = "Lifecycle orchestration and snapshot restore for research-data service stacks"
)]
struct Cli {
    /// Service configuration file.
    #[arg(long, env = CONFIG_ENV, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create, delete and list stacks.
    Stack {
        #[command(subcommand)]
        command: commands::stack::StackCommand,
    },
    /// List or delete individual components.
    Component {
        #[command(subcommand)]
        command: commands::component::ComponentCommand,
    },
    /// Register, verify and restore snapshots.
    Snapshot {
        #[command(subcommand)]
        command: commands::snapshot::SnapshotCommand,
    },
    /// Report whether a started volume restore has finished.
    RestoreStatus {
        /// Restore handle file or the run directory holding it.
        handle: PathBuf,
    },
    /// Show the progress record of an operation, or list all of them.
    Progress { operation: Option<String> },
    /// Re-verify the checksums of every stored record.
    VerifyStore,
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("SCS_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let result = open_manager(&cli.config).and_then(|manager| {
        let json = cli.json;
        match cli.command {
            Commands::Stack { command } => commands::stack::run(&manager, command, json),
            Commands::Component { command } => commands::component::run(&manager, command, json),
            Commands::Snapshot { command } => commands::snapshot::run(&manager, command, json),
            Commands::RestoreStatus { handle } => {
                commands::restore_status::run(&manager, &handle, json)
            }
            Commands::Progress { operation } => commands::progress::run(&manager, operation.as_deref(), json),
            Commands::VerifyStore => commands::verify_store::run(&manager, json),
        }
    });

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("config error:") || msg.starts_with("missing configuration:") {
                EXIT_CONFIG_ERROR
            } else if msg.starts_with("store error:") {
                EXIT_STORE_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}

fn open_manager(path: &std::path::Path) -> Result<Manager, String> {
    debug!("loading configuration from {}", path.display());
    let config = ScsConfig::load(path).map_err(|e| format!("config error: {e}"))?;
    Manager::open(config).map_err(|e| e.to_string())
}
