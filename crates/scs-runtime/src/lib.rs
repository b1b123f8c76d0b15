//! Backend clients for the services scs provisions.
//!
//! This crate implements the execution layer: the `SqlBackend`,
//! `TriplestoreBackend` and `ContainerBackend` traits, their production
//! implementations (the `mysql` command-line client, the GraphDB REST API and
//! the Docker Engine API over `ureq`), in-memory mocks with failure injection,
//! `BackendSet` selection by configured driver name, and generation of the
//! shell script the restore container runs.

pub mod backend;
pub mod docker;
pub mod graphdb;
pub mod http;
pub mod mock;
pub mod mysql;
pub mod restore_script;

pub use backend::{
    BackendSet, ContainerBackend, ContainerSpec, ContainerState, Mount, MountSource, SqlBackend,
    TriplestoreBackend,
};
pub use docker::DockerApiBackend;
pub use graphdb::GraphDbBackend;
pub use mock::{MockContainerBackend, MockSqlBackend, MockTriplestoreBackend};
pub use mysql::MysqlCliBackend;
pub use restore_script::{
    build_restore_script, shell_quote, RestorePaths, RestoreScript, FAILURE_MARKER, SENTINEL_FILE,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend driver '{0}' is not available")]
    Unavailable(String),
    #[error("{operation} failed: {detail}")]
    Request { operation: String, detail: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unexpected response from {operation}: {detail}")]
    InvalidResponse { operation: String, detail: String },
}

impl BackendError {
    pub fn request(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        BackendError::Request {
            operation: operation.into(),
            detail: detail.into(),
        }
    }
}

/// Replace every occurrence of a secret in backend output before it reaches
/// an error message or a log line.
pub fn redact(text: &str, secrets: &[&str]) -> String {
    secrets
        .iter()
        .filter(|s| !s.is_empty())
        .fold(text.to_owned(), |acc, secret| acc.replace(secret, "***"))
}
