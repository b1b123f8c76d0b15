use crate::backend::{ContainerBackend, ContainerSpec, ContainerState, MountSource};
use crate::http::HttpClient;
use crate::BackendError;
use scs_schema::{ContainerId, VolumeName};
use serde_json::{json, Value};
use tracing::info;

/// Docker Engine API client, talking to the daemon (or a management proxy in
/// front of it) over HTTP.
pub struct DockerApiBackend {
    client: HttpClient,
}

impl DockerApiBackend {
    pub fn new(url: &str, token: Option<String>) -> Self {
        Self {
            client: HttpClient::new(url, token),
        }
    }

    pub(crate) fn create_body(spec: &ContainerSpec) -> Value {
        let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let mounts: Vec<Value> = spec
            .mounts
            .iter()
            .map(|m| {
                let (kind, source) = match &m.source {
                    MountSource::Volume(name) => ("volume", name.to_string()),
                    MountSource::Bind(path) => ("bind", path.to_string_lossy().into_owned()),
                };
                json!({
                    "Type": kind,
                    "Source": source,
                    "Target": m.target,
                    "ReadOnly": m.read_only,
                })
            })
            .collect();
        let mut host_config = json!({ "Mounts": mounts });
        if let Some(network) = &spec.network {
            host_config["NetworkMode"] = json!(network);
        }
        let mut body = json!({
            "Image": spec.image,
            "Env": env,
            "Labels": spec.labels,
            "HostConfig": host_config,
        });
        if !spec.command.is_empty() {
            body["Cmd"] = json!(spec.command);
        }
        body
    }
}

impl ContainerBackend for DockerApiBackend {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerId, BackendError> {
        let operation = format!("create container {}", spec.name);
        let resp = self.client.send_ok(
            "POST",
            &format!("/containers/create?name={}", spec.name),
            Some(&Self::create_body(spec)),
            &operation,
        )?;
        let value = HttpClient::parse_json(&operation, &resp)?;
        let id = value["Id"]
            .as_str()
            .ok_or_else(|| BackendError::InvalidResponse {
                operation: operation.clone(),
                detail: format!("missing Id in {}", resp.body.trim()),
            })?;
        info!("created container {} ({id})", spec.name);
        Ok(ContainerId::new(id))
    }

    fn start_container(&self, id: &ContainerId) -> Result<(), BackendError> {
        self.client.send_ok(
            "POST",
            &format!("/containers/{id}/start"),
            None,
            &format!("start container {id}"),
        )?;
        Ok(())
    }

    fn inspect_container(&self, id: &ContainerId) -> Result<Option<ContainerState>, BackendError> {
        let operation = format!("inspect container {id}");
        let resp = self
            .client
            .send("GET", &format!("/containers/{id}/json"), None, &operation)?;
        if resp.status == 404 {
            return Ok(None);
        }
        if !resp.is_success() {
            return Err(BackendError::request(
                operation,
                format!("HTTP {}: {}", resp.status, resp.body.trim()),
            ));
        }
        let value = HttpClient::parse_json(&operation, &resp)?;
        let state = &value["State"];
        let running = state["Running"].as_bool().unwrap_or(false);
        let status = state["Status"].as_str().unwrap_or("unknown").to_owned();
        let exit_code = if running || status == "created" {
            None
        } else {
            state["ExitCode"].as_i64()
        };
        Ok(Some(ContainerState {
            id: ContainerId::new(value["Id"].as_str().unwrap_or(id.as_str())),
            running,
            exit_code,
            status,
        }))
    }

    fn remove_container(&self, id: &ContainerId) -> Result<(), BackendError> {
        let operation = format!("remove container {id}");
        let resp = self.client.send(
            "DELETE",
            &format!("/containers/{id}?force=true"),
            None,
            &operation,
        )?;
        match resp.status {
            404 => Ok(()),
            s if (200..300).contains(&s) => Ok(()),
            s => Err(BackendError::request(
                operation,
                format!("HTTP {s}: {}", resp.body.trim()),
            )),
        }
    }

    fn volume_exists(&self, name: &VolumeName) -> Result<bool, BackendError> {
        let operation = format!("inspect volume {name}");
        let resp = self
            .client
            .send("GET", &format!("/volumes/{name}"), None, &operation)?;
        match resp.status {
            404 => Ok(false),
            s if (200..300).contains(&s) => Ok(true),
            s => Err(BackendError::request(
                operation,
                format!("HTTP {s}: {}", resp.body.trim()),
            )),
        }
    }

    fn create_volume(&self, name: &VolumeName) -> Result<(), BackendError> {
        self.client.send_ok(
            "POST",
            "/volumes/create",
            Some(&json!({ "Name": name.as_str() })),
            &format!("create volume {name}"),
        )?;
        info!("created volume {name}");
        Ok(())
    }

    fn remove_volume(&self, name: &VolumeName) -> Result<(), BackendError> {
        let operation = format!("remove volume {name}");
        let resp = self
            .client
            .send("DELETE", &format!("/volumes/{name}"), None, &operation)?;
        match resp.status {
            404 => Ok(()),
            s if (200..300).contains(&s) => Ok(()),
            s => Err(BackendError::request(
                operation,
                format!("HTTP {s}: {}", resp.body.trim()),
            )),
        }
    }
}
