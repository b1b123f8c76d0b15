//! Docker and GraphDB clients against an in-process fake server.

use scs_runtime::{
    ContainerBackend, ContainerSpec, DockerApiBackend, GraphDbBackend, Mount, TriplestoreBackend,
};
use scs_schema::{ContainerId, VolumeName};
use std::collections::HashSet;
use std::io::Read;
use std::sync::{Arc, Mutex};
use tiny_http::{Header, Response, Server};

#[derive(Default)]
struct FakeState {
    containers: HashSet<String>,
    started: HashSet<String>,
    volumes: HashSet<String>,
    repositories: HashSet<String>,
    bodies: Vec<String>,
    auth: Vec<Option<String>>,
}

struct FakeEngine {
    url: String,
    state: Arc<Mutex<FakeState>>,
    server: Arc<Server>,
}

fn json(status: u16, body: &str) -> Response<std::io::Cursor<Vec<u8>>> {
    Response::from_string(body)
        .with_status_code(status)
        .with_header(Header::from_bytes("Content-Type", "application/json").unwrap())
}

fn handle(state: &Mutex<FakeState>, mut request: tiny_http::Request) {
    let mut body = String::new();
    let _ = request.as_reader().read_to_string(&mut body);
    let method = request.method().to_string();
    let url = request.url().to_owned();
    let path = url.split('?').next().unwrap_or_default().to_owned();
    let mut st = state.lock().unwrap();
    st.auth.push(
        request
            .headers()
            .iter()
            .find(|h| h.field.equiv("Authorization"))
            .map(|h| h.value.to_string()),
    );
    if !body.is_empty() {
        st.bodies.push(body.clone());
    }
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    let response = match (method.as_str(), segments.as_slice()) {
        ("POST", ["containers", "create"]) => {
            let name = url.split("name=").nth(1).unwrap_or("anon").to_owned();
            if st.containers.contains(&name) {
                json(409, r#"{"message": "Conflict. name already in use"}"#)
            } else {
                st.containers.insert(name.clone());
                json(201, &format!(r#"{{"Id": "{name}", "Warnings": []}}"#))
            }
        }
        ("POST", ["containers", id, "start"]) => {
            if st.containers.contains(*id) {
                st.started.insert((*id).to_owned());
                json(204, "")
            } else {
                json(404, r#"{"message": "No such container"}"#)
            }
        }
        ("GET", ["containers", id, "json"]) => {
            if st.containers.contains(*id) {
                let running = st.started.contains(*id);
                json(
                    200,
                    &format!(
                        r#"{{"Id": "{id}", "State": {{"Running": {running}, "Status": "{}", "ExitCode": 0}}}}"#,
                        if running { "running" } else { "created" }
                    ),
                )
            } else {
                json(404, r#"{"message": "No such container"}"#)
            }
        }
        ("DELETE", ["containers", id]) => {
            if st.containers.remove(*id) {
                json(204, "")
            } else {
                json(404, r#"{"message": "No such container"}"#)
            }
        }
        ("POST", ["volumes", "create"]) => {
            let v: serde_json::Value = serde_json::from_str(&body).unwrap_or_default();
            let name = v["Name"].as_str().unwrap_or_default().to_owned();
            st.volumes.insert(name.clone());
            json(201, &format!(r#"{{"Name": "{name}"}}"#))
        }
        ("GET", ["volumes", name]) => {
            if st.volumes.contains(*name) {
                json(200, &format!(r#"{{"Name": "{name}"}}"#))
            } else {
                json(404, r#"{"message": "no such volume"}"#)
            }
        }
        ("DELETE", ["volumes", name]) => {
            if st.volumes.remove(*name) {
                json(204, "")
            } else {
                json(404, r#"{"message": "no such volume"}"#)
            }
        }
        ("POST", ["rest", "repositories"]) => {
            let v: serde_json::Value = serde_json::from_str(&body).unwrap_or_default();
            let id = v["id"].as_str().unwrap_or_default().to_owned();
            if st.repositories.insert(id) {
                json(201, "")
            } else {
                json(400, "Repository already exists")
            }
        }
        ("GET", ["rest", "repositories", id]) => {
            if st.repositories.contains(*id) {
                json(200, &format!(r#"{{"id": "{id}"}}"#))
            } else {
                json(404, "")
            }
        }
        ("DELETE", ["rest", "repositories", id]) => {
            if st.repositories.remove(*id) {
                json(200, "")
            } else {
                json(404, "")
            }
        }
        _ => json(500, "unexpected request"),
    };
    drop(st);
    let _ = request.respond(response);
}

impl FakeEngine {
    fn start() -> Self {
        let server = Arc::new(Server::http("127.0.0.1:0").unwrap());
        let port = server.server_addr().to_ip().unwrap().port();
        let state = Arc::new(Mutex::new(FakeState::default()));
        let srv = Arc::clone(&server);
        let st = Arc::clone(&state);
        std::thread::spawn(move || {
            for request in srv.incoming_requests() {
                handle(&st, request);
            }
        });
        Self {
            url: format!("http://127.0.0.1:{port}"),
            state,
            server,
        }
    }
}

impl Drop for FakeEngine {
    fn drop(&mut self) {
        self.server.unblock();
    }
}

#[test]
fn docker_container_lifecycle() {
    let fake = FakeEngine::start();
    let docker = DockerApiBackend::new(&fake.url, Some("secret-token".to_owned()));

    let mut spec = ContainerSpec {
        name: "demo-app".to_owned(),
        image: "wisski:latest".to_owned(),
        ..ContainerSpec::default()
    };
    spec.mounts.push(Mount::volume(
        VolumeName::new("demo-app-data"),
        "/var/www/html",
    ));
    let id = docker.create_container(&spec).unwrap();
    assert_eq!(id.as_str(), "demo-app");

    let state = docker.inspect_container(&id).unwrap().unwrap();
    assert!(!state.running);
    assert_eq!(state.exit_code, None);

    docker.start_container(&id).unwrap();
    assert!(docker.inspect_container(&id).unwrap().unwrap().running);

    let err = docker.create_container(&spec).unwrap_err();
    assert!(err.to_string().contains("409"));

    docker.remove_container(&id).unwrap();
    assert!(!docker.container_exists(&id).unwrap());
    docker.remove_container(&id).unwrap();

    let state = fake.state.lock().unwrap();
    assert!(state.bodies[0].contains("demo-app-data"));
    assert!(state
        .auth
        .iter()
        .all(|a| a.as_deref() == Some("Bearer secret-token")));
}

#[test]
fn docker_start_missing_container_fails() {
    let fake = FakeEngine::start();
    let docker = DockerApiBackend::new(&fake.url, None);
    let err = docker
        .start_container(&ContainerId::new("ghost"))
        .unwrap_err();
    assert!(err.to_string().contains("No such container"));
}

#[test]
fn docker_volumes() {
    let fake = FakeEngine::start();
    let docker = DockerApiBackend::new(&fake.url, None);
    let name = VolumeName::new("demo-files");
    assert!(!docker.volume_exists(&name).unwrap());
    docker.create_volume(&name).unwrap();
    assert!(docker.volume_exists(&name).unwrap());
    docker.remove_volume(&name).unwrap();
    docker.remove_volume(&name).unwrap();
    assert!(!docker.volume_exists(&name).unwrap());
}

#[test]
fn graphdb_repository_lifecycle() {
    let fake = FakeEngine::start();
    let graphdb = GraphDbBackend::new(&format!("{}/", fake.url), None);
    assert!(!graphdb.repository_exists("demo-ts").unwrap());
    graphdb.create_repository("demo-ts", "Demo").unwrap();
    assert!(graphdb.repository_exists("demo-ts").unwrap());

    let err = graphdb.create_repository("demo-ts", "Demo").unwrap_err();
    assert!(err.to_string().contains("already exists"));

    graphdb.delete_repository("demo-ts").unwrap();
    graphdb.delete_repository("demo-ts").unwrap();
    assert!(!graphdb.repository_exists("demo-ts").unwrap());
}
