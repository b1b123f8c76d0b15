use crate::backend::TriplestoreBackend;
use crate::http::HttpClient;
use crate::BackendError;
use serde_json::json;
use tracing::info;

/// GraphDB repository management over its REST API.
pub struct GraphDbBackend {
    client: HttpClient,
}

impl GraphDbBackend {
    pub fn new(url: &str, token: Option<String>) -> Self {
        Self {
            client: HttpClient::new(url, token),
        }
    }
}

impl TriplestoreBackend for GraphDbBackend {
    fn name(&self) -> &'static str {
        "graphdb"
    }

    fn repository_exists(&self, id: &str) -> Result<bool, BackendError> {
        let operation = format!("inspect repository {id}");
        let resp = self
            .client
            .send("GET", &format!("/rest/repositories/{id}"), None, &operation)?;
        match resp.status {
            404 => Ok(false),
            s if (200..300).contains(&s) => Ok(true),
            s => Err(BackendError::request(
                operation,
                format!("HTTP {s}: {}", resp.body.trim()),
            )),
        }
    }

    fn create_repository(&self, id: &str, title: &str) -> Result<(), BackendError> {
        let body = json!({
            "id": id,
            "title": title,
            "type": "graphdb",
            "params": {},
        });
        self.client.send_ok(
            "POST",
            "/rest/repositories",
            Some(&body),
            &format!("create repository {id}"),
        )?;
        info!("created repository {id}");
        Ok(())
    }

    fn delete_repository(&self, id: &str) -> Result<(), BackendError> {
        let operation = format!("delete repository {id}");
        let resp = self
            .client
            .send("DELETE", &format!("/rest/repositories/{id}"), None, &operation)?;
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
