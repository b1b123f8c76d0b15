use crate::{redact, BackendError};
use std::io::Read;
use tracing::debug;

/// Minimal JSON-over-HTTP client shared by the REST backends.
///
/// 4xx/5xx responses become errors carrying the status and the response
/// body, with the bearer token redacted.
pub struct HttpClient {
    base_url: String,
    token: Option<String>,
    agent: ureq::Agent,
}

/// Response of a request whose non-success statuses the caller interprets.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl HttpClient {
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build();
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            token,
            agent: config.into(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn auth(&self) -> Option<String> {
        self.token.as_ref().map(|t| format!("Bearer {t}"))
    }

    fn scrub(&self, text: &str) -> String {
        redact(text, &[self.token.as_deref().unwrap_or_default()])
    }

    fn read(&self, operation: &str, resp: ureq::http::Response<ureq::Body>) -> Result<HttpResponse, BackendError> {
        let status = resp.status().as_u16();
        let mut body = String::new();
        resp.into_body()
            .into_reader()
            .read_to_string(&mut body)
            .map_err(|e| BackendError::request(operation, self.scrub(&e.to_string())))?;
        Ok(HttpResponse { status, body })
    }

    fn transport(&self, operation: &str, err: &ureq::Error) -> BackendError {
        BackendError::request(operation, self.scrub(&err.to_string()))
    }

    /// Send a request and return whatever status came back.
    pub fn send(
        &self,
        method: &str,
        path: &str,
        body: Option<&serde_json::Value>,
        operation: &str,
    ) -> Result<HttpResponse, BackendError> {
        let url = self.url(path);
        debug!("{method} {url}");
        let auth = self.auth();
        let result = match (method, body) {
            ("GET", _) => {
                let mut req = self.agent.get(&url);
                if let Some(ref a) = auth {
                    req = req.header("Authorization", a);
                }
                req.call()
            }
            ("DELETE", _) => {
                let mut req = self.agent.delete(&url);
                if let Some(ref a) = auth {
                    req = req.header("Authorization", a);
                }
                req.call()
            }
            (_, body) => {
                let mut req = if method == "PUT" {
                    self.agent.put(&url)
                } else {
                    self.agent.post(&url)
                };
                if let Some(ref a) = auth {
                    req = req.header("Authorization", a);
                }
                match body {
                    Some(json) => {
                        let bytes = serde_json::to_vec(json).map_err(|e| {
                            BackendError::request(operation, format!("encode body: {e}"))
                        })?;
                        req.header("Content-Type", "application/json")
                            .send(bytes.as_slice())
                    }
                    None => req.send_empty(),
                }
            }
        };
        let resp = result.map_err(|e| self.transport(operation, &e))?;
        self.read(operation, resp)
    }

    /// Like [`send`](Self::send), but any non-2xx status is an error.
    pub fn send_ok(
        &self,
        method: &str,
        path: &str,
        body: Option<&serde_json::Value>,
        operation: &str,
    ) -> Result<HttpResponse, BackendError> {
        let resp = self.send(method, path, body, operation)?;
        if resp.is_success() {
            Ok(resp)
        } else {
            Err(BackendError::request(
                operation,
                self.scrub(&format!("HTTP {}: {}", resp.status, resp.body.trim())),
            ))
        }
    }

    pub fn parse_json(operation: &str, resp: &HttpResponse) -> Result<serde_json::Value, BackendError> {
        serde_json::from_str(&resp.body).map_err(|e| BackendError::InvalidResponse {
            operation: operation.to_owned(),
            detail: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tiny_http::{Header, Response, Server};

    /// Serve canned responses and record the requests seen.
    fn serve(
        status: u16,
        body: &'static str,
    ) -> (String, Arc<Mutex<Vec<(String, String, Option<String>)>>>) {
        let server = Server::http("127.0.0.1:0").unwrap();
        let port = server.server_addr().to_ip().unwrap().port();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        std::thread::spawn(move || {
            for request in server.incoming_requests() {
                let auth = request
                    .headers()
                    .iter()
                    .find(|h| h.field.equiv("Authorization"))
                    .map(|h| h.value.to_string());
                log.lock().unwrap().push((
                    request.method().to_string(),
                    request.url().to_owned(),
                    auth,
                ));
                let header = Header::from_bytes("Content-Type", "application/json").unwrap();
                let _ = request.respond(
                    Response::from_string(body)
                        .with_status_code(status)
                        .with_header(header),
                );
            }
        });
        (format!("http://127.0.0.1:{port}"), seen)
    }

    #[test]
    fn sends_bearer_token() {
        let (url, seen) = serve(200, r#"{"ok": true}"#);
        let client = HttpClient::new(&url, Some("tok".to_owned()));
        let resp = client.send_ok("GET", "/ping", None, "ping").unwrap();
        assert_eq!(HttpClient::parse_json("ping", &resp).unwrap()["ok"], true);
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].0, "GET");
        assert_eq!(seen[0].1, "/ping");
        assert_eq!(seen[0].2.as_deref(), Some("Bearer tok"));
    }

    #[test]
    fn error_status_keeps_body_and_redacts_token() {
        let (url, _seen) = serve(500, "boom: token tok rejected");
        let client = HttpClient::new(&url, Some("tok".to_owned()));
        let err = client
            .send_ok("POST", "/x", Some(&serde_json::json!({"a": 1})), "create x")
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("HTTP 500"));
        assert!(msg.contains("boom"));
        assert!(!msg.contains(" tok "));
    }

    #[test]
    fn not_found_is_returned_not_raised() {
        let (url, _seen) = serve(404, "{}");
        let client = HttpClient::new(&url, None);
        let resp = client.send("GET", "/missing", None, "probe").unwrap();
        assert_eq!(resp.status, 404);
        assert!(!resp.is_success());
    }

    #[test]
    fn connection_refused_is_request_error() {
        let client = HttpClient::new("http://127.0.0.1:1", None);
        assert!(matches!(
            client.send("GET", "/", None, "probe"),
            Err(BackendError::Request { .. })
        ));
    }
}
