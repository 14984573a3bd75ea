//! Blocking HTTP client for object-store export.
//!
//! The archive deliver stage uses PUT/GET/POST against an object-store
//! endpoint. Requests go through a `ureq` agent with a global timeout;
//! non-2xx statuses come back as ordinary responses so callers can read
//! the outcome, and this is deliberately not a REST framework: one
//! request, one response.

use std::io::Read;
use std::time::Duration;
use tracing::debug;
use ureq::Agent;
use vault_core::NetworkError;

const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// A received HTTP response.
#[derive(Debug)]
pub struct HttpResponse {
    /// Status code from the response line
    pub status: u16,
    /// Header pairs in arrival order, names lowercased
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// First header with the given (lowercase) name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Blocking HTTP client bound to one endpoint.
pub struct HttpClient {
    base_url: String,
    agent: Agent,
}

impl HttpClient {
    /// Client for `host:port`.
    pub fn new(host: &str, port: u16) -> Self {
        let config = Agent::config_builder()
            .timeout_global(Some(IO_TIMEOUT))
            // a 404 from the store is an answer, not a transport failure
            .http_status_as_error(false)
            .build();
        HttpClient {
            base_url: format!("http://{host}:{port}"),
            agent: Agent::new_with_config(config),
        }
    }

    /// Issue a GET.
    pub fn get(&self, path: &str) -> Result<HttpResponse, NetworkError> {
        let url = format!("{}{path}", self.base_url);
        let response = self.agent.get(&url).call().map_err(|e| wire_error(&url, e))?;
        debug!(%url, "http GET sent");
        convert(response)
    }

    /// Issue a PUT with a body.
    pub fn put(&self, path: &str, body: &[u8]) -> Result<HttpResponse, NetworkError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .agent
            .put(&url)
            .send(body)
            .map_err(|e| wire_error(&url, e))?;
        debug!(%url, body_len = body.len(), "http PUT sent");
        convert(response)
    }

    /// Issue a POST with a body.
    pub fn post(&self, path: &str, body: &[u8]) -> Result<HttpResponse, NetworkError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .agent
            .post(&url)
            .send(body)
            .map_err(|e| wire_error(&url, e))?;
        debug!(%url, body_len = body.len(), "http POST sent");
        convert(response)
    }
}

fn wire_error(url: &str, error: ureq::Error) -> NetworkError {
    let msg = error.to_string();
    if msg.contains("timed out") || msg.contains("Timeout") {
        NetworkError::Timeout(1)
    } else {
        NetworkError::Connect {
            endpoint: url.to_string(),
            reason: msg,
        }
    }
}

fn convert(response: ureq::http::Response<ureq::Body>) -> Result<HttpResponse, NetworkError> {
    let status = response.status().as_u16();
    let headers: Vec<(String, String)> = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_ascii_lowercase(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();

    let mut body = Vec::new();
    response
        .into_body()
        .into_reader()
        .read_to_end(&mut body)?;

    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}
