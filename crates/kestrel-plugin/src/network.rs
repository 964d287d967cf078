//! Outbound HTTP for the `networkRequest` capability.

use std::collections::HashMap;
use std::io::Read;
use std::sync::OnceLock;
use std::time::Duration;

use kestrel_core::Value;

use crate::types::{PluginError, PluginResult};

/// A request built from a script argument.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkRequest {
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl NetworkRequest {
    /// A plain GET.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Parse a script argument: either a URL string or
    /// `{url, method?, headers?, body?}`.
    ///
    /// Only `http` and `https` URLs are accepted.
    pub fn from_value(value: &Value) -> Option<Self> {
        let request = match value {
            Value::String(url) => Self::get(url.trim()),
            Value::Object(obj) => {
                let url = obj.get("url")?.as_str()?.trim();
                let method = obj
                    .get("method")
                    .and_then(Value::as_str)
                    .map(|m| m.trim().to_ascii_uppercase())
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "GET".to_string());
                let mut headers: Vec<(String, String)> = obj
                    .get("headers")
                    .and_then(Value::as_object)
                    .map(|h| {
                        h.iter()
                            .filter_map(|(k, v)| Some((k.clone(), header_value(v)?)))
                            .collect()
                    })
                    .unwrap_or_default();
                headers.sort();
                let body = obj.get("body").and_then(|b| match b {
                    Value::String(s) => Some(s.clone()),
                    Value::Null => None,
                    other => serde_json::to_string(other).ok(),
                });
                Self {
                    url: url.to_string(),
                    method,
                    headers,
                    body,
                }
            }
            _ => return None,
        };

        let scheme_ok = ["http://", "https://"].iter().any(|scheme| {
            request.url.len() > scheme.len()
                && request
                    .url
                    .get(..scheme.len())
                    .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
        });
        scheme_ok.then_some(request)
    }
}

fn header_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Float(f) => Some(f.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Response handed back to the script.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkResponse {
    pub status: u16,
    pub body: String,
    pub headers: HashMap<String, String>,
}

impl NetworkResponse {
    /// `{status, body, headers}` as a script value.
    pub fn to_value(&self) -> Value {
        let headers: HashMap<String, Value> = self
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
            .collect();
        let mut obj = HashMap::new();
        obj.insert("status".to_string(), Value::from(self.status));
        obj.insert("body".to_string(), Value::from(self.body.as_str()));
        obj.insert("headers".to_string(), Value::Object(headers));
        Value::Object(obj)
    }
}

/// Transport behind `networkRequest`.
pub trait NetworkClient: Send + Sync {
    fn request(&self, request: &NetworkRequest) -> PluginResult<NetworkResponse>;
}

/// Default cap on a response body, in bytes.
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Blocking HTTP client backed by reqwest.
///
/// The underlying client is built on first use. Response bodies larger than
/// [`max_body_size`](Self::max_body_size) fail the request.
///
/// reqwest's blocking client panics when driven from inside an async
/// runtime, so requests must come from a plain thread, never a tokio task.
#[derive(Debug)]
pub struct HttpClient {
    timeout: Duration,
    user_agent: String,
    max_body_size: usize,
    client: OnceLock<reqwest::blocking::Client>,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            user_agent: format!("kestrel-plugin/{}", env!("CARGO_PKG_VERSION")),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            client: OnceLock::new(),
        }
    }

    /// Cap response bodies at `bytes`.
    pub fn with_max_body_size(mut self, bytes: usize) -> Self {
        self.max_body_size = bytes;
        self
    }

    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    fn client(&self) -> PluginResult<&reqwest::blocking::Client> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent.clone())
            .build()
            .map_err(|e| PluginError::engine("network", format!("failed to create HTTP client: {e}")))?;
        Ok(self.client.get_or_init(|| client))
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl NetworkClient for HttpClient {
    fn request(&self, request: &NetworkRequest) -> PluginResult<NetworkResponse> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| PluginError::engine("network", format!("invalid method: {e}")))?;

        let mut builder = self.client()?.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .map_err(|e| PluginError::engine("network", format!("request failed: {e}")))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect();
        if response
            .content_length()
            .is_some_and(|len| len > self.max_body_size as u64)
        {
            return Err(body_too_large(self.max_body_size));
        }
        let body = read_capped(response, self.max_body_size)?;

        Ok(NetworkResponse {
            status,
            body,
            headers,
        })
    }
}

/// Read at most `limit` bytes, failing if the source holds more.
fn read_capped(reader: impl Read, limit: usize) -> PluginResult<String> {
    let mut buf = Vec::new();
    reader
        .take(limit as u64 + 1)
        .read_to_end(&mut buf)
        .map_err(|e| PluginError::engine("network", format!("failed to read body: {e}")))?;
    if buf.len() > limit {
        return Err(body_too_large(limit));
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn body_too_large(limit: usize) -> PluginError {
    PluginError::engine("network", format!("response body exceeds {limit} bytes"))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_request_from_url_string() {
        let request = NetworkRequest::from_value(&Value::from("https://example.com/api")).unwrap();
        assert_eq!(request, NetworkRequest::get("https://example.com/api"));
    }

    #[test]
    fn test_request_from_object() {
        let mut headers = HashMap::new();
        headers.insert("Accept".to_string(), Value::from("application/json"));
        let mut obj = HashMap::new();
        obj.insert("url".to_string(), Value::from("http://localhost:8080/x"));
        obj.insert("method".to_string(), Value::from("post"));
        obj.insert("headers".to_string(), Value::Object(headers));
        obj.insert("body".to_string(), Value::from("{}"));

        let request = NetworkRequest::from_value(&Value::Object(obj)).unwrap();
        assert_eq!(request.method, "POST");
        assert_eq!(
            request.headers,
            vec![("Accept".to_string(), "application/json".to_string())]
        );
        assert_eq!(request.body.as_deref(), Some("{}"));
    }

    #[test]
    fn test_rejects_other_schemes() {
        assert!(NetworkRequest::from_value(&Value::from("file:///etc/passwd")).is_none());
        assert!(NetworkRequest::from_value(&Value::from("ftp://example.com")).is_none());
        assert!(NetworkRequest::from_value(&Value::from("https://")).is_none());
        assert!(NetworkRequest::from_value(&Value::Integer(1)).is_none());
    }

    #[test]
    fn test_response_to_value() {
        let response = NetworkResponse {
            status: 200,
            body: "ok".into(),
            headers: HashMap::from([("content-type".to_string(), "text/plain".to_string())]),
        };
        let value = response.to_value();
        assert_eq!(value.get("status"), Some(&Value::Integer(200)));
        assert_eq!(value.get("body").and_then(Value::as_str), Some("ok"));
        assert_eq!(
            value
                .get("headers")
                .and_then(|h| h.get("content-type"))
                .and_then(Value::as_str),
            Some("text/plain")
        );
    }

    #[test]
    fn test_http_client_user_agent() {
        let client = HttpClient::default();
        assert!(client.user_agent().starts_with("kestrel-plugin/"));
        assert_eq!(client.max_body_size(), DEFAULT_MAX_BODY_SIZE);
        assert_eq!(client.with_max_body_size(64).max_body_size(), 64);
    }

    #[test]
    fn test_body_is_capped() {
        assert_eq!(read_capped(Cursor::new(b"hello".to_vec()), 5).unwrap(), "hello");
        assert_eq!(read_capped(Cursor::new(Vec::new()), 0).unwrap(), "");

        let err = read_capped(Cursor::new(vec![b'x'; 6]), 5).unwrap_err();
        assert!(err.to_string().contains("exceeds 5 bytes"), "{err}");
    }
}
