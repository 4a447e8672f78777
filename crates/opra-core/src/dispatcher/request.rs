use crate::error::{HarnessError, Result};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// HTTP methods the dispatcher issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Where an API key travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKeyLocation {
    Header,
    Query,
}

/// Authentication attached to a request.
#[derive(Clone, PartialEq, Eq, Default)]
pub enum Auth {
    #[default]
    None,
    /// Preemptive basic authentication.
    Basic { username: String, password: String },
    /// Explicit bearer token.
    Bearer { token: String },
    /// The run's current OAuth token, resolved when the request is sent.
    CurrentToken,
    ApiKey {
        name: String,
        value: String,
        location: ApiKeyLocation,
    },
}

impl Auth {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Auth::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Auth::Bearer {
            token: token.into(),
        }
    }

    /// Loggable description with secrets masked.
    pub fn describe(&self) -> String {
        match self {
            Auth::None => "none".to_string(),
            Auth::Basic { username, .. } => format!("Basic {}:****", username),
            Auth::Bearer { .. } => "Bearer ****".to_string(),
            Auth::CurrentToken => "Bearer <current token>".to_string(),
            Auth::ApiKey { name, location, .. } => match location {
                ApiKeyLocation::Header => format!("API key header {}", name),
                ApiKeyLocation::Query => format!("API key query parameter {}", name),
            },
        }
    }
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// A request ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestPlan {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Option<String>,
    pub auth: Auth,
}

impl RequestPlan {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
            auth: Auth::None,
        }
    }

    /// Sets a header, replacing any header of the same name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// JSON body with `Content-Type: application/json`.
    pub fn json_body(self, body: &Value) -> Result<Self> {
        let text = serde_json::to_string(body)
            .map_err(|e| HarnessError::Templating(format!("cannot encode request body: {}", e)))?;
        Ok(self.header("Content-Type", "application/json").body(text))
    }

    pub fn auth(mut self, auth: Auth) -> Self {
        self.auth = auth;
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Report form with credentials masked.
    pub fn summary(&self) -> RequestSummary {
        RequestSummary {
            method: self.method,
            url: self.url.clone(),
            headers: self
                .headers
                .iter()
                .map(|(n, v)| (n.clone(), mask_header(n, v)))
                .collect(),
            query: self.query.clone(),
            body: self.body.clone(),
            auth: self.auth.describe(),
        }
    }
}

fn mask_header(name: &str, value: &str) -> String {
    if name.eq_ignore_ascii_case("authorization") || name.to_lowercase().contains("api-key") {
        "****".to_string()
    } else {
        value.to_string()
    }
}

/// Reported form of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestSummary {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Option<String>,
    pub auth: String,
}

/// Captured response of one exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseRecord {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub elapsed: Duration,
    pub content_type: Option<String>,
}

impl ResponseRecord {
    /// A response with the given status and body, as produced by fakes.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
            elapsed: Duration::ZERO,
            content_type: None,
        }
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        if name.eq_ignore_ascii_case("content-type") {
            self.content_type = Some(value.clone());
        }
        self.headers.push((name, value));
        self
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parses the body as JSON.
    pub fn json(&self) -> Result<Value> {
        serde_json::from_slice(&self.body)
            .map_err(|e| HarnessError::Assertion(format!("response body is not JSON: {}", e)))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed.as_millis() as u64
    }

    pub fn summary(&self) -> ResponseSummary {
        ResponseSummary {
            status: self.status,
            headers: self.headers.clone(),
            body: self.body_text(),
            elapsed_ms: self.elapsed_ms(),
            content_type: self.content_type.clone(),
        }
    }
}

/// Reported form of a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseSummary {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub elapsed_ms: u64,
    pub content_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_header_replaces_case_insensitively() {
        let plan = RequestPlan::new(HttpMethod::Post, "http://x")
            .header("content-type", "text/plain")
            .header("Content-Type", "application/unknown");
        assert_eq!(plan.headers.len(), 1);
        assert_eq!(plan.header_value("CONTENT-TYPE"), Some("application/unknown"));
    }

    #[test]
    fn test_summary_masks_credentials() {
        let plan = RequestPlan::new(HttpMethod::Get, "http://x")
            .header("Authorization", "Bearer secret")
            .header("x-api-key", "k")
            .header("Accept", "application/json")
            .auth(Auth::basic("svc", "hunter2"));
        let summary = plan.summary();
        assert_eq!(summary.auth, "Basic svc:****");
        assert!(summary.headers.contains(&("Authorization".into(), "****".into())));
        assert!(summary.headers.contains(&("x-api-key".into(), "****".into())));
        assert!(summary.headers.contains(&("Accept".into(), "application/json".into())));
        assert!(!format!("{:?}", plan).contains("hunter2"));
    }

    #[test]
    fn test_json_body_sets_content_type() {
        let plan = RequestPlan::new(HttpMethod::Put, "http://x")
            .json_body(&json!({"a": 1}))
            .unwrap();
        assert_eq!(plan.body.as_deref(), Some(r#"{"a":1}"#));
        assert_eq!(plan.header_value("content-type"), Some("application/json"));
    }

    #[test]
    fn test_response_accessors() {
        let resp = ResponseRecord::new(200, r#"{"ok": true}"#)
            .with_header("Content-Type", "application/json; charset=utf-8")
            .with_elapsed(Duration::from_millis(1500));
        assert_eq!(resp.json().unwrap(), json!({"ok": true}));
        assert_eq!(resp.content_type.as_deref(), Some("application/json; charset=utf-8"));
        assert_eq!(resp.header("content-type"), resp.content_type.as_deref());
        assert_eq!(resp.elapsed_ms(), 1500);
        assert!(ResponseRecord::new(200, "<xml/>").json().is_err());
    }
}
