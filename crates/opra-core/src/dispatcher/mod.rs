//! Request dispatcher.
//!
//! Resolves per-service endpoints and credentials from configuration, applies
//! the configured authentication, sends the request and captures the response
//! with its timing. Every exchange is logged on the caller's reporter handle:
//! the request before sending, a status/latency step after receiving, and the
//! full response when `log_response` is enabled.

mod auth;
mod request;

pub use auth::{ApiKeySettings, AuthKind, OAuthClient, TokenStore};
pub use request::{
    ApiKeyLocation, Auth, HttpMethod, RequestPlan, RequestSummary, ResponseRecord,
    ResponseSummary,
};

use crate::config::{ConfigKey, ConfigRegistry};
use crate::error::{HarnessError, Result};
use crate::reporter::ReporterHandle;
use crate::service::Service;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Username sent by the invalid-token helper.
pub const INVALID_USERNAME: &str = "Test";
/// Password sent by the invalid-token helper.
pub const INVALID_PASSWORD: &str = "Test12";
/// Header injected by the invalid-header helper.
pub const INVALID_HEADER: (&str, &str) = ("X-Custom-Invalid-Header", "unexpectedValue");
/// Content type injected by the invalid-header helper.
pub const INVALID_CONTENT_TYPE: &str = "application/unknown";

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Base URL, credentials and default headers of one service.
#[derive(Clone, PartialEq, Eq)]
pub struct ServiceProfile {
    pub service: Service,
    pub base_url: String,
    pub username: String,
    password: String,
    pub default_headers: Vec<(String, String)>,
}

impl std::fmt::Debug for ServiceProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceProfile")
            .field("service", &self.service)
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("default_headers", &self.default_headers)
            .finish_non_exhaustive()
    }
}

impl ServiceProfile {
    /// Reads `open_<svc>_base_url`, `_username`, `_password` and the optional
    /// `_headers` (`Name: value; Name: value`).
    pub fn from_config(config: &ConfigRegistry, service: Service) -> Result<Self> {
        let default_headers = config
            .get_optional(ConfigKey::Headers(service))
            .map(parse_header_list)
            .unwrap_or_default();
        Ok(Self {
            service,
            base_url: config.get(ConfigKey::BaseUrl(service))?.to_string(),
            username: config.get(ConfigKey::Username(service))?.to_string(),
            password: config.get(ConfigKey::Password(service))?.to_string(),
            default_headers,
        })
    }

    pub fn basic_auth(&self) -> Auth {
        Auth::basic(&self.username, &self.password)
    }

    /// Absolute URL for `path`. Absolute `http(s)` paths are used as given.
    pub fn endpoint(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        match path.trim() {
            "" => base.to_string(),
            p if p.starts_with('/') => format!("{}{}", base, p),
            p => format!("{}/{}", base, p),
        }
    }
}

fn parse_header_list(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once(':')?;
            let name = name.trim();
            (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Sends requests on behalf of case bodies.
pub struct Dispatcher {
    client: reqwest::Client,
    config: Arc<ConfigRegistry>,
    tokens: Arc<TokenStore>,
    oauth: Option<OAuthClient>,
    auth_kind: AuthKind,
    api_key: Option<ApiKeySettings>,
    log_response: bool,
}

impl Dispatcher {
    /// Builds the dispatcher and its HTTP client from configuration.
    pub fn from_config(config: Arc<ConfigRegistry>, tokens: Arc<TokenStore>) -> Result<Self> {
        let auth_kind: AuthKind = config.get(ConfigKey::AuthType)?.parse()?;
        let log_response = config.flag(ConfigKey::LogResponse)?;
        let relaxed_tls = config.optional_flag(ConfigKey::RelaxedTls);
        let timeout_secs = match config.get_optional(ConfigKey::RequestTimeoutSecs) {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                HarnessError::MissingConfig(format!(
                    "request_timeout_secs must be a whole number, got '{}'",
                    raw
                ))
            })?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        let oauth = match auth_kind {
            AuthKind::Bearer => Some(OAuthClient::from_config(&config)?),
            _ => None,
        };
        let api_key = match auth_kind {
            AuthKind::ApiKey => Some(ApiKeySettings::from_config(&config)?),
            _ => None,
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .danger_accept_invalid_certs(relaxed_tls)
            .build()
            .map_err(|e| HarnessError::Transport(format!("cannot build HTTP client: {}", e)))?;

        debug!(?auth_kind, relaxed_tls, timeout_secs, "Dispatcher ready");
        Ok(Self {
            client,
            config,
            tokens,
            oauth,
            auth_kind,
            api_key,
            log_response,
        })
    }

    pub fn auth_kind(&self) -> AuthKind {
        self.auth_kind
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    pub fn profile(&self, service: Service) -> Result<ServiceProfile> {
        ServiceProfile::from_config(&self.config, service)
    }

    /// Plan for `service` with its default headers and the configured auth.
    pub fn plan(&self, service: Service, method: HttpMethod, path: &str) -> Result<RequestPlan> {
        let profile = self.profile(service)?;
        let mut plan = RequestPlan::new(method, profile.endpoint(path));
        for (name, value) in &profile.default_headers {
            plan = plan.header(name, value);
        }
        let auth = match self.auth_kind {
            AuthKind::Basic => profile.basic_auth(),
            AuthKind::Bearer => Auth::CurrentToken,
            AuthKind::ApiKey => match &self.api_key {
                Some(key) => Auth::ApiKey {
                    name: key.name.clone(),
                    value: key.value.clone(),
                    location: key.location,
                },
                None => Auth::None,
            },
        };
        Ok(plan.auth(auth))
    }

    /// Runs the OAuth flow and publishes the token. Returns it if obtained;
    /// a refusal is recorded on the token store.
    pub async fn refresh_token(&self) -> Option<String> {
        let oauth = self.oauth.as_ref()?;
        match oauth.fetch_token(&self.client).await {
            Some(token) => {
                self.tokens.publish(&token);
                Some(token)
            }
            None => {
                self.tokens.mark_failed();
                None
            }
        }
    }

    /// Current token, fetching one when none has been published yet.
    /// After a failed fetch no further request is made for the run.
    async fn current_token(&self) -> Option<String> {
        if let Some(token) = self.tokens.current() {
            return Some(token);
        }
        if self.tokens.has_failed() {
            return None;
        }
        let _guard = self.tokens.refresh_guard().await;
        if let Some(token) = self.tokens.current() {
            return Some(token);
        }
        if self.tokens.has_failed() {
            return None;
        }
        self.refresh_token().await
    }

    /// Sends `plan` and captures the response.
    pub async fn send(
        &self,
        plan: RequestPlan,
        reporter: &mut ReporterHandle,
    ) -> Result<ResponseRecord> {
        reporter.log_request(&plan);

        let mut request = self.client.request(plan.method.into(), &plan.url);
        if !plan.query.is_empty() {
            request = request.query(&plan.query);
        }
        for (name, value) in &plan.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request = match &plan.auth {
            Auth::None => request,
            Auth::Basic { username, password } => request.basic_auth(username, Some(password)),
            Auth::Bearer { token } => request.bearer_auth(token),
            Auth::CurrentToken => match self.current_token().await {
                Some(token) => request.bearer_auth(token),
                None => {
                    error!(url = %plan.url, "No bearer token available; sending without Authorization");
                    reporter.warn("Authentication failed: no bearer token available");
                    request
                }
            },
            Auth::ApiKey {
                name,
                value,
                location,
            } => match location {
                ApiKeyLocation::Header => request.header(name.as_str(), value.as_str()),
                ApiKeyLocation::Query => request.query(&[(name, value)]),
            },
        };
        if let Some(body) = &plan.body {
            request = request.body(body.clone());
        }

        let started = Instant::now();
        let response = request.send().await.map_err(|e| {
            HarnessError::Transport(format!("{} {} failed: {}", plan.method, plan.url, e))
        })?;

        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(|e| {
            HarnessError::Transport(format!("reading body of {} failed: {}", plan.url, e))
        })?;
        let elapsed = started.elapsed();

        let record = ResponseRecord {
            status,
            headers,
            body: body.to_vec(),
            elapsed,
            content_type,
        };

        reporter.info(format!(
            "Received response with status code {} in {} ms",
            record.status,
            record.elapsed_ms()
        ));
        if self.log_response {
            reporter.log_response(&record);
        }
        Ok(record)
    }

    /// Plans and sends a request to `service`.
    pub async fn dispatch(
        &self,
        service: Service,
        method: HttpMethod,
        path: &str,
        body: Option<String>,
        reporter: &mut ReporterHandle,
    ) -> Result<ResponseRecord> {
        let mut plan = self.plan(service, method, path)?;
        if let Some(body) = body {
            if plan.header_value("content-type").is_none() {
                plan = plan.header("Content-Type", "application/json");
            }
            plan = plan.body(body);
        }
        self.send(plan, reporter).await
    }

    pub async fn get(
        &self,
        service: Service,
        path: &str,
        reporter: &mut ReporterHandle,
    ) -> Result<ResponseRecord> {
        self.dispatch(service, HttpMethod::Get, path, None, reporter)
            .await
    }

    pub async fn post(
        &self,
        service: Service,
        path: &str,
        body: impl Into<String>,
        reporter: &mut ReporterHandle,
    ) -> Result<ResponseRecord> {
        self.dispatch(service, HttpMethod::Post, path, Some(body.into()), reporter)
            .await
    }

    pub async fn put(
        &self,
        service: Service,
        path: &str,
        body: impl Into<String>,
        reporter: &mut ReporterHandle,
    ) -> Result<ResponseRecord> {
        self.dispatch(service, HttpMethod::Put, path, Some(body.into()), reporter)
            .await
    }

    pub async fn delete(
        &self,
        service: Service,
        path: &str,
        reporter: &mut ReporterHandle,
    ) -> Result<ResponseRecord> {
        self.dispatch(service, HttpMethod::Delete, path, None, reporter)
            .await
    }

    /// Sends with bogus basic credentials; true iff the service answers 401.
    pub async fn send_with_invalid_token(
        &self,
        service: Service,
        method: HttpMethod,
        path: &str,
        reporter: &mut ReporterHandle,
    ) -> Result<bool> {
        let plan = self
            .plan(service, method, path)?
            .auth(Auth::basic(INVALID_USERNAME, INVALID_PASSWORD));
        let response = self.send(plan, reporter).await?;
        Ok(response.status == 401)
    }

    /// Sends with an unexpected custom header and an unknown content type.
    pub async fn send_with_invalid_header(
        &self,
        service: Service,
        method: HttpMethod,
        path: &str,
        body: Option<String>,
        reporter: &mut ReporterHandle,
    ) -> Result<ResponseRecord> {
        let mut plan = self
            .plan(service, method, path)?
            .header(INVALID_HEADER.0, INVALID_HEADER.1)
            .header("Content-Type", INVALID_CONTENT_TYPE);
        if let Some(body) = body {
            plan = plan.body(body);
        }
        self.send(plan, reporter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(auth_type: &str) -> ConfigRegistry {
        ConfigRegistry::from_pairs([
            ("auth_type", auth_type),
            ("log_response", "yes"),
            ("access_token_url", "http://127.0.0.1:9/token"),
            ("client_id", "id"),
            ("client_secret", "secret"),
            ("scope", "read"),
            ("open_erx_base_url", "https://erx.example.test/api/"),
            ("open_erx_username", "erx-user"),
            ("open_erx_password", "erx-pass"),
            ("open_erx_headers", "Accept: application/xml; X-Tenant: 42"),
            ("open_chart_base_url", "https://chart.example.test"),
            ("open_chart_username", "chart-user"),
            ("open_chart_password", "chart-pass"),
        ])
    }

    fn dispatcher(auth_type: &str) -> Dispatcher {
        Dispatcher::from_config(Arc::new(config(auth_type)), Arc::new(TokenStore::new())).unwrap()
    }

    #[test]
    fn test_endpoint_joining() {
        let profile = ServiceProfile::from_config(&config("basic"), Service::Erx).unwrap();
        assert_eq!(profile.endpoint("drugs"), "https://erx.example.test/api/drugs");
        assert_eq!(profile.endpoint("/drugs?q=1"), "https://erx.example.test/api/drugs?q=1");
        assert_eq!(profile.endpoint(""), "https://erx.example.test/api");
        assert_eq!(profile.endpoint("https://other/x"), "https://other/x");
        assert_eq!(
            profile.default_headers,
            [
                ("Accept".to_string(), "application/xml".to_string()),
                ("X-Tenant".to_string(), "42".to_string())
            ]
        );
    }

    #[test]
    fn test_each_service_uses_its_own_credentials() {
        let d = dispatcher("basic");
        let erx = d.plan(Service::Erx, HttpMethod::Post, "x").unwrap();
        let chart = d.plan(Service::Chart, HttpMethod::Post, "x").unwrap();
        assert_eq!(erx.auth, Auth::basic("erx-user", "erx-pass"));
        assert_eq!(chart.auth, Auth::basic("chart-user", "chart-pass"));
    }

    #[test]
    fn test_unconfigured_service_is_missing_config() {
        let err = dispatcher("basic")
            .plan(Service::Lab, HttpMethod::Get, "x")
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("open_lab_base_url"));
    }

    #[test]
    fn test_bearer_plans_use_current_token() {
        let d = dispatcher("oauth2");
        assert_eq!(d.auth_kind(), AuthKind::Bearer);
        let plan = d.plan(Service::Erx, HttpMethod::Get, "x").unwrap();
        assert_eq!(plan.auth, Auth::CurrentToken);
    }

    #[test]
    fn test_invalid_timeout_rejected() {
        let config = config("basic").with_override(ConfigKey::RequestTimeoutSecs, "soon");
        assert!(Dispatcher::from_config(Arc::new(config), Arc::new(TokenStore::new())).is_err());
    }
}
