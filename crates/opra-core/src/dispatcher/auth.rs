use crate::config::{ConfigKey, ConfigRegistry};
use crate::dispatcher::request::ApiKeyLocation;
use crate::error::{HarnessError, Result};
use serde_json::Value;
use std::str::FromStr;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};

/// Authentication scheme configured by `auth_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    /// Per-service username and password.
    Basic,
    /// OAuth2 client-credentials token as `Authorization: Bearer`.
    Bearer,
    /// Static key from `api_key_name`/`api_key_value`.
    ApiKey,
}

impl FromStr for AuthKind {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "basic" => Ok(AuthKind::Basic),
            "bearer" | "oauth2" | "oauth" => Ok(AuthKind::Bearer),
            "apikey" | "api_key" | "api-key" => Ok(AuthKind::ApiKey),
            other => Err(HarnessError::MissingConfig(format!(
                "auth_type must be basic, bearer, oauth2 or apikey, got '{}'",
                other
            ))),
        }
    }
}

/// Static API key settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeySettings {
    pub name: String,
    pub value: String,
    pub location: ApiKeyLocation,
}

impl ApiKeySettings {
    pub fn from_config(config: &ConfigRegistry) -> Result<Self> {
        let location = match config.get_optional(ConfigKey::ApiKeyLocation) {
            None => ApiKeyLocation::Header,
            Some(loc) if loc.eq_ignore_ascii_case("header") => ApiKeyLocation::Header,
            Some(loc) if loc.eq_ignore_ascii_case("query") => ApiKeyLocation::Query,
            Some(other) => {
                return Err(HarnessError::MissingConfig(format!(
                    "api_key_location must be header or query, got '{}'",
                    other
                )));
            }
        };
        Ok(Self {
            name: config.get(ConfigKey::ApiKeyName)?.to_string(),
            value: config.get(ConfigKey::ApiKeyValue)?.to_string(),
            location,
        })
    }
}

/// The run's current bearer token.
///
/// Published by the OAuth flow and read by every dispatch. Refreshes are
/// serialized so concurrent workers trigger at most one token request, and
/// a rejected request is remembered so later dispatches do not repeat it.
#[derive(Debug, Default)]
pub struct TokenStore {
    current: RwLock<Option<String>>,
    failed: AtomicBool,
    refresh: tokio::sync::Mutex<()>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<String> {
        self.current.read().ok().and_then(|t| t.clone())
    }

    pub fn publish(&self, token: impl Into<String>) {
        if let Ok(mut slot) = self.current.write() {
            *slot = Some(token.into());
        }
        self.failed.store(false, Ordering::Release);
    }

    /// Forgets the token and any recorded failure.
    pub fn clear(&self) {
        if let Ok(mut slot) = self.current.write() {
            *slot = None;
        }
        self.failed.store(false, Ordering::Release);
    }

    /// Records that the token endpoint refused to issue a token.
    pub fn mark_failed(&self) {
        self.failed.store(true, Ordering::Release);
    }

    /// Whether a token request failed since the last publish or clear.
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Guard held while a token request is in flight.
    pub(crate) async fn refresh_guard(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.refresh.lock().await
    }
}

/// OAuth2 client-credentials client.
#[derive(Clone, PartialEq, Eq)]
pub struct OAuthClient {
    pub token_url: String,
    pub client_id: String,
    client_secret: String,
    pub scope: String,
}

impl std::fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClient")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl OAuthClient {
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: scope.into(),
        }
    }

    pub fn from_config(config: &ConfigRegistry) -> Result<Self> {
        Ok(Self::new(
            config.get(ConfigKey::AccessTokenUrl)?,
            config.get(ConfigKey::ClientId)?,
            config.get(ConfigKey::ClientSecret)?,
            config.get(ConfigKey::Scope)?,
        ))
    }

    /// Requests a token. Failures are logged and yield `None`.
    pub async fn fetch_token(&self, client: &reqwest::Client) -> Option<String> {
        let response = client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "client_credentials"),
                ("scope", self.scope.as_str()),
            ])
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                error!(url = %self.token_url, error = %e, "Token request failed");
                return None;
            }
        };

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            error!(
                url = %self.token_url,
                status = status.as_u16(),
                "Token endpoint rejected client credentials"
            );
            return None;
        }

        let body: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "Token response is not JSON");
                return None;
            }
        };
        match body.get("access_token").and_then(Value::as_str) {
            Some(token) => {
                info!(client_id = %self.client_id, "Obtained OAuth access token");
                Some(token.to_string())
            }
            None => {
                error!("Token response has no access_token");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_kind_parsing() {
        assert_eq!("Basic".parse::<AuthKind>().unwrap(), AuthKind::Basic);
        assert_eq!("oauth2".parse::<AuthKind>().unwrap(), AuthKind::Bearer);
        assert_eq!("APIKEY".parse::<AuthKind>().unwrap(), AuthKind::ApiKey);
        assert!("digest".parse::<AuthKind>().is_err());
    }

    #[test]
    fn test_api_key_settings() {
        let config = ConfigRegistry::from_pairs([
            ("api_key_name", "x-api-key"),
            ("api_key_value", "k-1"),
            ("api_key_location", "Query"),
        ]);
        let settings = ApiKeySettings::from_config(&config).unwrap();
        assert_eq!(settings.location, ApiKeyLocation::Query);

        let header_default = ConfigRegistry::from_pairs([("api_key_name", "k"), ("api_key_value", "v")]);
        assert_eq!(
            ApiKeySettings::from_config(&header_default).unwrap().location,
            ApiKeyLocation::Header
        );
        assert!(ApiKeySettings::from_config(&ConfigRegistry::default()).is_err());
    }

    #[test]
    fn test_token_store_publish_and_clear() {
        let store = TokenStore::new();
        assert!(store.current().is_none());
        store.publish("tok-1");
        assert_eq!(store.current().as_deref(), Some("tok-1"));
        store.clear();
        assert!(store.current().is_none());
    }

    #[test]
    fn test_token_store_remembers_failure_until_publish() {
        let store = TokenStore::new();
        assert!(!store.has_failed());
        store.mark_failed();
        assert!(store.has_failed());
        store.publish("tok-2");
        assert!(!store.has_failed());
        store.mark_failed();
        store.clear();
        assert!(!store.has_failed());
    }

    #[test]
    fn test_oauth_debug_hides_secret() {
        let client = OAuthClient::new("http://t", "id", "very-secret", "read");
        assert!(!format!("{:?}", client).contains("very-secret"));
    }
}
