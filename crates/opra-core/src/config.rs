//! Configuration registry.
//!
//! The harness is configured from a flat `.properties` file. Keys are
//! normalized to lowercase and values are trimmed on load. After loading the
//! registry is immutable, so it can be shared across workers behind an `Arc`
//! without locking.
//!
//! Lookups go through [`ConfigKey`], a closed set of symbolic names. Asking for
//! a key that is not present yields [`HarnessError::MissingConfig`]; nothing is
//! silently defaulted.

use crate::error::{HarnessError, Result};
use crate::service::Service;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Symbolic names of every configuration key the harness understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    Env,
    RunManager,
    ServiceName,
    RunMode,

    BaseUrl(Service),
    Username(Service),
    Password(Service),
    Headers(Service),

    AuthType,
    AccessTokenUrl,
    ClientId,
    ClientSecret,
    Scope,
    ApiKeyName,
    ApiKeyValue,
    ApiKeyLocation,

    Retry,
    LogResponse,
    OverrideReports,
    RelaxedTls,
    RequestTimeoutSecs,

    SendEmail,
    EmailHost,
    EmailPort,
    EmailUsername,
    EmailPassword,
    EmailFrom,
    EmailToRecipients,
    EmailCcRecipients,
    EmailSubject,

    DbUrl,
    DbUsername,
    DbPassword,
}

/// Keys without a service parameter, paired with their textual names.
const SIMPLE_KEYS: &[(ConfigKey, &str)] = &[
    (ConfigKey::Env, "env"),
    (ConfigKey::RunManager, "runmanager"),
    (ConfigKey::ServiceName, "service_name"),
    (ConfigKey::RunMode, "run_mode"),
    (ConfigKey::AuthType, "auth_type"),
    (ConfigKey::AccessTokenUrl, "access_token_url"),
    (ConfigKey::ClientId, "client_id"),
    (ConfigKey::ClientSecret, "client_secret"),
    (ConfigKey::Scope, "scope"),
    (ConfigKey::ApiKeyName, "api_key_name"),
    (ConfigKey::ApiKeyValue, "api_key_value"),
    (ConfigKey::ApiKeyLocation, "api_key_location"),
    (ConfigKey::Retry, "retry"),
    (ConfigKey::LogResponse, "log_response"),
    (ConfigKey::OverrideReports, "override_reports"),
    (ConfigKey::RelaxedTls, "relaxed_tls"),
    (ConfigKey::RequestTimeoutSecs, "request_timeout_secs"),
    (ConfigKey::SendEmail, "send_email"),
    (ConfigKey::EmailHost, "email_host"),
    (ConfigKey::EmailPort, "email_port"),
    (ConfigKey::EmailUsername, "email_username"),
    (ConfigKey::EmailPassword, "email_password"),
    (ConfigKey::EmailFrom, "email_from"),
    (ConfigKey::EmailToRecipients, "email_to_recipients"),
    (ConfigKey::EmailCcRecipients, "email_cc_recipients"),
    (ConfigKey::EmailSubject, "email_subject"),
    (ConfigKey::DbUrl, "db_url"),
    (ConfigKey::DbUsername, "db_username"),
    (ConfigKey::DbPassword, "db_password"),
];

impl ConfigKey {
    /// Returns the lowercase key name as it appears in the properties file.
    pub fn name(&self) -> String {
        let per_service = |svc: &Service, suffix: &str| {
            format!("open_{}_{}", svc.config_segment(), suffix)
        };
        match self {
            ConfigKey::BaseUrl(svc) => per_service(svc, "base_url"),
            ConfigKey::Username(svc) => per_service(svc, "username"),
            ConfigKey::Password(svc) => per_service(svc, "password"),
            ConfigKey::Headers(svc) => per_service(svc, "headers"),
            simple => SIMPLE_KEYS
                .iter()
                .find(|(key, _)| key == simple)
                .map(|(_, name)| (*name).to_string())
                .unwrap_or_default(),
        }
    }

    /// Keys that must be present before a run starts.
    pub fn required() -> Vec<ConfigKey> {
        vec![
            ConfigKey::Env,
            ConfigKey::RunManager,
            ConfigKey::ServiceName,
            ConfigKey::RunMode,
            ConfigKey::Retry,
            ConfigKey::LogResponse,
            ConfigKey::OverrideReports,
            ConfigKey::AuthType,
            ConfigKey::AccessTokenUrl,
            ConfigKey::ClientId,
            ConfigKey::ClientSecret,
            ConfigKey::Scope,
        ]
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for ConfigKey {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase();

        if let Some((key, _)) = SIMPLE_KEYS.iter().find(|(_, name)| *name == wanted) {
            return Ok(*key);
        }

        if let Some(rest) = wanted.strip_prefix("open_") {
            for svc in Service::all() {
                let Some(suffix) = rest
                    .strip_prefix(svc.config_segment())
                    .and_then(|r| r.strip_prefix('_'))
                else {
                    continue;
                };
                let key = match suffix {
                    "base_url" => ConfigKey::BaseUrl(svc),
                    "username" => ConfigKey::Username(svc),
                    "password" => ConfigKey::Password(svc),
                    "headers" => ConfigKey::Headers(svc),
                    _ => continue,
                };
                return Ok(key);
            }
        }

        Err(HarnessError::MissingConfig(format!(
            "unknown configuration key: {}",
            s
        )))
    }
}

/// Read-only view of the loaded properties.
#[derive(Debug, Clone, Default)]
pub struct ConfigRegistry {
    values: HashMap<String, String>,
}

impl ConfigRegistry {
    /// Loads and parses a properties file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::MissingConfig(format!(
                "cannot read configuration file {}: {}",
                path.display(),
                e
            ))
        })?;
        let registry = Self::parse(&content);
        debug!(
            path = %path.display(),
            keys = registry.values.len(),
            "Loaded configuration"
        );
        Ok(registry)
    }

    /// Parses properties text.
    ///
    /// Supports `key=value` and `key: value`, `#` and `!` comment lines, and
    /// values continued onto the next line with a trailing backslash.
    pub fn parse(content: &str) -> Self {
        let mut values = HashMap::new();
        let mut pending = String::new();

        for raw in content.lines() {
            let line = raw.trim();
            let is_comment = line.starts_with('#') || line.starts_with('!');
            if pending.is_empty() && (line.is_empty() || is_comment) {
                continue;
            }

            if let Some(head) = line.strip_suffix('\\') {
                pending.push_str(head);
                continue;
            }
            pending.push_str(line);

            let entry = std::mem::take(&mut pending);
            if let Some((key, value)) = split_entry(&entry) {
                values.insert(key.trim().to_lowercase(), value.trim().to_string());
            }
        }

        if let Some((key, value)) = split_entry(&pending) {
            values.insert(key.trim().to_lowercase(), value.trim().to_string());
        }

        Self { values }
    }

    /// Builds a registry from explicit pairs, normalizing like [`ConfigRegistry::parse`].
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let values = pairs
            .into_iter()
            .map(|(k, v)| (k.as_ref().trim().to_lowercase(), v.as_ref().trim().to_string()))
            .collect();
        Self { values }
    }

    /// Returns a copy with `key` set to `value`.
    pub fn with_override(&self, key: ConfigKey, value: impl Into<String>) -> Self {
        let mut values = self.values.clone();
        values.insert(key.name(), value.into().trim().to_string());
        Self { values }
    }

    /// Resolves a key, failing if absent.
    pub fn get(&self, key: ConfigKey) -> Result<&str> {
        self.get_optional(key).ok_or_else(|| {
            HarnessError::MissingConfig(format!("required key '{}' is not set", key))
        })
    }

    /// Resolves a key that is documented as optional.
    pub fn get_optional(&self, key: ConfigKey) -> Option<&str> {
        self.values.get(&key.name()).map(String::as_str)
    }

    /// Resolves a key by its textual name.
    ///
    /// Unknown names fail before the store is consulted.
    pub fn lookup(&self, name: &str) -> Result<&str> {
        let key: ConfigKey = name.parse()?;
        self.get(key)
    }

    /// Interprets a `yes|no` flag. Any value other than `yes` is false.
    pub fn flag(&self, key: ConfigKey) -> Result<bool> {
        Ok(is_yes(self.get(key)?))
    }

    /// Interprets an optional `yes|no` flag, absent meaning false.
    pub fn optional_flag(&self, key: ConfigKey) -> bool {
        self.get_optional(key).is_some_and(is_yes)
    }

    /// Checks that every start-up key is present, reporting all that are missing.
    pub fn validate_required(&self) -> Result<()> {
        let missing: Vec<String> = ConfigKey::required()
            .into_iter()
            .filter(|key| self.get_optional(*key).is_none())
            .map(|key| key.name())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::MissingConfig(format!(
                "required keys not set: {}",
                missing.join(", ")
            )))
        }
    }

    /// Number of loaded keys.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Case-insensitive `yes` check used for all configuration and data flags.
pub fn is_yes(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("yes")
}

fn split_entry(entry: &str) -> Option<(&str, &str)> {
    let entry = entry.trim();
    if entry.is_empty() {
        return None;
    }
    let idx = entry.find(['=', ':'])?;
    Some((&entry[..idx], &entry[idx + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r"
# harness settings
ENV = QA
RunManager=Smoke
run_mode: remote
retry=yes
OPEN_ERX_BASE_URL = https://erx.example.test/api
open_erx_username=svc-erx
! legacy comment
scope=system/*.read \
      system/*.write
";

    #[test]
    fn test_parse_normalizes_keys_and_values() {
        let config = ConfigRegistry::parse(SAMPLE);
        assert_eq!(config.get(ConfigKey::Env).unwrap(), "QA");
        assert_eq!(config.get(ConfigKey::RunManager).unwrap(), "Smoke");
        assert_eq!(config.get(ConfigKey::RunMode).unwrap(), "remote");
        assert_eq!(
            config.get(ConfigKey::BaseUrl(Service::Erx)).unwrap(),
            "https://erx.example.test/api"
        );
        assert_eq!(
            config.get(ConfigKey::Scope).unwrap(),
            "system/*.read system/*.write"
        );
    }

    #[test]
    fn test_missing_key_is_an_error() {
        let config = ConfigRegistry::parse(SAMPLE);
        let err = config.get(ConfigKey::Password(Service::Erx)).unwrap_err();
        assert!(matches!(err, HarnessError::MissingConfig(_)));
        assert!(err.to_string().contains("open_erx_password"));
    }

    #[test]
    fn test_unknown_name_fails_before_lookup() {
        let config = ConfigRegistry::parse(SAMPLE);
        let err = config.lookup("open_billing_base_url").unwrap_err();
        assert!(matches!(err, HarnessError::MissingConfig(_)));
        assert!(err.to_string().contains("unknown configuration key"));

        assert_eq!(config.lookup("ENV").unwrap(), "QA");
    }

    #[test]
    fn test_key_names_round_trip() {
        for key in [
            ConfigKey::Env,
            ConfigKey::OverrideReports,
            ConfigKey::Headers(Service::Document),
            ConfigKey::Username(Service::Job),
            ConfigKey::DbPassword,
        ] {
            assert_eq!(key.name().parse::<ConfigKey>().unwrap(), key);
        }
    }

    #[test]
    fn test_flag_semantics() {
        let config = ConfigRegistry::from_pairs([("retry", "YES"), ("log_response", "no")]);
        assert!(config.flag(ConfigKey::Retry).unwrap());
        assert!(!config.flag(ConfigKey::LogResponse).unwrap());
        assert!(config.flag(ConfigKey::OverrideReports).is_err());
        assert!(!config.optional_flag(ConfigKey::RelaxedTls));
    }

    #[test]
    fn test_validate_required_lists_every_missing_key() {
        let config = ConfigRegistry::parse(SAMPLE);
        let err = config.validate_required().unwrap_err().to_string();
        assert!(err.contains("log_response"));
        assert!(err.contains("client_secret"));
        assert!(!err.contains("runmanager"));
    }

    #[test]
    fn test_override_does_not_touch_original() {
        let config = ConfigRegistry::parse(SAMPLE);
        let overridden = config.with_override(ConfigKey::Env, "UAT");
        assert_eq!(overridden.get(ConfigKey::Env).unwrap(), "UAT");
        assert_eq!(config.get(ConfigKey::Env).unwrap(), "QA");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.properties");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = ConfigRegistry::load(&path).unwrap();
        assert_eq!(config.get(ConfigKey::Retry).unwrap(), "yes");

        let missing = ConfigRegistry::load(&dir.path().join("absent.properties"));
        assert!(matches!(missing, Err(HarnessError::MissingConfig(_))));
    }
}
