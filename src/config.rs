//! Connection settings: discovery, layering, validation and masking.
//!
//! Settings are layered in increasing precedence:
//! 1. Built-in defaults
//! 2. TOML file: `$WORKITEM_AGENT_CONFIG` or `./workitem-agent.toml`
//! 3. Environment variables (see [`crate::env::vars`])
//!
//! The resulting [`ClientConfig`] is constructed once and handed to every
//! component constructor.

use crate::client::types::{CircuitBreakerConfig, RateLimitConfig};
use crate::env::{self, vars};
use crate::recovery::types::RetryConfig;
use regex::Regex;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info};

/// Shortest personal access token accepted by validation.
pub const MIN_CREDENTIAL_LENGTH: usize = 20;

static ORGANIZATION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid organization pattern"));

/// Credentials and scope for the remote service.
///
/// Deliberately not `Serialize`; its `Debug` output masks the token.
#[derive(Clone, Default, Deserialize, PartialEq)]
pub struct AuthConfig {
    pub organization: String,
    pub personal_access_token: String,
    pub project: Option<String>,
}

impl AuthConfig {
    pub fn new(
        organization: impl Into<String>,
        personal_access_token: impl Into<String>,
        project: Option<String>,
    ) -> Self {
        Self {
            organization: organization.into(),
            personal_access_token: personal_access_token.into(),
            project,
        }
    }

    pub fn masked(&self) -> MaskedAuthConfig {
        MaskedAuthConfig {
            organization: mask_string(&self.organization),
            personal_access_token: mask_string(&self.personal_access_token),
            project: self.project.as_deref().map(mask_string),
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("organization", &self.organization)
            .field("personal_access_token", &mask_string(&self.personal_access_token))
            .field("project", &self.project)
            .finish()
    }
}

/// The only externally visible form of an [`AuthConfig`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MaskedAuthConfig {
    pub organization: String,
    pub personal_access_token: String,
    pub project: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub auth: AuthConfig,
    pub base_url: String,
    pub api_version: String,
    pub request_timeout: Duration,
    pub retry: RetryConfig,
    pub rate_limit: RateLimitConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            auth: AuthConfig::default(),
            base_url: env::api::DEFAULT_BASE_URL.to_string(),
            api_version: env::api::API_VERSION.to_string(),
            request_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Partial settings as written in a TOML file; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    organization: Option<String>,
    personal_access_token: Option<String>,
    project: Option<String>,
    base_url: Option<String>,
    api_version: Option<String>,
    request_timeout_ms: Option<u64>,
    retry_attempts: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    retry_max_delay_ms: Option<u64>,
    rate_limit_requests: Option<u32>,
    rate_limit_window_ms: Option<u64>,
    circuit_breaker_threshold: Option<u32>,
    circuit_breaker_reset_ms: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("environment variable {name} has invalid value '{value}'")]
    InvalidVariable { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize)]
pub struct ConfigValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ConfigValidation {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigurationManager {
    config_path: Option<PathBuf>,
}

impl ConfigurationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `path` instead of the discovered configuration file.
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Loads settings from defaults, the configuration file and the process environment.
    pub fn load(&self) -> Result<ClientConfig, ConfigError> {
        self.load_with(|name| std::env::var(name).ok())
    }

    /// Like [`load`](Self::load) with an explicit variable lookup.
    pub fn load_with<F>(&self, lookup: F) -> Result<ClientConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ClientConfig::default();

        let file_path = self
            .config_path
            .clone()
            .or_else(|| lookup(vars::CONFIG_PATH).map(PathBuf::from))
            .or_else(|| {
                let candidate = std::env::current_dir().ok()?.join(env::CONFIG_FILE_NAME);
                candidate.is_file().then_some(candidate)
            });

        if let Some(path) = file_path {
            info!("Loading configuration from: {:?}", path);
            let file = Self::read_file(&path)?;
            Self::apply_file(&mut config, file);
        } else {
            debug!("No configuration file found, using defaults");
        }

        Self::apply_environment(&mut config, &lookup)?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_file(config: &mut ClientConfig, file: FileConfig) {
        if let Some(organization) = file.organization {
            config.auth.organization = organization;
        }
        if let Some(token) = file.personal_access_token {
            config.auth.personal_access_token = token;
        }
        if file.project.is_some() {
            config.auth.project = file.project;
        }
        if let Some(base_url) = file.base_url {
            config.base_url = base_url;
        }
        if let Some(api_version) = file.api_version {
            config.api_version = api_version;
        }
        if let Some(ms) = file.request_timeout_ms {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(attempts) = file.retry_attempts {
            config.retry.max_attempts = attempts;
        }
        if let Some(ms) = file.retry_base_delay_ms {
            config.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = file.retry_max_delay_ms {
            config.retry.max_delay = Duration::from_millis(ms);
        }
        if let Some(requests) = file.rate_limit_requests {
            config.rate_limit.max_requests = requests;
        }
        if let Some(ms) = file.rate_limit_window_ms {
            config.rate_limit.window = Duration::from_millis(ms);
        }
        if let Some(threshold) = file.circuit_breaker_threshold {
            config.circuit_breaker.failure_threshold = threshold;
        }
        if let Some(ms) = file.circuit_breaker_reset_ms {
            config.circuit_breaker.reset_timeout = Duration::from_millis(ms);
        }
    }

    fn apply_environment<F>(config: &mut ClientConfig, lookup: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(organization) = non_empty(vars::ORGANIZATION) {
            config.auth.organization = organization.trim().to_string();
        }
        if let Some(token) = non_empty(vars::PERSONAL_ACCESS_TOKEN) {
            config.auth.personal_access_token = token.trim().to_string();
        }
        if let Some(project) = non_empty(vars::PROJECT) {
            config.auth.project = Some(project.trim().to_string());
        }
        if let Some(base_url) = non_empty(vars::BASE_URL) {
            config.base_url = base_url.trim().trim_end_matches('/').to_string();
        }
        if let Some(ms) = Self::parse_var::<u64, _>(lookup, vars::TIMEOUT_MS)? {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(attempts) = Self::parse_var::<u32, _>(lookup, vars::RETRY_ATTEMPTS)? {
            config.retry.max_attempts = attempts;
        }
        if let Some(requests) = Self::parse_var::<u32, _>(lookup, vars::RATE_LIMIT_REQUESTS)? {
            config.rate_limit.max_requests = requests;
        }
        if let Some(ms) = Self::parse_var::<u64, _>(lookup, vars::RATE_LIMIT_WINDOW_MS)? {
            config.rate_limit.window = Duration::from_millis(ms);
        }
        Ok(())
    }

    fn parse_var<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: std::str::FromStr,
        F: Fn(&str) -> Option<String>,
    {
        match lookup(name) {
            Some(value) if !value.trim().is_empty() => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::InvalidVariable { name, value }),
            _ => Ok(None),
        }
    }

    /// Checks the credential fields of `auth`.
    pub fn validate(auth: &AuthConfig) -> ConfigValidation {
        let mut errors = Vec::new();

        if auth.organization.trim().is_empty() {
            errors.push("organization is required".to_string());
        } else if !ORGANIZATION_PATTERN.is_match(&auth.organization) {
            errors.push(
                "organization may only contain letters, digits, '-' and '_'".to_string(),
            );
        }

        if auth.personal_access_token.trim().is_empty() {
            errors.push("personal access token is required".to_string());
        } else if auth.personal_access_token.chars().count() < MIN_CREDENTIAL_LENGTH {
            errors.push(format!(
                "personal access token must be at least {} characters",
                MIN_CREDENTIAL_LENGTH
            ));
        }

        if let Some(project) = &auth.project
            && project.trim().is_empty()
        {
            errors.push("project must not be blank when provided".to_string());
        }

        ConfigValidation::from_errors(errors)
    }

    /// Checks the whole configuration, credentials included.
    pub fn validate_settings(config: &ClientConfig) -> ConfigValidation {
        let mut errors = Self::validate(&config.auth).errors;

        match url::Url::parse(&config.base_url) {
            Ok(url) if url.scheme() == "https" || url.scheme() == "http" => {}
            _ => errors.push(format!("base url '{}' is not a valid http(s) url", config.base_url)),
        }
        if config.request_timeout.is_zero() {
            errors.push("request timeout must be greater than zero".to_string());
        }
        if config.retry.max_attempts == 0 {
            errors.push("retry attempts must be at least 1".to_string());
        }
        if config.rate_limit.max_requests == 0 {
            errors.push("rate limit request count must be at least 1".to_string());
        }
        if config.rate_limit.window.is_zero() {
            errors.push("rate limit window must be greater than zero".to_string());
        }
        if config.circuit_breaker.failure_threshold == 0 {
            errors.push("circuit breaker threshold must be at least 1".to_string());
        }

        ConfigValidation::from_errors(errors)
    }

    /// Replaces every string in `value` with `*` of the same length.
    pub fn mask_sensitive_data(value: &serde_json::Value) -> serde_json::Value {
        use serde_json::Value;
        match value {
            Value::String(s) => Value::String(mask_string(s)),
            Value::Array(items) => Value::Array(items.iter().map(Self::mask_sensitive_data).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), Self::mask_sensitive_data(value)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Externally displayable summary of `config`. Every string value is
    /// masked; numeric limits stay readable.
    pub fn masked_view(config: &ClientConfig) -> serde_json::Value {
        let auth = serde_json::to_value(config.auth.masked()).unwrap_or_default();
        let view = serde_json::json!({
            "auth": auth,
            "base_url": config.base_url,
            "api_version": config.api_version,
            "request_timeout_ms": config.request_timeout.as_millis() as u64,
            "retry_attempts": config.retry.max_attempts,
            "rate_limit_requests": config.rate_limit.max_requests,
            "rate_limit_window_ms": config.rate_limit.window.as_millis() as u64,
            "circuit_breaker_threshold": config.circuit_breaker.failure_threshold,
            "circuit_breaker_reset_ms": config.circuit_breaker.reset_timeout.as_millis() as u64,
        });
        Self::mask_sensitive_data(&view)
    }
}

fn mask_string(value: &str) -> String {
    "*".repeat(value.chars().count())
}
