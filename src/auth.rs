//! Credential holder for the remote service.
//!
//! The raw personal access token is stored privately once [`AuthService::configure`]
//! accepts it. It leaves this module only inside the `Authorization` header
//! handed to the transport; every other view is masked.

use crate::client::rate_limiter::RateLimiter;
use crate::client::transport::{HttpMethod, HttpRequest, Transport};
use crate::config::{AuthConfig, ClientConfig, ConfigurationManager, MaskedAuthConfig};
use crate::env;
use crate::recovery::types::{AgentError, ErrorContext, ErrorKind};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Result of a successful credential handshake.
#[derive(Debug, Clone, Serialize)]
pub struct AuthValidation {
    pub valid: bool,
    pub response_time: Duration,
    pub permissions: Option<Vec<String>>,
}

pub struct AuthService {
    settings: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
    rate_limiter: Arc<RateLimiter>,
    credentials: RwLock<Option<AuthConfig>>,
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("configured", &self.is_configured())
            .finish()
    }
}

impl AuthService {
    /// `rate_limiter` should be the instance shared with the API client so the
    /// handshake draws from the same budget.
    pub fn new(
        settings: Arc<ClientConfig>,
        transport: Arc<dyn Transport>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            settings,
            transport,
            rate_limiter,
            credentials: RwLock::new(None),
        }
    }

    /// Validates and stores `config`, replacing any earlier credentials.
    pub fn configure(&self, config: AuthConfig) -> Result<(), AgentError> {
        let validation = ConfigurationManager::validate(&config);
        if !validation.valid {
            warn!(errors = ?validation.errors, "Rejected authentication configuration");
            return Err(AgentError::new(
                ErrorKind::InvalidConfiguration {
                    errors: validation.errors,
                },
                ErrorContext::new("configure_auth"),
            ));
        }

        info!(organization = %config.organization, "Authentication configured");
        *self.credentials.write().unwrap_or_else(|e| e.into_inner()) = Some(config);
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.credentials
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Masked view of the stored configuration.
    pub fn get_configuration(&self) -> Result<MaskedAuthConfig, AgentError> {
        self.with_credentials("get_configuration", |config| config.masked())
    }

    pub(crate) fn organization(&self) -> Result<String, AgentError> {
        self.with_credentials("resolve_organization", |config| config.organization.clone())
    }

    pub(crate) fn project(&self) -> Option<String> {
        self.credentials
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(|config| config.project.clone())
    }

    /// `Basic base64(":" + token)`.
    pub(crate) fn authorization_header(&self) -> Result<String, AgentError> {
        self.with_credentials("authorize_request", |config| {
            format!(
                "Basic {}",
                STANDARD.encode(format!(":{}", config.personal_access_token))
            )
        })
    }

    fn with_credentials<T>(
        &self,
        operation: &str,
        f: impl FnOnce(&AuthConfig) -> T,
    ) -> Result<T, AgentError> {
        let guard = self.credentials.read().unwrap_or_else(|e| e.into_inner());
        guard
            .as_ref()
            .map(f)
            .ok_or_else(|| AgentError::new(ErrorKind::NotConfigured, ErrorContext::new(operation)))
    }

    /// Performs a lightweight authenticated call to prove the credentials work.
    pub async fn validate_authentication(&self) -> Result<AuthValidation, AgentError> {
        const OPERATION: &str = "validate_authentication";

        let organization = self.organization()?;
        let authorization = self.authorization_header()?;
        let mut url = url::Url::parse(&self.settings.base_url).map_err(|e| {
            AgentError::new(
                ErrorKind::InvalidConfiguration {
                    errors: vec![format!("invalid base url: {}", e)],
                },
                ErrorContext::new(OPERATION),
            )
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                AgentError::new(
                    ErrorKind::InvalidConfiguration {
                        errors: vec!["base url cannot carry a path".to_string()],
                    },
                    ErrorContext::new(OPERATION),
                )
            })?
            .pop_if_empty()
            .extend([organization.as_str(), "_apis", "connectionData"]);

        let timeout = self.settings.request_timeout;
        let request = HttpRequest {
            method: HttpMethod::Get,
            url: url.into(),
            headers: vec![
                ("Authorization".to_string(), authorization),
                ("Accept".to_string(), env::api::JSON_CONTENT_TYPE.to_string()),
            ],
            body: None,
            timeout,
        };

        let permit = self.rate_limiter.acquire().await;
        if !permit.waited.is_zero() {
            debug!(waited_ms = permit.waited.as_millis() as u64, "Handshake waited for rate limiter");
        }

        let started = Instant::now();
        let response = tokio::time::timeout(timeout, self.transport.send(request))
            .await
            .map_err(|_| {
                AgentError::new(ErrorKind::Timeout { after: timeout }, ErrorContext::new(OPERATION))
            })?
            .map_err(|e| AgentError::new(e.into(), ErrorContext::new(OPERATION)))?;
        let response_time = started.elapsed();

        // The service answers 203 with a sign-in page when the token is rejected.
        if response.status == 203 || response.status == 401 || response.status == 403 {
            let status = if response.status == 203 { 401 } else { response.status };
            return Err(AgentError::new(
                ErrorKind::Unauthorized { status },
                ErrorContext::new(OPERATION).with_status(response.status),
            ));
        }
        if !response.is_success() {
            return Err(AgentError::new(
                ErrorKind::from_status(response.status, "authentication handshake failed", None),
                ErrorContext::new(OPERATION).with_status(response.status),
            ));
        }

        let permissions = serde_json::from_str::<serde_json::Value>(&response.body)
            .ok()
            .and_then(|body| {
                body.get("permissions")?.as_array().map(|items| {
                    items
                        .iter()
                        .filter_map(|item| item.as_str().map(str::to_string))
                        .collect::<Vec<_>>()
                })
            });

        debug!(
            response_time_ms = response_time.as_millis() as u64,
            "Authentication validated"
        );
        Ok(AuthValidation {
            valid: true,
            response_time,
            permissions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::transport::testing::ScriptedTransport;
    use crate::recovery::types::ErrorCategory;

    const TOKEN: &str = "pat0123456789abcdefghijklmnop";

    fn service(transport: Arc<ScriptedTransport>) -> AuthService {
        let settings = ClientConfig {
            request_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let limiter = Arc::new(RateLimiter::new(settings.rate_limit.clone()));
        AuthService::new(Arc::new(settings), transport, limiter)
    }

    #[test]
    fn test_configure_rejects_invalid_config() {
        let auth = service(Arc::new(ScriptedTransport::new()));
        let error = auth
            .configure(AuthConfig::new("", "short", None))
            .unwrap_err();
        assert_eq!(error.category(), ErrorCategory::Auth);
        assert!(error.is_recoverable());
        assert!(!auth.is_configured());
    }

    #[test]
    fn test_get_configuration_is_masked() {
        let auth = service(Arc::new(ScriptedTransport::new()));
        assert_eq!(
            auth.get_configuration().unwrap_err().code(),
            "AUTH_NOT_CONFIGURED"
        );

        auth.configure(AuthConfig::new("contoso", TOKEN, Some("Fabrikam".into())))
            .unwrap();
        let masked = auth.get_configuration().unwrap();
        assert_eq!(masked.personal_access_token, "*".repeat(TOKEN.len()));
        assert_ne!(masked.personal_access_token, TOKEN);
    }

    #[test]
    fn test_authorization_header_format() {
        let auth = service(Arc::new(ScriptedTransport::new()));
        auth.configure(AuthConfig::new("contoso", TOKEN, None)).unwrap();
        let header = auth.authorization_header().unwrap();
        let encoded = header.strip_prefix("Basic ").unwrap();
        let decoded = String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap();
        assert_eq!(decoded, format!(":{}", TOKEN));
    }

    #[tokio::test]
    async fn test_validate_authentication_success() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(
            200,
            serde_json::json!({ "authenticatedUser": { "id": "u1" }, "permissions": ["read", "write"] }),
        );
        let auth = service(transport.clone());
        auth.configure(AuthConfig::new("contoso", TOKEN, None)).unwrap();

        let validation = auth.validate_authentication().await.unwrap();
        assert!(validation.valid);
        assert_eq!(
            validation.permissions,
            Some(vec!["read".to_string(), "write".to_string()])
        );
        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].url.ends_with("/contoso/_apis/connectionData"));
    }

    #[tokio::test]
    async fn test_validate_authentication_rejected_without_leaking_token() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(401, serde_json::json!({ "message": "denied" }));
        let auth = service(transport);
        auth.configure(AuthConfig::new("contoso", TOKEN, None)).unwrap();

        let error = auth.validate_authentication().await.unwrap_err();
        assert_eq!(error.code(), "AUTH_UNAUTHORIZED");
        assert!(!error.to_string().contains(TOKEN));
        assert!(!error.user_message.contains(TOKEN));
    }

    #[tokio::test]
    async fn test_validate_authentication_requires_configuration() {
        let transport = Arc::new(ScriptedTransport::new());
        let auth = service(transport.clone());
        let error = auth.validate_authentication().await.unwrap_err();
        assert_eq!(error.code(), "AUTH_NOT_CONFIGURED");
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_validate_authentication_consumes_rate_limit_token() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(200, serde_json::json!({ "permissions": [] }));
        let limiter = Arc::new(RateLimiter::new(crate::client::types::RateLimitConfig {
            max_requests: 2,
            window: Duration::from_secs(60),
        }));
        let auth = AuthService::new(
            Arc::new(ClientConfig::default()),
            transport.clone(),
            limiter.clone(),
        );
        auth.configure(AuthConfig::new("contoso", TOKEN, None)).unwrap();

        auth.validate_authentication().await.unwrap();

        assert_eq!(limiter.status().await.available_tokens, 1);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_validate_authentication_waits_when_budget_exhausted() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(200, serde_json::json!({ "permissions": [] }));
        let limiter = Arc::new(RateLimiter::new(crate::client::types::RateLimitConfig {
            max_requests: 1,
            window: Duration::from_secs(60),
        }));
        let auth = AuthService::new(
            Arc::new(ClientConfig::default()),
            transport.clone(),
            limiter.clone(),
        );
        auth.configure(AuthConfig::new("contoso", TOKEN, None)).unwrap();
        assert!(limiter.try_acquire().await.is_some());

        let pending =
            tokio::time::timeout(Duration::from_millis(100), auth.validate_authentication()).await;

        assert!(pending.is_err());
        assert_eq!(transport.call_count(), 0);
    }
}
