//! HTTP client for the work item tracking API
//!
//! Every logical call goes through the same pipeline:
//!
//! ```text
//! RateLimiter::acquire -> CircuitBreaker::execute -> Transport::send
//!        ^                                                 |
//!        +-------- exponential backoff on retryable -------+
//! ```
//!
//! - The `Authorization: Basic base64(":" + token)` header is attached per attempt
//! - `x-ratelimit-*` response headers resynchronize the shared [`RateLimiter`]
//! - `Retry-After` on a 429 replaces the computed backoff delay
//! - Each attempt is recorded in the client's [`PerformanceMonitor`]
//!
//! Requests marked non-idempotent (work item creation) are only repeated when
//! the failure proves the service never processed them: a 429 answer or a
//! connection that could not be established.

use crate::auth::AuthService;
use crate::client::circuit_breaker::CircuitBreaker;
use crate::client::metrics::{MetricsSummary, PerformanceMonitor};
use crate::client::rate_limiter::RateLimiter;
use crate::client::transport::{HttpMethod, HttpRequest, HttpResponse, Transport};
use crate::client::types::{ApiResponse, HealthStatus};
use crate::config::ClientConfig;
use crate::env;
use crate::recovery::error_recovery::retry_with;
use crate::recovery::types::{AgentError, ErrorContext, ErrorKind};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// One logical API call, possibly sent several times.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub url: String,
    pub body: Option<Value>,
    pub content_type: &'static str,
    /// Whether repeating the request after an ambiguous failure is safe.
    pub idempotent: bool,
    pub operation: String,
}

impl ApiRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
            content_type: env::api::JSON_CONTENT_TYPE,
            idempotent: method != HttpMethod::Post,
            operation: operation.into(),
        }
    }

    pub fn get(url: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url, operation)
    }

    pub fn post(url: impl Into<String>, body: Value, operation: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url, operation).with_body(body)
    }

    pub fn patch(url: impl Into<String>, body: Value, operation: impl Into<String>) -> Self {
        Self::new(HttpMethod::Patch, url, operation).with_body(body)
    }

    pub fn delete(url: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, url, operation)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_content_type(mut self, content_type: &'static str) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn with_idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }
}

pub struct ApiClient {
    config: Arc<ClientConfig>,
    auth: Arc<AuthService>,
    transport: Arc<dyn Transport>,
    rate_limiter: Arc<RateLimiter>,
    circuit_breaker: Arc<CircuitBreaker>,
    metrics: PerformanceMonitor,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.config.base_url)
            .field("circuit_breaker", &self.circuit_breaker.name())
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(
        config: Arc<ClientConfig>,
        auth: Arc<AuthService>,
        transport: Arc<dyn Transport>,
        rate_limiter: Arc<RateLimiter>,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            config,
            auth,
            transport,
            rate_limiter,
            circuit_breaker,
            metrics: PerformanceMonitor::new("api_client"),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn auth(&self) -> &Arc<AuthService> {
        &self.auth
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }

    pub fn metrics(&self) -> &PerformanceMonitor {
        &self.metrics
    }

    /// Builds `{base}/{organization}[/{project}]/_apis/{segments...}?api-version=...&{query}`.
    pub fn build_url(
        &self,
        project: Option<&str>,
        segments: &[&str],
        query: &[(&str, &str)],
    ) -> Result<String, AgentError> {
        let invalid = |message: String| {
            AgentError::new(
                ErrorKind::InvalidConfiguration {
                    errors: vec![message],
                },
                ErrorContext::new("build_url"),
            )
        };

        let organization = self.auth.organization()?;
        let mut url = url::Url::parse(&self.config.base_url)
            .map_err(|e| invalid(format!("invalid base url '{}': {}", self.config.base_url, e)))?;
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| invalid(format!("base url '{}' cannot be a base", self.config.base_url)))?;
            path.pop_if_empty().push(&organization);
            if let Some(project) = project {
                path.push(project);
            }
            path.push("_apis").extend(segments);
        }
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("api-version", &self.config.api_version);
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }

        Ok(url.into())
    }

    pub async fn get(&self, url: String, operation: &str) -> Result<ApiResponse, AgentError> {
        self.request(ApiRequest::get(url, operation)).await
    }

    pub async fn post(&self, url: String, body: Value, operation: &str) -> Result<ApiResponse, AgentError> {
        self.request(ApiRequest::post(url, body, operation)).await
    }

    pub async fn patch(&self, url: String, body: Value, operation: &str) -> Result<ApiResponse, AgentError> {
        self.request(
            ApiRequest::patch(url, body, operation)
                .with_content_type(env::api::JSON_PATCH_CONTENT_TYPE),
        )
        .await
    }

    pub async fn delete(&self, url: String, operation: &str) -> Result<ApiResponse, AgentError> {
        self.request(ApiRequest::delete(url, operation)).await
    }

    /// Executes one logical call with rate limiting, circuit breaking and retries.
    pub async fn request(&self, request: ApiRequest) -> Result<ApiResponse, AgentError> {
        let started = Instant::now();
        let mut attempt = 0u32;

        let outcome = retry_with(
            || {
                attempt += 1;
                let attempt = attempt;
                let request = &request;
                async move {
                    let permit = self.rate_limiter.acquire().await;
                    if permit.waited > Duration::ZERO {
                        debug!(
                            operation = %request.operation,
                            waited_ms = permit.waited.as_millis() as u64,
                            "Rate limiter delayed request"
                        );
                    }
                    self.circuit_breaker
                        .execute(|| self.send_once(request, attempt))
                        .await
                }
            },
            &self.config.retry,
            |error| {
                error.is_retryable()
                    && (request.idempotent
                        || matches!(
                            error.kind,
                            ErrorKind::RateLimited { .. } | ErrorKind::Unreachable(_)
                        ))
            },
        )
        .await;

        match (outcome.data, outcome.error) {
            (Some((status, body)), _) => Ok(ApiResponse {
                status,
                body,
                attempts: outcome.attempt_count,
                duration: started.elapsed(),
            }),
            (None, Some(error)) => Err(error),
            (None, None) => Err(AgentError::new(
                ErrorKind::Unexpected("request finished without a response".to_string()),
                ErrorContext::new(request.operation.clone()),
            )),
        }
    }

    async fn send_once(&self, request: &ApiRequest, attempt: u32) -> Result<(u16, Value), AgentError> {
        let request_id = Uuid::new_v4();
        let started = Instant::now();

        let result = self.send_inner(request).await;

        let mut metadata = HashMap::new();
        metadata.insert("method".to_string(), request.method.as_str().to_string());
        metadata.insert("attempt".to_string(), attempt.to_string());
        metadata.insert("request_id".to_string(), request_id.to_string());
        match &result {
            Ok((status, _)) => {
                metadata.insert("status".to_string(), status.to_string());
            }
            Err(error) => {
                if let Some(status) = error.context.status_code {
                    metadata.insert("status".to_string(), status.to_string());
                }
                metadata.insert("error_code".to_string(), error.code().to_string());
            }
        }
        let elapsed = started.elapsed();
        self.metrics
            .record(request.operation.clone(), elapsed, result.is_ok(), metadata)
            .await;

        debug!(
            operation = %request.operation,
            method = request.method.as_str(),
            attempt,
            %request_id,
            duration_ms = elapsed.as_millis() as u64,
            success = result.is_ok(),
            "API attempt finished"
        );

        result
    }

    async fn send_inner(&self, request: &ApiRequest) -> Result<(u16, Value), AgentError> {
        let context = || ErrorContext::new(request.operation.clone());
        let authorization = self
            .auth
            .authorization_header()
            .map_err(|e| e.with_operation(request.operation.clone()))?;

        let mut headers = vec![
            ("Authorization".to_string(), authorization),
            ("Accept".to_string(), env::api::JSON_CONTENT_TYPE.to_string()),
        ];
        if request.body.is_some() {
            headers.push(("Content-Type".to_string(), request.content_type.to_string()));
        }

        let timeout = self.config.request_timeout;
        let http_request = HttpRequest {
            method: request.method,
            url: request.url.clone(),
            headers,
            body: request.body.clone(),
            timeout,
        };

        let response = tokio::time::timeout(timeout, self.transport.send(http_request))
            .await
            .map_err(|_| AgentError::new(ErrorKind::Timeout { after: timeout }, context()))?
            .map_err(|e| AgentError::new(e.into(), context()))?;

        self.sync_rate_limit(&response).await;

        if response.is_success() {
            let body = if response.body.trim().is_empty() {
                Value::Null
            } else {
                serde_json::from_str(&response.body).map_err(|e| {
                    AgentError::new(
                        ErrorKind::Integrity(format!("malformed response body: {}", e)),
                        context().with_status(response.status),
                    )
                })?
            };
            return Ok((response.status, body));
        }

        let retry_after = response
            .header(env::api::HEADER_RETRY_AFTER)
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let message = serde_json::from_str::<Value>(&response.body)
            .ok()
            .and_then(|body| body.get("message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| format!("HTTP {}", response.status));

        if response.status == 429 {
            warn!(
                operation = %request.operation,
                retry_after_secs = retry_after.map(|d| d.as_secs()),
                "Service reported rate limiting"
            );
        }

        Err(AgentError::new(
            ErrorKind::from_status(response.status, message, retry_after),
            context().with_status(response.status),
        ))
    }

    async fn sync_rate_limit(&self, response: &HttpResponse) {
        let Some(remaining) = response
            .header(env::api::HEADER_RATE_LIMIT_REMAINING)
            .and_then(|value| value.trim().parse::<u32>().ok())
        else {
            return;
        };
        let reset = response
            .header(env::api::HEADER_RATE_LIMIT_RESET)
            .and_then(|value| value.trim().parse::<i64>().ok());
        let limit = response
            .header(env::api::HEADER_RATE_LIMIT_LIMIT)
            .and_then(|value| value.trim().parse::<u32>().ok());

        self.rate_limiter
            .update_from_server_headers(remaining, reset, limit)
            .await;
    }

    /// Rolling health view computed from the last recorded attempts.
    pub async fn health_status(&self) -> HealthStatus {
        let summary: MetricsSummary = self.metrics.summary().await;
        HealthStatus {
            success_rate: if summary.total == 0 {
                1.0
            } else {
                summary.success_rate
            },
            average_response_time: summary.average_duration,
            circuit_breaker_open: self.circuit_breaker.is_open(),
            total_requests: summary.total,
            successful_requests: summary.successful,
            failed_requests: summary.failed,
        }
    }
}
