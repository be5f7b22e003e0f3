use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Broad failure families used for routing, statistics and user messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Auth,
    Network,
    Validation,
    Api,
    RateLimit,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Auth => "AUTH",
            ErrorCategory::Network => "NETWORK",
            ErrorCategory::Validation => "VALIDATION",
            ErrorCategory::Api => "API",
            ErrorCategory::RateLimit => "RATE_LIMIT",
            ErrorCategory::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorSeverity::Low => "LOW",
            ErrorSeverity::Medium => "MEDIUM",
            ErrorSeverity::High => "HIGH",
            ErrorSeverity::Critical => "CRITICAL",
        };
        f.write_str(name)
    }
}

/// Every failure the client can surface.
///
/// Category, severity, code and recoverability are all derived from the
/// variant, so a kind can never carry an inconsistent combination of them.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ErrorKind {
    #[error("Invalid connection configuration: {}", errors.join("; "))]
    InvalidConfiguration { errors: Vec<String> },
    #[error("Authentication has not been configured")]
    NotConfigured,
    #[error("Authentication rejected by the service (status {status})")]
    Unauthorized { status: u16 },
    #[error("Network error: {0}")]
    Network(String),
    /// The connection was never established; the request was not processed.
    #[error("Service unreachable: {0}")]
    Unreachable(String),
    #[error("Request timed out after {}ms", .after.as_millis())]
    Timeout { after: Duration },
    #[error("Validation failed for '{field}': {message}")]
    Validation { field: String, message: String },
    #[error("Not found: {resource}")]
    NotFound { resource: String },
    #[error("Conflicting update: {message}")]
    Conflict { message: String },
    #[error("Request rejected with status {status}: {message}")]
    Client { status: u16, message: String },
    #[error("Service error {status}: {message}")]
    Server { status: u16, message: String },
    #[error("Rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },
    #[error("Circuit breaker '{dependency}' is open")]
    CircuitOpen {
        dependency: String,
        retry_at: Option<DateTime<Utc>>,
    },
    #[error("Security violation: {0}")]
    Security(String),
    #[error("Data integrity failure: {0}")]
    Integrity(String),
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidConfiguration { .. } => "AUTH_CONFIG_INVALID",
            ErrorKind::NotConfigured => "AUTH_NOT_CONFIGURED",
            ErrorKind::Unauthorized { status: 403 } => "AUTH_FORBIDDEN",
            ErrorKind::Unauthorized { .. } => "AUTH_UNAUTHORIZED",
            ErrorKind::Network(_) => "NETWORK_ERROR",
            ErrorKind::Unreachable(_) => "NETWORK_UNREACHABLE",
            ErrorKind::Timeout { .. } => "NETWORK_TIMEOUT",
            ErrorKind::Validation { .. } => "VALIDATION_ERROR",
            ErrorKind::NotFound { .. } => "WORK_ITEM_NOT_FOUND",
            ErrorKind::Conflict { .. } => "WORK_ITEM_CONFLICT",
            ErrorKind::Client { .. } => "API_CLIENT_ERROR",
            ErrorKind::Server { .. } => "API_SERVER_ERROR",
            ErrorKind::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            ErrorKind::CircuitOpen { .. } => "CIRCUIT_BREAKER_OPEN",
            ErrorKind::Security(_) => "SECURITY_VIOLATION",
            ErrorKind::Integrity(_) => "DATA_INTEGRITY",
            ErrorKind::Unexpected(_) => "UNKNOWN_ERROR",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorKind::InvalidConfiguration { .. }
            | ErrorKind::NotConfigured
            | ErrorKind::Unauthorized { .. } => ErrorCategory::Auth,
            ErrorKind::Network(_) | ErrorKind::Unreachable(_) | ErrorKind::Timeout { .. } => {
                ErrorCategory::Network
            }
            ErrorKind::Validation { .. } => ErrorCategory::Validation,
            ErrorKind::NotFound { .. }
            | ErrorKind::Conflict { .. }
            | ErrorKind::Client { .. }
            | ErrorKind::Server { .. }
            | ErrorKind::CircuitOpen { .. } => ErrorCategory::Api,
            ErrorKind::RateLimited { .. } => ErrorCategory::RateLimit,
            ErrorKind::Security(_) | ErrorKind::Integrity(_) | ErrorKind::Unexpected(_) => {
                ErrorCategory::Unknown
            }
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ErrorKind::Security(_) | ErrorKind::Integrity(_) | ErrorKind::Unexpected(_) => {
                ErrorSeverity::Critical
            }
            ErrorKind::InvalidConfiguration { .. }
            | ErrorKind::NotConfigured
            | ErrorKind::Unauthorized { .. }
            | ErrorKind::Network(_)
            | ErrorKind::Unreachable(_)
            | ErrorKind::Timeout { .. }
            | ErrorKind::Server { .. }
            | ErrorKind::CircuitOpen { .. } => ErrorSeverity::High,
            ErrorKind::Validation { .. }
            | ErrorKind::NotFound { .. }
            | ErrorKind::Conflict { .. }
            | ErrorKind::Client { .. }
            | ErrorKind::RateLimited { .. } => ErrorSeverity::Medium,
        }
    }

    /// Whether the caller can eventually succeed: by correcting input,
    /// re-authenticating, refetching, or waiting.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ErrorKind::InvalidConfiguration { .. }
            | ErrorKind::NotConfigured
            | ErrorKind::Unauthorized { .. }
            | ErrorKind::Network(_)
            | ErrorKind::Unreachable(_)
            | ErrorKind::Timeout { .. }
            | ErrorKind::Validation { .. }
            | ErrorKind::Conflict { .. }
            | ErrorKind::Server { .. }
            | ErrorKind::RateLimited { .. }
            | ErrorKind::CircuitOpen { .. } => true,
            ErrorKind::NotFound { .. }
            | ErrorKind::Client { .. }
            | ErrorKind::Security(_)
            | ErrorKind::Integrity(_)
            | ErrorKind::Unexpected(_) => false,
        }
    }

    /// Whether repeating the identical request may succeed without caller action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Network(_)
                | ErrorKind::Unreachable(_)
                | ErrorKind::Timeout { .. }
                | ErrorKind::Server { .. }
                | ErrorKind::RateLimited { .. }
        )
    }

    /// Whether the failure counts against a circuit breaker. 4xx answers never do.
    pub fn trips_circuit(&self) -> bool {
        matches!(
            self,
            ErrorKind::Network(_)
                | ErrorKind::Unreachable(_)
                | ErrorKind::Timeout { .. }
                | ErrorKind::Server { .. }
                | ErrorKind::RateLimited { .. }
                | ErrorKind::Unexpected(_)
        )
    }

    /// Maps a non-success HTTP status onto a kind.
    pub fn from_status(status: u16, message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => ErrorKind::Unauthorized { status },
            404 => ErrorKind::NotFound { resource: message },
            409 | 412 => ErrorKind::Conflict { message },
            429 => ErrorKind::RateLimited { retry_after },
            400..=499 => ErrorKind::Client { status, message },
            500..=599 => ErrorKind::Server { status, message },
            _ => ErrorKind::Unexpected(format!("unexpected status {}: {}", status, message)),
        }
    }
}

/// Where and when a failure happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    pub operation: String,
    pub work_item_id: Option<i64>,
    pub status_code: Option<u16>,
    pub retry_count: Option<u32>,
    pub retry_after: Option<Duration>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            work_item_id: None,
            status_code: None,
            retry_count: None,
            retry_after: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_work_item(mut self, id: i64) -> Self {
        self.work_item_id = Some(id);
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }
}

/// A categorized failure ready to be logged and shown to a human.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[error("{kind}")]
pub struct AgentError {
    pub kind: ErrorKind,
    pub context: ErrorContext,
    pub user_message: String,
}

impl AgentError {
    pub fn new(kind: ErrorKind, context: ErrorContext) -> Self {
        let mut context = context;
        if let ErrorKind::RateLimited { retry_after } = &kind {
            context.retry_after = context.retry_after.or(*retry_after);
        }
        let mut error = Self {
            kind,
            context,
            user_message: String::new(),
        };
        error.user_message = super::messages::UserMessageGenerator::generate_user_message(
            &error,
            super::messages::Audience::EndUser,
        )
        .to_string();
        error
    }

    pub fn validation(
        operation: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            ErrorKind::Validation {
                field: field.into(),
                message: message.into(),
            },
            ErrorContext::new(operation),
        )
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    pub fn severity(&self) -> ErrorSeverity {
        self.kind.severity()
    }

    pub fn is_recoverable(&self) -> bool {
        self.kind.is_recoverable()
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.context.operation = operation.into();
        self
    }

    pub fn with_work_item(mut self, id: i64) -> Self {
        self.context.work_item_id = Some(id);
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.context.retry_count = Some(retry_count);
        self
    }
}

/// Exponential backoff policy: the delay after failed attempt `n` (1-based) is
/// `min(base_delay * exponential_base^(n-1), max_delay)`, optionally jittered.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    /// Relative jitter in `[0, 1)`; `0.0` yields exact delays.
    pub jitter: f64,
}

impl RetryConfig {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let raw = self.base_delay.as_secs_f64() * self.exponential_base.powi(exponent);
        let capped = raw.min(self.max_delay.as_secs_f64());

        let jittered = if self.jitter > 0.0 {
            let spread = (rand::random::<f64>() * 2.0 - 1.0) * self.jitter;
            (capped * (1.0 + spread)).min(self.max_delay.as_secs_f64())
        } else {
            capped
        };

        Duration::try_from_secs_f64(jittered.max(0.0)).unwrap_or(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            exponential_base: 2.0,
            jitter: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    pub success: bool,
    pub data: Option<T>,
    pub attempt_count: u32,
    pub total_duration: Duration,
    pub error: Option<AgentError>,
}

#[derive(Debug, Clone)]
pub struct FallbackOptions {
    pub timeout: Duration,
}

impl Default for FallbackOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FallbackOutcome<T> {
    pub result: Result<T, AgentError>,
    pub used_fallback: bool,
    /// Why the primary was abandoned, when the fallback ran.
    pub primary_error: Option<AgentError>,
}
