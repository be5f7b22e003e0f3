use crate::client::circuit_breaker::{CircuitBreaker, CircuitBreakerSnapshot};
use crate::client::transport::TransportError;
use crate::client::types::CircuitBreakerConfig;
use crate::recovery::logger::{ErrorLogger, ErrorStatistics};
use crate::recovery::types::{
    AgentError, ErrorContext, ErrorKind, FallbackOptions, FallbackOutcome, RetryConfig,
    RetryOutcome,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Serializable state of every registered circuit breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoverySnapshot {
    pub exported_at: DateTime<Utc>,
    pub circuit_breakers: Vec<CircuitBreakerSnapshot>,
}

/// Categorizes failures, runs retry and fallback policies and owns one
/// [`CircuitBreaker`] per downstream dependency.
#[derive(Debug)]
pub struct ErrorHandler {
    default_breaker_config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    logger: Arc<ErrorLogger>,
}

impl ErrorHandler {
    pub fn new(default_breaker_config: CircuitBreakerConfig) -> Self {
        Self::with_logger(default_breaker_config, Arc::new(ErrorLogger::new()))
    }

    pub fn with_logger(default_breaker_config: CircuitBreakerConfig, logger: Arc<ErrorLogger>) -> Self {
        Self {
            default_breaker_config,
            breakers: DashMap::new(),
            logger,
        }
    }

    pub fn logger(&self) -> &Arc<ErrorLogger> {
        &self.logger
    }

    pub fn error_statistics(&self) -> ErrorStatistics {
        self.logger.get_error_statistics()
    }

    /// Maps an arbitrary failure onto the closed [`ErrorKind`] taxonomy.
    ///
    /// The source chain is searched for known error types first; the status
    /// code in `context` and finally the message text are used when none match.
    pub fn categorize_error(&self, error: &(dyn Error + 'static), context: ErrorContext) -> AgentError {
        let mut current: Option<&(dyn Error + 'static)> = Some(error);
        while let Some(candidate) = current {
            if let Some(known) = candidate.downcast_ref::<AgentError>() {
                let mut categorized = known.clone();
                if categorized.context.work_item_id.is_none() {
                    categorized.context.work_item_id = context.work_item_id;
                }
                if categorized.context.status_code.is_none() {
                    categorized.context.status_code = context.status_code;
                }
                return categorized;
            }
            if let Some(kind) = Self::kind_from_known(candidate, &context) {
                return AgentError::new(kind, context);
            }
            current = candidate.source();
        }

        let message = error.to_string();
        let kind = match context.status_code {
            Some(status) if status >= 400 => {
                ErrorKind::from_status(status, message, context.retry_after)
            }
            _ => Self::kind_from_message(message),
        };
        AgentError::new(kind, context)
    }

    fn kind_from_known(error: &(dyn Error + 'static), context: &ErrorContext) -> Option<ErrorKind> {
        if let Some(transport) = error.downcast_ref::<TransportError>() {
            return Some(transport.clone().into());
        }

        if let Some(http) = error.downcast_ref::<reqwest::Error>() {
            let message = http.to_string();
            return Some(if let Some(status) = http.status() {
                ErrorKind::from_status(status.as_u16(), message, context.retry_after)
            } else if http.is_connect() {
                ErrorKind::Unreachable(message)
            } else if http.is_decode() {
                ErrorKind::Integrity(message)
            } else {
                ErrorKind::Network(message)
            });
        }

        if let Some(io) = error.downcast_ref::<std::io::Error>() {
            use std::io::ErrorKind as Io;
            return Some(match io.kind() {
                Io::ConnectionRefused | Io::AddrNotAvailable => ErrorKind::Unreachable(io.to_string()),
                Io::TimedOut
                | Io::ConnectionReset
                | Io::ConnectionAborted
                | Io::NotConnected
                | Io::BrokenPipe => ErrorKind::Network(io.to_string()),
                Io::PermissionDenied => ErrorKind::Security(io.to_string()),
                Io::InvalidData | Io::UnexpectedEof => ErrorKind::Integrity(io.to_string()),
                _ => return None,
            });
        }

        if let Some(json) = error.downcast_ref::<serde_json::Error>() {
            return Some(ErrorKind::Integrity(format!("malformed payload: {}", json)));
        }

        None
    }

    fn kind_from_message(message: String) -> ErrorKind {
        let lower = message.to_lowercase();
        let mentions = |needles: &[&str]| needles.iter().any(|needle| lower.contains(needle));

        if mentions(&["unauthorized", "authentication failed", "invalid credentials"]) {
            ErrorKind::Unauthorized { status: 401 }
        } else if mentions(&["forbidden", "access denied"]) {
            ErrorKind::Unauthorized { status: 403 }
        } else if mentions(&["too many requests", "rate limit", "throttl"]) {
            ErrorKind::RateLimited { retry_after: None }
        } else if mentions(&["connection refused", "econnrefused", "dns", "host not found"]) {
            ErrorKind::Unreachable(message)
        } else if mentions(&["timed out", "timeout", "network", "connection", "socket"]) {
            ErrorKind::Network(message)
        } else if mentions(&["security", "injection", "tamper", "csrf"]) {
            ErrorKind::Security(message)
        } else if mentions(&["integrity", "checksum", "corrupt"]) {
            ErrorKind::Integrity(message)
        } else {
            ErrorKind::Unexpected(message)
        }
    }

    /// Logs `error` through the sanitizing logger and hands it back.
    pub fn handle_error(&self, error: AgentError) -> AgentError {
        self.logger.log_error(&error);
        error
    }

    pub async fn retry_operation<T, F, Fut>(&self, operation: F, config: &RetryConfig) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        retry_with(operation, config, AgentError::is_retryable).await
    }

    /// Runs `primary` bounded by `options.timeout`; on failure or timeout runs `fallback`.
    ///
    /// A timed-out primary is dropped locally; a request it already sent may still
    /// complete on the server.
    pub async fn with_fallback<T, P, F, FFut>(
        &self,
        primary: P,
        fallback: F,
        options: &FallbackOptions,
    ) -> FallbackOutcome<T>
    where
        P: Future<Output = Result<T, AgentError>>,
        F: FnOnce() -> FFut,
        FFut: Future<Output = Result<T, AgentError>>,
    {
        let primary_error = match tokio::time::timeout(options.timeout, primary).await {
            Ok(Ok(value)) => {
                return FallbackOutcome {
                    result: Ok(value),
                    used_fallback: false,
                    primary_error: None,
                };
            }
            Ok(Err(error)) => error,
            Err(_) => AgentError::new(
                ErrorKind::Timeout {
                    after: options.timeout,
                },
                ErrorContext::new("with_fallback"),
            ),
        };

        warn!(code = primary_error.code(), "Primary operation failed, using fallback");
        self.logger.log_error(&primary_error);

        FallbackOutcome {
            result: fallback().await,
            used_fallback: true,
            primary_error: Some(primary_error),
        }
    }

    /// Breaker registered under `name`, created with the default config on first use.
    pub fn circuit_breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        self.circuit_breaker_with(name, self.default_breaker_config.clone())
    }

    /// Like [`circuit_breaker`](Self::circuit_breaker); `config` only applies if the breaker is new.
    pub fn circuit_breaker_with(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(breaker = name, "Registering circuit breaker");
                Arc::new(CircuitBreaker::new(name, config))
            })
            .value()
            .clone()
    }

    /// Registers an existing breaker, replacing any breaker of the same name.
    pub fn register_circuit_breaker(&self, breaker: Arc<CircuitBreaker>) {
        self.breakers.insert(breaker.name().to_string(), breaker);
    }

    pub fn circuit_breaker_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn export_state(&self) -> RecoverySnapshot {
        let mut circuit_breakers: Vec<CircuitBreakerSnapshot> = self
            .breakers
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        circuit_breakers.sort_by(|a, b| a.name.cmp(&b.name));

        RecoverySnapshot {
            exported_at: Utc::now(),
            circuit_breakers,
        }
    }

    pub fn import_state(&self, snapshot: &RecoverySnapshot) {
        for breaker_snapshot in &snapshot.circuit_breakers {
            self.circuit_breaker(&breaker_snapshot.name)
                .restore(breaker_snapshot);
        }
        info!(
            breakers = snapshot.circuit_breakers.len(),
            exported_at = %snapshot.exported_at,
            "Recovery state restored"
        );
    }

    /// Retries `operation` through the breaker named `name`. A failure that
    /// survives every attempt is logged before it is returned.
    pub async fn execute_with_recovery<T, F, Fut>(
        &self,
        name: &str,
        mut operation: F,
        config: &RetryConfig,
    ) -> Result<T, AgentError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        let breaker = self.circuit_breaker(name);
        let outcome = retry_with(
            || {
                let attempt = operation();
                let breaker = Arc::clone(&breaker);
                async move { breaker.execute(|| attempt).await }
            },
            config,
            AgentError::is_retryable,
        )
        .await;

        match (outcome.data, outcome.error) {
            (Some(data), _) => Ok(data),
            (None, Some(error)) => Err(self.handle_error(error)),
            (None, None) => Err(self.handle_error(AgentError::new(
                ErrorKind::Unexpected("operation produced neither data nor error".to_string()),
                ErrorContext::new(name),
            ))),
        }
    }
}

/// Exponential-backoff retry loop shared by [`ErrorHandler`] and the API client.
///
/// `should_retry` decides whether a failure is worth another attempt; the loop
/// also stops after `config.max_attempts`. A rate-limit failure carrying
/// `retry_after` waits that long instead of the computed backoff, unless the
/// server asks for more than `config.max_delay`, in which case the error is
/// returned right away.
pub async fn retry_with<T, F, Fut, P>(
    mut operation: F,
    config: &RetryConfig,
    should_retry: P,
) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AgentError>>,
    P: Fn(&AgentError) -> bool,
{
    let started = Instant::now();
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(data) => {
                if attempt > 1 {
                    debug!(attempt, "Operation succeeded after retry");
                }
                return RetryOutcome {
                    success: true,
                    data: Some(data),
                    attempt_count: attempt,
                    total_duration: started.elapsed(),
                    error: None,
                };
            }
            Err(error) => {
                let delay = match error.kind {
                    ErrorKind::RateLimited {
                        retry_after: Some(retry_after),
                    } => retry_after,
                    _ => config.delay_for_attempt(attempt),
                };
                let wait_too_long = delay > config.max_delay;
                if wait_too_long {
                    debug!(
                        delay_ms = delay.as_millis() as u64,
                        max_delay_ms = config.max_delay.as_millis() as u64,
                        "Retry-After exceeds max delay, giving up"
                    );
                }

                if attempt >= max_attempts || wait_too_long || !should_retry(&error) {
                    return RetryOutcome {
                        success: false,
                        data: None,
                        attempt_count: attempt,
                        total_duration: started.elapsed(),
                        error: Some(error.with_retry_count(attempt - 1)),
                    };
                }

                warn!(
                    attempt,
                    max_attempts,
                    code = error.code(),
                    delay_ms = delay.as_millis() as u64,
                    "Attempt failed, retrying"
                );
                if delay > Duration::ZERO {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
