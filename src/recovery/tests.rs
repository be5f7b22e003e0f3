use super::*;
use crate::client::circuit_breaker::CircuitState;
use crate::client::transport::TransportError;
use crate::client::types::CircuitBreakerConfig;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        exponential_base: 2.0,
        jitter: 0.0,
    }
}

fn server_unavailable() -> AgentError {
    AgentError::new(
        ErrorKind::from_status(503, "Service Unavailable", None),
        ErrorContext::new("get_work_item").with_status(503),
    )
}

fn handler() -> ErrorHandler {
    ErrorHandler::new(CircuitBreakerConfig {
        failure_threshold: 3,
        reset_timeout: Duration::from_secs(60),
    })
}

#[test]
fn test_backoff_delays_are_capped() {
    let config = RetryConfig {
        max_attempts: 10,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(1000),
        exponential_base: 2.0,
        jitter: 0.0,
    };
    assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
    assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
    assert_eq!(config.delay_for_attempt(4), Duration::from_millis(800));
    assert_eq!(config.delay_for_attempt(5), Duration::from_millis(1000));
    assert_eq!(config.delay_for_attempt(40), Duration::from_millis(1000));
}

#[test]
fn test_jittered_delay_stays_within_bounds() {
    let config = RetryConfig {
        jitter: 0.5,
        ..fast_retry(3)
    };
    for _ in 0..50 {
        let delay = config.delay_for_attempt(2);
        assert!(delay <= config.max_delay);
        assert!(delay >= Duration::from_millis(5));
    }
}

#[test]
fn test_category_severity_mapping() {
    let cases = [
        (ErrorKind::Unauthorized { status: 401 }, ErrorCategory::Auth, ErrorSeverity::High),
        (ErrorKind::Network("reset".into()), ErrorCategory::Network, ErrorSeverity::High),
        (
            ErrorKind::Validation {
                field: "System.Title".into(),
                message: "required".into(),
            },
            ErrorCategory::Validation,
            ErrorSeverity::Medium,
        ),
        (
            ErrorKind::from_status(500, "boom", None),
            ErrorCategory::Api,
            ErrorSeverity::High,
        ),
        (
            ErrorKind::from_status(400, "bad", None),
            ErrorCategory::Api,
            ErrorSeverity::Medium,
        ),
        (
            ErrorKind::RateLimited { retry_after: None },
            ErrorCategory::RateLimit,
            ErrorSeverity::Medium,
        ),
        (ErrorKind::Security("tampered".into()), ErrorCategory::Unknown, ErrorSeverity::Critical),
        (ErrorKind::Unexpected("?".into()), ErrorCategory::Unknown, ErrorSeverity::Critical),
    ];

    for (kind, category, severity) in cases {
        assert_eq!(kind.category(), category, "{:?}", kind);
        assert_eq!(kind.severity(), severity, "{:?}", kind);
    }
}

#[test]
fn test_recoverability_follows_kind() {
    assert!(!ErrorKind::from_status(404, "#7", None).is_recoverable());
    assert!(ErrorKind::from_status(409, "stale", None).is_recoverable());
    assert!(ErrorKind::from_status(503, "down", None).is_recoverable());
    assert!(
        ErrorKind::CircuitOpen {
            dependency: "wit".into(),
            retry_at: None
        }
        .is_recoverable()
    );
    assert!(!ErrorKind::from_status(404, "#7", None).trips_circuit());
}

#[test]
fn test_categorize_transport_and_io_errors() {
    let handler = handler();

    let timeout = TransportError::Timeout(Duration::from_secs(5));
    let error = handler.categorize_error(&timeout, ErrorContext::new("get_work_item"));
    assert_eq!(error.code(), "NETWORK_TIMEOUT");

    let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
    let error = handler.categorize_error(&refused, ErrorContext::new("create_work_item"));
    assert_eq!(error.code(), "NETWORK_UNREACHABLE");
    assert_eq!(error.category(), ErrorCategory::Network);

    let json = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
    let error = handler.categorize_error(&json, ErrorContext::new("get_work_item"));
    assert_eq!(error.code(), "DATA_INTEGRITY");
    assert_eq!(error.severity(), ErrorSeverity::Critical);
}

#[test]
fn test_transport_errors_convert_to_kinds() {
    let kind = ErrorKind::from(TransportError::Timeout(Duration::from_secs(2)));
    assert_eq!(kind, ErrorKind::Timeout { after: Duration::from_secs(2) });
    assert_eq!(kind.code(), "NETWORK_TIMEOUT");

    let kind = ErrorKind::from(TransportError::Connect("refused".to_string()));
    assert_eq!(kind.code(), "NETWORK_UNREACHABLE");
    assert!(kind.is_retryable());

    let kind = ErrorKind::from(TransportError::Other("reset by peer".to_string()));
    assert_eq!(kind, ErrorKind::Network("reset by peer".to_string()));
}

#[test]
fn test_categorize_uses_status_then_message() {
    let handler = handler();

    let raw = std::fmt::Error;
    let error = handler.categorize_error(&raw, ErrorContext::new("update_work_item").with_status(409));
    assert_eq!(error.code(), "WORK_ITEM_CONFLICT");

    let raw = anyhow::anyhow!("401 Unauthorized: token expired");
    let error = handler.categorize_error(raw.as_ref(), ErrorContext::new("validate"));
    assert_eq!(error.category(), ErrorCategory::Auth);

    let raw = anyhow::anyhow!("something odd happened");
    let error = handler.categorize_error(raw.as_ref(), ErrorContext::new("validate"));
    assert_eq!(error.code(), "UNKNOWN_ERROR");
    assert_eq!(error.severity(), ErrorSeverity::Critical);
}

#[test]
fn test_categorize_passes_agent_errors_through() {
    let handler = handler();
    let original = server_unavailable();
    let wrapped = anyhow::Error::new(original.clone()).context("while loading backlog");

    let error = handler.categorize_error(
        wrapped.as_ref(),
        ErrorContext::new("load_backlog").with_work_item(42),
    );
    assert_eq!(error.kind, original.kind);
    assert_eq!(error.context.work_item_id, Some(42));
}

#[tokio::test]
async fn test_retry_succeeds_after_transient_failures() {
    // Three 503 answers followed by a success, with five attempts allowed.
    let handler = handler();
    let calls = AtomicU32::new(0);

    let outcome = handler
        .retry_operation(
            || {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if call <= 3 {
                        Err(server_unavailable())
                    } else {
                        Ok("ok")
                    }
                }
            },
            &fast_retry(5),
        )
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.attempt_count, 4);
    assert_eq!(outcome.data, Some("ok"));
    assert!(outcome.error.is_none());
}

#[tokio::test]
async fn test_retry_exhausts_attempts() {
    let handler = handler();
    let calls = AtomicU32::new(0);

    let outcome: RetryOutcome<()> = handler
        .retry_operation(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(server_unavailable()) }
            },
            &fast_retry(3),
        )
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.attempt_count, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let error = outcome.error.unwrap();
    assert_eq!(error.code(), "API_SERVER_ERROR");
    assert_eq!(error.context.retry_count, Some(2));
}

#[tokio::test]
async fn test_retry_stops_on_non_retryable() {
    let handler = handler();
    let calls = AtomicU32::new(0);

    let outcome: RetryOutcome<()> = handler
        .retry_operation(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AgentError::validation("create_work_item", "System.Title", "required")) }
            },
            &fast_retry(5),
        )
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.attempt_count, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retry_honours_retry_after() {
    let handler = handler();
    let calls = AtomicU32::new(0);
    let started = std::time::Instant::now();

    let outcome = handler
        .retry_operation(
            || {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call == 0 {
                        Err(AgentError::new(
                            ErrorKind::RateLimited {
                                retry_after: Some(Duration::from_millis(150)),
                            },
                            ErrorContext::new("get_work_item").with_status(429),
                        ))
                    } else {
                        Ok(call)
                    }
                }
            },
            &RetryConfig {
                max_delay: Duration::from_millis(500),
                ..fast_retry(3)
            },
        )
        .await;

    assert!(outcome.success);
    assert!(started.elapsed() >= Duration::from_millis(150));
}

#[tokio::test]
async fn test_retry_after_beyond_max_delay_gives_up() {
    let handler = handler();
    let calls = AtomicU32::new(0);

    let outcome = tokio::time::timeout(
        Duration::from_secs(3),
        handler.retry_operation(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(AgentError::new(
                        ErrorKind::RateLimited {
                            retry_after: Some(Duration::from_secs(3600)),
                        },
                        ErrorContext::new("get_work_item").with_status(429),
                    ))
                }
            },
            &fast_retry(3),
        ),
    )
    .await
    .expect("a long Retry-After must not park the caller");

    assert!(!outcome.success);
    assert_eq!(outcome.attempt_count, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let error = outcome.error.unwrap();
    assert_eq!(error.code(), "RATE_LIMIT_EXCEEDED");
    assert_eq!(error.context.retry_after, Some(Duration::from_secs(3600)));
}

#[tokio::test]
async fn test_fallback_on_timeout() {
    let handler = handler();
    let options = FallbackOptions {
        timeout: Duration::from_millis(50),
    };

    let outcome = handler
        .with_fallback(
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok("primary")
            },
            || async { Ok("cached") },
            &options,
        )
        .await;

    assert!(outcome.used_fallback);
    assert_eq!(outcome.result.unwrap(), "cached");
    assert_eq!(outcome.primary_error.unwrap().code(), "NETWORK_TIMEOUT");
}

#[tokio::test]
async fn test_fallback_not_used_when_primary_succeeds() {
    let handler = handler();
    let outcome = handler
        .with_fallback(
            async { Ok(1) },
            || async { Ok(2) },
            &FallbackOptions::default(),
        )
        .await;

    assert!(!outcome.used_fallback);
    assert_eq!(outcome.result.unwrap(), 1);
    assert!(outcome.primary_error.is_none());
}

#[tokio::test]
async fn test_fallback_on_primary_error() {
    let handler = handler();
    let outcome = handler
        .with_fallback(
            async { Err::<u32, _>(server_unavailable()) },
            || async { Ok(7) },
            &FallbackOptions::default(),
        )
        .await;

    assert!(outcome.used_fallback);
    assert_eq!(outcome.result.unwrap(), 7);
    assert_eq!(handler.error_statistics().total_errors, 1);
}

#[tokio::test]
async fn test_registry_returns_shared_breaker() {
    let handler = handler();
    let first = handler.circuit_breaker("work-item-tracking");
    let second = handler.circuit_breaker("work-item-tracking");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(handler.circuit_breaker_names(), vec!["work-item-tracking".to_string()]);
}

#[tokio::test]
async fn test_export_import_restores_open_circuit() {
    let source = handler();
    let breaker = source.circuit_breaker("work-item-tracking");
    for _ in 0..3 {
        let _ = breaker.execute(|| async { Err::<(), _>(server_unavailable()) }).await;
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    let snapshot = source.export_state();
    let encoded = serde_json::to_string(&snapshot).unwrap();
    let decoded: RecoverySnapshot = serde_json::from_str(&encoded).unwrap();
    assert_eq!(decoded, snapshot);

    let restarted = handler();
    restarted.import_state(&decoded);
    let restored = restarted.circuit_breaker("work-item-tracking");
    assert!(restored.is_open());
    assert_eq!(restored.failure_count(), 3);

    let invoked = AtomicU32::new(0);
    let result = restored
        .execute(|| async {
            invoked.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;
    assert_eq!(result.unwrap_err().code(), "CIRCUIT_BREAKER_OPEN");
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_execute_with_recovery_stops_at_open_circuit() {
    let handler = handler();
    let calls = AtomicU32::new(0);

    let result: Result<(), AgentError> = handler
        .execute_with_recovery(
            "flaky",
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(server_unavailable()) }
            },
            &fast_retry(5),
        )
        .await;

    // Three failures open the circuit; the fourth attempt is rejected without a call.
    assert_eq!(result.unwrap_err().code(), "CIRCUIT_BREAKER_OPEN");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(handler.error_statistics().total_errors, 1);
}
