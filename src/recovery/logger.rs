//! Sanitizing sink for categorized failures.
//!
//! Every [`AgentError`] passing through [`ErrorLogger::log_error`] is scrubbed of
//! credential-shaped text before it is emitted as a structured `tracing` event
//! and appended to a bounded in-memory history used for statistics.

use crate::recovery::types::{AgentError, ErrorCategory, ErrorSeverity};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{LazyLock, Mutex};
use tracing::{error, info, warn};

/// Entries kept for statistics; the oldest is evicted first.
pub const MAX_LOGGED_ERRORS: usize = 100;

const REDACTED: &str = "[REDACTED]";

static URL_CREDENTIALS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b([a-z][a-z0-9+.-]*://)[^/\s:@]+(?::[^/\s@]*)?@")
        .expect("valid url credential pattern")
});

static KEY_VALUE_SECRET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(token|password|passwd|pwd|secret|api[_-]?key|key|pat|authorization)(\s*[=:]\s*)("[^"]*"|'[^']*'|[^\s&,;]+)"#)
        .expect("valid key/value pattern")
});

static AUTH_SCHEME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(basic|bearer)\s+[A-Za-z0-9+/=._-]+").expect("valid auth scheme pattern")
});

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid email pattern")
});

static LONG_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9+/_=-]{20,}").expect("valid long token pattern"));

/// Strips credentials, secrets, e-mail addresses and long opaque tokens.
pub fn sanitize_message(message: &str) -> String {
    let sanitized = URL_CREDENTIALS.replace_all(message, format!("${{1}}{}@", REDACTED));
    let sanitized = KEY_VALUE_SECRET.replace_all(&sanitized, format!("${{1}}${{2}}{}", REDACTED));
    let sanitized = AUTH_SCHEME.replace_all(&sanitized, format!("${{1}} {}", REDACTED));
    let sanitized = EMAIL.replace_all(&sanitized, "[EMAIL]");
    let sanitized = LONG_TOKEN.replace_all(&sanitized, REDACTED);
    sanitized.into_owned()
}

/// A sanitized record of one logged failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggedError {
    pub code: String,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub operation: String,
    pub work_item_id: Option<i64>,
    pub status_code: Option<u16>,
    pub recoverable: bool,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorStatistics {
    pub total_errors: usize,
    pub by_category: HashMap<ErrorCategory, usize>,
    pub by_severity: HashMap<ErrorSeverity, usize>,
    pub most_frequent_code: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct ErrorLogger {
    history: Mutex<VecDeque<LoggedError>>,
}

impl ErrorLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sanitizes, emits and records `error`, returning the stored entry.
    pub fn log_error(&self, error: &AgentError) -> LoggedError {
        let entry = LoggedError {
            code: error.code().to_string(),
            category: error.category(),
            severity: error.severity(),
            operation: error.context.operation.clone(),
            work_item_id: error.context.work_item_id,
            status_code: error.context.status_code,
            recoverable: error.is_recoverable(),
            message: sanitize_message(&error.to_string()),
            timestamp: error.context.timestamp,
        };

        match entry.severity {
            ErrorSeverity::Critical | ErrorSeverity::High => error!(
                code = %entry.code,
                category = %entry.category,
                severity = %entry.severity,
                operation = %entry.operation,
                work_item_id = ?entry.work_item_id,
                status_code = ?entry.status_code,
                recoverable = entry.recoverable,
                "{}",
                entry.message
            ),
            ErrorSeverity::Medium => warn!(
                code = %entry.code,
                category = %entry.category,
                severity = %entry.severity,
                operation = %entry.operation,
                work_item_id = ?entry.work_item_id,
                status_code = ?entry.status_code,
                recoverable = entry.recoverable,
                "{}",
                entry.message
            ),
            ErrorSeverity::Low => info!(
                code = %entry.code,
                category = %entry.category,
                severity = %entry.severity,
                operation = %entry.operation,
                work_item_id = ?entry.work_item_id,
                status_code = ?entry.status_code,
                recoverable = entry.recoverable,
                "{}",
                entry.message
            ),
        }

        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        if history.len() >= MAX_LOGGED_ERRORS {
            history.pop_front();
        }
        history.push_back(entry.clone());

        entry
    }

    pub fn get_error_statistics(&self) -> ErrorStatistics {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let mut stats = ErrorStatistics {
            total_errors: history.len(),
            ..Default::default()
        };

        let mut code_counts: HashMap<&str, usize> = HashMap::new();
        for entry in history.iter() {
            *stats.by_category.entry(entry.category).or_insert(0) += 1;
            *stats.by_severity.entry(entry.severity).or_insert(0) += 1;
            *code_counts.entry(entry.code.as_str()).or_insert(0) += 1;
        }

        // Ties go to the code seen most recently.
        let mut best: Option<(&str, usize)> = None;
        for entry in history.iter().rev() {
            let count = code_counts[entry.code.as_str()];
            if best.is_none_or(|(_, best_count)| count > best_count) {
                best = Some((entry.code.as_str(), count));
            }
        }
        stats.most_frequent_code = best.map(|(code, _)| code.to_string());
        stats.last_error_at = history.back().map(|entry| entry.timestamp);

        stats
    }

    pub fn recent_errors(&self, limit: usize) -> Vec<LoggedError> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.iter().rev().take(limit).cloned().collect()
    }

    pub fn clear(&self) {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}
