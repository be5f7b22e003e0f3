use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
}

/// One timed operation, kept in a [`PerformanceMonitor`](crate::client::PerformanceMonitor) ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetric {
    pub operation: String,
    pub duration: Duration,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub success_rate: f64,
    pub average_response_time: Duration,
    pub circuit_breaker_open: bool,
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
}

/// Successful response of one logical API call.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: serde_json::Value,
    pub attempts: u32,
    pub duration: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 200,
            window: Duration::from_secs(60),
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}
