pub mod types;
pub mod transport;
pub mod rate_limiter;
pub mod circuit_breaker;
pub mod metrics;
pub mod interface;


pub use types::*;
pub use transport::{HttpMethod, HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError};
pub use rate_limiter::{RateLimiter, RateLimiterStatus, RatePermit};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerSnapshot, CircuitState};
pub use metrics::{MetricsSummary, PerformanceMonitor};
pub use interface::{ApiClient, ApiRequest};
