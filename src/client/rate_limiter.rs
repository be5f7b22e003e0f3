use crate::client::types::RateLimitConfig;
use crate::env;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Token bucket shared by every outbound call.
///
/// Tokens refill continuously at `capacity / window`. A log of recent grant
/// instants additionally guarantees that no interval of length `window` ever
/// contains more than `capacity` grants, even right after a full burst.
#[derive(Debug)]
pub struct RateLimiter {
    state: Arc<Mutex<RateLimiterState>>,
}

#[derive(Debug)]
struct RateLimiterState {
    capacity: u32,
    window: Duration,
    tokens: f64,
    last_refill: Instant,
    /// Set when the service reported its own counters; no local refill happens before it.
    server_reset: Option<Instant>,
    grants: VecDeque<Instant>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatePermit {
    pub granted_at: DateTime<Utc>,
    pub waited: Duration,
    pub permit_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterStatus {
    pub available_tokens: u32,
    pub capacity: u32,
    pub window: Duration,
    pub server_reset_in: Option<Duration>,
}

impl RateLimiterState {
    fn refill(&mut self, now: Instant) {
        if let Some(reset) = self.server_reset {
            if now < reset {
                return;
            }
            self.tokens = self.capacity as f64;
            self.last_refill = reset;
            self.server_reset = None;
        }

        let elapsed = now.saturating_duration_since(self.last_refill);
        let rate = self.capacity as f64 / self.window.as_secs_f64();
        self.tokens = (self.tokens + elapsed.as_secs_f64() * rate).min(self.capacity as f64);
        self.last_refill = now;
    }

    fn prune_grants(&mut self, now: Instant) {
        while let Some(oldest) = self.grants.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                self.grants.pop_front();
            } else {
                break;
            }
        }
    }

    /// Consumes a token, or returns how long to wait before trying again.
    fn try_acquire(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        self.prune_grants(now);

        let window_full = self.grants.len() >= self.capacity as usize;
        if self.tokens >= 1.0 && !window_full {
            self.tokens -= 1.0;
            self.grants.push_back(now);
            return Ok(());
        }

        let per_token = self.window / self.capacity.max(1);
        let wait = match self.grants.front() {
            Some(oldest) if window_full => (*oldest + self.window).saturating_duration_since(now),
            _ => per_token,
        };
        Err(wait.max(Duration::from_millis(1)))
    }
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let capacity = config.max_requests.max(1);
        let window = if config.window.is_zero() {
            Duration::from_millis(1)
        } else {
            config.window
        };

        let state = RateLimiterState {
            capacity,
            window,
            tokens: capacity as f64,
            last_refill: Instant::now(),
            server_reset: None,
            grants: VecDeque::with_capacity(capacity as usize),
        };

        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Waits until a token is available and consumes it.
    pub async fn acquire(&self) -> RatePermit {
        let started = Instant::now();
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                match state.try_acquire(Instant::now()) {
                    Ok(()) => {
                        return RatePermit {
                            granted_at: Utc::now(),
                            waited: started.elapsed(),
                            permit_id: Uuid::new_v4(),
                        };
                    }
                    Err(wait) => wait,
                }
            };

            trace!(wait_ms = wait.as_millis() as u64, "Rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Consumes a token only if one is available right now.
    pub async fn try_acquire(&self) -> Option<RatePermit> {
        let mut state = self.state.lock().await;
        state.try_acquire(Instant::now()).ok().map(|_| RatePermit {
            granted_at: Utc::now(),
            waited: Duration::ZERO,
            permit_id: Uuid::new_v4(),
        })
    }

    /// Resynchronizes with counters reported by the service, which take
    /// precedence over the local estimate.
    ///
    /// A reset already in the past refills locally right away; one further out
    /// than [`env::api::MAX_RATE_LIMIT_RESET_SECS`] is ignored.
    pub async fn update_from_server_headers(
        &self,
        remaining: u32,
        reset_epoch: Option<i64>,
        limit: Option<u32>,
    ) {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        if let Some(limit) = limit.filter(|l| *l > 0) {
            state.capacity = limit;
        }
        state.tokens = remaining.min(state.capacity) as f64;
        state.last_refill = now;

        let seconds_until_reset =
            reset_epoch.map(|epoch| epoch.saturating_sub(Utc::now().timestamp()));
        state.server_reset = match seconds_until_reset {
            Some(secs) if secs > env::api::MAX_RATE_LIMIT_RESET_SECS as i64 => {
                warn!(
                    reset_epoch = ?reset_epoch,
                    reset_in_secs = secs,
                    "Ignoring out-of-range rate limit reset, refilling locally"
                );
                None
            }
            Some(secs) if secs > 0 => Some(now + Duration::from_secs(secs as u64)),
            _ => None,
        };

        debug!(
            remaining,
            capacity = state.capacity,
            reset_in_secs = ?seconds_until_reset,
            "Rate limiter resynchronized from server headers"
        );
    }

    pub async fn status(&self) -> RateLimiterStatus {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.refill(now);
        RateLimiterStatus {
            available_tokens: state.tokens.floor() as u32,
            capacity: state.capacity,
            window: state.window,
            server_reset_in: state
                .server_reset
                .map(|reset| reset.saturating_duration_since(now)),
        }
    }
}
