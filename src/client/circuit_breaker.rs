use crate::client::types::CircuitBreakerConfig;
use crate::recovery::types::{AgentError, ErrorContext, ErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Plain, serializable copy of a breaker's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub next_attempt_time: Option<DateTime<Utc>>,
}

/// Failure state machine guarding one downstream dependency.
///
/// The state lock is never held across an `.await`; callers that arrive while
/// the single half-open trial is running wait on `trial_finished`.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    trial_finished: Notify,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<DateTime<Utc>>,
    next_attempt_time: Option<DateTime<Utc>>,
    trial_in_flight: bool,
}

enum Admission {
    Normal,
    Trial,
}

/// Re-opens the circuit if a trial future is dropped before it completes.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        {
            let mut state = self.breaker.lock();
            state.state = CircuitState::Open;
            state.next_attempt_time = Some(Utc::now());
            state.trial_in_flight = false;
        }
        warn!(breaker = %self.breaker.name, "Half-open trial abandoned, circuit re-opened");
        self.breaker.trial_finished.notify_waiters();
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_time: None,
                next_attempt_time: None,
                trial_in_flight: false,
            }),
            trial_finished: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Runs `operation` once if the circuit admits it.
    ///
    /// While open, the call fails with `CIRCUIT_BREAKER_OPEN` and `operation`
    /// is never invoked.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, AgentError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        match self.admit().await? {
            Admission::Normal => {
                let result = operation().await;
                self.record(&result, false);
                result
            }
            Admission::Trial => {
                let mut guard = TrialGuard {
                    breaker: self,
                    armed: true,
                };
                let result = operation().await;
                guard.armed = false;
                self.record(&result, true);
                result
            }
        }
    }

    async fn admit(&self) -> Result<Admission, AgentError> {
        loop {
            let notified = {
                let mut state = self.lock();
                match state.state {
                    CircuitState::Closed => return Ok(Admission::Normal),
                    CircuitState::Open => {
                        let now = Utc::now();
                        if let Some(next_attempt) = state.next_attempt_time
                            && now < next_attempt
                        {
                            return Err(self.open_error(Some(next_attempt)));
                        }
                        state.state = CircuitState::HalfOpen;
                        state.trial_in_flight = true;
                        info!(breaker = %self.name, "Circuit half-open, admitting trial call");
                        return Ok(Admission::Trial);
                    }
                    CircuitState::HalfOpen => {
                        if !state.trial_in_flight {
                            state.trial_in_flight = true;
                            return Ok(Admission::Trial);
                        }
                        self.trial_finished.notified()
                    }
                }
            };
            notified.await;
        }
    }

    fn record<T>(&self, result: &Result<T, AgentError>, trial: bool) {
        let failed = matches!(result, Err(error) if error.kind.trips_circuit());
        {
            let mut state = self.lock();
            let now = Utc::now();

            if failed {
                state.failure_count = state.failure_count.saturating_add(1);
                state.last_failure_time = Some(now);

                let should_open = trial
                    || (state.state == CircuitState::Closed
                        && state.failure_count >= self.config.failure_threshold);
                if should_open {
                    let next_attempt = now
                        + chrono::Duration::from_std(self.config.reset_timeout).unwrap_or_default();
                    state.state = CircuitState::Open;
                    state.next_attempt_time = Some(next_attempt);
                    warn!(
                        breaker = %self.name,
                        failures = state.failure_count,
                        next_attempt = %next_attempt,
                        "Circuit opened"
                    );
                }
            } else if trial {
                state.state = CircuitState::Closed;
                state.failure_count = 0;
                state.next_attempt_time = None;
                info!(breaker = %self.name, "Trial succeeded, circuit closed");
            } else if state.state == CircuitState::Closed {
                state.failure_count = 0;
            }

            if trial {
                state.trial_in_flight = false;
            }
        }

        if trial {
            self.trial_finished.notify_waiters();
        }
    }

    fn open_error(&self, next_attempt: Option<DateTime<Utc>>) -> AgentError {
        AgentError::new(
            ErrorKind::CircuitOpen {
                dependency: self.name.clone(),
                retry_at: next_attempt,
            },
            ErrorContext::new(format!("circuit_breaker:{}", self.name)),
        )
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// True while calls are being rejected without reaching the dependency.
    pub fn is_open(&self) -> bool {
        let state = self.lock();
        state.state == CircuitState::Open
            && state
                .next_attempt_time
                .is_some_and(|next_attempt| Utc::now() < next_attempt)
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn force_open(&self) {
        let mut state = self.lock();
        state.state = CircuitState::Open;
        state.next_attempt_time = Some(
            Utc::now() + chrono::Duration::from_std(self.config.reset_timeout).unwrap_or_default(),
        );
    }

    pub fn reset(&self) {
        {
            let mut state = self.lock();
            state.state = CircuitState::Closed;
            state.failure_count = 0;
            state.next_attempt_time = None;
            state.trial_in_flight = false;
        }
        self.trial_finished.notify_waiters();
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let state = self.lock();
        CircuitBreakerSnapshot {
            name: self.name.clone(),
            state: state.state,
            failure_count: state.failure_count,
            last_failure_time: state.last_failure_time,
            next_attempt_time: state.next_attempt_time,
        }
    }

    /// Restores a snapshot taken before a restart. A trial that was running
    /// at that point is treated as abandoned, so the next call becomes a new trial.
    pub fn restore(&self, snapshot: &CircuitBreakerSnapshot) {
        {
            let mut state = self.lock();
            state.failure_count = snapshot.failure_count;
            state.last_failure_time = snapshot.last_failure_time;
            state.trial_in_flight = false;
            match snapshot.state {
                CircuitState::HalfOpen => {
                    state.state = CircuitState::Open;
                    state.next_attempt_time = Some(Utc::now());
                }
                other => {
                    state.state = other;
                    state.next_attempt_time = snapshot.next_attempt_time;
                }
            }
        }
        self.trial_finished.notify_waiters();
    }
}
