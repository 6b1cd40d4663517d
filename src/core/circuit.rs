//! Circuit breaker: protect adapters from cascading failures.
//!
//! States:
//!   CLOSED     normal operation, failures counted
//!   OPEN       all calls rejected, recovery timer running
//!   HALF_OPEN  probe calls allowed to test recovery
//!
//! Transitions:
//!   CLOSED to OPEN        failure_count reaches the threshold
//!   OPEN to HALF_OPEN     recovery_timeout elapsed since last failure
//!   HALF_OPEN to CLOSED   enough probe successes
//!   HALF_OPEN to OPEN     probe fails
//!
//! All timing uses the monotonic clock; wall-clock changes never affect
//! transitions.

use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::json;
use tracing::info;

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Per-adapter circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    pub name: String,
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub success_threshold: u32,

    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
    total_rejections: u64,
}

impl CircuitBreaker {
    pub fn new(name: &str) -> Self {
        Self::with_settings(
            name,
            DEFAULT_FAILURE_THRESHOLD,
            DEFAULT_RECOVERY_TIMEOUT,
            DEFAULT_SUCCESS_THRESHOLD,
        )
    }

    pub fn with_settings(
        name: &str,
        failure_threshold: u32,
        recovery_timeout: Duration,
        success_threshold: u32,
    ) -> Self {
        Self {
            name: name.to_string(),
            failure_threshold,
            recovery_timeout,
            success_threshold,
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
            total_rejections: 0,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn total_rejections(&self) -> u64 {
        self.total_rejections
    }

    /// Check whether a request is allowed through the circuit.
    ///
    /// In OPEN state this is also where the recovery probe begins: once the
    /// timeout has elapsed the breaker moves to HALF_OPEN and lets the call
    /// through. The probe window stays open until a result is recorded.
    pub fn allow_request(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = self
                    .last_failure_time
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.recovery_timeout {
                    self.transition(CircuitState::HalfOpen);
                    true
                } else {
                    self.total_rejections += 1;
                    false
                }
            }
            CircuitState::HalfOpen => true,
        }
    }

    /// Record a successful call.
    pub fn record_success(&mut self) {
        match self.state {
            CircuitState::HalfOpen => {
                self.success_count += 1;
                if self.success_count >= self.success_threshold {
                    self.transition(CircuitState::Closed);
                }
            }
            CircuitState::Closed => {
                self.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&mut self) {
        self.last_failure_time = Some(Instant::now());

        match self.state {
            CircuitState::HalfOpen => {
                self.success_count = 0;
                self.transition(CircuitState::Open);
            }
            CircuitState::Closed => {
                self.failure_count += 1;
                if self.failure_count >= self.failure_threshold {
                    self.transition(CircuitState::Open);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Force-reset to CLOSED and clear counters.
    pub fn reset(&mut self) {
        self.transition(CircuitState::Closed);
        self.failure_count = 0;
        self.success_count = 0;
        self.total_rejections = 0;
    }

    pub fn to_status(&self) -> serde_json::Value {
        json!({
            "name": self.name,
            "state": self.state.as_str(),
            "failure_count": self.failure_count,
            "success_count": self.success_count,
            "total_rejections": self.total_rejections,
            "failure_threshold": self.failure_threshold,
            "recovery_timeout_secs": self.recovery_timeout.as_secs_f64(),
        })
    }

    fn transition(&mut self, new_state: CircuitState) {
        let old = self.state;
        self.state = new_state;
        match new_state {
            CircuitState::Closed => {
                self.failure_count = 0;
                self.success_count = 0;
            }
            CircuitState::HalfOpen => {
                self.success_count = 0;
            }
            CircuitState::Open => {}
        }
        info!(
            "Circuit breaker '{}': {} -> {}",
            self.name,
            old.as_str(),
            new_state.as_str()
        );
    }
}

/// Manages circuit breakers for all adapters; one breaker per adapter
/// name, created lazily on first use.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    breakers: FxHashMap<String, CircuitBreaker>,
    default_threshold: u32,
    default_timeout: Duration,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self {
            breakers: FxHashMap::default(),
            default_threshold: DEFAULT_FAILURE_THRESHOLD,
            default_timeout: DEFAULT_RECOVERY_TIMEOUT,
        }
    }
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(threshold: u32, timeout: Duration) -> Self {
        Self {
            breakers: FxHashMap::default(),
            default_threshold: threshold,
            default_timeout: timeout,
        }
    }

    pub fn get_or_create(&mut self, name: &str) -> &mut CircuitBreaker {
        let threshold = self.default_threshold;
        let timeout = self.default_timeout;
        self.breakers.entry(name.to_string()).or_insert_with(|| {
            CircuitBreaker::with_settings(name, threshold, timeout, DEFAULT_SUCCESS_THRESHOLD)
        })
    }

    pub fn get(&self, name: &str) -> Option<&CircuitBreaker> {
        self.breakers.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    pub fn breakers(&self) -> impl Iterator<Item = &CircuitBreaker> {
        self.breakers.values()
    }

    /// Status of all breakers, keyed by adapter name.
    pub fn get_status(&self) -> serde_json::Value {
        let mut status = serde_json::Map::new();
        let mut names: Vec<&String> = self.breakers.keys().collect();
        names.sort();
        for name in names {
            status.insert(name.clone(), self.breakers[name].to_status());
        }
        serde_json::Value::Object(status)
    }

    pub fn reset_all(&mut self) {
        for cb in self.breakers.values_mut() {
            cb.reset();
        }
    }
}
