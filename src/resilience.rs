//! Resilience Primitives
//!
//! Shared by every outbound call in the pipeline:
//! - Error classification for retry decisions
//! - Exponential-backoff retry helper
//! - Per-resource circuit breaker (closed/open/half-open)
//! - Injectable breaker registry

use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Classification of errors for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Temporary failure, retry likely to succeed
    Timeout,
    /// Network-level failure, retryable
    Connection,
    /// Upstream throttling, retryable after backoff
    RateLimited,
    /// Bad input, retry won't help
    Validation,
    /// Unknown error type
    Unknown,
}

impl ErrorKind {
    /// Classify an error from its message
    pub fn from_error(error: &anyhow::Error) -> Self {
        let lower = error.to_string().to_lowercase();

        if lower.contains("timeout") || lower.contains("timed out") {
            Self::Timeout
        } else if lower.contains("connection") || lower.contains("connect") || lower.contains("reset") {
            Self::Connection
        } else if lower.contains("rate limit") || lower.contains("too many requests") || lower.contains("429") {
            Self::RateLimited
        } else if lower.contains("invalid") || lower.contains("validation") || lower.contains("400") {
            Self::Validation
        } else {
            Self::Unknown
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Connection | Self::RateLimited)
    }
}

/// Retry policy for [`retry_with_backoff`]
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of invocations (not counting zero)
    pub max_retries: usize,
    /// Delay before the second attempt; doubles each attempt after
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt as u32)
    }
}

/// Invoke `operation` up to `policy.max_retries` times, sleeping
/// `base_delay * 2^attempt` between retryable failures.
///
/// Non-retryable errors propagate immediately; exhaustion re-raises the
/// last error.
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_retries.max(1);
    let mut last_error = None;

    for attempt in 0..attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if !ErrorKind::from_error(&e).is_retryable() {
                    return Err(e);
                }
                last_error = Some(e);
                if attempt + 1 < attempts {
                    let delay = policy.delay_for_attempt(attempt);
                    debug!("retry {} after {:?}", attempt + 1, delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(last_error.expect("at least one attempt was made"))
}

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures before opening from closed
    pub failure_threshold: u32,
    /// Time to wait before probing an open circuit
    pub recovery_timeout: Duration,
    /// Probe calls allowed while half-open
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 4,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_calls: 1,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    half_open_calls: u32,
}

/// Reportable breaker status
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
}

/// Per-resource failure isolator.
///
/// Callers check [`can_execute`](Self::can_execute) before an operation
/// and report the outcome with `record_success`/`record_failure`; the
/// breaker never wraps the call itself.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: &str) -> Self {
        Self::with_config(name, CircuitBreakerConfig::default())
    }

    pub fn with_config(name: &str, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                half_open_calls: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a call may proceed right now.
    ///
    /// An open breaker transitions to half-open once the recovery timeout
    /// has elapsed since the last failure; half-open admits at most
    /// `half_open_max_calls` probes until an outcome is recorded.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|t| t.elapsed() >= self.config.recovery_timeout)
                    .unwrap_or(true);
                if elapsed {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_calls = 1;
                    debug!("circuit breaker '{}' half-open", self.name);
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_calls < self.config.half_open_max_calls {
                    inner.half_open_calls += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Reset the breaker to closed after a successful call
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.half_open_calls = 0;
    }

    /// Register a failed call; trips the breaker from half-open, or from
    /// closed once the failure threshold is reached.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());
        if inner.state == CircuitState::HalfOpen
            || inner.failure_count >= self.config.failure_threshold
        {
            if inner.state != CircuitState::Open {
                warn!(
                    "circuit breaker '{}' opened after {} failures",
                    self.name, inner.failure_count
                );
            }
            inner.state = CircuitState::Open;
            inner.half_open_calls = 0;
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("breaker lock poisoned").state
    }

    pub fn status(&self) -> BreakerStatus {
        let inner = self.inner.lock().expect("breaker lock poisoned");
        BreakerStatus {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
        }
    }
}

/// Process-scoped breaker registry, passed to callers explicitly so tests
/// can construct a fresh one.
pub struct BreakerRegistry {
    default_config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    pub fn with_config(default_config: CircuitBreakerConfig) -> Self {
        Self {
            default_config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Look up or create the breaker for a resource name
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().expect("registry lock poisoned");
        breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::with_config(name, self.default_config.clone())))
            .clone()
    }

    /// Status of every registered breaker
    pub fn statuses(&self) -> Vec<BreakerStatus> {
        let breakers = self.breakers.lock().expect("registry lock poisoned");
        let mut statuses: Vec<BreakerStatus> = breakers.values().map(|b| b.status()).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
