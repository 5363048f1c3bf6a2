// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Retry policies and the retry executor.
//!
//! A [`RetryPolicy`] is a pure strategy: it decides whether an error is worth
//! another attempt and how long to wait before it. A [`RetryOperation`] is the
//! per-call executor that applies a policy against an overall timeout budget.
//!
//! # Built-in Policies
//!
//! - [`ExponentialBackoffWithJitter`]: exponential delays with bounded jitter
//!   and a higher floor for throttled requests
//! - [`NoRetry`]: never retries
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tern_core::retry::{ExponentialBackoffWithJitter, RetryOperation};
//!
//! let policy = Arc::new(ExponentialBackoffWithJitter::default());
//! let result = RetryOperation::new("send_event", policy, Duration::from_secs(240))
//!     .retry(|| async { client.send_event(message.clone()).await })
//!     .await;
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{ErrorKind, HubError, HubResult};

// =============================================================================
// Backoff Configuration
// =============================================================================

/// Delay parameters for one backoff regime (normal or throttled).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffParameters {
    /// Base delay that doubles with every attempt.
    #[serde(with = "duration_millis")]
    pub base: Duration,

    /// Lower bound for any computed delay.
    #[serde(with = "duration_millis")]
    pub floor: Duration,

    /// Upper bound for any computed delay.
    #[serde(with = "duration_millis")]
    pub max: Duration,

    /// Maximum upward jitter as a fraction of the delay.
    pub jitter_up: f64,

    /// Maximum downward jitter as a fraction of the delay.
    pub jitter_down: f64,
}

impl BackoffParameters {
    /// Parameters for regular transient failures.
    pub fn normal() -> Self {
        Self {
            base: Duration::from_millis(100),
            floor: Duration::from_millis(100),
            max: Duration::from_secs(10),
            jitter_up: 0.25,
            jitter_down: 0.5,
        }
    }

    /// Parameters for throttled requests.
    pub fn throttled() -> Self {
        Self {
            base: Duration::from_secs(5),
            floor: Duration::from_secs(10),
            max: Duration::from_secs(60),
            jitter_up: 0.25,
            jitter_down: 0.5,
        }
    }

    /// Checks that the parameters describe a usable delay range.
    pub fn validate(&self, name: &str) -> HubResult<()> {
        if self.floor > self.max {
            return Err(HubError::configuration(
                format!("{}.floor", name),
                format!("floor {:?} exceeds max {:?}", self.floor, self.max),
            ));
        }
        let jitter_up_valid = self.jitter_up.is_finite() && self.jitter_up >= 0.0;
        if !(0.0..=1.0).contains(&self.jitter_down) || !jitter_up_valid {
            return Err(HubError::configuration(
                format!("{}.jitter", name),
                "jitter_down must be within [0, 1] and jitter_up must not be negative",
            ));
        }
        Ok(())
    }

    /// Exponential component for an attempt, before jitter and floor.
    fn exponential(&self, attempt: u32) -> f64 {
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let raw = self.base.as_millis() as f64 * 2f64.powi(exponent);
        raw.min(self.max.as_millis() as f64)
    }

    /// Draws a jitter factor from `[-jitter_down, jitter_up]`, or zero when
    /// that range is empty or not finite.
    fn sample_jitter(&self) -> f64 {
        let (low, high) = (-self.jitter_down, self.jitter_up);
        if low.is_finite() && high.is_finite() && low <= high {
            rand::thread_rng().gen_range(low..=high)
        } else {
            0.0
        }
    }

    /// Clamps a delay in milliseconds into `[floor, max]`.
    fn clamp(&self, millis: f64) -> Duration {
        let floor = self.floor.as_millis() as f64;
        let max = self.max.as_millis() as f64;
        Duration::from_millis(millis.max(floor).min(max) as u64)
    }
}

/// Configuration for [`ExponentialBackoffWithJitter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Retry the first failure without waiting (ignored when throttled).
    #[serde(default = "default_true")]
    pub immediate_first_retry: bool,

    /// Parameters for regular transient failures.
    #[serde(default = "BackoffParameters::normal")]
    pub normal: BackoffParameters,

    /// Parameters for throttled requests.
    #[serde(default = "BackoffParameters::throttled")]
    pub throttled: BackoffParameters,
}

fn default_true() -> bool {
    true
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            immediate_first_retry: true,
            normal: BackoffParameters::normal(),
            throttled: BackoffParameters::throttled(),
        }
    }
}

impl BackoffConfig {
    /// Disables the immediate first retry.
    pub fn without_immediate_retry(mut self) -> Self {
        self.immediate_first_retry = false;
        self
    }

    /// Validates both parameter sets.
    pub fn validate(&self) -> HubResult<()> {
        self.normal.validate("normal")?;
        self.throttled.validate("throttled")
    }
}

// Duration serialization helper
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// =============================================================================
// RetryPolicy Trait
// =============================================================================

/// A strategy deciding whether and when to retry a failed operation.
///
/// Policies hold no mutable state: `should_retry` must return the same answer
/// for the same error every time it is asked.
pub trait RetryPolicy: Send + Sync + fmt::Debug {
    /// Returns the name of this policy for logging.
    fn name(&self) -> &str;

    /// Returns `true` if the error is worth another attempt.
    fn should_retry(&self, error: &HubError) -> bool;

    /// Returns the delay before the next attempt.
    ///
    /// `attempt` is the number of attempts made so far (1 after the first
    /// failure).
    fn next_retry_timeout(&self, attempt: u32, throttled: bool) -> Duration;
}

// =============================================================================
// No Retry Policy
// =============================================================================

/// A policy that never retries.
#[derive(Debug, Clone, Default)]
pub struct NoRetry;

impl NoRetry {
    /// Creates a new no-retry policy.
    pub fn new() -> Self {
        Self
    }
}

impl RetryPolicy for NoRetry {
    fn name(&self) -> &str {
        "no_retry"
    }

    fn should_retry(&self, _error: &HubError) -> bool {
        false
    }

    fn next_retry_timeout(&self, _attempt: u32, _throttled: bool) -> Duration {
        Duration::ZERO
    }
}

// =============================================================================
// Exponential Backoff With Jitter
// =============================================================================

/// Exponentially increasing delays with bounded random jitter.
///
/// Delay formula: `clamp(min(base * 2^(attempt-1), max) * (1 + j), floor, max)`
/// where `j` is drawn from `[-jitter_down, jitter_up]`. Throttled requests use
/// a separate parameter set with a higher floor.
///
/// Network, timeout, throttling, service-unavailable and link errors are
/// retried; validation, authorization and not-found errors are not.
#[derive(Debug, Clone, Default)]
pub struct ExponentialBackoffWithJitter {
    config: BackoffConfig,
}

impl ExponentialBackoffWithJitter {
    /// Creates a policy from a configuration.
    ///
    /// The configuration is not checked; an unusable jitter range samples no
    /// jitter at all. Use [`try_new`](Self::try_new) to reject it instead.
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// Creates a policy from a validated configuration.
    pub fn try_new(config: BackoffConfig) -> HubResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Returns the inclusive range the delay for an attempt falls into.
    pub fn delay_bounds(&self, attempt: u32, throttled: bool) -> (Duration, Duration) {
        if self.skips_wait(attempt, throttled) {
            return (Duration::ZERO, Duration::ZERO);
        }
        let params = self.parameters(throttled);
        let exponential = params.exponential(attempt);
        (
            params.clamp(exponential * (1.0 - params.jitter_down)),
            params.clamp(exponential * (1.0 + params.jitter_up)),
        )
    }

    fn parameters(&self, throttled: bool) -> &BackoffParameters {
        if throttled {
            &self.config.throttled
        } else {
            &self.config.normal
        }
    }

    fn skips_wait(&self, attempt: u32, throttled: bool) -> bool {
        self.config.immediate_first_retry && attempt <= 1 && !throttled
    }
}

impl RetryPolicy for ExponentialBackoffWithJitter {
    fn name(&self) -> &str {
        "exponential_backoff_with_jitter"
    }

    fn should_retry(&self, error: &HubError) -> bool {
        matches!(
            error.kind(),
            ErrorKind::Transient | ErrorKind::Throttling | ErrorKind::Link
        )
    }

    fn next_retry_timeout(&self, attempt: u32, throttled: bool) -> Duration {
        if self.skips_wait(attempt, throttled) {
            return Duration::ZERO;
        }
        let params = self.parameters(throttled);
        let exponential = params.exponential(attempt);
        params.clamp(exponential * (1.0 + params.sample_jitter()))
    }
}

// =============================================================================
// Shared Policy Handle
// =============================================================================

/// A swappable policy shared between a client façade and its session.
///
/// [`current`](Self::current) snapshots the installed policy, so operations
/// that already started keep the policy they began with.
#[derive(Clone)]
pub struct SharedRetryPolicy {
    inner: Arc<RwLock<Arc<dyn RetryPolicy>>>,
}

impl SharedRetryPolicy {
    /// Wraps a policy.
    pub fn new(policy: impl RetryPolicy + 'static) -> Self {
        Self::from_arc(Arc::new(policy))
    }

    /// Wraps an already shared policy.
    pub fn from_arc(policy: Arc<dyn RetryPolicy>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(policy)),
        }
    }

    /// Returns the currently installed policy.
    pub fn current(&self) -> Arc<dyn RetryPolicy> {
        self.inner.read().clone()
    }

    /// Installs a new policy for operations started from now on.
    pub fn replace(&self, policy: Arc<dyn RetryPolicy>) {
        tracing::debug!(policy = %policy.name(), "Retry policy replaced");
        *self.inner.write() = policy;
    }
}

impl Default for SharedRetryPolicy {
    fn default() -> Self {
        Self::new(ExponentialBackoffWithJitter::default())
    }
}

impl fmt::Debug for SharedRetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedRetryPolicy")
            .field("current", &self.current().name())
            .finish()
    }
}

// =============================================================================
// RetryOperation
// =============================================================================

/// Executes one logical operation under a retry policy and timeout budget.
///
/// The first attempt runs immediately. After a failure the policy is asked
/// whether to retry; the operation settles with the error when the policy
/// refuses or when `elapsed + next delay` would exceed the budget. A zero
/// budget allows exactly one attempt.
pub struct RetryOperation {
    name: String,
    policy: Arc<dyn RetryPolicy>,
    max_timeout: Duration,
    started_at: Instant,
    attempts: u32,
}

impl RetryOperation {
    /// Creates an operation; the budget clock starts now.
    pub fn new(name: impl Into<String>, policy: Arc<dyn RetryPolicy>, max_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            policy,
            max_timeout,
            started_at: Instant::now(),
            attempts: 0,
        }
    }

    /// Returns the operation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns the time spent since the operation started.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Marks the start of a new attempt.
    pub fn begin_attempt(&mut self) {
        self.attempts += 1;
    }

    /// Decides what to do after a failed attempt.
    ///
    /// Returns the delay to wait before the next attempt, or `None` when the
    /// operation must settle with `error`.
    pub fn next_delay(&self, error: &HubError) -> Option<Duration> {
        if !self.policy.should_retry(error) {
            tracing::debug!(
                operation = %self.name,
                policy = %self.policy.name(),
                error = %error,
                "Error is not retriable"
            );
            return None;
        }

        if self.max_timeout.is_zero() {
            return None;
        }

        let delay = self
            .policy
            .next_retry_timeout(self.attempts, error.is_throttling());

        if self.elapsed() + delay > self.max_timeout {
            tracing::warn!(
                operation = %self.name,
                attempts = self.attempts,
                budget_ms = self.max_timeout.as_millis() as u64,
                error = %error,
                "Retry budget exhausted"
            );
            return None;
        }

        Some(delay)
    }

    /// Runs `work` until it succeeds, the policy refuses, or the budget runs out.
    ///
    /// `work` is called once per attempt and must produce a fresh future.
    pub async fn retry<F, Fut, T>(mut self, mut work: F) -> HubResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = HubResult<T>>,
    {
        self.started_at = Instant::now();

        loop {
            self.begin_attempt();

            match work().await {
                Ok(value) => return Ok(value),
                Err(error) => match self.next_delay(&error) {
                    Some(delay) => {
                        tracing::debug!(
                            operation = %self.name,
                            attempt = self.attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "Retrying operation"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(error),
                },
            }
        }
    }
}

impl fmt::Debug for RetryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOperation")
            .field("name", &self.name)
            .field("policy", &self.policy.name())
            .field("max_timeout", &self.max_timeout)
            .field("attempts", &self.attempts)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn no_jitter() -> BackoffConfig {
        BackoffConfig {
            immediate_first_retry: false,
            normal: BackoffParameters {
                jitter_up: 0.0,
                jitter_down: 0.0,
                ..BackoffParameters::normal()
            },
            throttled: BackoffParameters {
                jitter_up: 0.0,
                jitter_down: 0.0,
                ..BackoffParameters::throttled()
            },
        }
    }

    #[test]
    fn test_backoff_config_defaults() {
        let config = BackoffConfig::default();
        assert!(config.immediate_first_retry);
        assert_eq!(config.normal.base, Duration::from_millis(100));
        assert_eq!(config.normal.max, Duration::from_secs(10));
        assert_eq!(config.throttled.floor, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backoff_validation_rejects_inverted_range() {
        let mut config = BackoffConfig::default();
        config.normal.floor = Duration::from_secs(20);
        assert!(matches!(
            config.validate(),
            Err(HubError::Configuration { .. })
        ));
    }

    #[test]
    fn test_should_retry_classification() {
        let policy = ExponentialBackoffWithJitter::default();

        assert!(policy.should_retry(&HubError::network("reset")));
        assert!(policy.should_retry(&HubError::timeout(Duration::from_secs(1))));
        assert!(policy.should_retry(&HubError::throttled("429")));
        assert!(policy.should_retry(&HubError::service_unavailable("503")));
        assert!(policy.should_retry(&HubError::link("c2d", "detached")));

        assert!(!policy.should_retry(&HubError::unauthorized("401")));
        assert!(!policy.should_retry(&HubError::not_found("device")));
        assert!(!policy.should_retry(&HubError::validation("key", "empty")));
    }

    #[test]
    fn test_should_retry_is_pure() {
        let policy = ExponentialBackoffWithJitter::default();
        let error = HubError::network("reset");
        let first = policy.should_retry(&error);
        for _ in 0..10 {
            assert_eq!(policy.should_retry(&error), first);
        }
    }

    #[test]
    fn test_exponential_delays_without_jitter() {
        let policy = ExponentialBackoffWithJitter::new(no_jitter());

        assert_eq!(policy.next_retry_timeout(1, false), Duration::from_millis(100));
        assert_eq!(policy.next_retry_timeout(2, false), Duration::from_millis(200));
        assert_eq!(policy.next_retry_timeout(3, false), Duration::from_millis(400));
        assert_eq!(policy.next_retry_timeout(20, false), Duration::from_secs(10));
    }

    #[test]
    fn test_throttled_delays_use_higher_floor() {
        let policy = ExponentialBackoffWithJitter::new(no_jitter());

        // 5s base is lifted to the 10s throttling floor
        assert_eq!(policy.next_retry_timeout(1, true), Duration::from_secs(10));
        assert_eq!(policy.next_retry_timeout(3, true), Duration::from_secs(20));
        assert_eq!(policy.next_retry_timeout(10, true), Duration::from_secs(60));
    }

    #[test]
    fn test_inverted_jitter_range() {
        let mut config = BackoffConfig::default().without_immediate_retry();
        config.normal.jitter_down = 0.1;
        config.normal.jitter_up = -0.5;

        assert!(ExponentialBackoffWithJitter::try_new(config.clone()).is_err());

        let policy = ExponentialBackoffWithJitter::new(config);
        assert_eq!(policy.next_retry_timeout(2, false), Duration::from_millis(200));

        let mut config = BackoffConfig::default();
        config.throttled.jitter_up = f64::NAN;
        assert!(config.validate().is_err());
        assert_eq!(
            ExponentialBackoffWithJitter::new(config).next_retry_timeout(3, true),
            Duration::from_secs(20)
        );
    }

    #[test]
    fn test_immediate_first_retry() {
        let policy = ExponentialBackoffWithJitter::default();
        assert_eq!(policy.next_retry_timeout(1, false), Duration::ZERO);
        assert!(policy.next_retry_timeout(1, true) >= Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = ExponentialBackoffWithJitter::new(BackoffConfig::default().without_immediate_retry());

        for attempt in 1..8 {
            let (low, high) = policy.delay_bounds(attempt, false);
            for _ in 0..20 {
                let delay = policy.next_retry_timeout(attempt, false);
                assert!(delay >= low && delay <= high, "{:?} not in [{:?}, {:?}]", delay, low, high);
            }
        }
    }

    #[test]
    fn test_no_retry_policy() {
        let policy = NoRetry::new();
        assert!(!policy.should_retry(&HubError::network("reset")));
        assert_eq!(policy.next_retry_timeout(3, true), Duration::ZERO);
    }

    #[test]
    fn test_shared_policy_swap() {
        let shared = SharedRetryPolicy::default();
        let before = shared.current();
        shared.replace(Arc::new(NoRetry::new()));

        assert_eq!(before.name(), "exponential_backoff_with_jitter");
        assert_eq!(shared.current().name(), "no_retry");
    }

    #[test]
    fn test_config_serialization() {
        let config = BackoffConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"base\":100"));

        let parsed: BackoffConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_success() {
        let attempts = AtomicU32::new(0);
        let policy = Arc::new(ExponentialBackoffWithJitter::default());

        let result = RetryOperation::new("test", policy, Duration::from_secs(60))
            .retry(|| {
                let current = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if current < 2 {
                        Err(HubError::network("reset"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retriable_settles_after_one_attempt() {
        let attempts = AtomicU32::new(0);
        let policy = Arc::new(ExponentialBackoffWithJitter::default());

        let result: HubResult<()> = RetryOperation::new("test", policy, Duration::from_secs(60))
            .retry(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(HubError::unauthorized("denied")) }
            })
            .await;

        assert!(matches!(result, Err(HubError::Unauthorized { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_budget_is_single_attempt() {
        let attempts = AtomicU32::new(0);
        let policy = Arc::new(ExponentialBackoffWithJitter::default());

        let result: HubResult<()> = RetryOperation::new("test", policy, Duration::ZERO)
            .retry(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(HubError::network("reset")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_returns_last_error() {
        let attempts = AtomicU32::new(0);
        let policy = Arc::new(ExponentialBackoffWithJitter::new(no_jitter()));
        let budget = Duration::from_secs(2);
        let start = Instant::now();

        let result: HubResult<()> = RetryOperation::new("test", policy, budget)
            .retry(|| {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move { Err(HubError::network(format!("attempt {}", n))) }
            })
            .await;

        // Delays 100 + 200 + 400 + 800 = 1500ms; the next 1600ms would overrun.
        assert_eq!(attempts.load(Ordering::SeqCst), 5);
        assert!(start.elapsed() <= budget);
        match result {
            Err(HubError::Network { message }) => assert_eq!(message, "attempt 4"),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
