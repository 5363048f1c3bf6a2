// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Integration tests for retry policies and the retry executor.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tern_core::{
    BackoffConfig, ErrorKind, ExponentialBackoffWithJitter, HubError, NoRetry, RetryOperation,
    RetryPolicy, SharedRetryPolicy,
};
use tern_tests::prelude::*;

// =============================================================================
// Error Classification
// =============================================================================

#[test]
fn test_error_classification() {
    let policy = ExponentialBackoffWithJitter::default();

    let retriable = [
        HubError::network("reset"),
        HubError::timeout(Duration::from_secs(1)),
        HubError::service_unavailable("busy"),
        HubError::throttled("slow down"),
        HubError::link("c2d_receiver", "detached"),
        HubError::NotConnected,
    ];
    for error in &retriable {
        assert!(policy.should_retry(error), "{} should be retried", error);
        assert!(error.is_transient());
    }

    let fatal = [
        HubError::validation("payload", "too large"),
        HubError::unauthorized("bad token"),
        HubError::not_found("devices/dev-1"),
        HubError::format("garbage"),
        HubError::signing("no key"),
    ];
    for error in &fatal {
        assert!(!policy.should_retry(error), "{} should not be retried", error);
    }

    assert_eq!(HubError::throttled("x").kind(), ErrorKind::Throttling);
    assert!(HubError::throttled("x").is_throttling());
    assert!(!HubError::network("x").is_throttling());
}

#[test]
fn test_no_retry_refuses_everything() {
    let policy = NoRetry::new();
    assert_eq!(policy.name(), "no_retry");
    assert!(!policy.should_retry(&HubError::network("reset")));
    assert_eq!(policy.next_retry_timeout(3, true), Duration::ZERO);
}

// =============================================================================
// Delays
// =============================================================================

#[test]
fn test_delays_stay_within_bounds() {
    let policy = ExponentialBackoffWithJitter::default();

    for attempt in 1..=12 {
        for throttled in [false, true] {
            let (min, max) = policy.delay_bounds(attempt, throttled);
            assert!(min <= max);
            for _ in 0..50 {
                let delay = policy.next_retry_timeout(attempt, throttled);
                assert!(
                    delay >= min && delay <= max,
                    "attempt {} throttled {}: {:?} outside {:?}..={:?}",
                    attempt,
                    throttled,
                    delay,
                    min,
                    max
                );
            }
        }
    }
}

#[test]
fn test_default_delay_regimes() {
    let policy = ExponentialBackoffWithJitter::default();

    assert_eq!(policy.next_retry_timeout(1, false), Duration::ZERO);
    assert_eq!(
        policy.delay_bounds(2, false),
        (Duration::from_millis(100), Duration::from_millis(250))
    );

    let (min, max) = policy.delay_bounds(1, true);
    assert_eq!(min, Duration::from_secs(10));
    assert!(max <= Duration::from_secs(60));

    let (_, late_max) = policy.delay_bounds(30, false);
    assert_eq!(late_max, Duration::from_secs(10));
}

#[test]
fn test_without_immediate_retry_waits_on_first_failure() {
    let policy = ExponentialBackoffWithJitter::new(BackoffConfig::default().without_immediate_retry());
    let (min, _) = policy.delay_bounds(1, false);
    assert_eq!(min, Duration::from_millis(100));
}

// =============================================================================
// RetryOperation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_retry_succeeds_after_transient_failures() {
    let attempts = Arc::new(AtomicU32::new(0));

    let counter = attempts.clone();
    let result = RetryOperation::new("flaky", fast_policy(), Duration::from_secs(5))
        .retry(|| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(HubError::network("reset"))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), "done");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_non_retriable_error_settles_after_one_attempt() {
    let attempts = Arc::new(AtomicU32::new(0));

    let counter = attempts.clone();
    let result: Result<(), _> = RetryOperation::new("fatal", fast_policy(), Duration::from_secs(5))
        .retry(|| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(HubError::unauthorized("revoked"))
            }
        })
        .await;

    assert!(matches!(result, Err(HubError::Unauthorized { .. })));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_budget_exhaustion_returns_last_error() {
    let attempts = Arc::new(AtomicU32::new(0));
    let started = tokio::time::Instant::now();

    let counter = attempts.clone();
    let result: Result<(), _> = RetryOperation::new("doomed", fast_policy(), Duration::from_millis(300))
        .retry(|| {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                Err(HubError::network(format!("failure {}", n)))
            }
        })
        .await;

    let made = attempts.load(Ordering::SeqCst);
    assert!(made > 2, "only {} attempts", made);
    match result {
        Err(HubError::Network { message }) => assert_eq!(message, format!("failure {}", made - 1)),
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(started.elapsed() <= Duration::from_millis(300));
}

#[tokio::test]
async fn test_zero_budget_allows_one_attempt() {
    let attempts = Arc::new(AtomicU32::new(0));

    let counter = attempts.clone();
    let result: Result<(), _> = RetryOperation::new("once", fast_policy(), Duration::ZERO)
        .retry(|| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(HubError::network("reset"))
            }
        })
        .await;

    assert!(result.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_no_retry_policy_makes_one_attempt() {
    let attempts = Arc::new(AtomicU32::new(0));

    let counter = attempts.clone();
    let result: Result<(), _> = RetryOperation::new("once", Arc::new(NoRetry::new()), Duration::from_secs(5))
        .retry(|| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(HubError::network("reset"))
            }
        })
        .await;

    assert!(result.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

// =============================================================================
// SharedRetryPolicy
// =============================================================================

#[test]
fn test_shared_policy_swap_applies_to_new_snapshots() {
    let shared = SharedRetryPolicy::default();
    let before = shared.current();
    assert_eq!(before.name(), "exponential_backoff_with_jitter");

    shared.clone().replace(Arc::new(NoRetry::new()));

    assert_eq!(shared.current().name(), "no_retry");
    assert_eq!(before.name(), "exponential_backoff_with_jitter");
}
