// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Common Test Utilities
//!
//! - `fixtures`: pre-built connection strings, identities and providers
//! - `mocks`: in-memory transport, signer and clock

pub mod fixtures;
pub mod mocks;

pub use fixtures::*;
pub use mocks::*;

use std::sync::Once;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Default wait for asynchronous test conditions.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Initialize test logging. Call this at the start of each test.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new("warn,tern=debug")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Waits for the first event matching `select` and returns what it extracts.
///
/// Panics after [`TEST_TIMEOUT`] or when the channel closes.
pub async fn next_event<E, T, F>(events: &mut broadcast::Receiver<E>, mut select: F) -> T
where
    E: Clone,
    F: FnMut(E) -> Option<T>,
{
    let wait = async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(found) = select(event) {
                        return found;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    };

    tokio::time::timeout(TEST_TIMEOUT, wait)
        .await
        .expect("timed out waiting for event")
}

/// Polls `condition` until it holds. Panics after [`TEST_TIMEOUT`].
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let wait = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };

    tokio::time::timeout(TEST_TIMEOUT, wait)
        .await
        .expect("condition not reached in time")
}
