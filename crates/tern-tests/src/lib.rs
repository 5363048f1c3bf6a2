// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # tern Integration Tests
//!
//! Integration tests for the tern client stack, plus the in-memory
//! transport, signer and clock they run against.
//!
//! ## Module Structure
//!
//! - [`common`]: shared test utilities
//!   - `fixtures`: connection strings, keys and ready-made providers
//!   - `mocks`: `MockTransport`, `MockSigner`, `ManualClock`
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p tern-tests
//! cargo test -p tern-tests --test integration_session
//! cargo test -p tern-tests -- --nocapture
//! ```
//!
//! ## Test Categories
//!
//! - `integration_retry.rs`: policies, delay bounds, retry budgets
//! - `integration_auth.rs`: token signing, renewal, providers
//! - `integration_session.rs`: state machine, reconnect, feature restore,
//!   device client
//! - `integration_twin.rs`: twin merge and synchronization
//! - `integration_config.rs`: file loading, overrides, validation
//!
//! ## Writing New Tests
//!
//! ```rust,ignore
//! use tern_tests::prelude::*;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let transport = MockTransport::new();
//!     let session = spawn_session(&transport, sas_provider());
//!     session.connect().await.unwrap();
//!     assert_eq!(transport.count("connect"), 1);
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod common;

/// Re-export commonly used items for convenience.
pub mod prelude {
    pub use crate::common::fixtures::*;
    pub use crate::common::mocks::*;
    pub use crate::common::{eventually, init_test_logging, next_event};
}
