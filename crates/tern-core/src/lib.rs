// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # tern-core
//!
//! Core abstractions shared by every tern crate:
//!
//! - **Error**: the [`HubError`] taxonomy and its retry classification
//! - **Retry**: [`RetryPolicy`] strategies and the [`RetryOperation`] executor
//! - **Signature**: shared access signature signing and parsing
//! - **Credential**: credential snapshots and device identities
//! - **Connection strings**: device connection string parsing
//! - **Clock**: wall-clock abstraction for expiry arithmetic
//!
//! ## Example
//!
//! ```
//! use tern_core::signature::SharedAccessSignature;
//!
//! let sas = SharedAccessSignature::create(
//!     "hub.example.net/devices/dev-1",
//!     None,
//!     "c2VjcmV0LWtleS1mb3ItdGVzdHM=",
//!     1_700_000_000,
//! )
//! .unwrap();
//!
//! let parsed = SharedAccessSignature::parse(&sas.to_string()).unwrap();
//! assert_eq!(parsed.se, 1_700_000_000);
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod clock;
pub mod connection_string;
pub mod credential;
pub mod error;
pub mod retry;
pub mod signature;

// =============================================================================
// Re-exports for convenience
// =============================================================================

pub use clock::{system_clock, Clock, SystemClock};
pub use connection_string::{ConnectionAuth, ConnectionString, DeviceConnectionString};
pub use credential::{AuthenticationKind, Credential, CredentialSecret, DeviceIdentity, X509Identity};
pub use error::{ErrorKind, HubError, HubResult};
pub use retry::{
    BackoffConfig, BackoffParameters, ExponentialBackoffWithJitter, NoRetry, RetryOperation,
    RetryPolicy, SharedRetryPolicy,
};
pub use signature::SharedAccessSignature;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
