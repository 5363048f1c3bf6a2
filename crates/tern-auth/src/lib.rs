// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # tern-auth
//!
//! Authentication providers for hub sessions.
//!
//! Every provider hands out [`Credential`] snapshots through
//! [`AuthenticationProvider::get_credential`]. Token providers renew their
//! token ahead of expiry on their own and announce each new token on a
//! broadcast channel, so a session can re-authenticate without tearing down.
//!
//! | Provider | Credential | Renewal |
//! |----------|------------|---------|
//! | [`SharedAccessKeyAuthenticationProvider`] | token signed with a local key | timer |
//! | [`WorkloadAuthenticationProvider`] | token signed by the workload endpoint | timer |
//! | [`SharedAccessSignatureAuthenticationProvider`] | caller-supplied token | caller |
//! | [`X509AuthenticationProvider`] | client certificate | none |
//!
//! ## Example
//!
//! ```no_run
//! use tern_auth::{AuthenticationProvider, SharedAccessKeyAuthenticationProvider};
//!
//! # async fn example() -> tern_core::HubResult<()> {
//! let provider = SharedAccessKeyAuthenticationProvider::from_connection_string(
//!     "HostName=hub.example.net;DeviceId=dev-1;SharedAccessKey=c2VjcmV0",
//! )?;
//!
//! let credential = provider.get_credential().await?;
//! println!("token expires at {:?}", credential.expiry());
//! provider.stop();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod provider;
pub mod renewal;
pub mod shared_key;
pub mod signature;
pub mod signer;
pub mod workload;
pub mod x509;

// =============================================================================
// Re-exports
// =============================================================================

pub use provider::{AuthEvent, AuthenticationProvider, ProviderCapabilities, TokenRenewal};
pub use renewal::RenewingTokenSource;
pub use shared_key::SharedAccessKeyAuthenticationProvider;
pub use signature::SharedAccessSignatureAuthenticationProvider;
pub use signer::{LocalKeySigner, TokenSigner};
pub use workload::{WorkloadAuthenticationProvider, WorkloadClient, WorkloadSettings, WorkloadSigner};
pub use x509::X509AuthenticationProvider;

pub use tern_core::{AuthenticationKind, Credential};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
