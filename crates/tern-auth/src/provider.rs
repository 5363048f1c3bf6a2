// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The authentication provider abstraction.
//!
//! A provider owns exactly one credential and hands out copies of it. Token
//! providers additionally publish [`AuthEvent`]s: a fresh credential after
//! every autonomous renewal, or the error that made a renewal fail.
//!
//! # Delivery
//!
//! Events travel on a `tokio::sync::broadcast` channel. Every receiver that
//! exists when an event is published sees it; receivers created later do not.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use tern_core::{AuthenticationKind, Credential, DeviceIdentity, HubError, HubResult};

/// Capacity of provider event channels.
pub const EVENT_CHANNEL_CAPACITY: usize = 16;

// =============================================================================
// AuthEvent
// =============================================================================

/// A notification published by an authentication provider.
#[derive(Debug, Clone)]
pub enum AuthEvent {
    /// A new credential is available and should replace the current one.
    NewCredential(Credential),
    /// An autonomous renewal failed.
    Error(HubError),
}

impl AuthEvent {
    /// Returns `true` for [`AuthEvent::NewCredential`].
    #[inline]
    pub fn is_new_credential(&self) -> bool {
        matches!(self, Self::NewCredential(_))
    }
}

// =============================================================================
// ProviderCapabilities
// =============================================================================

/// Optional abilities a provider advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    /// Tokens are signed by a remote endpoint instead of a local key.
    pub remote_signing: bool,
}

// =============================================================================
// TokenRenewal
// =============================================================================

/// How long tokens live and how early they are replaced.
///
/// A token is renewed once fewer than `renewal_margin_secs` seconds of its
/// lifetime remain, and the renewal timer fires
/// `validity_secs - renewal_margin_secs` seconds after each renewal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenRenewal {
    /// Lifetime of each token in seconds.
    pub validity_secs: u64,
    /// Seconds before expiry at which a token is replaced.
    pub renewal_margin_secs: u64,
}

impl TokenRenewal {
    /// Default token lifetime.
    pub const DEFAULT_VALIDITY_SECS: u64 = 3600;
    /// Default renewal margin.
    pub const DEFAULT_RENEWAL_MARGIN_SECS: u64 = 900;

    /// Creates renewal values, failing unless validity exceeds the margin.
    pub fn new(validity_secs: u64, renewal_margin_secs: u64) -> HubResult<Self> {
        let renewal = Self {
            validity_secs,
            renewal_margin_secs,
        };
        renewal.validate()?;
        Ok(renewal)
    }

    /// Checks that validity exceeds the margin.
    pub fn validate(&self) -> HubResult<()> {
        if self.validity_secs <= self.renewal_margin_secs {
            return Err(HubError::configuration(
                "token_renewal",
                format!(
                    "token validity ({}s) must be greater than the renewal margin ({}s)",
                    self.validity_secs, self.renewal_margin_secs
                ),
            ));
        }
        Ok(())
    }

    /// Returns the delay between a renewal and the next scheduled one.
    pub fn renewal_delay(&self) -> Duration {
        Duration::from_secs(self.validity_secs.saturating_sub(self.renewal_margin_secs))
    }

    /// Returns `true` if a token expiring at `expiry` must be replaced at `now`.
    pub fn needs_renewal(&self, expiry: u64, now: u64) -> bool {
        expiry <= now || expiry - now < self.renewal_margin_secs
    }
}

impl Default for TokenRenewal {
    fn default() -> Self {
        Self {
            validity_secs: Self::DEFAULT_VALIDITY_SECS,
            renewal_margin_secs: Self::DEFAULT_RENEWAL_MARGIN_SECS,
        }
    }
}

// =============================================================================
// AuthenticationProvider Trait
// =============================================================================

/// A source of credentials for one hub identity.
///
/// # Lifecycle
///
/// 1. Construct the provider from a key, token, certificate or workload endpoint
/// 2. Call `get_credential()` whenever the transport needs to authenticate
/// 3. Listen on `subscribe()` for credentials renewed in the background
/// 4. Call `stop()` to cancel any pending renewal
///
/// `stop()` is safe to call at any time, any number of times. No renewal
/// timer fires after it returns.
#[async_trait]
pub trait AuthenticationProvider: Send + Sync + fmt::Debug {
    /// Returns how this provider authenticates.
    fn kind(&self) -> AuthenticationKind;

    /// Returns the optional abilities of this provider.
    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::default()
    }

    /// Returns the identity credentials are issued for.
    fn identity(&self) -> &DeviceIdentity;

    /// Returns a copy of a currently valid credential, renewing it first if needed.
    async fn get_credential(&self) -> HubResult<Credential>;

    /// Subscribes to credential notifications.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;

    /// Cancels pending renewals.
    fn stop(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_renewal_values() {
        let renewal = TokenRenewal::default();
        assert_eq!(renewal.validity_secs, 3600);
        assert_eq!(renewal.renewal_margin_secs, 900);
        assert_eq!(renewal.renewal_delay(), Duration::from_secs(2700));
    }

    #[test]
    fn test_validity_must_exceed_margin() {
        assert!(TokenRenewal::new(3600, 900).is_ok());

        let err = TokenRenewal::new(900, 900).unwrap_err();
        assert!(matches!(err, HubError::Configuration { .. }));
        assert!(TokenRenewal::new(100, 900).is_err());
    }

    #[test]
    fn test_needs_renewal() {
        let renewal = TokenRenewal::default();
        let now = 1_000_000;

        assert!(!renewal.needs_renewal(now + 3600, now));
        assert!(!renewal.needs_renewal(now + 900, now));
        assert!(renewal.needs_renewal(now + 899, now));
        assert!(renewal.needs_renewal(now, now));
        assert!(renewal.needs_renewal(now - 10, now));
    }

    #[test]
    fn test_renewal_deserializes_with_defaults() {
        let renewal: TokenRenewal = serde_json::from_str(r#"{"validity_secs": 600}"#).unwrap();
        assert_eq!(renewal.validity_secs, 600);
        assert_eq!(renewal.renewal_margin_secs, 900);
        assert!(renewal.validate().is_err());
    }
}
