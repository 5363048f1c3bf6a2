// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Token renewal engine shared by the key and workload providers.
//!
//! [`RenewingTokenSource`] keeps the current token, renews it on demand when
//! it is missing or inside the renewal margin, and arms a one-shot timer after
//! every renewal that renews again `validity - margin` seconds later.
//!
//! # Races
//!
//! - Renewals are serialized by an async mutex; callers that waited for the
//!   lock re-check the token before signing again.
//! - Every armed timer carries a generation number. Arming a new timer or
//!   calling `stop()` bumps the generation, and a timer whose generation is no
//!   longer current exits without renewing.
//! - Timer tasks hold a `Weak` reference, so dropping the source stops them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tern_core::signature::{encode_uri_component_strict, string_to_sign};
use tern_core::{
    Clock, Credential, CredentialSecret, DeviceIdentity, HubResult, SharedAccessSignature,
};

use crate::provider::{AuthEvent, TokenRenewal, EVENT_CHANNEL_CAPACITY};
use crate::signer::TokenSigner;

// =============================================================================
// RenewingTokenSource
// =============================================================================

/// A self-renewing token built around a [`TokenSigner`].
#[derive(Debug)]
pub struct RenewingTokenSource {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    identity: DeviceIdentity,
    key_name: Option<String>,
    signer: Arc<dyn TokenSigner>,
    clock: Arc<dyn Clock>,
    renewal: RwLock<TokenRenewal>,
    current: RwLock<Option<Credential>>,
    renew_lock: tokio::sync::Mutex<()>,
    generation: AtomicU64,
    timer: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<AuthEvent>,
}

impl RenewingTokenSource {
    /// Creates a token source. No token is signed until first requested.
    pub fn new(
        identity: DeviceIdentity,
        key_name: Option<String>,
        signer: Arc<dyn TokenSigner>,
        renewal: TokenRenewal,
        clock: Arc<dyn Clock>,
    ) -> HubResult<Self> {
        renewal.validate()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            inner: Arc::new(Inner {
                identity,
                key_name,
                signer,
                clock,
                renewal: RwLock::new(renewal),
                current: RwLock::new(None),
                renew_lock: tokio::sync::Mutex::new(()),
                generation: AtomicU64::new(0),
                timer: Mutex::new(None),
                events,
            }),
        })
    }

    /// Returns the identity tokens are issued for.
    pub fn identity(&self) -> &DeviceIdentity {
        &self.inner.identity
    }

    /// Returns the current renewal values.
    pub fn renewal(&self) -> TokenRenewal {
        *self.inner.renewal.read()
    }

    /// Returns the signer name.
    pub fn signer_name(&self) -> &str {
        self.inner.signer.name()
    }

    /// Returns `true` while a renewal timer is pending.
    pub fn is_armed(&self) -> bool {
        self.inner
            .timer
            .lock()
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Returns the current token, renewing it first if it is missing or
    /// inside the renewal margin.
    pub async fn get_credential(&self) -> HubResult<Credential> {
        if let Some(credential) = self.inner.fresh_credential() {
            return Ok(credential);
        }

        let _guard = self.inner.renew_lock.lock().await;
        if let Some(credential) = self.inner.fresh_credential() {
            return Ok(credential);
        }

        let (credential, _) = Inner::renew(&self.inner).await?;
        Ok(credential)
    }

    /// Replaces the renewal values.
    ///
    /// If a renewal timer is armed, the token is renewed immediately with the
    /// new values, the timer is rescheduled and the new token is broadcast.
    pub async fn set_token_renewal_values(
        &self,
        validity_secs: u64,
        renewal_margin_secs: u64,
    ) -> HubResult<()> {
        let renewal = TokenRenewal::new(validity_secs, renewal_margin_secs)?;

        let _guard = self.inner.renew_lock.lock().await;
        *self.inner.renewal.write() = renewal;

        if !self.is_armed() {
            debug!(
                identity = %self.inner.identity,
                validity_secs,
                renewal_margin_secs,
                "Token renewal values updated"
            );
            return Ok(());
        }

        info!(
            identity = %self.inner.identity,
            validity_secs,
            renewal_margin_secs,
            "Token renewal values changed while armed, renewing now"
        );
        let (credential, current) = Inner::renew(&self.inner).await?;
        if current {
            let _ = self.inner.events.send(AuthEvent::NewCredential(credential));
        }
        Ok(())
    }

    /// Subscribes to renewal notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.events.subscribe()
    }

    /// Cancels the pending renewal timer.
    pub fn stop(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = self.inner.timer.lock().take() {
            handle.abort();
            debug!(identity = %self.inner.identity, "Token renewal stopped");
        }
    }
}

impl Drop for RenewingTokenSource {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Inner {
    fn fresh_credential(&self) -> Option<Credential> {
        let now = self.clock.now_epoch_secs();
        let renewal = *self.renewal.read();

        self.current
            .read()
            .as_ref()
            .filter(|credential| {
                credential
                    .expiry()
                    .map_or(false, |expiry| !renewal.needs_renewal(expiry, now))
            })
            .cloned()
    }

    /// Signs a new token and arms the next timer. Must be called with
    /// `renew_lock` held.
    ///
    /// The returned flag is `false` when `stop()` ran during signing; the
    /// token is kept but no timer is armed.
    async fn renew(this: &Arc<Self>) -> HubResult<(Credential, bool)> {
        let generation = this.generation.load(Ordering::SeqCst);
        let renewal = *this.renewal.read();
        let expiry = this.clock.now_epoch_secs() + renewal.validity_secs;

        let encoded_uri = encode_uri_component_strict(&this.identity.resource_uri());
        let signature = this
            .signer
            .sign(&string_to_sign(&encoded_uri, expiry))
            .await?;
        let sas = SharedAccessSignature::from_signature(
            encoded_uri,
            &signature,
            this.key_name.as_deref(),
            expiry,
        );

        let credential = Credential::new(
            this.identity.clone(),
            this.key_name.clone(),
            CredentialSecret::Signature(sas),
        );
        *this.current.write() = Some(credential.clone());

        debug!(
            identity = %this.identity,
            signer = this.signer.name(),
            expiry,
            "Token renewed"
        );

        if this.generation.load(Ordering::SeqCst) != generation {
            debug!(identity = %this.identity, "Source stopped during renewal, not rescheduling");
            return Ok((credential, false));
        }

        Self::schedule(this, renewal.renewal_delay());
        Ok((credential, true))
    }

    fn schedule(this: &Arc<Self>, delay: Duration) {
        let generation = this.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let weak = Arc::downgrade(this);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            Self::on_timer(weak, generation).await;
        });

        // Superseded timers exit on the generation check.
        *this.timer.lock() = Some(handle);
    }

    async fn on_timer(weak: Weak<Self>, generation: u64) {
        let Some(this) = weak.upgrade() else {
            return;
        };
        if this.generation.load(Ordering::SeqCst) != generation {
            return;
        }

        let _guard = this.renew_lock.lock().await;
        if this.generation.load(Ordering::SeqCst) != generation {
            return;
        }

        match Self::renew(&this).await {
            Ok((credential, true)) => {
                let _ = this.events.send(AuthEvent::NewCredential(credential));
            }
            Ok((_, false)) => {}
            Err(error) => {
                warn!(
                    identity = %this.identity,
                    error = %error,
                    "Scheduled token renewal failed"
                );
                let _ = this.events.send(AuthEvent::Error(error));
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
