// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Caller-supplied tokens.

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::info;

use tern_core::{
    AuthenticationKind, ConnectionAuth, Credential, CredentialSecret, DeviceConnectionString,
    DeviceIdentity, HubError, HubResult, SharedAccessSignature,
};

use crate::provider::{AuthEvent, AuthenticationProvider, EVENT_CHANNEL_CAPACITY};

/// Serves a pre-signed token that the caller replaces before it expires.
///
/// There is no timer. Each [`update_shared_access_signature`] call publishes
/// the new token to subscribers.
///
/// [`update_shared_access_signature`]: Self::update_shared_access_signature
#[derive(Debug)]
pub struct SharedAccessSignatureAuthenticationProvider {
    identity: DeviceIdentity,
    credential: RwLock<Credential>,
    events: broadcast::Sender<AuthEvent>,
}

impl SharedAccessSignatureAuthenticationProvider {
    /// Creates a provider serving `token` for `identity`.
    pub fn new(identity: DeviceIdentity, token: SharedAccessSignature) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            credential: RwLock::new(Self::credential_for(&identity, token)),
            identity,
            events,
        }
    }

    /// Creates a provider from a token string; the identity is read from `sr`.
    pub fn from_shared_access_signature(token: &str) -> HubResult<Self> {
        let sas = SharedAccessSignature::parse(token)?;
        let identity = DeviceIdentity::from_resource_uri(&sas.resource_uri()?)?;
        Ok(Self::new(identity, sas))
    }

    /// Creates a provider from a `SharedAccessSignature` connection string.
    pub fn from_connection_string(connection_string: &str) -> HubResult<Self> {
        let parsed = DeviceConnectionString::parse(connection_string)?;
        match parsed.auth {
            ConnectionAuth::SharedAccessSignature(token) => {
                Ok(Self::new(parsed.identity, SharedAccessSignature::parse(&token)?))
            }
            _ => Err(HubError::validation(
                "connection_string",
                "connection string does not carry a SharedAccessSignature",
            )),
        }
    }

    /// Replaces the token and notifies subscribers.
    pub fn update_shared_access_signature(&self, token: &str) -> HubResult<()> {
        let sas = SharedAccessSignature::parse(token)?;
        let credential = Self::credential_for(&self.identity, sas);
        *self.credential.write() = credential.clone();

        info!(identity = %self.identity, expiry = ?credential.expiry(), "Shared access signature updated");
        let _ = self.events.send(AuthEvent::NewCredential(credential));
        Ok(())
    }

    fn credential_for(identity: &DeviceIdentity, token: SharedAccessSignature) -> Credential {
        let key_name = token.skn.clone();
        Credential::new(identity.clone(), key_name, CredentialSecret::Signature(token))
    }
}

#[async_trait]
impl AuthenticationProvider for SharedAccessSignatureAuthenticationProvider {
    fn kind(&self) -> AuthenticationKind {
        AuthenticationKind::Token
    }

    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    async fn get_credential(&self) -> HubResult<Credential> {
        Ok(self.credential.read().clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    fn stop(&self) {}
}
