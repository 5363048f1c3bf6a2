// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client certificate authentication.

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::info;

use tern_core::{
    AuthenticationKind, Credential, CredentialSecret, DeviceConnectionString, DeviceIdentity,
    HubError, HubResult, X509Identity,
};

use crate::provider::{AuthEvent, AuthenticationProvider};

/// Serves a static certificate and private key.
///
/// Certificates are presented while the transport connects, so this provider
/// never renews and never publishes events.
#[derive(Debug)]
pub struct X509AuthenticationProvider {
    identity: DeviceIdentity,
    certificate: RwLock<X509Identity>,
    events: broadcast::Sender<AuthEvent>,
}

impl X509AuthenticationProvider {
    /// Creates a provider for `identity` presenting `certificate`.
    pub fn new(identity: DeviceIdentity, certificate: X509Identity) -> Self {
        let (events, _) = broadcast::channel(1);
        Self {
            identity,
            certificate: RwLock::new(certificate),
            events,
        }
    }

    /// Creates a provider from an `x509=true` connection string.
    pub fn from_connection_string(
        connection_string: &str,
        certificate: X509Identity,
    ) -> HubResult<Self> {
        let parsed = DeviceConnectionString::parse(connection_string)?;
        if !parsed.is_x509() {
            return Err(HubError::validation(
                "connection_string",
                "connection string does not select x509 authentication",
            ));
        }
        Ok(Self::new(parsed.identity, certificate))
    }

    /// Replaces the certificate used by subsequent connects.
    pub fn set_x509_identity(&self, certificate: X509Identity) {
        *self.certificate.write() = certificate;
        info!(identity = %self.identity, "Client certificate replaced");
    }
}

#[async_trait]
impl AuthenticationProvider for X509AuthenticationProvider {
    fn kind(&self) -> AuthenticationKind {
        AuthenticationKind::X509
    }

    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    async fn get_credential(&self) -> HubResult<Credential> {
        Ok(Credential::new(
            self.identity.clone(),
            None,
            CredentialSecret::Certificate(self.certificate.read().clone()),
        ))
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    fn stop(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_returns_certificate() {
        let provider = X509AuthenticationProvider::from_connection_string(
            "HostName=hub;DeviceId=d;x509=true",
            X509Identity::new("CERT", "KEY"),
        )
        .unwrap();

        let credential = provider.get_credential().await.unwrap();
        assert_eq!(credential.certificate().unwrap().certificate, "CERT");
        assert_eq!(credential.expiry(), None);
        assert_eq!(provider.kind(), AuthenticationKind::X509);

        provider.set_x509_identity(X509Identity::new("CERT2", "KEY2"));
        let credential = provider.get_credential().await.unwrap();
        assert_eq!(credential.certificate().unwrap().certificate, "CERT2");
        provider.stop();
    }

    #[test]
    fn test_rejects_key_connection_string() {
        assert!(X509AuthenticationProvider::from_connection_string(
            "HostName=hub;DeviceId=d;SharedAccessKey=a2V5",
            X509Identity::new("CERT", "KEY"),
        )
        .is_err());
    }
}
