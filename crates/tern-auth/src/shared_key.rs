// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Tokens signed locally with a shared access key.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use tern_core::{
    system_clock, AuthenticationKind, Clock, ConnectionAuth, Credential, DeviceConnectionString,
    DeviceIdentity, HubError, HubResult,
};

use crate::provider::{AuthEvent, AuthenticationProvider, TokenRenewal};
use crate::renewal::RenewingTokenSource;
use crate::signer::LocalKeySigner;

/// Issues tokens signed with a device, module or policy key and renews them
/// ahead of expiry.
#[derive(Debug)]
pub struct SharedAccessKeyAuthenticationProvider {
    source: RenewingTokenSource,
}

impl SharedAccessKeyAuthenticationProvider {
    /// Creates a provider with the default renewal values (3600s / 900s).
    pub fn new(
        identity: DeviceIdentity,
        key_name: Option<String>,
        key: impl Into<String>,
    ) -> HubResult<Self> {
        Self::with_renewal(identity, key_name, key, TokenRenewal::default(), system_clock())
    }

    /// Creates a provider with explicit renewal values and clock.
    ///
    /// Fails with a configuration error unless validity exceeds the margin.
    pub fn with_renewal(
        identity: DeviceIdentity,
        key_name: Option<String>,
        key: impl Into<String>,
        renewal: TokenRenewal,
        clock: Arc<dyn Clock>,
    ) -> HubResult<Self> {
        let signer = Arc::new(LocalKeySigner::new(key)?);
        let source = RenewingTokenSource::new(identity, key_name, signer, renewal, clock)?;
        Ok(Self { source })
    }

    /// Creates a provider from a `SharedAccessKey` connection string.
    pub fn from_connection_string(connection_string: &str) -> HubResult<Self> {
        Self::from_connection_string_with(connection_string, TokenRenewal::default(), system_clock())
    }

    /// Creates a provider from a connection string with explicit renewal values.
    pub fn from_connection_string_with(
        connection_string: &str,
        renewal: TokenRenewal,
        clock: Arc<dyn Clock>,
    ) -> HubResult<Self> {
        let parsed = DeviceConnectionString::parse(connection_string)?;
        match parsed.auth {
            ConnectionAuth::SharedAccessKey { key, key_name } => {
                Self::with_renewal(parsed.identity, key_name, key, renewal, clock)
            }
            _ => Err(HubError::validation(
                "connection_string",
                "connection string does not carry a SharedAccessKey",
            )),
        }
    }

    /// Returns the current renewal values.
    pub fn renewal(&self) -> TokenRenewal {
        self.source.renewal()
    }

    /// Changes token validity and renewal margin.
    ///
    /// A pending renewal is replaced by an immediate one using the new values.
    pub async fn set_token_renewal_values(
        &self,
        validity_secs: u64,
        renewal_margin_secs: u64,
    ) -> HubResult<()> {
        self.source
            .set_token_renewal_values(validity_secs, renewal_margin_secs)
            .await
    }

    /// Returns `true` while a renewal timer is pending.
    pub fn is_renewal_armed(&self) -> bool {
        self.source.is_armed()
    }
}

#[async_trait]
impl AuthenticationProvider for SharedAccessKeyAuthenticationProvider {
    fn kind(&self) -> AuthenticationKind {
        AuthenticationKind::Token
    }

    fn identity(&self) -> &DeviceIdentity {
        self.source.identity()
    }

    async fn get_credential(&self) -> HubResult<Credential> {
        self.source.get_credential().await
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.source.subscribe()
    }

    fn stop(&self) {
        self.source.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_core::SharedAccessSignature;

    const CONNECTION_STRING: &str =
        "HostName=hub.example.net;DeviceId=dev-1;SharedAccessKey=c2VjcmV0LWtleS1mb3ItdGVzdHM=";

    #[tokio::test]
    async fn test_token_verifies_against_key() {
        let provider =
            SharedAccessKeyAuthenticationProvider::from_connection_string(CONNECTION_STRING).unwrap();
        let credential = provider.get_credential().await.unwrap();
        let sas = credential.signature().unwrap();

        let expected = SharedAccessSignature::create(
            "hub.example.net/devices/dev-1",
            None,
            "c2VjcmV0LWtleS1mb3ItdGVzdHM=",
            sas.se,
        )
        .unwrap();
        assert_eq!(sas, &expected);
        assert_eq!(provider.kind(), AuthenticationKind::Token);
        assert!(!provider.capabilities().remote_signing);
        provider.stop();
    }

    #[test]
    fn test_rejects_non_key_connection_string() {
        let err = SharedAccessKeyAuthenticationProvider::from_connection_string(
            "HostName=hub;DeviceId=d;x509=true",
        )
        .unwrap_err();
        assert!(matches!(err, HubError::Validation { .. }));
    }

    #[test]
    fn test_rejects_bad_renewal_values() {
        let err = SharedAccessKeyAuthenticationProvider::with_renewal(
            DeviceIdentity::new("hub", "d"),
            None,
            "a2V5",
            TokenRenewal {
                validity_secs: 900,
                renewal_margin_secs: 900,
            },
            system_clock(),
        )
        .unwrap_err();
        assert!(matches!(err, HubError::Configuration { .. }));
    }

    #[test]
    fn test_policy_key_name_is_carried() {
        let provider = SharedAccessKeyAuthenticationProvider::from_connection_string(
            "HostName=hub;DeviceId=d;SharedAccessKeyName=device;SharedAccessKey=a2V5",
        )
        .unwrap();
        assert_eq!(provider.identity().device_id, "d");
    }
}
