// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Token provider backed by the workload API.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use tern_core::{
    system_clock, AuthenticationKind, Clock, Credential, DeviceIdentity, HubError, HubResult,
};

use super::client::WorkloadClient;
use crate::provider::{AuthEvent, AuthenticationProvider, ProviderCapabilities, TokenRenewal};
use crate::renewal::RenewingTokenSource;
use crate::signer::TokenSigner;

/// Environment variables set by the edge runtime for every module.
pub mod env {
    /// Workload API URI.
    pub const WORKLOAD_URI: &str = "IOTEDGE_WORKLOADURI";
    /// Hub host name.
    pub const HUB_HOSTNAME: &str = "IOTEDGE_IOTHUBHOSTNAME";
    /// Gateway host name.
    pub const GATEWAY_HOSTNAME: &str = "IOTEDGE_GATEWAYHOSTNAME";
    /// Device identifier.
    pub const DEVICE_ID: &str = "IOTEDGE_DEVICEID";
    /// Module identifier.
    pub const MODULE_ID: &str = "IOTEDGE_MODULEID";
    /// Module generation identifier.
    pub const GENERATION_ID: &str = "IOTEDGE_MODULEGENERATIONID";
    /// Authentication scheme; only `sasToken` is supported.
    pub const AUTH_SCHEME: &str = "IOTEDGE_AUTHSCHEME";

    /// The supported authentication scheme.
    pub const SAS_TOKEN_SCHEME: &str = "sasToken";
}

// =============================================================================
// WorkloadSettings
// =============================================================================

/// Where the workload API is and which module it signs for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadSettings {
    /// Workload API URI.
    pub workload_uri: String,
    /// Hub host name.
    pub hub_host: String,
    /// Gateway host name, if connecting through the edge hub.
    pub gateway_host: Option<String>,
    /// Device identifier.
    pub device_id: String,
    /// Module identifier.
    pub module_id: String,
    /// Module generation identifier.
    pub generation_id: String,
}

impl WorkloadSettings {
    /// Reads settings from the process environment.
    pub fn from_environment() -> HubResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads settings through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> HubResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| HubError::configuration(name, "environment variable is not set"))
        };

        let scheme = required(env::AUTH_SCHEME)?;
        if scheme != env::SAS_TOKEN_SCHEME {
            return Err(HubError::configuration(
                env::AUTH_SCHEME,
                format!(
                    "unsupported authentication scheme '{}', expected '{}'",
                    scheme,
                    env::SAS_TOKEN_SCHEME
                ),
            ));
        }

        Ok(Self {
            workload_uri: required(env::WORKLOAD_URI)?,
            hub_host: required(env::HUB_HOSTNAME)?,
            gateway_host: lookup(env::GATEWAY_HOSTNAME).filter(|value| !value.is_empty()),
            device_id: required(env::DEVICE_ID)?,
            module_id: required(env::MODULE_ID)?,
            generation_id: required(env::GENERATION_ID)?,
        })
    }

    /// Returns the module identity these settings describe.
    pub fn identity(&self) -> DeviceIdentity {
        let identity =
            DeviceIdentity::new(&self.hub_host, &self.device_id).with_module(&self.module_id);
        match self.gateway_host {
            Some(ref gateway) => identity.with_gateway(gateway),
            None => identity,
        }
    }
}

// =============================================================================
// WorkloadSigner
// =============================================================================

/// Signs tokens through the workload API.
#[derive(Debug, Clone)]
pub struct WorkloadSigner {
    client: Arc<WorkloadClient>,
    module_id: String,
    generation_id: String,
}

impl WorkloadSigner {
    /// Creates a signer for one module generation.
    pub fn new(
        client: Arc<WorkloadClient>,
        module_id: impl Into<String>,
        generation_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            module_id: module_id.into(),
            generation_id: generation_id.into(),
        }
    }
}

#[async_trait]
impl TokenSigner for WorkloadSigner {
    fn name(&self) -> &str {
        "workload"
    }

    async fn sign(&self, data: &str) -> HubResult<String> {
        self.client
            .sign(&self.module_id, &self.generation_id, data)
            .await
    }
}

// =============================================================================
// WorkloadAuthenticationProvider
// =============================================================================

/// Issues tokens signed by the edge runtime and renews them ahead of expiry.
#[derive(Debug)]
pub struct WorkloadAuthenticationProvider {
    source: RenewingTokenSource,
    client: Arc<WorkloadClient>,
}

impl WorkloadAuthenticationProvider {
    /// Creates a provider with the default renewal values.
    pub fn new(settings: WorkloadSettings) -> HubResult<Self> {
        Self::with_renewal(settings, TokenRenewal::default(), system_clock())
    }

    /// Creates a provider with explicit renewal values and clock.
    pub fn with_renewal(
        settings: WorkloadSettings,
        renewal: TokenRenewal,
        clock: Arc<dyn Clock>,
    ) -> HubResult<Self> {
        let client = Arc::new(WorkloadClient::new(&settings.workload_uri)?);
        let signer = Arc::new(WorkloadSigner::new(
            client.clone(),
            &settings.module_id,
            &settings.generation_id,
        ));
        let source = RenewingTokenSource::new(settings.identity(), None, signer, renewal, clock)?;
        Ok(Self { source, client })
    }

    /// Creates a provider from the edge runtime's environment variables.
    pub fn from_environment() -> HubResult<Self> {
        Self::new(WorkloadSettings::from_environment()?)
    }

    /// Fetches the edge runtime's PEM trust bundle.
    pub async fn trust_bundle(&self) -> HubResult<String> {
        self.client.trust_bundle().await
    }

    /// Changes token validity and renewal margin.
    pub async fn set_token_renewal_values(
        &self,
        validity_secs: u64,
        renewal_margin_secs: u64,
    ) -> HubResult<()> {
        self.source
            .set_token_renewal_values(validity_secs, renewal_margin_secs)
            .await
    }
}

#[async_trait]
impl AuthenticationProvider for WorkloadAuthenticationProvider {
    fn kind(&self) -> AuthenticationKind {
        AuthenticationKind::Token
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            remote_signing: true,
        }
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
    use std::collections::HashMap;

    fn vars() -> HashMap<&'static str, String> {
        HashMap::from([
            (env::WORKLOAD_URI, "unix:///var/run/iotedge/workload.sock".to_string()),
            (env::HUB_HOSTNAME, "hub.example.net".to_string()),
            (env::GATEWAY_HOSTNAME, "edge-gw".to_string()),
            (env::DEVICE_ID, "edge-1".to_string()),
            (env::MODULE_ID, "filter".to_string()),
            (env::GENERATION_ID, "637".to_string()),
            (env::AUTH_SCHEME, "sasToken".to_string()),
        ])
    }

    #[test]
    fn test_settings_from_lookup() {
        let vars = vars();
        let settings = WorkloadSettings::from_lookup(|name| vars.get(name).cloned()).unwrap();

        let identity = settings.identity();
        assert_eq!(identity.resource_uri(), "hub.example.net/devices/edge-1/modules/filter");
        assert_eq!(identity.connect_host(), "edge-gw");
    }

    #[test]
    fn test_settings_require_sas_scheme() {
        let mut vars = vars();
        vars.insert(env::AUTH_SCHEME, "x509".to_string());
        let err = WorkloadSettings::from_lookup(|name| vars.get(name).cloned()).unwrap_err();
        assert!(err.to_string().contains("unsupported authentication scheme"));
    }

    #[test]
    fn test_settings_report_missing_variable() {
        let mut vars = vars();
        vars.remove(env::MODULE_ID);
        let err = WorkloadSettings::from_lookup(|name| vars.get(name).cloned()).unwrap_err();
        assert!(matches!(err, HubError::Configuration { ref field, .. } if field == env::MODULE_ID));
    }

    #[test]
    fn test_provider_advertises_remote_signing() {
        let vars = vars();
        let settings = WorkloadSettings::from_lookup(|name| vars.get(name).cloned()).unwrap();
        let provider = WorkloadAuthenticationProvider::new(settings).unwrap();

        assert!(provider.capabilities().remote_signing);
        assert_eq!(provider.kind(), AuthenticationKind::Token);
    }
}
