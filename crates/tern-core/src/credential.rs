// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Credential snapshots handed out by authentication providers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{HubError, HubResult};
use crate::signature::{decode_uri_component, SharedAccessSignature};

// =============================================================================
// AuthenticationKind
// =============================================================================

/// How a provider authenticates against the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticationKind {
    /// Time-limited SAS tokens presented after the transport connects.
    Token,
    /// A client certificate presented while the transport connects.
    X509,
}

impl fmt::Display for AuthenticationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token => write!(f, "token"),
            Self::X509 => write!(f, "x509"),
        }
    }
}

// =============================================================================
// DeviceIdentity
// =============================================================================

/// The hub-side identity a credential is issued for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Hub host name.
    pub host: String,
    /// Device identifier.
    pub device_id: String,
    /// Module identifier, for module identities.
    pub module_id: Option<String>,
    /// Gateway to connect through instead of the hub.
    pub gateway_host: Option<String>,
}

impl DeviceIdentity {
    /// Creates a device identity.
    pub fn new(host: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            device_id: device_id.into(),
            module_id: None,
            gateway_host: None,
        }
    }

    /// Sets the module identifier.
    pub fn with_module(mut self, module_id: impl Into<String>) -> Self {
        self.module_id = Some(module_id.into());
        self
    }

    /// Sets the gateway host.
    pub fn with_gateway(mut self, gateway_host: impl Into<String>) -> Self {
        self.gateway_host = Some(gateway_host.into());
        self
    }

    /// Returns the host the transport should connect to.
    pub fn connect_host(&self) -> &str {
        self.gateway_host.as_deref().unwrap_or(&self.host)
    }

    /// Returns the identity path below the host: `devices/<id>[/modules/<id>]`.
    pub fn path(&self) -> String {
        match self.module_id {
            Some(ref module_id) => format!("devices/{}/modules/{}", self.device_id, module_id),
            None => format!("devices/{}", self.device_id),
        }
    }

    /// Returns the (unencoded) resource URI tokens are scoped to.
    pub fn resource_uri(&self) -> String {
        format!("{}/{}", self.host, self.path())
    }

    /// Parses `host/devices/<id>[/modules/<id>]`, decoding escapes first.
    pub fn from_resource_uri(uri: &str) -> HubResult<Self> {
        let decoded = decode_uri_component(uri)?;
        let parts: Vec<&str> = decoded.split('/').collect();

        match parts.as_slice() {
            [host, "devices", device_id] if !host.is_empty() && !device_id.is_empty() => {
                Ok(Self::new(*host, *device_id))
            }
            [host, "devices", device_id, "modules", module_id]
                if !host.is_empty() && !device_id.is_empty() && !module_id.is_empty() =>
            {
                Ok(Self::new(*host, *device_id).with_module(*module_id))
            }
            _ => Err(HubError::format(format!(
                "resource URI '{}' is not of the form host/devices/<id>[/modules/<id>]",
                decoded
            ))),
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.resource_uri())
    }
}

// =============================================================================
// X509Identity
// =============================================================================

/// A PEM client certificate and its private key.
#[derive(Clone, PartialEq, Eq)]
pub struct X509Identity {
    /// PEM-encoded certificate chain.
    pub certificate: String,
    /// PEM-encoded private key.
    pub private_key: String,
    /// Passphrase protecting the private key.
    pub passphrase: Option<String>,
}

impl X509Identity {
    /// Creates an identity from PEM strings.
    pub fn new(certificate: impl Into<String>, private_key: impl Into<String>) -> Self {
        Self {
            certificate: certificate.into(),
            private_key: private_key.into(),
            passphrase: None,
        }
    }

    /// Sets the key passphrase.
    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }
}

impl fmt::Debug for X509Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("X509Identity")
            .field("certificate_len", &self.certificate.len())
            .field("private_key", &"<redacted>")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// =============================================================================
// Credential
// =============================================================================

/// The secret half of a credential. Exactly one form is ever present.
#[derive(Clone, PartialEq, Eq)]
pub enum CredentialSecret {
    /// A base64 signing key the consumer signs with itself.
    SigningKey(String),
    /// A signed token.
    Signature(SharedAccessSignature),
    /// A client certificate.
    Certificate(X509Identity),
}

impl fmt::Debug for CredentialSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SigningKey(_) => f.write_str("SigningKey(<redacted>)"),
            Self::Signature(sas) => f.debug_tuple("Signature").field(sas).finish(),
            Self::Certificate(cert) => f.debug_tuple("Certificate").field(cert).finish(),
        }
    }
}

/// A credential snapshot. Providers hand out copies; borrowers never mutate
/// the provider's state through them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// Identity the credential belongs to.
    pub identity: DeviceIdentity,
    /// Key (policy) name, if any.
    pub key_name: Option<String>,
    /// The secret material.
    pub secret: CredentialSecret,
}

impl Credential {
    /// Creates a credential.
    pub fn new(identity: DeviceIdentity, key_name: Option<String>, secret: CredentialSecret) -> Self {
        Self {
            identity,
            key_name,
            secret,
        }
    }

    /// Returns the resource URI the credential is scoped to.
    pub fn resource_uri(&self) -> String {
        self.identity.resource_uri()
    }

    /// Returns the token, if this is a token credential.
    pub fn signature(&self) -> Option<&SharedAccessSignature> {
        match self.secret {
            CredentialSecret::Signature(ref sas) => Some(sas),
            _ => None,
        }
    }

    /// Returns the certificate, if this is a certificate credential.
    pub fn certificate(&self) -> Option<&X509Identity> {
        match self.secret {
            CredentialSecret::Certificate(ref cert) => Some(cert),
            _ => None,
        }
    }

    /// Returns the signing key, if this credential carries one.
    pub fn signing_key(&self) -> Option<&str> {
        match self.secret {
            CredentialSecret::SigningKey(ref key) => Some(key),
            _ => None,
        }
    }

    /// Returns the token expiry in epoch seconds.
    pub fn expiry(&self) -> Option<u64> {
        self.signature().map(|sas| sas.se)
    }

    /// Returns the rendered token string.
    pub fn token(&self) -> Option<String> {
        self.signature().map(|sas| sas.to_string())
    }
}

// =============================================================================
// Tests
// =============================================================================
