// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Device connection string parsing.
//!
//! A connection string is a `;`-separated list of `Name=Value` pairs:
//!
//! ```text
//! HostName=hub.example.net;DeviceId=dev-1;SharedAccessKey=<base64>
//! HostName=hub.example.net;DeviceId=dev-1;ModuleId=filter;SharedAccessKey=<base64>
//! HostName=hub.example.net;DeviceId=dev-1;x509=true
//! HostName=hub.example.net;DeviceId=dev-1;SharedAccessSignature=SharedAccessSignature sr=...
//! ```
//!
//! Values may themselves contain `=` (base64 padding), so only the first `=`
//! of every segment separates name and value.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::credential::DeviceIdentity;
use crate::error::{HubError, HubResult};

/// Field names understood by [`DeviceConnectionString`].
pub mod fields {
    /// Hub host name.
    pub const HOST_NAME: &str = "HostName";
    /// Device identifier.
    pub const DEVICE_ID: &str = "DeviceId";
    /// Module identifier.
    pub const MODULE_ID: &str = "ModuleId";
    /// Base64 device key.
    pub const SHARED_ACCESS_KEY: &str = "SharedAccessKey";
    /// Key (policy) name.
    pub const SHARED_ACCESS_KEY_NAME: &str = "SharedAccessKeyName";
    /// Pre-signed token.
    pub const SHARED_ACCESS_SIGNATURE: &str = "SharedAccessSignature";
    /// Gateway host name.
    pub const GATEWAY_HOST_NAME: &str = "GatewayHostName";
    /// Marks certificate authentication.
    pub const X509: &str = "x509";
}

// =============================================================================
// ConnectionString
// =============================================================================

/// A generic parsed connection string.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct ConnectionString {
    fields: BTreeMap<String, String>,
}

impl ConnectionString {
    /// Parses a connection string, requiring the listed fields.
    pub fn parse(source: &str, required: &[&str]) -> HubResult<Self> {
        let mut fields = BTreeMap::new();

        for segment in source.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let (name, value) = segment.split_once('=').ok_or_else(|| {
                HubError::format(format!("connection string segment '{}' has no '='", name_only(segment)))
            })?;
            fields.insert(name.trim().to_string(), value.trim().to_string());
        }

        for field in required {
            if fields.get(*field).map_or(true, |value| value.is_empty()) {
                return Err(HubError::format(format!(
                    "connection string is missing required field '{}'",
                    field
                )));
            }
        }

        Ok(Self { fields })
    }

    /// Returns a field value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Returns `true` if the field is present.
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }
}

// Never echo a value in an error, it may be a key.
fn name_only(segment: &str) -> &str {
    segment.split('=').next().unwrap_or_default()
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.fields.keys()).finish()
    }
}

// =============================================================================
// DeviceConnectionString
// =============================================================================

/// How a device connection string authenticates.
#[derive(Clone, PartialEq, Eq)]
pub enum ConnectionAuth {
    /// A device or policy key used to sign tokens locally.
    SharedAccessKey {
        /// Base64 key.
        key: String,
        /// Optional key (policy) name.
        key_name: Option<String>,
    },
    /// A pre-signed token.
    SharedAccessSignature(String),
    /// Certificate authentication; the certificate is supplied separately.
    X509,
}

impl fmt::Debug for ConnectionAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SharedAccessKey { key_name, .. } => f
                .debug_struct("SharedAccessKey")
                .field("key", &"<redacted>")
                .field("key_name", key_name)
                .finish(),
            Self::SharedAccessSignature(_) => f.write_str("SharedAccessSignature(<redacted>)"),
            Self::X509 => f.write_str("X509"),
        }
    }
}

/// A device (or module) connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConnectionString {
    /// Identity named by the connection string.
    pub identity: DeviceIdentity,
    /// Authentication material.
    pub auth: ConnectionAuth,
}

impl DeviceConnectionString {
    /// Parses a device connection string.
    ///
    /// Exactly one of `SharedAccessKey`, `SharedAccessSignature` or `x509=true`
    /// must be present.
    pub fn parse(source: &str) -> HubResult<Self> {
        let parsed = ConnectionString::parse(source, &[fields::HOST_NAME, fields::DEVICE_ID])?;

        let mut identity = DeviceIdentity::new(
            parsed.get(fields::HOST_NAME).unwrap_or_default(),
            parsed.get(fields::DEVICE_ID).unwrap_or_default(),
        );
        if let Some(module_id) = parsed.get(fields::MODULE_ID).filter(|v| !v.is_empty()) {
            identity = identity.with_module(module_id);
        }
        if let Some(gateway) = parsed.get(fields::GATEWAY_HOST_NAME).filter(|v| !v.is_empty()) {
            identity = identity.with_gateway(gateway);
        }

        let key = parsed.get(fields::SHARED_ACCESS_KEY);
        let signature = parsed.get(fields::SHARED_ACCESS_SIGNATURE);
        let x509 = parsed
            .get(fields::X509)
            .map(|value| value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let auth = match (key, signature, x509) {
            (Some(key), None, false) => ConnectionAuth::SharedAccessKey {
                key: key.to_string(),
                key_name: parsed.get(fields::SHARED_ACCESS_KEY_NAME).map(str::to_string),
            },
            (None, Some(signature), false) => {
                ConnectionAuth::SharedAccessSignature(signature.to_string())
            }
            (None, None, true) => ConnectionAuth::X509,
            (None, None, false) => {
                return Err(HubError::format(
                    "connection string carries no SharedAccessKey, SharedAccessSignature or x509=true",
                ))
            }
            _ => {
                return Err(HubError::format(
                    "connection string must carry exactly one of SharedAccessKey, SharedAccessSignature or x509=true",
                ))
            }
        };

        Ok(Self { identity, auth })
    }

    /// Returns `true` if the connection string selects certificate authentication.
    pub fn is_x509(&self) -> bool {
        matches!(self.auth, ConnectionAuth::X509)
    }
}

impl FromStr for DeviceConnectionString {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// =============================================================================
// Tests
// =============================================================================
