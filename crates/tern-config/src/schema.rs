// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client configuration schema.
//!
//! ```text
//! ClientConfig
//! ├── connection: ConnectionConfig   (exactly one credential source)
//! ├── token: TokenRenewal            (validity / renewal margin)
//! ├── retry: RetryConfig             (policy + backoff parameters)
//! ├── session: SessionConfig         (timeouts, channel sizes)
//! └── logging: LoggingConfig
//! ```
//!
//! All sections have defaults, so a minimal file only names the credential
//! source:
//!
//! ```toml
//! [connection]
//! connection_string = "HostName=hub.example.net;DeviceId=dev-1;SharedAccessKey=..."
//! ```

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use tern_auth::{
    AuthenticationProvider, SharedAccessKeyAuthenticationProvider,
    SharedAccessSignatureAuthenticationProvider, TokenRenewal, WorkloadAuthenticationProvider,
    WorkloadSettings, X509AuthenticationProvider,
};
use tern_core::{
    BackoffConfig, Clock, ConnectionAuth, DeviceConnectionString, ExponentialBackoffWithJitter,
    NoRetry, RetryPolicy, SharedRetryPolicy, X509Identity,
};
use tern_session::SessionConfig;

use crate::error::{ConfigError, ConfigResult};

// =============================================================================
// ClientConfig
// =============================================================================

/// Root configuration for a device client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Credential source.
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Token lifetime and renewal margin.
    #[serde(default)]
    pub token: TokenRenewal,

    /// Retry policy.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Session timeouts and channel sizes.
    #[serde(default)]
    pub session: SessionConfig,

    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ClientConfig {
    /// Validates every section.
    pub fn validate(&self) -> ConfigResult<()> {
        self.connection.validate()?;

        self.token
            .validate()
            .map_err(|e| ConfigError::validation("token", e.to_string()))?;

        self.retry.validate()?;

        if self.session.operation_timeout.is_zero() {
            return Err(ConfigError::validation(
                "session.operation_timeout",
                "must be greater than zero",
            ));
        }
        if self.session.reconnect_timeout.is_zero() {
            return Err(ConfigError::validation(
                "session.reconnect_timeout",
                "must be greater than zero",
            ));
        }
        if self.session.request_queue_capacity == 0 || self.session.event_channel_capacity == 0 {
            return Err(ConfigError::validation(
                "session",
                "channel capacities must be greater than zero",
            ));
        }

        Ok(())
    }

    /// Builds the authentication provider for the configured source.
    pub fn build_provider(&self, clock: Arc<dyn Clock>) -> ConfigResult<Arc<dyn AuthenticationProvider>> {
        let provider: Arc<dyn AuthenticationProvider> = match self.connection.source()? {
            CredentialSource::ConnectionString(raw, parsed) => match parsed.auth {
                ConnectionAuth::SharedAccessKey { .. } => Arc::new(
                    SharedAccessKeyAuthenticationProvider::from_connection_string_with(
                        &raw, self.token, clock,
                    )?,
                ),
                ConnectionAuth::SharedAccessSignature(_) => Arc::new(
                    SharedAccessSignatureAuthenticationProvider::from_connection_string(&raw)?,
                ),
                ConnectionAuth::X509 => {
                    let x509 = self
                        .connection
                        .x509
                        .as_ref()
                        .ok_or_else(|| ConfigError::missing_field("connection.x509"))?;
                    Arc::new(X509AuthenticationProvider::from_connection_string(
                        &raw,
                        x509.load()?,
                    )?)
                }
            },
            CredentialSource::SharedAccessSignature(token) => Arc::new(
                SharedAccessSignatureAuthenticationProvider::from_shared_access_signature(&token)?,
            ),
            CredentialSource::EdgeEnvironment => Arc::new(WorkloadAuthenticationProvider::with_renewal(
                WorkloadSettings::from_environment()?,
                self.token,
                clock,
            )?),
        };
        Ok(provider)
    }

    /// Builds the swappable retry policy holder.
    pub fn retry_policy(&self) -> SharedRetryPolicy {
        SharedRetryPolicy::from_arc(self.retry.build_policy())
    }
}

// =============================================================================
// Connection Configuration
// =============================================================================

/// Where credentials come from. Exactly one source must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    /// Device or module connection string.
    #[serde(default)]
    pub connection_string: Option<String>,

    /// A pre-signed SAS token.
    #[serde(default)]
    pub shared_access_signature: Option<String>,

    /// Use the edge runtime's environment and signing endpoint.
    #[serde(default)]
    pub edge_environment: bool,

    /// Client certificate for `x509=true` connection strings.
    #[serde(default)]
    pub x509: Option<X509Config>,
}

/// A resolved credential source.
#[derive(Debug, Clone)]
pub enum CredentialSource {
    /// A connection string, raw and parsed.
    ConnectionString(String, DeviceConnectionString),
    /// A pre-signed token.
    SharedAccessSignature(String),
    /// The edge runtime environment.
    EdgeEnvironment,
}

impl ConnectionConfig {
    /// Number of configured credential sources.
    fn source_count(&self) -> usize {
        [
            self.connection_string.is_some(),
            self.shared_access_signature.is_some(),
            self.edge_environment,
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }

    /// Validates that exactly one source is configured and parses it.
    pub fn validate(&self) -> ConfigResult<()> {
        self.source().map(|_| ())
    }

    /// Resolves the configured source.
    pub fn source(&self) -> ConfigResult<CredentialSource> {
        match self.source_count() {
            0 => return Err(ConfigError::missing_field("connection")),
            1 => {}
            _ => {
                return Err(ConfigError::validation(
                    "connection",
                    "exactly one of connection_string, shared_access_signature or edge_environment must be set",
                ))
            }
        }

        if let Some(ref raw) = self.connection_string {
            let parsed = DeviceConnectionString::parse(raw)
                .map_err(|e| ConfigError::validation("connection.connection_string", e.to_string()))?;
            match (parsed.is_x509(), self.x509.is_some()) {
                (true, false) => return Err(ConfigError::missing_field("connection.x509")),
                (false, true) => {
                    return Err(ConfigError::validation(
                        "connection.x509",
                        "a certificate requires an x509=true connection string",
                    ))
                }
                _ => {}
            }
            return Ok(CredentialSource::ConnectionString(raw.clone(), parsed));
        }

        if self.x509.is_some() {
            return Err(ConfigError::validation(
                "connection.x509",
                "a certificate requires an x509=true connection string",
            ));
        }

        match self.shared_access_signature {
            Some(ref token) => Ok(CredentialSource::SharedAccessSignature(token.clone())),
            None => Ok(CredentialSource::EdgeEnvironment),
        }
    }
}

/// Paths to a PEM certificate and key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct X509Config {
    /// PEM certificate chain.
    pub certificate_path: PathBuf,
    /// PEM private key.
    pub private_key_path: PathBuf,
    /// Key passphrase.
    #[serde(default)]
    pub passphrase: Option<String>,
}

impl X509Config {
    /// Reads the certificate and key files.
    pub fn load(&self) -> ConfigResult<X509Identity> {
        let certificate = fs::read_to_string(&self.certificate_path)
            .map_err(|e| ConfigError::io(&self.certificate_path, e))?;
        let private_key = fs::read_to_string(&self.private_key_path)
            .map_err(|e| ConfigError::io(&self.private_key_path, e))?;

        let identity = X509Identity::new(certificate, private_key);
        Ok(match self.passphrase {
            Some(ref passphrase) => identity.with_passphrase(passphrase.clone()),
            None => identity,
        })
    }
}

// =============================================================================
// Retry Configuration
// =============================================================================

/// Which retry policy to install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Exponential backoff with jitter.
    #[default]
    ExponentialBackoff,
    /// Never retry.
    NoRetry,
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExponentialBackoff => write!(f, "exponential_backoff"),
            Self::NoRetry => write!(f, "no_retry"),
        }
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Policy to install.
    pub policy: PolicyKind,
    /// Backoff parameters, used by the exponential policy.
    pub backoff: BackoffConfig,
}

impl RetryConfig {
    /// Validates the backoff parameters.
    pub fn validate(&self) -> ConfigResult<()> {
        self.backoff
            .validate()
            .map_err(|e| ConfigError::validation("retry.backoff", e.to_string()))
    }

    /// Builds the configured policy.
    pub fn build_policy(&self) -> Arc<dyn RetryPolicy> {
        match self.policy {
            PolicyKind::ExponentialBackoff => {
                Arc::new(ExponentialBackoffWithJitter::new(self.backoff.clone()))
            }
            PolicyKind::NoRetry => Arc::new(NoRetry::new()),
        }
    }
}

// =============================================================================
// Logging Configuration
// =============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Log format.
    #[serde(default)]
    pub format: LogFormat,
}

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Returns the filter directive for this level.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Parses a level name, accepting `warning` for `warn`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// Compact text.
    Compact,
    /// JSON lines.
    Json,
}

// =============================================================================
// Tests
// =============================================================================
