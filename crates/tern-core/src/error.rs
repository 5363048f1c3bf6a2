// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Unified error taxonomy for tern.
//!
//! Every fallible operation in the session layer reports a [`HubError`].
//! The variants follow the retry taxonomy used by the retry policies:
//!
//! ```text
//! HubError
//! ├── terminal       Validation, Configuration, Format, Unauthorized,
//! │                  NotFound, Conflict, Signing, SessionClosed
//! ├── throttling     Throttled (retried with an extended backoff floor)
//! ├── transient      Network, Timeout, ServiceUnavailable, NotConnected
//! ├── link           Link (transient for reconnect, reported verbatim)
//! └── aggregate      FeatureRestore
//! ```
//!
//! `HubError` is `Clone` so it can travel inside broadcast notifications.
//!
//! # Examples
//!
//! ```
//! use tern_core::error::{ErrorKind, HubError};
//!
//! let error = HubError::throttled("too many requests");
//! assert!(error.is_throttling());
//! assert_eq!(error.kind(), ErrorKind::Throttling);
//! ```

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result alias used across all tern crates.
pub type HubResult<T> = Result<T, HubError>;

// =============================================================================
// ErrorKind
// =============================================================================

/// Coarse classification of a [`HubError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid arguments or malformed input. Never retried.
    Validation,
    /// Credentials rejected. Terminal.
    Authorization,
    /// Target resource missing or in conflict. Terminal.
    NotFound,
    /// Hub asked the client to slow down.
    Throttling,
    /// Network, timeout, or availability problem.
    Transient,
    /// Protocol error on a sub-link.
    Link,
    /// Errors produced by the session layer itself.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Authorization => write!(f, "authorization"),
            Self::NotFound => write!(f, "not_found"),
            Self::Throttling => write!(f, "throttling"),
            Self::Transient => write!(f, "transient"),
            Self::Link => write!(f, "link"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

// =============================================================================
// HubError
// =============================================================================

/// Errors raised by the session layer and its collaborators.
#[derive(Debug, Clone, Error)]
pub enum HubError {
    /// An argument failed validation.
    #[error("Invalid argument '{argument}': {message}")]
    Validation {
        /// The offending argument.
        argument: String,
        /// Error message.
        message: String,
    },

    /// Provider or session configuration is inconsistent.
    #[error("Configuration error for '{field}': {message}")]
    Configuration {
        /// The field that is misconfigured.
        field: String,
        /// Error message.
        message: String,
    },

    /// A token or connection string could not be parsed.
    #[error("Format error: {message}")]
    Format {
        /// Error message.
        message: String,
    },

    /// The hub rejected the presented credential.
    #[error("Unauthorized: {message}")]
    Unauthorized {
        /// Error message.
        message: String,
    },

    /// The addressed resource does not exist.
    #[error("Not found: {resource}")]
    NotFound {
        /// The missing resource.
        resource: String,
    },

    /// The request conflicts with the resource state.
    #[error("Conflict: {message}")]
    Conflict {
        /// Error message.
        message: String,
    },

    /// The hub throttled the request.
    #[error("Throttled: {message}")]
    Throttled {
        /// Error message.
        message: String,
    },

    /// The hub is temporarily unavailable.
    #[error("Service unavailable: {message}")]
    ServiceUnavailable {
        /// Error message.
        message: String,
    },

    /// Network-level failure.
    #[error("Network error: {message}")]
    Network {
        /// Error message.
        message: String,
    },

    /// The operation did not complete in time.
    #[error("Operation timed out after {duration:?}")]
    Timeout {
        /// The elapsed budget.
        duration: Duration,
    },

    /// A sub-link failed to attach, detach, or deliver.
    #[error("Link '{link}' error: {message}")]
    Link {
        /// The link name.
        link: String,
        /// Error message.
        message: String,
    },

    /// The session is not connected.
    #[error("Not connected")]
    NotConnected,

    /// Token signing failed.
    #[error("Signing failed: {message}")]
    Signing {
        /// Error message.
        message: String,
    },

    /// One or more features could not be re-enabled after a reconnect.
    #[error("Failed to restore {} feature(s): {}", .failures.len(), describe_failures(.failures))]
    FeatureRestore {
        /// `(feature name, error)` for every feature that failed.
        failures: Vec<(String, HubError)>,
    },

    /// The session task has shut down.
    #[error("Session closed")]
    SessionClosed,
}

fn describe_failures(failures: &[(String, HubError)]) -> String {
    failures
        .iter()
        .map(|(feature, error)| format!("{}: {}", feature, error))
        .collect::<Vec<_>>()
        .join("; ")
}

impl HubError {
    /// Creates a validation error.
    pub fn validation(argument: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            argument: argument.into(),
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn configuration(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a format error.
    pub fn format(message: impl Into<String>) -> Self {
        Self::Format {
            message: message.into(),
        }
    }

    /// Creates an unauthorized error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Creates a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a throttling error.
    pub fn throttled(message: impl Into<String>) -> Self {
        Self::Throttled {
            message: message.into(),
        }
    }

    /// Creates a service-unavailable error.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            message: message.into(),
        }
    }

    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Creates a link error.
    pub fn link(link: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Link {
            link: link.into(),
            message: message.into(),
        }
    }

    /// Creates a signing error.
    pub fn signing(message: impl Into<String>) -> Self {
        Self::Signing {
            message: message.into(),
        }
    }

    /// Returns the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } | Self::Configuration { .. } | Self::Format { .. } => {
                ErrorKind::Validation
            }
            Self::Unauthorized { .. } | Self::Signing { .. } => ErrorKind::Authorization,
            Self::NotFound { .. } | Self::Conflict { .. } => ErrorKind::NotFound,
            Self::Throttled { .. } => ErrorKind::Throttling,
            Self::ServiceUnavailable { .. }
            | Self::Network { .. }
            | Self::Timeout { .. }
            | Self::NotConnected => ErrorKind::Transient,
            Self::Link { .. } => ErrorKind::Link,
            Self::FeatureRestore { .. } | Self::SessionClosed => ErrorKind::Internal,
        }
    }

    /// Returns `true` if the hub throttled the request.
    #[inline]
    pub fn is_throttling(&self) -> bool {
        matches!(self, Self::Throttled { .. })
    }

    /// Returns `true` if a later attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Transient | ErrorKind::Throttling | ErrorKind::Link
        )
    }

    /// Returns the error type as a string for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::Configuration { .. } => "configuration",
            Self::Format { .. } => "format",
            Self::Unauthorized { .. } => "unauthorized",
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::Throttled { .. } => "throttled",
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::Network { .. } => "network",
            Self::Timeout { .. } => "timeout",
            Self::Link { .. } => "link",
            Self::NotConnected => "not_connected",
            Self::Signing { .. } => "signing",
            Self::FeatureRestore { .. } => "feature_restore",
            Self::SessionClosed => "session_closed",
        }
    }
}

impl From<std::io::Error> for HubError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::TimedOut => Self::Timeout {
                duration: Duration::ZERO,
            },
            _ => Self::network(error.to_string()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(HubError::validation("key", "empty").kind(), ErrorKind::Validation);
        assert_eq!(HubError::unauthorized("bad sig").kind(), ErrorKind::Authorization);
        assert_eq!(HubError::not_found("device").kind(), ErrorKind::NotFound);
        assert_eq!(HubError::conflict("etag").kind(), ErrorKind::NotFound);
        assert_eq!(HubError::throttled("slow down").kind(), ErrorKind::Throttling);
        assert_eq!(HubError::network("reset").kind(), ErrorKind::Transient);
        assert_eq!(HubError::NotConnected.kind(), ErrorKind::Transient);
        assert_eq!(HubError::link("c2d", "detached").kind(), ErrorKind::Link);
    }

    #[test]
    fn test_transient_classification() {
        assert!(HubError::timeout(Duration::from_secs(1)).is_transient());
        assert!(HubError::service_unavailable("503").is_transient());
        assert!(HubError::link("twin", "closed").is_transient());
        assert!(!HubError::unauthorized("401").is_transient());
        assert!(!HubError::format("bad").is_transient());
    }

    #[test]
    fn test_feature_restore_message() {
        let error = HubError::FeatureRestore {
            failures: vec![
                ("c2d".to_string(), HubError::network("reset")),
                ("twin".to_string(), HubError::unauthorized("denied")),
            ],
        };

        let message = error.to_string();
        assert!(message.contains("2 feature(s)"));
        assert!(message.contains("c2d: Network error: reset"));
        assert!(message.contains("twin: Unauthorized: denied"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let error: HubError = io.into();
        assert!(matches!(error, HubError::Network { .. }));
    }
}
