// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Session states, events and statistics.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use tern_core::HubError;

use crate::link::Feature;
use crate::message::Message;

// =============================================================================
// SessionState
// =============================================================================

/// State of a connection session.
///
/// ```text
/// Disconnected ──connect──▶ Connecting ──ok──▶ Authenticating ──ok──▶ Authenticated
///      ▲                        │                   │                      │
///      │                      error               error           disconnect / loss
///      │                        ▼                   ▼                      ▼
///      └────────────────────────┴───────────── Disconnecting ◀─────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No connection.
    #[default]
    Disconnected,

    /// Opening the transport connection.
    Connecting,

    /// Presenting credentials.
    Authenticating,

    /// Connected and authenticated; links may be attached.
    Authenticated,

    /// Detaching links and closing the connection.
    Disconnecting,
}

impl SessionState {
    /// Returns `true` if links can be attached.
    #[inline]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated)
    }

    /// Returns `true` if there is no connection.
    #[inline]
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// Returns `true` if a transition is in progress.
    #[inline]
    pub fn is_transitioning(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Authenticating | Self::Disconnecting
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Authenticating => write!(f, "Authenticating"),
            Self::Authenticated => write!(f, "Authenticated"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

// =============================================================================
// SessionEvent
// =============================================================================

/// Notifications published by a session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The session moved between states.
    StateChanged {
        /// Previous state.
        from: SessionState,
        /// New state.
        to: SessionState,
    },

    /// A message arrived for an enabled feature.
    Message {
        /// Feature the receiving link belongs to.
        feature: Feature,
        /// The message.
        message: Message,
    },

    /// An attached link failed.
    LinkError {
        /// Name of the failed link.
        link: String,
        /// Why it failed.
        error: HubError,
    },

    /// The session reconnected on its own after losing the connection.
    Reconnected {
        /// Features that were re-enabled.
        restored: Vec<Feature>,
    },

    /// Some features could not be re-enabled; they are no longer enabled.
    FeatureRestoreFailed {
        /// A [`HubError::FeatureRestore`] listing every failed feature.
        error: HubError,
    },

    /// The session lost its connection and will not reconnect on its own.
    Disconnected {
        /// The error that ended the session.
        error: Option<HubError>,
    },
}

// =============================================================================
// SessionStats
// =============================================================================

/// Counters for session activity.
#[derive(Debug, Default)]
pub struct SessionStats {
    /// Successful connects, including reconnects.
    connects: AtomicU64,

    /// Successful autonomous reconnects.
    reconnects: AtomicU64,

    /// Re-authentications with a renewed credential.
    reauthentications: AtomicU64,

    /// Connection losses reported by the transport.
    remote_disconnects: AtomicU64,

    /// Link failures reported by the transport.
    link_errors: AtomicU64,

    /// Connects or reconnects that ended in failure.
    failures: AtomicU64,
}

impl SessionStats {
    /// Creates zeroed statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successful connect.
    pub fn record_connect(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a successful reconnect.
    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a re-authentication.
    pub fn record_reauthentication(&self) {
        self.reauthentications.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a connection loss.
    pub fn record_remote_disconnect(&self) {
        self.remote_disconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a link failure.
    pub fn record_link_error(&self) {
        self.link_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed connect or reconnect.
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of successful connects.
    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }

    /// Returns the number of successful reconnects.
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Returns the number of re-authentications.
    pub fn reauthentications(&self) -> u64 {
        self.reauthentications.load(Ordering::Relaxed)
    }

    /// Returns the number of connection losses.
    pub fn remote_disconnects(&self) -> u64 {
        self.remote_disconnects.load(Ordering::Relaxed)
    }

    /// Returns the number of link failures.
    pub fn link_errors(&self) -> u64 {
        self.link_errors.load(Ordering::Relaxed)
    }

    /// Returns the number of failed connects.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state() {
        assert!(SessionState::Authenticated.is_authenticated());
        assert!(SessionState::default().is_disconnected());
        assert!(SessionState::Connecting.is_transitioning());
        assert!(SessionState::Disconnecting.is_transitioning());
        assert!(!SessionState::Authenticated.is_transitioning());
        assert_eq!(SessionState::Authenticating.to_string(), "Authenticating");
    }

    #[test]
    fn test_stats() {
        let stats = SessionStats::new();
        stats.record_connect();
        stats.record_connect();
        stats.record_reconnect();
        stats.record_failure();

        assert_eq!(stats.connects(), 2);
        assert_eq!(stats.reconnects(), 1);
        assert_eq!(stats.failures(), 1);
        assert_eq!(stats.link_errors(), 0);
    }
}
