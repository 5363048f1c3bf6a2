// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Hub transport abstraction.
//!
//! The session drives a [`HubTransport`] and never touches the wire itself.
//! Framing, TLS and the token handshake all live behind this trait, which
//! keeps the state machine testable against an in-memory transport.
//!
//! Signals the hub raises on its own (connection loss, a link failing, an
//! incoming message) are pushed into the [`TransportEventSender`] handed over
//! on every connect. Events sent after a disconnect are discarded.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

use tern_core::{Credential, DeviceIdentity, HubError, HubResult, X509Identity};

use crate::link::LinkSpec;
use crate::message::Message;

/// Channel on which a transport reports asynchronous signals.
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiving end of [`TransportEventSender`].
pub type TransportEventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

// =============================================================================
// TransportEvent
// =============================================================================

/// An asynchronous signal raised by the transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The connection was closed by the hub or the network.
    Disconnected(Option<HubError>),
    /// An attached link failed; the connection itself is still up.
    LinkError {
        /// Name of the failed link.
        link: String,
        /// Why it failed.
        error: HubError,
    },
    /// A message arrived on a receiver link.
    Message {
        /// Name of the receiving link.
        link: String,
        /// The message.
        message: Message,
    },
}

// =============================================================================
// ConnectParams
// =============================================================================

/// Parameters for a transport-level connect.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    /// Host to open the connection to (gateway or hub).
    pub host: String,
    /// Identity the connection is for.
    pub identity: DeviceIdentity,
    /// TLS client certificate, for certificate authentication.
    pub certificate: Option<X509Identity>,
}

impl ConnectParams {
    /// Creates parameters for `identity` without a client certificate.
    pub fn new(identity: DeviceIdentity) -> Self {
        Self {
            host: identity.connect_host().to_string(),
            identity,
            certificate: None,
        }
    }

    /// Sets the client certificate.
    pub fn with_certificate(mut self, certificate: X509Identity) -> Self {
        self.certificate = Some(certificate);
        self
    }
}

// =============================================================================
// DetachMode
// =============================================================================

/// How a link is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetachMode {
    /// Run the close handshake.
    Graceful,
    /// Release local resources without waiting for the peer.
    Forceful,
}

impl fmt::Display for DetachMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Graceful => write!(f, "graceful"),
            Self::Forceful => write!(f, "forceful"),
        }
    }
}

// =============================================================================
// HubTransport Trait
// =============================================================================

/// A connection-oriented transport to the hub.
///
/// # Lifecycle
///
/// 1. `connect()` opens the connection and stores the event sender
/// 2. `authenticate()` presents a token (token authentication only); it may
///    be called again on a live connection to present a renewed token
/// 3. `attach()` / `detach()` manage links; `send()` uses an attached link
/// 4. `disconnect()` closes the connection
///
/// The session calls these strictly one at a time.
#[async_trait]
pub trait HubTransport: Send + Sync + fmt::Debug {
    /// Returns a short name for logging.
    fn display_name(&self) -> &str;

    /// Opens the connection.
    async fn connect(&mut self, params: &ConnectParams, events: TransportEventSender) -> HubResult<()>;

    /// Presents a token credential on the open connection.
    async fn authenticate(&mut self, credential: &Credential) -> HubResult<()>;

    /// Attaches a link.
    async fn attach(&mut self, link: &LinkSpec) -> HubResult<()>;

    /// Detaches a link.
    async fn detach(&mut self, link: &LinkSpec, mode: DetachMode) -> HubResult<()>;

    /// Sends a message on an attached sender link.
    ///
    /// Request/response links may return the response message.
    async fn send(&mut self, link: &LinkSpec, message: Message) -> HubResult<Option<Message>>;

    /// Closes the connection.
    async fn disconnect(&mut self) -> HubResult<()>;
}
