// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # tern-session
//!
//! The session layer between high-level device operations and a hub
//! transport.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ DeviceClient            retry per operation              │
//! │   └── TwinSynchronizer  cached twin, desired patches     │
//! ├──────────────────────────────────────────────────────────┤
//! │ ConnectionSession       FSM actor, links, auto-reconnect │
//! ├────────────────────────────┬─────────────────────────────┤
//! │ HubTransport (external)    │ AuthenticationProvider      │
//! └────────────────────────────┴─────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`session`]: the connection state machine
//! - [`transport`]: the transport seam
//! - [`link`]: features, endpoints and link addresses
//! - [`twin`]: twin document merging and synchronization
//! - [`client`]: the device client façade

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod link;
pub mod message;
pub mod session;
pub mod state;
pub mod transport;
pub mod twin;

// =============================================================================
// Re-exports
// =============================================================================

pub use client::DeviceClient;
pub use link::{Endpoint, Feature, LinkDirection, LinkSpec};
pub use message::Message;
pub use session::{ConnectionSession, SessionConfig};
pub use state::{SessionEvent, SessionState, SessionStats};
pub use transport::{
    ConnectParams, DetachMode, HubTransport, TransportEvent, TransportEventReceiver,
    TransportEventSender,
};
pub use twin::{merge_patch, PropertyChange, TwinDocument, TwinProperties, TwinSynchronizer};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
