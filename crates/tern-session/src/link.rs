// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Features, endpoints and the links backing them.
//!
//! A [`Feature`] is something the caller switches on (cloud-to-device
//! messages, direct methods, twin, module inputs) and stays on across
//! reconnects. An [`Endpoint`] is something the caller sends to. Both resolve
//! to [`LinkSpec`]s whose addresses follow the hub's path layout:
//!
//! ```text
//! /devices/<device>[/modules/<module>]/messages/events       telemetry, module inputs
//! /devices/<device>[/modules/<module>]/messages/devicebound  cloud-to-device
//! /devices/<device>[/modules/<module>]/methods/devicebound   direct methods
//! /devices/<device>[/modules/<module>]/twin                  twin
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use tern_core::{DeviceIdentity, HubError};

// =============================================================================
// LinkSpec
// =============================================================================

/// Direction of a link, seen from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkDirection {
    /// Device to hub.
    Sender,
    /// Hub to device.
    Receiver,
}

impl fmt::Display for LinkDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sender => write!(f, "sender"),
            Self::Receiver => write!(f, "receiver"),
        }
    }
}

/// A named, addressable link on the hub connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkSpec {
    /// Unique link name within a session.
    pub name: String,
    /// Link direction.
    pub direction: LinkDirection,
    /// Hub address.
    pub address: String,
}

impl LinkSpec {
    fn new(name: &str, direction: LinkDirection, identity: &DeviceIdentity, suffix: &str) -> Self {
        Self {
            name: name.to_string(),
            direction,
            address: format!("/{}/{}", identity.path(), suffix),
        }
    }
}

impl fmt::Display for LinkSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} {})", self.name, self.direction, self.address)
    }
}

// =============================================================================
// Feature
// =============================================================================

/// A receive-side capability that survives reconnects once enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Cloud-to-device messages.
    C2d,
    /// Direct method requests.
    Methods,
    /// Twin requests and desired property patches.
    Twin,
    /// Messages routed to a module's inputs.
    InputMessages,
}

impl Feature {
    /// All features.
    pub const ALL: [Feature; 4] = [Self::C2d, Self::Methods, Self::Twin, Self::InputMessages];

    /// Returns the feature name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::C2d => "c2d",
            Self::Methods => "methods",
            Self::Twin => "twin",
            Self::InputMessages => "input_messages",
        }
    }

    /// Returns the links the feature needs attached.
    pub fn links(&self, identity: &DeviceIdentity) -> Vec<LinkSpec> {
        use LinkDirection::{Receiver, Sender};

        match self {
            Self::C2d => vec![LinkSpec::new("c2d_receiver", Receiver, identity, "messages/devicebound")],
            Self::Methods => vec![
                LinkSpec::new("methods_receiver", Receiver, identity, "methods/devicebound"),
                LinkSpec::new("methods_sender", Sender, identity, "methods/devicebound"),
            ],
            Self::Twin => vec![
                LinkSpec::new("twin_receiver", Receiver, identity, "twin"),
                LinkSpec::new("twin_sender", Sender, identity, "twin"),
            ],
            Self::InputMessages => {
                vec![LinkSpec::new("input_receiver", Receiver, identity, "messages/events")]
            }
        }
    }

    /// Returns `true` if `link_name` is one of this feature's links.
    pub fn owns_link(&self, identity: &DeviceIdentity, link_name: &str) -> bool {
        self.links(identity).iter().any(|link| link.name == link_name)
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|feature| feature.as_str() == s)
            .ok_or_else(|| HubError::validation("feature", format!("unknown feature '{}'", s)))
    }
}

// =============================================================================
// Endpoint
// =============================================================================

/// A send-side destination, attached on first use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    /// Device-to-cloud telemetry.
    Telemetry,
    /// Responses to direct method requests.
    MethodResponse,
    /// Twin GET/PATCH requests.
    TwinRequest,
}

impl Endpoint {
    /// Returns the sender link for this endpoint.
    pub fn link(&self, identity: &DeviceIdentity) -> LinkSpec {
        match self {
            Self::Telemetry => LinkSpec::new("telemetry_sender", LinkDirection::Sender, identity, "messages/events"),
            Self::MethodResponse => {
                LinkSpec::new("methods_sender", LinkDirection::Sender, identity, "methods/devicebound")
            }
            Self::TwinRequest => LinkSpec::new("twin_sender", LinkDirection::Sender, identity, "twin"),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Telemetry => write!(f, "telemetry"),
            Self::MethodResponse => write!(f, "method_response"),
            Self::TwinRequest => write!(f, "twin_request"),
        }
    }
}
