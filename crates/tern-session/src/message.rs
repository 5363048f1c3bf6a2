// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Opaque messages carried over session links.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use tern_core::{HubError, HubResult};

/// A message body plus application properties.
///
/// The session never looks inside the body; encoding is up to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    /// Message identifier.
    pub message_id: Option<String>,
    /// Correlation identifier, used to pair requests and responses.
    pub correlation_id: Option<String>,
    /// Application properties.
    pub properties: BTreeMap<String, String>,
    /// Raw body.
    pub body: Vec<u8>,
}

impl Message {
    /// Creates a message with the given body.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    /// Creates a message whose body is `value` serialized as JSON.
    pub fn json<T: Serialize>(value: &T) -> HubResult<Self> {
        let body = serde_json::to_vec(value)
            .map_err(|e| HubError::validation("body", format!("not serializable: {}", e)))?;
        Ok(Self::new(body))
    }

    /// Sets the message identifier.
    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Sets the correlation identifier.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Adds an application property.
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Returns an application property.
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    /// Parses the body as JSON.
    pub fn body_json(&self) -> HubResult<serde_json::Value> {
        if self.body.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_slice(&self.body)
            .map_err(|e| HubError::format(format!("message body is not JSON: {}", e)))
    }
}
