// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Device twin synchronization.
//!
//! The twin is a pair of JSON property trees: `desired` (written by the
//! service) and `reported` (written by the device). The synchronizer keeps a
//! cached [`TwinDocument`], merges desired-property patches pushed by the hub
//! into it and publishes a [`PropertyChange`] for every path a patch touched.
//!
//! # Merge rules
//!
//! - objects merge key by key, recursively
//! - `null` removes the key and everything below it
//! - scalars and arrays replace the previous value
//! - `$version` updates the document version and is never stored
//!
//! Change notifications are emitted children first: one per non-null leaf
//! (carrying the patch value) and one per object node (carrying the merged
//! subtree).

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tern_core::{HubError, HubResult, RetryOperation, SharedRetryPolicy};

use crate::link::{Endpoint, Feature};
use crate::message::Message;
use crate::session::ConnectionSession;
use crate::state::SessionEvent;

/// Key carrying the property version.
pub const VERSION_KEY: &str = "$version";

/// Resource of the reported properties.
pub const REPORTED_RESOURCE: &str = "/properties/reported";

/// Resource for subscribing to desired property patches.
pub const DESIRED_NOTIFICATIONS_RESOURCE: &str = "/notifications/twin/properties/desired";

const CHANGE_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Merge
// =============================================================================

/// A property touched by a patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyChange {
    /// Dot-separated path from the root of the property tree.
    pub path: String,
    /// Patch value for leaves, merged subtree for objects.
    pub value: Value,
}

/// Merges `patch` into `target` and returns the changes, children first.
pub fn merge_patch(target: &mut Map<String, Value>, patch: &Map<String, Value>) -> Vec<PropertyChange> {
    let mut changes = Vec::new();
    merge_into(target, patch, "", &mut changes);
    changes
}

fn merge_into(
    target: &mut Map<String, Value>,
    patch: &Map<String, Value>,
    prefix: &str,
    changes: &mut Vec<PropertyChange>,
) {
    for (key, value) in patch {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };

        match value {
            Value::Null => {
                target.remove(key);
            }
            Value::Object(child_patch) => {
                let entry = target
                    .entry(key.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !entry.is_object() {
                    *entry = Value::Object(Map::new());
                }
                if let Value::Object(child) = &mut *entry {
                    merge_into(child, child_patch, &path, changes);
                }
                changes.push(PropertyChange {
                    path,
                    value: entry.clone(),
                });
            }
            leaf => {
                target.insert(key.clone(), leaf.clone());
                changes.push(PropertyChange {
                    path,
                    value: leaf.clone(),
                });
            }
        }
    }
}

// =============================================================================
// TwinDocument
// =============================================================================

/// One side of the twin.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TwinProperties {
    /// The property tree, without `$version`.
    pub properties: Map<String, Value>,
    /// Version of this side.
    pub version: Option<u64>,
}

impl TwinProperties {
    fn from_value(value: Option<&Value>) -> HubResult<Self> {
        let mut properties = match value {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(other) => {
                return Err(HubError::format(format!(
                    "twin properties must be an object, got {}",
                    other
                )))
            }
        };
        let version = properties.remove(VERSION_KEY).and_then(|v| v.as_u64());
        Ok(Self { properties, version })
    }

    fn apply(&mut self, patch: &Value) -> HubResult<Vec<PropertyChange>> {
        let Value::Object(patch) = patch else {
            return Err(HubError::format("twin patch must be a JSON object"));
        };

        let mut patch = patch.clone();
        if let Some(version) = patch.remove(VERSION_KEY) {
            self.version = version.as_u64().or(self.version);
        }
        Ok(merge_patch(&mut self.properties, &patch))
    }

    /// Returns the value at a dot-separated path.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.properties.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }
}

/// Cached twin state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TwinDocument {
    /// Desired properties.
    pub desired: TwinProperties,
    /// Reported properties.
    pub reported: TwinProperties,
    /// Entity tag of the whole twin, if the hub sent one.
    pub etag: Option<String>,
}

impl TwinDocument {
    /// Builds a document from a full twin.
    ///
    /// Accepts `{"desired": .., "reported": ..}`, optionally nested under
    /// `"properties"` with a top-level `"etag"`.
    pub fn from_full(value: &Value) -> HubResult<Self> {
        let Value::Object(root) = value else {
            return Err(HubError::format("twin document must be a JSON object"));
        };

        let properties = match root.get("properties") {
            Some(Value::Object(properties)) => properties,
            _ => root,
        };

        Ok(Self {
            desired: TwinProperties::from_value(properties.get("desired"))?,
            reported: TwinProperties::from_value(properties.get("reported"))?,
            etag: root.get("etag").and_then(Value::as_str).map(str::to_string),
        })
    }

    /// Returns the desired version.
    pub fn version(&self) -> Option<u64> {
        self.desired.version
    }

    /// Merges a desired-properties patch.
    pub fn apply_desired_patch(&mut self, patch: &Value) -> HubResult<Vec<PropertyChange>> {
        self.desired.apply(patch)
    }

    /// Merges a reported-properties patch.
    pub fn apply_reported_patch(&mut self, patch: &Value) -> HubResult<Vec<PropertyChange>> {
        self.reported.apply(patch)
    }
}

// =============================================================================
// TwinSynchronizer
// =============================================================================

/// Keeps a [`TwinDocument`] in sync with the hub.
///
/// Dropping the synchronizer stops its listener.
pub struct TwinSynchronizer {
    inner: Arc<TwinInner>,
}

struct TwinInner {
    session: ConnectionSession,
    policy: SharedRetryPolicy,
    operation_timeout: Duration,
    document: RwLock<TwinDocument>,
    changes: broadcast::Sender<PropertyChange>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl TwinSynchronizer {
    /// Creates a synchronizer. Nothing is fetched until [`start`](Self::start).
    pub fn new(session: ConnectionSession, policy: SharedRetryPolicy, operation_timeout: Duration) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(TwinInner {
                session,
                policy,
                operation_timeout,
                document: RwLock::new(TwinDocument::default()),
                changes,
                listener: Mutex::new(None),
            }),
        }
    }

    /// Enables the twin feature, starts listening for desired patches and
    /// fetches the full twin.
    pub async fn start(&self) -> HubResult<TwinDocument> {
        if self.is_listening() {
            return Ok(self.document());
        }

        // Subscribe before enabling so no patch slips through.
        let events = self.inner.session.subscribe();

        let session = self.inner.session.clone();
        self.inner
            .operation("enable_twin")
            .retry(|| {
                let session = session.clone();
                async move { session.enable_feature(Feature::Twin).await }
            })
            .await?;

        let handle = tokio::spawn(listen(Arc::downgrade(&self.inner), events));
        if let Some(previous) = self.inner.listener.lock().replace(handle) {
            previous.abort();
        }

        self.inner.subscribe_desired().await?;
        self.inner.refresh().await
    }

    /// Fetches the full twin and replaces the cached document.
    pub async fn refresh(&self) -> HubResult<TwinDocument> {
        self.inner.refresh().await
    }

    /// Sends a reported-properties patch and merges it into the cache.
    pub async fn update_reported(&self, patch: &Value) -> HubResult<()> {
        if !patch.is_object() {
            return Err(HubError::validation("patch", "reported patch must be a JSON object"));
        }
        let body = serde_json::to_vec(patch)
            .map_err(|e| HubError::validation("patch", format!("not serializable: {}", e)))?;

        let response = self
            .inner
            .request("PATCH", Some(REPORTED_RESOURCE), body)
            .await?;

        let mut document = self.inner.document.write();
        document.apply_reported_patch(patch)?;
        if let Some(version) = response.property("version").and_then(|v| v.parse().ok()) {
            document.reported.version = Some(version);
        }
        debug!(version = ?document.reported.version, "Reported properties updated");
        Ok(())
    }

    /// Returns a copy of the cached document.
    pub fn document(&self) -> TwinDocument {
        self.inner.document.read().clone()
    }

    /// Subscribes to desired-property changes.
    pub fn subscribe(&self) -> broadcast::Receiver<PropertyChange> {
        self.inner.changes.subscribe()
    }

    /// Returns `true` while the listener runs.
    pub fn is_listening(&self) -> bool {
        self.inner
            .listener
            .lock()
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Stops listening for desired patches. The twin feature stays enabled.
    pub fn stop(&self) {
        if let Some(handle) = self.inner.listener.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for TwinSynchronizer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for TwinSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwinSynchronizer")
            .field("session", &self.inner.session)
            .field("version", &self.inner.document.read().version())
            .finish()
    }
}

impl TwinInner {
    fn operation(&self, name: &str) -> RetryOperation {
        RetryOperation::new(name, self.policy.current(), self.operation_timeout)
    }

    /// Sends one twin request under a retry operation and returns the response.
    async fn request(&self, operation: &str, resource: Option<&str>, body: Vec<u8>) -> HubResult<Message> {
        let session = self.session.clone();

        self.operation(&format!("twin_{}", operation.to_lowercase()))
            .retry(|| {
                let session = session.clone();
                let request_id = Uuid::new_v4().to_string();
                let mut message = Message::new(body.clone())
                    .with_correlation_id(request_id.clone())
                    .with_property("$rid", request_id)
                    .with_property("operation", operation);
                if let Some(resource) = resource {
                    message = message.with_property("resource", resource);
                }

                async move {
                    let response = session
                        .send(Endpoint::TwinRequest, message)
                        .await?
                        .ok_or_else(|| HubError::link("twin_sender", "twin request got no response"))?;
                    check_status(response)
                }
            })
            .await
    }

    async fn subscribe_desired(&self) -> HubResult<()> {
        self.request("PUT", Some(DESIRED_NOTIFICATIONS_RESOURCE), Vec::new())
            .await
            .map(|_| ())
    }

    async fn refresh(&self) -> HubResult<TwinDocument> {
        let response = self.request("GET", None, Vec::new()).await?;
        let document = TwinDocument::from_full(&response.body_json()?)?;
        *self.document.write() = document.clone();

        info!(
            identity = %self.session.identity(),
            version = ?document.version(),
            "Twin refreshed"
        );
        Ok(document)
    }

    fn apply_desired(&self, message: &Message) {
        let patch = match message.body_json() {
            Ok(patch) => patch,
            Err(error) => {
                warn!(error = %error, "Ignoring malformed desired patch");
                return;
            }
        };

        let changes = match self.document.write().apply_desired_patch(&patch) {
            Ok(changes) => changes,
            Err(error) => {
                warn!(error = %error, "Ignoring malformed desired patch");
                return;
            }
        };

        debug!(changes = changes.len(), "Desired patch applied");
        for change in changes {
            let _ = self.changes.send(change);
        }
    }
}

fn check_status(response: Message) -> HubResult<Message> {
    let Some(status) = response.property("status").and_then(|s| s.parse::<u16>().ok()) else {
        return Ok(response);
    };

    let message = format!("twin request failed with status {}", status);
    match status {
        200..=299 => Ok(response),
        400 => Err(HubError::validation("twin", message)),
        401 | 403 => Err(HubError::unauthorized(message)),
        404 => Err(HubError::not_found(message)),
        412 => Err(HubError::conflict(message)),
        429 => Err(HubError::throttled(message)),
        _ => Err(HubError::service_unavailable(message)),
    }
}

async fn listen(inner: Weak<TwinInner>, mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => Some(event),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Twin listener lagged, re-fetching twin");
                None
            }
            Err(RecvError::Closed) => break,
        };

        let Some(inner) = inner.upgrade() else {
            break;
        };

        match event {
            Some(SessionEvent::Message {
                feature: Feature::Twin,
                message,
            }) => inner.apply_desired(&message),
            Some(SessionEvent::Reconnected { restored }) if restored.contains(&Feature::Twin) => {
                if let Err(error) = resync(&inner).await {
                    warn!(error = %error, "Twin resync after reconnect failed");
                }
            }
            None => {
                if let Err(error) = inner.refresh().await {
                    warn!(error = %error, "Twin refresh after lag failed");
                }
            }
            Some(_) => {}
        }
    }
    debug!("Twin listener stopped");
}

async fn resync(inner: &TwinInner) -> HubResult<()> {
    inner.subscribe_desired().await?;
    inner.refresh().await.map(|_| ())
}

// =============================================================================
// Tests
// =============================================================================
