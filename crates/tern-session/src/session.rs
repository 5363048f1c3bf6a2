// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Connection session state machine.
//!
//! A [`ConnectionSession`] is a cloneable handle to one actor task that owns
//! the [`HubTransport`] and every piece of connection state. Handles submit
//! requests over a bounded channel and wait on a oneshot reply.
//!
//! # Serialization
//!
//! The actor handles one thing at a time: a request, a transport signal or a
//! credential notification. While a transition is in flight the queue is not
//! polled, so requests that arrive meanwhile wait in FIFO order and run
//! against whatever state the transition ends in. A request that needs a
//! connection while disconnected connects first and then proceeds.
//!
//! # Recovery
//!
//! - A renewed credential is presented on the live connection.
//! - A connection loss tears down forcefully and asks the retry policy
//!   whether to reconnect. If so, the session reconnects under the reconnect
//!   budget and re-enables every feature that was enabled before.
//! - A failed link is re-attached if an enabled feature needs it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};

use tern_auth::{AuthEvent, AuthenticationProvider};
use tern_core::{
    AuthenticationKind, Credential, DeviceIdentity, HubError, HubResult, RetryOperation,
    RetryPolicy, SharedRetryPolicy,
};

use crate::link::{Endpoint, Feature, LinkSpec};
use crate::message::Message;
use crate::state::{SessionEvent, SessionState, SessionStats};
use crate::transport::{
    ConnectParams, DetachMode, HubTransport, TransportEvent, TransportEventReceiver,
};

// =============================================================================
// SessionConfig
// =============================================================================

/// Session tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Budget for one caller operation, including retries. Also bounds the
    /// re-enabling of each feature after a reconnect.
    #[serde(with = "duration_millis")]
    pub operation_timeout: Duration,

    /// Budget for an autonomous reconnect.
    #[serde(with = "duration_millis")]
    pub reconnect_timeout: Duration,

    /// Capacity of the request queue.
    pub request_queue_capacity: usize,

    /// Capacity of the event channel.
    pub event_channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_secs(240),
            reconnect_timeout: Duration::from_secs(240),
            request_queue_capacity: 64,
            event_channel_capacity: 256,
        }
    }
}

// Duration serialization helper
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// =============================================================================
// Requests
// =============================================================================

type Responder<T> = oneshot::Sender<HubResult<T>>;

enum SessionRequest {
    Connect {
        respond: Responder<()>,
    },
    Disconnect {
        respond: Responder<()>,
    },
    Send {
        endpoint: Endpoint,
        message: Message,
        respond: Responder<Option<Message>>,
    },
    EnableFeature {
        feature: Feature,
        respond: Responder<()>,
    },
    DisableFeature {
        feature: Feature,
        respond: Responder<()>,
    },
}

// =============================================================================
// ConnectionSession
// =============================================================================

/// Handle to a session actor.
///
/// Cloning the handle is cheap. When the last handle is dropped the actor
/// closes the connection and exits.
#[derive(Clone)]
pub struct ConnectionSession {
    requests: mpsc::Sender<SessionRequest>,
    state: watch::Receiver<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    stats: Arc<SessionStats>,
    identity: DeviceIdentity,
}

impl ConnectionSession {
    /// Spawns the session actor on the current tokio runtime.
    pub fn spawn<T>(
        transport: T,
        provider: Arc<dyn AuthenticationProvider>,
        policy: SharedRetryPolicy,
        config: SessionConfig,
    ) -> Self
    where
        T: HubTransport + 'static,
    {
        let (request_tx, request_rx) = mpsc::channel(config.request_queue_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));
        let stats = Arc::new(SessionStats::new());
        let identity = provider.identity().clone();

        let actor = SessionActor {
            transport: Box::new(transport),
            auth_events: provider.subscribe(),
            auth_open: true,
            provider,
            policy,
            config,
            identity: identity.clone(),
            state: SessionState::Disconnected,
            state_tx,
            events: events.clone(),
            stats: stats.clone(),
            attached: BTreeMap::new(),
            enabled: BTreeSet::new(),
            transport_events: None,
        };
        tokio::spawn(actor.run(request_rx));

        Self {
            requests: request_tx,
            state: state_rx,
            events,
            stats,
            identity,
        }
    }

    /// Returns the identity this session connects as.
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Returns the current state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Returns a receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Waits until the session reaches `target`.
    pub async fn wait_for_state(&self, target: SessionState) -> HubResult<()> {
        let mut state = self.state.clone();
        state
            .wait_for(|current| *current == target)
            .await
            .map(|_| ())
            .map_err(|_| HubError::SessionClosed)
    }

    /// Subscribes to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Returns the session statistics.
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Connects and authenticates. Succeeds immediately if already authenticated.
    pub async fn connect(&self) -> HubResult<()> {
        self.request(|respond| SessionRequest::Connect { respond })
            .await
    }

    /// Detaches every link and closes the connection.
    ///
    /// Enabled features are forgotten; they are not restored by a later connect.
    pub async fn disconnect(&self) -> HubResult<()> {
        self.request(|respond| SessionRequest::Disconnect { respond })
            .await
    }

    /// Sends a message to `endpoint`, connecting and attaching as needed.
    pub async fn send(&self, endpoint: Endpoint, message: Message) -> HubResult<Option<Message>> {
        self.request(|respond| SessionRequest::Send {
            endpoint,
            message,
            respond,
        })
        .await
    }

    /// Attaches the links of `feature` and keeps it enabled across reconnects.
    pub async fn enable_feature(&self, feature: Feature) -> HubResult<()> {
        self.request(|respond| SessionRequest::EnableFeature { feature, respond })
            .await
    }

    /// Detaches the links of `feature` and stops restoring it.
    pub async fn disable_feature(&self, feature: Feature) -> HubResult<()> {
        self.request(|respond| SessionRequest::DisableFeature { feature, respond })
            .await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Responder<T>) -> SessionRequest,
    ) -> HubResult<T> {
        let (respond, response) = oneshot::channel();
        self.requests
            .send(build(respond))
            .await
            .map_err(|_| HubError::SessionClosed)?;
        response.await.map_err(|_| HubError::SessionClosed)?
    }
}

impl fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("identity", &self.identity.to_string())
            .field("state", &self.state())
            .finish()
    }
}

// =============================================================================
// SessionActor
// =============================================================================

struct SessionActor {
    transport: Box<dyn HubTransport>,
    provider: Arc<dyn AuthenticationProvider>,
    policy: SharedRetryPolicy,
    config: SessionConfig,
    identity: DeviceIdentity,

    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    stats: Arc<SessionStats>,

    /// Attached links by name.
    attached: BTreeMap<String, LinkSpec>,
    /// Features restored after a reconnect. Mutated only here.
    enabled: BTreeSet<Feature>,

    transport_events: Option<TransportEventReceiver>,
    auth_events: broadcast::Receiver<AuthEvent>,
    auth_open: bool,
}

async fn next_transport_event(events: &mut Option<TransportEventReceiver>) -> Option<TransportEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

impl SessionActor {
    async fn run(mut self, mut requests: mpsc::Receiver<SessionRequest>) {
        debug!(
            identity = %self.identity,
            transport = self.transport.display_name(),
            "Session actor started"
        );

        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => self.handle_request(request).await,
                    None => break,
                },
                event = next_transport_event(&mut self.transport_events) => match event {
                    Some(event) => self.handle_transport_event(event).await,
                    None => self.transport_events = None,
                },
                auth = self.auth_events.recv(), if self.auth_open => {
                    self.handle_auth_event(auth).await
                }
            }
        }

        if !self.state.is_disconnected() {
            if let Some(error) = self.teardown(DetachMode::Graceful).await {
                debug!(identity = %self.identity, error = %error, "Teardown on close failed");
            }
        }
        debug!(identity = %self.identity, "Session actor stopped");
    }

    // -------------------------------------------------------------------------
    // Requests
    // -------------------------------------------------------------------------

    async fn handle_request(&mut self, request: SessionRequest) {
        match request {
            SessionRequest::Connect { respond } => {
                let result = self.ensure_authenticated().await;
                let _ = respond.send(result);
            }
            SessionRequest::Disconnect { respond } => {
                let result = self.disconnect().await;
                let _ = respond.send(result);
            }
            SessionRequest::Send {
                endpoint,
                message,
                respond,
            } => {
                let result = self.send(endpoint, message).await;
                let _ = respond.send(result);
            }
            SessionRequest::EnableFeature { feature, respond } => {
                let result = self.enable_feature(feature).await;
                let _ = respond.send(result);
            }
            SessionRequest::DisableFeature { feature, respond } => {
                let result = self.disable_feature(feature).await;
                let _ = respond.send(result);
            }
        }
    }

    async fn disconnect(&mut self) -> HubResult<()> {
        self.enabled.clear();
        if self.state.is_disconnected() {
            return Ok(());
        }

        match self.teardown(DetachMode::Graceful).await {
            Some(error) => Err(error),
            None => {
                info!(identity = %self.identity, "Session disconnected");
                Ok(())
            }
        }
    }

    async fn send(&mut self, endpoint: Endpoint, message: Message) -> HubResult<Option<Message>> {
        self.ensure_authenticated().await?;

        let link = endpoint.link(&self.identity);
        self.attach_link(&link).await?;

        match self.transport.send(&link, message).await {
            Ok(response) => Ok(response),
            Err(error) => {
                if matches!(error, HubError::Link { .. }) {
                    self.attached.remove(&link.name);
                }
                Err(error)
            }
        }
    }

    async fn enable_feature(&mut self, feature: Feature) -> HubResult<()> {
        self.attach_feature(feature).await?;
        if self.enabled.insert(feature) {
            info!(identity = %self.identity, feature = %feature, "Feature enabled");
        }
        Ok(())
    }

    async fn disable_feature(&mut self, feature: Feature) -> HubResult<()> {
        let was_enabled = self.enabled.remove(&feature);
        if !self.state.is_authenticated() {
            return Ok(());
        }

        let mut first_error = None;
        for link in feature.links(&self.identity) {
            if self.attached.remove(&link.name).is_none() {
                continue;
            }
            if let Err(error) = self.transport.detach(&link, DetachMode::Graceful).await {
                warn!(link = %link.name, error = %error, "Detach failed");
                first_error.get_or_insert(error);
            }
        }

        if was_enabled {
            info!(identity = %self.identity, feature = %feature, "Feature disabled");
        }
        first_error.map_or(Ok(()), Err)
    }

    // -------------------------------------------------------------------------
    // Transitions
    // -------------------------------------------------------------------------

    /// Drives Disconnected through Connecting and Authenticating.
    ///
    /// On failure the session is back in Disconnected and the error is the
    /// one that stopped the transition.
    async fn ensure_authenticated(&mut self) -> HubResult<()> {
        if self.state.is_authenticated() {
            return Ok(());
        }

        self.set_state(SessionState::Connecting);
        let token_auth = self.provider.kind() == AuthenticationKind::Token;

        let mut params = ConnectParams::new(self.identity.clone());
        if !token_auth {
            match self.provider.get_credential().await {
                Ok(credential) => {
                    if let Some(certificate) = credential.certificate() {
                        params = params.with_certificate(certificate.clone());
                    }
                }
                Err(error) => {
                    self.stats.record_failure();
                    self.set_state(SessionState::Disconnected);
                    return Err(error);
                }
            }
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        if let Err(error) = self.transport.connect(&params, events_tx).await {
            warn!(
                identity = %self.identity,
                host = %params.host,
                error = %error,
                "Transport connect failed"
            );
            self.stats.record_failure();
            self.set_state(SessionState::Disconnected);
            return Err(error);
        }
        self.transport_events = Some(events_rx);

        self.set_state(SessionState::Authenticating);
        if token_auth {
            if let Err(error) = self.authenticate(None).await {
                warn!(identity = %self.identity, error = %error, "Authentication failed");
                self.stats.record_failure();
                if let Some(teardown_error) = self.teardown(DetachMode::Forceful).await {
                    debug!(error = %teardown_error, "Teardown after failed authentication also failed");
                }
                return Err(error);
            }
        }

        self.stats.record_connect();
        self.set_state(SessionState::Authenticated);
        info!(
            identity = %self.identity,
            transport = self.transport.display_name(),
            "Session authenticated"
        );
        Ok(())
    }

    /// Presents `credential`, or a freshly fetched one.
    async fn authenticate(&mut self, credential: Option<Credential>) -> HubResult<()> {
        let credential = match credential {
            Some(credential) => credential,
            None => self.provider.get_credential().await?,
        };
        self.transport.authenticate(&credential).await
    }

    /// Detaches every link and closes the transport, ending in Disconnected.
    ///
    /// Every step runs even if an earlier one failed; the first failure is
    /// returned.
    async fn teardown(&mut self, mode: DetachMode) -> Option<HubError> {
        self.set_state(SessionState::Disconnecting);
        let mut first_error = None;

        let links = std::mem::take(&mut self.attached);
        for link in links.into_values() {
            if let Err(error) = self.transport.detach(&link, mode).await {
                debug!(link = %link.name, mode = %mode, error = %error, "Detach failed during teardown");
                first_error.get_or_insert(error);
            }
        }

        if let Err(error) = self.transport.disconnect().await {
            debug!(error = %error, "Transport disconnect failed during teardown");
            first_error.get_or_insert(error);
        }

        // Signals from the closed connection are stale.
        self.transport_events = None;
        self.set_state(SessionState::Disconnected);
        first_error
    }

    async fn attach_link(&mut self, link: &LinkSpec) -> HubResult<()> {
        if self.attached.contains_key(&link.name) {
            return Ok(());
        }
        self.transport.attach(link).await?;
        trace!(link = %link, "Link attached");
        self.attached.insert(link.name.clone(), link.clone());
        Ok(())
    }

    async fn attach_feature(&mut self, feature: Feature) -> HubResult<()> {
        self.ensure_authenticated().await?;
        for link in feature.links(&self.identity) {
            self.attach_link(&link).await?;
        }
        Ok(())
    }

    /// Re-attaches `feature` under its own retry budget.
    async fn restore_feature(&mut self, feature: Feature, policy: Arc<dyn RetryPolicy>) -> HubResult<()> {
        let mut operation = RetryOperation::new(
            format!("restore_{}", feature),
            policy,
            self.config.operation_timeout,
        );

        loop {
            operation.begin_attempt();
            let error = match self.attach_feature(feature).await {
                Ok(()) => return Ok(()),
                Err(error) => error,
            };
            match operation.next_delay(&error) {
                Some(delay) => tokio::time::sleep(delay).await,
                None => return Err(error),
            }
        }
    }

    fn set_state(&mut self, new_state: SessionState) {
        let old_state = std::mem::replace(&mut self.state, new_state);
        if old_state != new_state {
            trace!(
                old_state = %old_state,
                new_state = %new_state,
                "Session state changed"
            );
            self.state_tx.send_replace(new_state);
            self.emit(SessionEvent::StateChanged {
                from: old_state,
                to: new_state,
            });
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    // -------------------------------------------------------------------------
    // Transport signals
    // -------------------------------------------------------------------------

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Disconnected(error) => {
                if !self.state.is_authenticated() {
                    trace!("Ignoring disconnect signal outside Authenticated");
                    return;
                }
                self.stats.record_remote_disconnect();
                let error = error.unwrap_or_else(|| HubError::network("connection closed by the hub"));
                self.handle_connection_loss(error).await;
            }
            TransportEvent::LinkError { link, error } => self.handle_link_error(link, error).await,
            TransportEvent::Message { link, message } => self.dispatch_message(&link, message),
        }
    }

    async fn handle_connection_loss(&mut self, error: HubError) {
        warn!(identity = %self.identity, error = %error, "Connection lost");
        if let Some(teardown_error) = self.teardown(DetachMode::Forceful).await {
            debug!(error = %teardown_error, "Forced teardown reported an error");
        }

        let policy = self.policy.current();
        if !policy.should_retry(&error) {
            warn!(
                identity = %self.identity,
                policy = policy.name(),
                error = %error,
                "Connection loss is not retriable, staying disconnected"
            );
            self.give_up(error);
            return;
        }

        self.reconnect(policy).await;
    }

    async fn reconnect(&mut self, policy: Arc<dyn RetryPolicy>) {
        info!(
            identity = %self.identity,
            features = ?self.enabled,
            "Reconnecting"
        );

        let mut operation =
            RetryOperation::new("reconnect", policy.clone(), self.config.reconnect_timeout);
        loop {
            operation.begin_attempt();
            let error = match self.ensure_authenticated().await {
                Ok(()) => break,
                Err(error) => error,
            };
            match operation.next_delay(&error) {
                Some(delay) => {
                    debug!(
                        attempt = operation.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Reconnect attempt failed"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    warn!(
                        identity = %self.identity,
                        attempts = operation.attempts(),
                        error = %error,
                        "Reconnect gave up"
                    );
                    self.give_up(error);
                    return;
                }
            }
        }
        self.stats.record_reconnect();

        let mut restored = Vec::new();
        let mut failures = Vec::new();
        for feature in self.enabled.clone() {
            match self.restore_feature(feature, policy.clone()).await {
                Ok(()) => restored.push(feature),
                Err(error) => {
                    self.enabled.remove(&feature);
                    failures.push((feature.to_string(), error));
                }
            }
        }

        info!(identity = %self.identity, restored = ?restored, "Reconnected");
        self.emit(SessionEvent::Reconnected { restored });

        if !failures.is_empty() {
            let error = HubError::FeatureRestore { failures };
            warn!(identity = %self.identity, error = %error, "Some features were not restored");
            self.emit(SessionEvent::FeatureRestoreFailed { error });
        }
    }

    fn give_up(&mut self, error: HubError) {
        self.stats.record_failure();
        self.enabled.clear();
        self.emit(SessionEvent::Disconnected { error: Some(error) });
    }

    async fn handle_link_error(&mut self, link_name: String, error: HubError) {
        if self.attached.remove(&link_name).is_none() {
            trace!(link = %link_name, "Ignoring error for a link that is not attached");
            return;
        }

        self.stats.record_link_error();
        warn!(link = %link_name, error = %error, "Link failed");
        self.emit(SessionEvent::LinkError {
            link: link_name.clone(),
            error,
        });

        let owner = self
            .enabled
            .iter()
            .copied()
            .find(|feature| feature.owns_link(&self.identity, &link_name));
        let Some(feature) = owner else {
            return;
        };

        let policy = self.policy.current();
        if let Err(error) = self.restore_feature(feature, policy).await {
            self.enabled.remove(&feature);
            let error = HubError::FeatureRestore {
                failures: vec![(feature.to_string(), error)],
            };
            warn!(feature = %feature, error = %error, "Feature lost after link failure");
            self.emit(SessionEvent::FeatureRestoreFailed { error });
        } else {
            debug!(link = %link_name, feature = %feature, "Link re-attached");
        }
    }

    fn dispatch_message(&self, link: &str, message: Message) {
        let owner = self
            .enabled
            .iter()
            .copied()
            .find(|feature| feature.owns_link(&self.identity, link));

        match owner {
            Some(feature) => self.emit(SessionEvent::Message { feature, message }),
            None => debug!(link, "Dropping message for a link with no enabled feature"),
        }
    }

    // -------------------------------------------------------------------------
    // Credential notifications
    // -------------------------------------------------------------------------

    async fn handle_auth_event(&mut self, event: Result<AuthEvent, RecvError>) {
        match event {
            Ok(AuthEvent::NewCredential(credential)) => self.reauthenticate(Some(credential)).await,
            Ok(AuthEvent::Error(error)) => {
                warn!(identity = %self.identity, error = %error, "Credential renewal failed");
            }
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "Missed credential notifications, re-reading credential");
                self.reauthenticate(None).await;
            }
            Err(RecvError::Closed) => {
                self.auth_open = false;
            }
        }
    }

    async fn reauthenticate(&mut self, credential: Option<Credential>) {
        if !self.state.is_authenticated() || self.provider.kind() != AuthenticationKind::Token {
            return;
        }

        match self.authenticate(credential).await {
            Ok(()) => {
                self.stats.record_reauthentication();
                debug!(identity = %self.identity, "Re-authenticated with renewed credential");
            }
            Err(error) => {
                warn!(identity = %self.identity, error = %error, "Re-authentication failed");
                self.handle_connection_loss(error).await;
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
