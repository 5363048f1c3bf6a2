// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Mock Implementations
//!
//! - [`MockTransport`]: an in-memory hub that records calls, fails on
//!   demand, answers twin requests and lets tests raise hub-side signals
//! - [`MockSigner`]: a counting signer with scripted failures
//! - [`ManualClock`]: a clock tests move by hand
//!
//! All mocks are cheap to clone; clones share state, so a test keeps one
//! handle while the code under test owns another.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use tern_auth::TokenSigner;
use tern_core::signature::hmac_sha256_base64;
use tern_core::{Clock, Credential, HubError, HubResult};
use tern_session::{
    ConnectParams, DetachMode, HubTransport, LinkSpec, Message, TransportEvent,
    TransportEventSender,
};

// =============================================================================
// Mock Transport
// =============================================================================

#[derive(Debug)]
struct TransportState {
    calls: Vec<String>,
    connect_params: Vec<ConnectParams>,
    credentials: Vec<Credential>,
    sent: Vec<(String, Message)>,

    connect_failures: VecDeque<HubError>,
    authenticate_failures: VecDeque<HubError>,
    attach_failures: HashMap<String, VecDeque<HubError>>,
    send_failures: VecDeque<HubError>,
    detach_failures: VecDeque<HubError>,
    disconnect_failures: VecDeque<HubError>,
    connect_delay: Duration,

    events: Option<TransportEventSender>,

    twin: Value,
    twin_statuses: VecDeque<u16>,
    reported_version: u64,
}

impl Default for TransportState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            connect_params: Vec::new(),
            credentials: Vec::new(),
            sent: Vec::new(),
            connect_failures: VecDeque::new(),
            authenticate_failures: VecDeque::new(),
            attach_failures: HashMap::new(),
            send_failures: VecDeque::new(),
            detach_failures: VecDeque::new(),
            disconnect_failures: VecDeque::new(),
            connect_delay: Duration::ZERO,
            events: None,
            twin: json!({"desired": {"$version": 1}, "reported": {"$version": 1}}),
            twin_statuses: VecDeque::new(),
            reported_version: 1,
        }
    }
}

/// An in-memory hub transport.
///
/// Calls are recorded as strings: `connect`, `authenticate`,
/// `attach:<link>`, `detach:<link>:<mode>`, `send:<link>` and `disconnect`.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<TransportState>>,
}

impl MockTransport {
    /// Creates a transport that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------------
    // Scripting
    // -------------------------------------------------------------------------

    /// Fails the next connect with `error`.
    pub fn fail_next_connect(&self, error: HubError) {
        self.state.lock().connect_failures.push_back(error);
    }

    /// Fails the next authenticate with `error`.
    pub fn fail_next_authenticate(&self, error: HubError) {
        self.state.lock().authenticate_failures.push_back(error);
    }

    /// Fails the next attach of `link` with `error`.
    pub fn fail_next_attach(&self, link: &str, error: HubError) {
        self.state
            .lock()
            .attach_failures
            .entry(link.to_string())
            .or_default()
            .push_back(error);
    }

    /// Fails the next send with `error`.
    pub fn fail_next_send(&self, error: HubError) {
        self.state.lock().send_failures.push_back(error);
    }

    /// Fails the next detach, of any link, with `error`.
    pub fn fail_next_detach(&self, error: HubError) {
        self.state.lock().detach_failures.push_back(error);
    }

    /// Fails the next disconnect with `error`. The connection still closes.
    pub fn fail_next_disconnect(&self, error: HubError) {
        self.state.lock().disconnect_failures.push_back(error);
    }

    /// Makes every connect take `delay`.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.state.lock().connect_delay = delay;
    }

    /// Replaces the twin returned by GET requests.
    pub fn set_twin(&self, twin: Value) {
        self.state.lock().twin = twin;
    }

    /// Answers the next twin request with `status` and no body.
    pub fn fail_next_twin_request(&self, status: u16) {
        self.state.lock().twin_statuses.push_back(status);
    }

    // -------------------------------------------------------------------------
    // Hub-side signals
    // -------------------------------------------------------------------------

    /// Raises a transport event. Returns `false` when not connected.
    pub fn inject(&self, event: TransportEvent) -> bool {
        match self.state.lock().events.as_ref() {
            Some(events) => events.send(event).is_ok(),
            None => false,
        }
    }

    /// Simulates the hub dropping the connection.
    pub fn drop_connection(&self, error: Option<HubError>) -> bool {
        self.inject(TransportEvent::Disconnected(error))
    }

    /// Delivers `message` on the receiver link `link`.
    pub fn deliver(&self, link: &str, message: Message) -> bool {
        self.inject(TransportEvent::Message {
            link: link.to_string(),
            message,
        })
    }

    /// Fails an attached link.
    pub fn fail_link(&self, link: &str, error: HubError) -> bool {
        self.inject(TransportEvent::LinkError {
            link: link.to_string(),
            error,
        })
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    /// Returns the recorded calls.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Counts recorded calls equal to `call`.
    pub fn count(&self, call: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| *c == call).count()
    }

    /// Returns the parameters of every connect.
    pub fn connect_params(&self) -> Vec<ConnectParams> {
        self.state.lock().connect_params.clone()
    }

    /// Returns every credential presented.
    pub fn credentials(&self) -> Vec<Credential> {
        self.state.lock().credentials.clone()
    }

    /// Returns every successfully sent message with its link name.
    pub fn sent(&self) -> Vec<(String, Message)> {
        self.state.lock().sent.clone()
    }

    /// Returns `true` while the transport holds an open connection.
    pub fn is_connected(&self) -> bool {
        self.state.lock().events.is_some()
    }

    fn record(&self, call: String) {
        self.state.lock().calls.push(call);
    }

    fn answer_twin(&self, message: &Message) -> HubResult<Option<Message>> {
        let mut state = self.state.lock();
        let correlation_id = message.correlation_id.clone().unwrap_or_default();

        if let Some(status) = state.twin_statuses.pop_front() {
            return Ok(Some(
                Message::default()
                    .with_correlation_id(correlation_id)
                    .with_property("status", status.to_string()),
            ));
        }

        let response = match message.property("operation") {
            Some("GET") => Message::json(&state.twin)?.with_property("status", "200"),
            Some("PATCH") => {
                state.reported_version += 1;
                Message::default()
                    .with_property("status", "204")
                    .with_property("version", state.reported_version.to_string())
            }
            _ => Message::default().with_property("status", "200"),
        };
        Ok(Some(response.with_correlation_id(correlation_id)))
    }
}

#[async_trait]
impl HubTransport for MockTransport {
    fn display_name(&self) -> &str {
        "mock"
    }

    async fn connect(&mut self, params: &ConnectParams, events: TransportEventSender) -> HubResult<()> {
        let delay = {
            let mut state = self.state.lock();
            state.calls.push("connect".to_string());
            state.connect_params.push(params.clone());
            state.connect_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if let Some(error) = state.connect_failures.pop_front() {
            return Err(error);
        }
        state.events = Some(events);
        Ok(())
    }

    async fn authenticate(&mut self, credential: &Credential) -> HubResult<()> {
        let mut state = self.state.lock();
        state.calls.push("authenticate".to_string());
        if let Some(error) = state.authenticate_failures.pop_front() {
            return Err(error);
        }
        state.credentials.push(credential.clone());
        Ok(())
    }

    async fn attach(&mut self, link: &LinkSpec) -> HubResult<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("attach:{}", link.name));
        match state
            .attach_failures
            .get_mut(&link.name)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn detach(&mut self, link: &LinkSpec, mode: DetachMode) -> HubResult<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("detach:{}:{}", link.name, mode));
        match state.detach_failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn send(&mut self, link: &LinkSpec, message: Message) -> HubResult<Option<Message>> {
        {
            let mut state = self.state.lock();
            state.calls.push(format!("send:{}", link.name));
            if let Some(error) = state.send_failures.pop_front() {
                return Err(error);
            }
            state.sent.push((link.name.clone(), message.clone()));
        }

        if link.name == "twin_sender" {
            return self.answer_twin(&message);
        }
        Ok(None)
    }

    async fn disconnect(&mut self) -> HubResult<()> {
        let mut state = self.state.lock();
        state.calls.push("disconnect".to_string());
        state.events = None;
        match state.disconnect_failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

// =============================================================================
// Mock Signer
// =============================================================================

/// A signer that HMACs with a fixed key and counts its calls.
#[derive(Debug, Clone)]
pub struct MockSigner {
    key: String,
    signed: Arc<AtomicUsize>,
    failures: Arc<Mutex<VecDeque<HubError>>>,
    delay: Arc<Mutex<Duration>>,
}

impl MockSigner {
    /// Creates a signer using the base64 `key`.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            signed: Arc::new(AtomicUsize::new(0)),
            failures: Arc::new(Mutex::new(VecDeque::new())),
            delay: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Returns how many signatures were produced.
    pub fn signed(&self) -> usize {
        self.signed.load(Ordering::SeqCst)
    }

    /// Fails the next signing request.
    pub fn fail_next(&self, error: HubError) {
        self.failures.lock().push_back(error);
    }

    /// Makes every signing request take `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }
}

#[async_trait]
impl TokenSigner for MockSigner {
    fn name(&self) -> &str {
        "mock"
    }

    async fn sign(&self, data: &str) -> HubResult<String> {
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }
        self.signed.fetch_add(1, Ordering::SeqCst);
        hmac_sha256_base64(&self.key, data)
    }
}

// =============================================================================
// Manual Clock
// =============================================================================

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    /// Creates a clock reading `now` epoch seconds.
    pub fn new(now: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(now)),
        }
    }

    /// Sets the time.
    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Moves the time forward.
    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_epoch_secs(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
