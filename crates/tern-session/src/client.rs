// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Device client façade.
//!
//! Every operation runs as a [`RetryOperation`] bound to the retry policy
//! installed when the operation starts and to the configured operation
//! timeout. Installing a new policy affects only operations started
//! afterward.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::info;

use tern_auth::AuthenticationProvider;
use tern_core::{HubResult, RetryOperation, RetryPolicy, SharedRetryPolicy};

use crate::link::{Endpoint, Feature};
use crate::message::Message;
use crate::session::{ConnectionSession, SessionConfig};
use crate::state::{SessionEvent, SessionState};
use crate::transport::HubTransport;
use crate::twin::TwinSynchronizer;

/// Property carrying the status of a method response.
pub const METHOD_STATUS_PROPERTY: &str = "IoThub-status";

/// High-level device (or module) client.
#[derive(Debug)]
pub struct DeviceClient {
    session: ConnectionSession,
    provider: Arc<dyn AuthenticationProvider>,
    policy: SharedRetryPolicy,
    operation_timeout: Duration,
}

impl DeviceClient {
    /// Creates a client with the default retry policy.
    pub fn new<T>(transport: T, provider: Arc<dyn AuthenticationProvider>, config: SessionConfig) -> Self
    where
        T: HubTransport + 'static,
    {
        Self::with_policy(transport, provider, SharedRetryPolicy::default(), config)
    }

    /// Creates a client using `policy` for operations and reconnects.
    pub fn with_policy<T>(
        transport: T,
        provider: Arc<dyn AuthenticationProvider>,
        policy: SharedRetryPolicy,
        config: SessionConfig,
    ) -> Self
    where
        T: HubTransport + 'static,
    {
        let operation_timeout = config.operation_timeout;
        let session = ConnectionSession::spawn(transport, provider.clone(), policy.clone(), config);
        Self {
            session,
            provider,
            policy,
            operation_timeout,
        }
    }

    /// Returns the underlying session.
    pub fn session(&self) -> &ConnectionSession {
        &self.session
    }

    /// Returns the session state.
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Subscribes to session events, including received messages.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.session.subscribe()
    }

    /// Returns the retry policy new operations will use.
    pub fn retry_policy(&self) -> Arc<dyn RetryPolicy> {
        self.policy.current()
    }

    /// Installs a retry policy for operations started from now on.
    pub fn set_retry_policy(&self, policy: Arc<dyn RetryPolicy>) {
        info!(policy = policy.name(), "Retry policy replaced");
        self.policy.replace(policy);
    }

    /// Connects and authenticates.
    pub async fn open(&self) -> HubResult<()> {
        let session = self.session.clone();
        self.run("open", move || {
            let session = session.clone();
            async move { session.connect().await }
        })
        .await
    }

    /// Disconnects and cancels pending credential renewals.
    pub async fn close(&self) -> HubResult<()> {
        let result = self.session.disconnect().await;
        self.provider.stop();
        result
    }

    /// Sends a telemetry message.
    pub async fn send_event(&self, message: Message) -> HubResult<()> {
        self.send("send_event", Endpoint::Telemetry, message).await
    }

    /// Sends several telemetry messages in order, stopping at the first failure.
    pub async fn send_event_batch(&self, messages: Vec<Message>) -> HubResult<()> {
        for message in messages {
            self.send_event(message).await?;
        }
        Ok(())
    }

    /// Answers a direct method request.
    pub async fn send_method_response(&self, request_id: &str, status: i32, payload: &Value) -> HubResult<()> {
        let message = Message::json(payload)?
            .with_correlation_id(request_id)
            .with_property(METHOD_STATUS_PROPERTY, status.to_string());
        self.send("send_method_response", Endpoint::MethodResponse, message)
            .await
    }

    /// Enables a feature; it stays enabled across reconnects.
    pub async fn enable_feature(&self, feature: Feature) -> HubResult<()> {
        let session = self.session.clone();
        self.run(&format!("enable_{}", feature), move || {
            let session = session.clone();
            async move { session.enable_feature(feature).await }
        })
        .await
    }

    /// Disables a feature.
    pub async fn disable_feature(&self, feature: Feature) -> HubResult<()> {
        let session = self.session.clone();
        self.run(&format!("disable_{}", feature), move || {
            let session = session.clone();
            async move { session.disable_feature(feature).await }
        })
        .await
    }

    /// Starts receiving cloud-to-device messages.
    pub async fn enable_c2d(&self) -> HubResult<()> {
        self.enable_feature(Feature::C2d).await
    }

    /// Stops receiving cloud-to-device messages.
    pub async fn disable_c2d(&self) -> HubResult<()> {
        self.disable_feature(Feature::C2d).await
    }

    /// Starts receiving direct method requests.
    pub async fn enable_methods(&self) -> HubResult<()> {
        self.enable_feature(Feature::Methods).await
    }

    /// Stops receiving direct method requests.
    pub async fn disable_methods(&self) -> HubResult<()> {
        self.disable_feature(Feature::Methods).await
    }

    /// Starts receiving module input messages.
    pub async fn enable_input_messages(&self) -> HubResult<()> {
        self.enable_feature(Feature::InputMessages).await
    }

    /// Stops receiving module input messages.
    pub async fn disable_input_messages(&self) -> HubResult<()> {
        self.disable_feature(Feature::InputMessages).await
    }

    /// Creates a twin synchronizer and fetches the twin.
    pub async fn get_twin(&self) -> HubResult<TwinSynchronizer> {
        let twin = TwinSynchronizer::new(
            self.session.clone(),
            self.policy.clone(),
            self.operation_timeout,
        );
        twin.start().await?;
        Ok(twin)
    }

    async fn send(&self, name: &str, endpoint: Endpoint, message: Message) -> HubResult<()> {
        let session = self.session.clone();
        self.run(name, move || {
            let session = session.clone();
            let message = message.clone();
            async move { session.send(endpoint, message).await.map(|_| ()) }
        })
        .await
    }

    async fn run<T, F, Fut>(&self, name: &str, work: F) -> HubResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = HubResult<T>>,
    {
        RetryOperation::new(name, self.policy.current(), self.operation_timeout)
            .retry(work)
            .await
    }
}
