// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Integration tests for the connection session and the device client.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tern_auth::{AuthenticationProvider, TokenRenewal};
use tern_core::{Clock, HubError, NoRetry};
use tern_session::client::METHOD_STATUS_PROPERTY;
use tern_session::{Endpoint, Feature, Message, SessionEvent, SessionState};
use tern_tests::prelude::*;

// =============================================================================
// Connect
// =============================================================================

#[tokio::test]
async fn test_concurrent_sends_share_one_connect() {
    init_test_logging();
    let transport = MockTransport::new();
    let session = spawn_session(&transport, sas_provider());

    let mut handles = Vec::new();
    for i in 0..5 {
        let session = session.clone();
        handles.push(tokio::spawn(async move {
            session
                .send(Endpoint::Telemetry, Message::new(format!("m{}", i)))
                .await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().unwrap().is_none());
    }

    assert_eq!(session.state(), SessionState::Authenticated);
    assert_eq!(transport.count("connect"), 1);
    assert_eq!(transport.count("authenticate"), 1);
    assert_eq!(transport.count("attach:telemetry_sender"), 1);
    assert_eq!(transport.count("send:telemetry_sender"), 5);
    assert_eq!(session.stats().connects(), 1);
}

#[tokio::test]
async fn test_connect_presents_provider_token() {
    let transport = MockTransport::new();
    let session = spawn_session(&transport, sas_provider());

    session.connect().await.unwrap();
    session.connect().await.unwrap();

    let params = transport.connect_params();
    assert_eq!(params.len(), 1);
    assert_eq!(params[0].host, HOST);
    assert!(params[0].certificate.is_none());

    let credentials = transport.credentials();
    assert_eq!(credentials[0].token(), Some(token(FAR_EXPIRY).to_string()));
}

#[tokio::test]
async fn test_failed_authentication_tears_down() {
    let transport = MockTransport::new();
    let session = spawn_session(&transport, sas_provider());
    transport.fail_next_authenticate(HubError::unauthorized("bad token"));

    let error = session.connect().await.unwrap_err();
    assert!(matches!(error, HubError::Unauthorized { .. }));
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(transport.calls(), vec!["connect", "authenticate", "disconnect"]);
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn test_connect_failure_leaves_session_disconnected() {
    let transport = MockTransport::new();
    let session = spawn_session(&transport, sas_provider());
    transport.fail_next_connect(HubError::network("refused"));

    assert!(matches!(session.connect().await, Err(HubError::Network { .. })));
    assert_eq!(session.state(), SessionState::Disconnected);

    session.connect().await.unwrap();
    assert_eq!(transport.count("connect"), 2);
}

#[tokio::test]
async fn test_wait_for_state() {
    let transport = MockTransport::new();
    transport.set_connect_delay(Duration::from_millis(20));
    let session = spawn_session(&transport, sas_provider());

    let connecting = session.clone();
    let connect = tokio::spawn(async move { connecting.connect().await });

    session.wait_for_state(SessionState::Authenticated).await.unwrap();
    connect.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_disconnect_detaches_and_is_idempotent() {
    let transport = MockTransport::new();
    let session = spawn_session(&transport, sas_provider());

    session.enable_feature(Feature::C2d).await.unwrap();
    session.disconnect().await.unwrap();
    session.disconnect().await.unwrap();

    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(transport.count("detach:c2d_receiver:graceful"), 1);
    assert_eq!(transport.count("disconnect"), 1);
}

#[tokio::test]
async fn test_failed_detach_still_closes_transport() {
    let transport = MockTransport::new();
    let session = spawn_session(&transport, sas_provider());

    session.enable_feature(Feature::C2d).await.unwrap();
    transport.fail_next_detach(HubError::link("c2d_receiver", "detach refused"));
    transport.fail_next_disconnect(HubError::network("socket already closed"));

    let err = session.disconnect().await.unwrap_err();
    assert!(matches!(err, HubError::Link { .. }), "got {:?}", err);
    assert!(err.to_string().contains("detach refused"));

    let calls = transport.calls();
    let detach = calls.iter().position(|c| c == "detach:c2d_receiver:graceful").unwrap();
    let disconnect = calls.iter().position(|c| c == "disconnect").unwrap();
    assert!(detach < disconnect);
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn test_failed_disconnect_is_reported() {
    let transport = MockTransport::new();
    let session = spawn_session(&transport, sas_provider());

    session.connect().await.unwrap();
    transport.fail_next_disconnect(HubError::network("socket already closed"));

    let err = session.disconnect().await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(session.state(), SessionState::Disconnected);

    // Already disconnected.
    session.disconnect().await.unwrap();
    assert_eq!(transport.count("disconnect"), 1);
}

// =============================================================================
// Features
// =============================================================================

#[tokio::test]
async fn test_enable_and_disable_feature() {
    let transport = MockTransport::new();
    let session = spawn_session(&transport, sas_provider());

    session.enable_feature(Feature::Methods).await.unwrap();
    session.enable_feature(Feature::Methods).await.unwrap();
    assert_eq!(transport.count("attach:methods_receiver"), 1);
    assert_eq!(transport.count("attach:methods_sender"), 1);

    session.disable_feature(Feature::Methods).await.unwrap();
    assert_eq!(transport.count("detach:methods_receiver:graceful"), 1);
    assert_eq!(transport.count("detach:methods_sender:graceful"), 1);
}

#[tokio::test]
async fn test_messages_dispatch_to_enabled_features() {
    let transport = MockTransport::new();
    let session = spawn_session(&transport, sas_provider());
    session.enable_feature(Feature::C2d).await.unwrap();
    let mut events = session.subscribe();

    // Methods is not enabled, so this one is dropped.
    assert!(transport.deliver("methods_receiver", Message::new("ignored")));
    assert!(transport.deliver("c2d_receiver", Message::new("hello")));

    let (feature, message) = next_event(&mut events, |event| match event {
        SessionEvent::Message { feature, message } => Some((feature, message)),
        _ => None,
    })
    .await;
    assert_eq!(feature, Feature::C2d);
    assert_eq!(message.body, b"hello".to_vec());
}

#[tokio::test]
async fn test_link_error_reattaches_owning_feature() {
    let transport = MockTransport::new();
    let session = spawn_session(&transport, sas_provider());
    session.enable_feature(Feature::C2d).await.unwrap();
    let mut events = session.subscribe();

    transport.fail_link("c2d_receiver", HubError::link("c2d_receiver", "detached by peer"));

    let link = next_event(&mut events, |event| match event {
        SessionEvent::LinkError { link, .. } => Some(link),
        _ => None,
    })
    .await;
    assert_eq!(link, "c2d_receiver");

    eventually(|| transport.count("attach:c2d_receiver") == 2).await;
    assert_eq!(session.stats().link_errors(), 1);
    assert_eq!(session.state(), SessionState::Authenticated);
}

// =============================================================================
// Reconnect
// =============================================================================

#[tokio::test]
async fn test_connection_loss_reconnects_and_restores_features() {
    init_test_logging();
    let transport = MockTransport::new();
    let session = spawn_session(&transport, sas_provider());
    session.enable_feature(Feature::C2d).await.unwrap();
    let mut events = session.subscribe();

    assert!(transport.drop_connection(Some(HubError::network("reset"))));

    let restored = next_event(&mut events, |event| match event {
        SessionEvent::Reconnected { restored } => Some(restored),
        _ => None,
    })
    .await;

    assert_eq!(restored, vec![Feature::C2d]);
    assert_eq!(session.state(), SessionState::Authenticated);
    assert_eq!(transport.count("connect"), 2);
    assert_eq!(transport.count("detach:c2d_receiver:forceful"), 1);
    assert_eq!(transport.count("attach:c2d_receiver"), 2);
    assert_eq!(session.stats().reconnects(), 1);
    assert_eq!(session.stats().remote_disconnects(), 1);
}

#[tokio::test]
async fn test_reconnect_retries_failed_connects() {
    let transport = MockTransport::new();
    let session = spawn_session(&transport, sas_provider());
    session.connect().await.unwrap();
    let mut events = session.subscribe();

    transport.fail_next_connect(HubError::network("refused"));
    transport.fail_next_connect(HubError::service_unavailable("busy"));
    assert!(transport.drop_connection(None));

    let restored = next_event(&mut events, |event| match event {
        SessionEvent::Reconnected { restored } => Some(restored),
        _ => None,
    })
    .await;

    assert!(restored.is_empty());
    assert_eq!(transport.count("connect"), 4);
    assert_eq!(session.state(), SessionState::Authenticated);
}

#[tokio::test]
async fn test_fatal_connection_loss_gives_up() {
    let transport = MockTransport::new();
    let session = spawn_session(&transport, sas_provider());
    session.enable_feature(Feature::C2d).await.unwrap();
    let mut events = session.subscribe();

    assert!(transport.drop_connection(Some(HubError::unauthorized("revoked"))));

    let error = next_event(&mut events, |event| match event {
        SessionEvent::Disconnected { error } => Some(error),
        _ => None,
    })
    .await;
    assert!(matches!(error, Some(HubError::Unauthorized { .. })));
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(transport.count("connect"), 1);

    // Enabled features were forgotten: a later reconnect restores nothing.
    session.connect().await.unwrap();
    assert!(transport.drop_connection(None));
    let restored = next_event(&mut events, |event| match event {
        SessionEvent::Reconnected { restored } => Some(restored),
        _ => None,
    })
    .await;
    assert!(restored.is_empty());
    assert_eq!(transport.count("attach:c2d_receiver"), 1);
}

#[tokio::test]
async fn test_restore_failures_are_aggregated() {
    let transport = MockTransport::new();
    let session = spawn_session(&transport, sas_provider());
    session.enable_feature(Feature::C2d).await.unwrap();
    session.enable_feature(Feature::Methods).await.unwrap();
    let mut events = session.subscribe();

    transport.fail_next_attach("c2d_receiver", HubError::unauthorized("denied"));
    assert!(transport.drop_connection(None));

    let restored = next_event(&mut events, |event| match event {
        SessionEvent::Reconnected { restored } => Some(restored),
        _ => None,
    })
    .await;
    assert_eq!(restored, vec![Feature::Methods]);

    let error = next_event(&mut events, |event| match event {
        SessionEvent::FeatureRestoreFailed { error } => Some(error),
        _ => None,
    })
    .await;
    match error {
        HubError::FeatureRestore { failures } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].0, "c2d");
            assert!(matches!(failures[0].1, HubError::Unauthorized { .. }));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(session.state(), SessionState::Authenticated);
}

#[tokio::test]
async fn test_no_retry_policy_does_not_reconnect() {
    let transport = MockTransport::new();
    let client = device_client(&transport, sas_provider());
    client.set_retry_policy(Arc::new(NoRetry::new()));
    client.open().await.unwrap();
    let mut events = client.subscribe();

    assert!(transport.drop_connection(Some(HubError::network("reset"))));

    let error = next_event(&mut events, |event| match event {
        SessionEvent::Disconnected { error } => Some(error),
        _ => None,
    })
    .await;
    assert!(matches!(error, Some(HubError::Network { .. })));
    assert_eq!(transport.count("connect"), 1);
}

// =============================================================================
// Token Renewal
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_token_renewal_reauthenticates_live_session() {
    let clock = ManualClock::new(1000);
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());
    let provider: Arc<dyn AuthenticationProvider> =
        key_provider(shared, TokenRenewal::new(3600, 900).unwrap());

    let transport = MockTransport::new();
    let session = spawn_session(&transport, provider.clone());
    session.connect().await.unwrap();
    assert_eq!(transport.credentials()[0].expiry(), Some(4600));

    clock.advance(2700);
    tokio::time::advance(Duration::from_secs(2701)).await;

    eventually(|| transport.count("authenticate") == 2).await;
    assert_eq!(transport.credentials()[1].expiry(), Some(3700 + 3600));
    assert_eq!(transport.count("connect"), 1);
    eventually(|| session.stats().reauthentications() == 1).await;
    provider.stop();
}

#[tokio::test(start_paused = true)]
async fn test_rejected_renewal_is_a_connection_loss() {
    let clock = ManualClock::new(1000);
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());
    let provider: Arc<dyn AuthenticationProvider> =
        key_provider(shared, TokenRenewal::new(3600, 900).unwrap());

    let transport = MockTransport::new();
    let session = spawn_session(&transport, provider.clone());
    session.connect().await.unwrap();
    let mut events = session.subscribe();

    transport.fail_next_authenticate(HubError::unauthorized("token rejected"));
    clock.advance(2700);
    tokio::time::advance(Duration::from_secs(2701)).await;

    let error = next_event(&mut events, |event| match event {
        SessionEvent::Disconnected { error } => Some(error),
        _ => None,
    })
    .await;
    assert!(matches!(error, Some(HubError::Unauthorized { .. })));
    assert_eq!(session.state(), SessionState::Disconnected);
    provider.stop();
}

// =============================================================================
// DeviceClient
// =============================================================================

#[tokio::test]
async fn test_send_event_retries_transient_failure() {
    let transport = MockTransport::new();
    let client = device_client(&transport, sas_provider());
    transport.fail_next_send(HubError::network("blip"));

    client.send_event(Message::new("reading")).await.unwrap();

    assert_eq!(transport.count("send:telemetry_sender"), 2);
    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.body, b"reading".to_vec());
}

#[tokio::test]
async fn test_swapped_policy_applies_to_next_operation() {
    let transport = MockTransport::new();
    let client = device_client(&transport, sas_provider());
    client.set_retry_policy(Arc::new(NoRetry::new()));
    assert_eq!(client.retry_policy().name(), "no_retry");

    transport.fail_next_send(HubError::network("blip"));
    assert!(client.send_event(Message::new("reading")).await.is_err());
    assert_eq!(transport.count("send:telemetry_sender"), 1);
}

#[tokio::test]
async fn test_send_event_batch_keeps_order() {
    let transport = MockTransport::new();
    let client = device_client(&transport, sas_provider());

    let batch = vec![Message::new("a"), Message::new("b"), Message::new("c")];
    client.send_event_batch(batch).await.unwrap();

    let bodies: Vec<Vec<u8>> = transport.sent().into_iter().map(|(_, m)| m.body).collect();
    assert_eq!(bodies, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
}

#[tokio::test]
async fn test_method_response_carries_request_id_and_status() {
    let transport = MockTransport::new();
    let client = device_client(&transport, sas_provider());

    client
        .send_method_response("rid-7", 200, &json!({"ok": true}))
        .await
        .unwrap();

    let (link, message) = transport.sent().pop().unwrap();
    assert_eq!(link, "methods_sender");
    assert_eq!(message.correlation_id.as_deref(), Some("rid-7"));
    assert_eq!(message.property(METHOD_STATUS_PROPERTY), Some("200"));
    assert_eq!(message.body_json().unwrap(), json!({"ok": true}));
}

#[tokio::test]
async fn test_client_open_close() {
    let transport = MockTransport::new();
    let client = device_client(&transport, sas_provider());

    client.open().await.unwrap();
    client.enable_c2d().await.unwrap();
    assert_eq!(client.state(), SessionState::Authenticated);

    client.close().await.unwrap();
    assert_eq!(client.state(), SessionState::Disconnected);
    assert_eq!(transport.count("disconnect"), 1);
}

#[tokio::test]
async fn test_x509_client_connects_with_certificate() {
    let transport = MockTransport::new();
    let client = device_client(&transport, x509_provider());

    client.open().await.unwrap();

    assert_eq!(transport.count("authenticate"), 0);
    assert_eq!(transport.connect_params()[0].certificate, Some(certificate()));
    assert_eq!(client.state(), SessionState::Authenticated);
}
