// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Integration tests for twin merging and synchronization.

use serde_json::{json, Map, Value};
use tern_core::HubError;
use tern_session::{merge_patch, Message, PropertyChange, TwinDocument};
use tern_tests::prelude::*;

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {}", other),
    }
}

fn twin_requests(transport: &MockTransport, operation: &str) -> usize {
    transport
        .sent()
        .iter()
        .filter(|(link, message)| link == "twin_sender" && message.property("operation") == Some(operation))
        .count()
}

// =============================================================================
// Merge
// =============================================================================

#[test]
fn test_merge_patch_semantics() {
    let mut target = object(json!({"a": {"b": 0, "c": 2, "d": 3}, "e": [1, 2], "f": "x"}));
    let changes = merge_patch(
        &mut target,
        &object(json!({"a": {"b": 1, "c": null}, "e": [3], "f": null, "g": {"h": true}})),
    );

    assert_eq!(
        Value::Object(target),
        json!({"a": {"b": 1, "d": 3}, "e": [3], "g": {"h": true}})
    );
    let paths: Vec<&str> = changes.iter().map(|c| c.path.as_str()).collect();
    assert_eq!(paths, vec!["a.b", "a", "e", "g.h", "g"]);
}

#[test]
fn test_document_from_nested_twin() {
    let document = TwinDocument::from_full(&json!({
        "etag": "AAAA",
        "properties": {
            "desired": {"$version": 5, "interval": 30},
            "reported": {"$version": 2, "firmware": "1.0"}
        }
    }))
    .unwrap();

    assert_eq!(document.version(), Some(5));
    assert_eq!(document.etag.as_deref(), Some("AAAA"));
    assert_eq!(document.desired.get("interval"), Some(&json!(30)));
    assert_eq!(document.reported.version, Some(2));
    assert!(!document.desired.properties.contains_key("$version"));

    assert!(TwinDocument::from_full(&json!([1, 2])).is_err());
}

// =============================================================================
// Synchronizer
// =============================================================================

#[tokio::test]
async fn test_start_fetches_twin() {
    init_test_logging();
    let transport = MockTransport::new();
    transport.set_twin(json!({
        "desired": {"$version": 3, "a": {"b": 0, "c": 2, "d": 3}},
        "reported": {"$version": 1}
    }));
    let client = device_client(&transport, sas_provider());

    let twin = client.get_twin().await.unwrap();
    let document = twin.document();

    assert!(twin.is_listening());
    assert_eq!(document.version(), Some(3));
    assert_eq!(document.desired.get("a.b"), Some(&json!(0)));
    assert_eq!(transport.count("attach:twin_receiver"), 1);
    assert_eq!(transport.count("attach:twin_sender"), 1);

    let sent = transport.sent();
    let subscribe = &sent[0].1;
    assert_eq!(subscribe.property("operation"), Some("PUT"));
    assert_eq!(
        subscribe.property("resource"),
        Some("/notifications/twin/properties/desired")
    );
    assert_eq!(subscribe.property("$rid"), subscribe.correlation_id.as_deref());
    assert_eq!(sent[1].1.property("operation"), Some("GET"));
}

#[tokio::test]
async fn test_desired_patch_updates_document() {
    let transport = MockTransport::new();
    transport.set_twin(json!({
        "desired": {"$version": 3, "a": {"b": 0, "c": 2, "d": 3}},
        "reported": {}
    }));
    let client = device_client(&transport, sas_provider());
    let twin = client.get_twin().await.unwrap();
    let mut changes = twin.subscribe();

    let patch = Message::json(&json!({"a": {"b": 1, "c": null}, "$version": 4})).unwrap();
    assert!(transport.deliver("twin_receiver", patch));

    let first: PropertyChange = next_event(&mut changes, Some).await;
    let second: PropertyChange = next_event(&mut changes, Some).await;
    assert_eq!(first.path, "a.b");
    assert_eq!(first.value, json!(1));
    assert_eq!(second.path, "a");
    assert_eq!(second.value, json!({"b": 1, "d": 3}));

    let document = twin.document();
    assert_eq!(document.version(), Some(4));
    assert_eq!(Value::Object(document.desired.properties), json!({"a": {"b": 1, "d": 3}}));
}

#[tokio::test]
async fn test_update_reported_records_version() {
    let transport = MockTransport::new();
    let client = device_client(&transport, sas_provider());
    let twin = client.get_twin().await.unwrap();

    twin.update_reported(&json!({"temperature": 21})).await.unwrap();

    let document = twin.document();
    assert_eq!(document.reported.version, Some(2));
    assert_eq!(document.reported.get("temperature"), Some(&json!(21)));

    let (_, patch) = transport.sent().pop().unwrap();
    assert_eq!(patch.property("operation"), Some("PATCH"));
    assert_eq!(patch.property("resource"), Some("/properties/reported"));
    assert_eq!(patch.body_json().unwrap(), json!({"temperature": 21}));

    let error = twin.update_reported(&json!(5)).await.unwrap_err();
    assert!(matches!(error, HubError::Validation { .. }));
}

#[tokio::test]
async fn test_twin_not_found_is_not_retried() {
    let transport = MockTransport::new();
    transport.fail_next_twin_request(404);
    let client = device_client(&transport, sas_provider());

    let error = client.get_twin().await.unwrap_err();
    assert!(matches!(error, HubError::NotFound { .. }));
    assert_eq!(transport.count("send:twin_sender"), 1);
}

#[tokio::test]
async fn test_throttled_twin_request_is_retried() {
    let transport = MockTransport::new();
    let client = device_client(&transport, sas_provider());
    let twin = client.get_twin().await.unwrap();
    assert_eq!(twin_requests(&transport, "GET"), 1);

    transport.fail_next_twin_request(429);
    twin.refresh().await.unwrap();
    assert_eq!(twin_requests(&transport, "GET"), 3);
    assert_eq!(transport.count("send:twin_sender"), 4);
}

#[tokio::test]
async fn test_twin_resyncs_after_reconnect() {
    let transport = MockTransport::new();
    let client = device_client(&transport, sas_provider());
    let twin = client.get_twin().await.unwrap();
    assert_eq!(twin.document().version(), Some(1));

    transport.set_twin(json!({"desired": {"$version": 7, "mode": "eco"}, "reported": {}}));
    assert!(transport.drop_connection(None));

    eventually(|| twin.document().version() == Some(7)).await;
    assert_eq!(twin.document().desired.get("mode"), Some(&json!("eco")));
    assert_eq!(twin_requests(&transport, "PUT"), 2);
    assert_eq!(transport.count("attach:twin_receiver"), 2);
}

#[tokio::test]
async fn test_stopped_twin_ignores_patches() {
    let transport = MockTransport::new();
    let client = device_client(&transport, sas_provider());
    let twin = client.get_twin().await.unwrap();

    twin.stop();
    assert!(!twin.is_listening());

    let patch = Message::json(&json!({"x": 1, "$version": 2})).unwrap();
    assert!(transport.deliver("twin_receiver", patch));
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(twin.document().desired.get("x").is_none());
}
