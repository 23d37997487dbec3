//! End-to-end tests for thing sessions over WebSocket
//!
//! Run with: cargo test -p iota-tests --test session_e2e_test

use iota_gateway::GatewayConfig;
use iota_tests::{MockBrokerServer, TestServer};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use serial_test::serial;

fn config() -> GatewayConfig {
    GatewayConfig {
        default_key: Some("knot-key".into()),
        ..Default::default()
    }
}

async fn setup() -> (TestServer, MockBrokerServer) {
    let broker = MockBrokerServer::start().await.unwrap();
    let server = TestServer::start(config(), &broker).await.unwrap();
    (server, broker)
}

fn schema(sensor_id: Value, name: &str) -> Value {
    json!({"sensor_id": sensor_id, "value_type": 1, "unit": 0, "type_id": 65296, "name": name})
}

// =============================================================================
// Registration
// =============================================================================

#[tokio::test]
#[serial]
async fn test_add_thing_then_list() {
    let (server, _broker) = setup().await;
    let mut client = server.connect().await.unwrap();
    assert!(!client.session_id.is_empty());

    let reply = client
        .request(json!({"type": "add_thing", "id": "7e13-0a", "name": "Garden"}))
        .await
        .unwrap();
    assert_eq!(reply["result"], json!("ok"));

    let reply = client.request(json!({"type": "list_things"})).await.unwrap();
    assert_eq!(
        reply["result"],
        json!([{"id": "7e13-0a", "name": "Garden", "schema": []}])
    );
}

#[tokio::test]
#[serial]
async fn test_update_schema_lists_numeric_sensor_ids() {
    let (server, _broker) = setup().await;
    let mut client = server.connect().await.unwrap();

    client
        .request(json!({"type": "add_thing", "id": "t1", "name": "Garden"}))
        .await
        .unwrap();
    let reply = client
        .request(json!({
            "type": "update_schema",
            "id": "t1",
            "schema": [schema(json!(1), "temperature"), schema(json!("2"), "humidity")]
        }))
        .await
        .unwrap();
    assert_eq!(reply["result"], json!("ok"));

    let reply = client.request(json!({"type": "list_things"})).await.unwrap();
    let schema = reply["result"][0]["schema"].as_array().unwrap().clone();
    assert_eq!(schema.len(), 2);
    assert_eq!(schema[0]["sensor_id"], json!(1));
    assert_eq!(schema[0]["type_id"], json!(65296));
    assert_eq!(schema[0]["name"], json!("temperature"));
    assert_eq!(schema[1]["sensor_id"], json!(2));
}

#[tokio::test]
#[serial]
async fn test_update_schema_of_unknown_thing_fails() {
    let (server, _broker) = setup().await;
    let mut client = server.connect().await.unwrap();

    let reply = client
        .request(json!({"type": "update_schema", "id": "ghost", "schema": [schema(json!(1), "x")]}))
        .await
        .unwrap();
    assert_eq!(reply["result"], json!("fail"));
    assert!(reply["error"].is_string());
}

#[tokio::test]
#[serial]
async fn test_reregistration_replaces_subtree() {
    let (server, _broker) = setup().await;
    let mut client = server.connect().await.unwrap();

    client
        .request(json!({"type": "add_thing", "id": "t1", "name": "Old"}))
        .await
        .unwrap();
    client
        .request(json!({"type": "update_schema", "id": "t1", "schema": [schema(json!(1), "x")]}))
        .await
        .unwrap();

    let reply = client
        .request(json!({"type": "add_thing", "id": "t1", "name": "New"}))
        .await
        .unwrap();
    assert_eq!(reply["result"], json!("ok"));

    let reply = client.request(json!({"type": "list_things"})).await.unwrap();
    assert_eq!(reply["result"], json!([{"id": "t1", "name": "New", "schema": []}]));
}

// =============================================================================
// Removal
// =============================================================================

#[tokio::test]
#[serial]
async fn test_remove_thing_retracts_from_broker() {
    let (server, broker) = setup().await;
    let mut client = server.connect().await.unwrap();

    client
        .request(json!({"type": "add_thing", "id": "t1", "name": "Garden"}))
        .await
        .unwrap();
    client
        .request(json!({"type": "update_schema", "id": "t1", "schema": [schema(json!(1), "x")]}))
        .await
        .unwrap();

    let reply = client.request(json!({"type": "remove_thing", "id": "t1"})).await.unwrap();
    assert_eq!(reply["result"], json!("ok"));

    let mut deleted = broker.deleted();
    deleted.sort();
    assert_eq!(deleted, vec!["1".to_string(), "t1".to_string()]);

    let reply = client.request(json!({"type": "list_things"})).await.unwrap();
    assert_eq!(reply["result"], json!([]));
}

#[tokio::test]
#[serial]
async fn test_remove_absent_thing_fails() {
    let (server, _broker) = setup().await;
    let mut client = server.connect().await.unwrap();

    let reply = client.request(json!({"type": "remove_thing", "id": "nope"})).await.unwrap();
    assert_eq!(reply["result"], json!("fail"));
}

// =============================================================================
// Data
// =============================================================================

#[tokio::test]
#[serial]
async fn test_publish_data_reaches_broker() {
    let (server, broker) = setup().await;
    let mut client = server.connect().await.unwrap();

    client
        .request(json!({"type": "add_thing", "id": "t-1", "name": "Garden"}))
        .await
        .unwrap();
    let reply = client
        .request(json!({"type": "publish_data", "id": "t-1", "data": [{"sensor_id": 1, "value": 21.5}]}))
        .await
        .unwrap();
    assert_eq!(reply["result"], json!("ok"));

    let requests = broker.requests();
    let update = requests
        .iter()
        .find(|r| r.method == "POST" && r.entity_id == "1")
        .expect("measure update");
    assert_eq!(update.service.as_deref(), Some("knot"));
    assert_eq!(update.subservice.as_deref(), Some("/knot/t_1"));
    assert_eq!(update.body["entities"][0]["value"]["value"], json!("21.5"));
}

#[tokio::test]
#[serial]
async fn test_publish_empty_data_fails() {
    let (server, broker) = setup().await;
    let mut client = server.connect().await.unwrap();

    let reply = client
        .request(json!({"type": "publish_data", "id": "t1", "data": []}))
        .await
        .unwrap();
    assert_eq!(reply["result"], json!("fail"));
    assert!(broker.requests().is_empty());
}

#[tokio::test]
#[serial]
async fn test_update_properties_pushes_one_update() {
    let (server, broker) = setup().await;
    let mut client = server.connect().await.unwrap();

    client
        .request(json!({"type": "add_thing", "id": "t1", "name": "Garden"}))
        .await
        .unwrap();
    let reply = client
        .request(json!({"type": "update_properties", "id": "t1", "properties": {"room": "kitchen", "floor": "2"}}))
        .await
        .unwrap();
    assert_eq!(reply["result"], json!("ok"));

    let updates = broker.updates_for("t1");
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["entities"][0]["room"]["value"], json!("kitchen"));
    assert_eq!(updates[0]["entities"][0]["floor"]["value"], json!("2"));
}

// =============================================================================
// Protocol
// =============================================================================

#[tokio::test]
#[serial]
async fn test_message_is_echoed() {
    let (server, _broker) = setup().await;
    let mut client = server.connect().await.unwrap();

    let reply = client.request(json!({"type": "message", "text": "hello"})).await.unwrap();
    assert_eq!(reply["result"], json!("RECEIVED \"hello\""));
}

#[tokio::test]
#[serial]
async fn test_unparseable_frame_gets_error() {
    let (server, _broker) = setup().await;
    let mut client = server.connect().await.unwrap();

    client.send_raw("{not json").await.unwrap();
    let frame = client.next_frame().await.unwrap();
    assert_eq!(frame["type"], json!("error"));

    // The session survives a bad frame
    let reply = client.request(json!({"type": "message", "text": "still here"})).await.unwrap();
    assert_eq!(reply["result"], json!("RECEIVED \"still here\""));
}

#[tokio::test]
#[serial]
async fn test_health_counts_sessions() {
    let (server, _broker) = setup().await;
    let http = reqwest::Client::new();

    let first = server.connect().await.unwrap();
    let _second = server.connect().await.unwrap();
    let gateway = server.gateway.clone();
    assert!(server.wait_until(|| { let g = gateway.clone(); async move { g.sessions.len() == 2 } }).await);

    let body: Value = http.get(server.health_url()).send().await.unwrap().json().await.unwrap();
    assert_eq!(body["status"], json!("ok"));
    assert_eq!(body["sessions"], json!(2));

    first.close().await.unwrap();
    assert!(server.wait_until(|| { let g = gateway.clone(); async move { g.sessions.len() == 1 } }).await);
}
