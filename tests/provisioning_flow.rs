//! End-to-end provisioning flow over mock gateways

use cloudlink::config::DeviceConfig;
use cloudlink::testing::mocks::{MockHttpGateway, MockMqttFactory};
use cloudlink::transport::HttpOutcome;
use cloudlink::{DeviceCallbacks, DeviceClient, DeviceError, SessionState};
use std::sync::Arc;

fn token_config() -> DeviceConfig {
    toml::from_str(
        r#"
[device]
cpid = "ACME0001"
env = "poc"
duid = "sensor-01"

[auth]
type = "token"
"#,
    )
    .unwrap()
}

fn config_with_auth(auth_type: &str) -> DeviceConfig {
    let extra = if auth_type == "symmetric_key" {
        "\nkey = \"c2VjcmV0\""
    } else {
        ""
    };
    toml::from_str(&format!(
        r#"
[device]
cpid = "ACME0001"
env = "poc"
duid = "sensor-01"

[auth]
type = "{auth_type}"{extra}
"#
    ))
    .unwrap()
}

fn discovery_body() -> HttpOutcome {
    HttpOutcome::Success(r#"{"baseUrl":"https://agent.cloudlink.io/api/2.0/agent/"}"#.to_string())
}

fn sync_body(client_suffix: &str) -> HttpOutcome {
    HttpOutcome::Success(format!(
        r#"{{
            "d": {{
                "ds": 0,
                "dtg": "group-1",
                "p": {{
                    "h": "broker.cloudlink.io",
                    "id": "client-{client_suffix}",
                    "un": "broker.cloudlink.io/client-{client_suffix}",
                    "pwd": "SharedAccessSignature sr=abc",
                    "pub": "devices/client-{client_suffix}/messages/events/",
                    "sub": "devices/client-{client_suffix}/messages/devicebound/#"
                }}
            }}
        }}"#
    ))
}

fn sync_body_without_password() -> HttpOutcome {
    HttpOutcome::Success(
        r#"{
            "d": {
                "ds": 0,
                "dtg": "group-1",
                "p": {
                    "h": "broker.cloudlink.io",
                    "id": "client-1",
                    "un": "broker.cloudlink.io/client-1",
                    "pub": "devices/client-1/messages/events/",
                    "sub": "devices/client-1/messages/devicebound/#"
                }
            }
        }"#
        .to_string(),
    )
}

fn client_over(
    config: DeviceConfig,
    gateway: Arc<MockHttpGateway>,
    factory: Arc<MockMqttFactory>,
) -> DeviceClient {
    DeviceClient::new(
        config,
        gateway,
        Box::new(factory),
        DeviceCallbacks::default(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_full_provisioning_cycle() {
    let gateway = Arc::new(MockHttpGateway::scripted(vec![
        discovery_body(),
        sync_body("1"),
    ]));
    let factory = Arc::new(MockMqttFactory::new());
    let mut client = client_over(token_config(), gateway.clone(), factory.clone());

    client.initialize().await.unwrap();

    assert!(client.is_connected());
    assert_eq!(client.state(), SessionState::Connected);
    assert_eq!(
        client.discovery_result().unwrap().host,
        "agent.cloudlink.io"
    );
    assert_eq!(
        client.sync_result().unwrap().credentials.client_id,
        "client-1"
    );

    // Discovery GET, then sync POST with the identity pair.
    let requests = gateway.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].0.contains("/cpid/ACME0001/"));
    assert!(requests[1].0.ends_with("/api/2.0/agent/sync?"));
    assert!(requests[1].1.as_deref().unwrap().contains("sensor-01"));

    // The session opened one link against the resolved broker.
    let endpoints = factory.opened_endpoints();
    assert_eq!(endpoints.len(), 1);
    assert_eq!(endpoints[0].host, "broker.cloudlink.io");
    assert_eq!(endpoints[0].client_id, "client-1");
}

#[tokio::test]
async fn test_unsupported_auth_fails_before_any_network_call() {
    for auth_type in ["symmetric_key", "tpm"] {
        let gateway = Arc::new(MockHttpGateway::always(HttpOutcome::Empty));
        let factory = Arc::new(MockMqttFactory::new());
        let mut client = client_over(
            config_with_auth(auth_type),
            gateway.clone(),
            factory.clone(),
        );

        let err = client.initialize().await.unwrap_err();
        assert!(matches!(err, DeviceError::Config(_)), "{auth_type}: {err}");
        assert!(gateway.requests().is_empty(), "{auth_type} reached HTTP");
        assert!(
            factory.opened_endpoints().is_empty(),
            "{auth_type} reached MQTT"
        );
    }
}

#[tokio::test]
async fn test_token_auth_requires_broker_password() {
    let gateway = Arc::new(MockHttpGateway::scripted(vec![
        discovery_body(),
        sync_body_without_password(),
    ]));
    let factory = Arc::new(MockMqttFactory::new());
    let mut client = client_over(token_config(), gateway, factory.clone());

    let err = client.initialize().await.unwrap_err();
    assert!(matches!(err, DeviceError::Config(_)));
    assert!(err.to_string().contains("broker password"));
    assert!(factory.opened_endpoints().is_empty());
}

#[tokio::test]
async fn test_sync_rejection_surfaces_device_status() {
    let gateway = Arc::new(MockHttpGateway::scripted(vec![
        discovery_body(),
        HttpOutcome::Success(r#"{"d":{"ds":4,"dtg":""}}"#.to_string()),
    ]));
    let factory = Arc::new(MockMqttFactory::new());
    let mut client = client_over(token_config(), gateway, factory.clone());

    let err = client.initialize().await.unwrap_err();
    assert!(matches!(err, DeviceError::Sync(_)));
    assert!(err.to_string().contains("inactive"));
    assert_eq!(client.state(), SessionState::Failed);
    assert!(factory.opened_endpoints().is_empty());
}

#[tokio::test]
async fn test_second_initialize_reuses_cached_results() {
    let gateway = Arc::new(MockHttpGateway::scripted(vec![
        discovery_body(),
        sync_body("1"),
    ]));
    let factory = Arc::new(MockMqttFactory::new());
    let mut client = client_over(token_config(), gateway.clone(), factory.clone());

    client.initialize().await.unwrap();
    client.initialize().await.unwrap();

    // No further HTTP traffic: cached discovery and sync are reused.
    assert_eq!(gateway.requests().len(), 2);

    // But the session was re-established: two links, first released.
    let links = factory.opened_links();
    assert_eq!(links.len(), 2);
    assert!(!links[0].is_alive());
    assert!(links[1].is_alive());
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_discovery_exhaustion_fails_initialization() {
    let gateway = Arc::new(MockHttpGateway::always(HttpOutcome::Empty));
    let factory = Arc::new(MockMqttFactory::new());
    let mut client = client_over(token_config(), gateway.clone(), factory.clone());

    let err = client.initialize().await.unwrap_err();
    assert!(matches!(err, DeviceError::Discovery(_)));
    assert_eq!(gateway.requests().len(), 5);
    assert_eq!(client.state(), SessionState::Failed);
    assert!(factory.opened_endpoints().is_empty());
}

#[tokio::test]
async fn test_send_before_initialize_makes_no_network_call() {
    let gateway = Arc::new(MockHttpGateway::always(HttpOutcome::Empty));
    let factory = Arc::new(MockMqttFactory::new());
    let mut client = client_over(token_config(), gateway.clone(), factory.clone());

    let err = client.send_message(b"event").await.unwrap_err();
    assert!(matches!(
        err,
        cloudlink::SessionError::NotInitialized
    ));
    assert!(gateway.requests().is_empty());
    assert!(factory.opened_links().is_empty());
}
