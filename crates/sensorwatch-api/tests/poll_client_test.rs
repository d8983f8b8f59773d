#![allow(clippy::unwrap_used)]
// Integration tests for `PollClient` using wiremock.

use serde_json::json;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sensorwatch_api::{Error, PollClient};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, PollClient) {
    let server = MockServer::start().await;
    let base_url = Url::parse(&server.uri()).unwrap();
    let client = PollClient::with_client(reqwest::Client::new(), base_url);
    (server, client)
}

// ── Directory ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_list_devices() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "3f2a": {
                "name": "Galaxy S21",
                "connected_at": "2025-05-01T10:00:00",
                "sensor_count": 2,
                "active_sensor_count": 1
            },
            "9c1d": { "name": "Pixel 7" }
        })))
        .mount(&server)
        .await;

    let devices = client.devices().await.unwrap();
    assert_eq!(devices.len(), 2);
    assert_eq!(devices["3f2a"].active_sensor_count, Some(1));
    assert_eq!(devices["9c1d"].name.as_deref(), Some("Pixel 7"));
    assert_eq!(devices["9c1d"].sensor_count, None);
}

#[tokio::test]
async fn test_empty_directory() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    assert!(client.devices().await.unwrap().is_empty());
}

// ── Device status ───────────────────────────────────────────────────

#[tokio::test]
async fn test_device_status() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/device/3f2a/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "device_id": "3f2a",
            "device_name": "Galaxy S21",
            "sensors": {
                "accelerometer": {
                    "has_data": true,
                    "data_points": 120,
                    "time_since_last_update": 0.8,
                    "is_recent": true,
                    "debug_info": { "buffer": 500 }
                },
                "gyroscope": {
                    "has_data": false,
                    "data_points": 0,
                    "time_since_last_update": null,
                    "is_recent": false
                }
            },
            "total_sensors": 2,
            "active_sensors": 1
        })))
        .mount(&server)
        .await;

    let status = client.device_status("3f2a").await.unwrap();
    assert_eq!(status.device_id.as_deref(), Some("3f2a"));
    assert_eq!(status.sensors.len(), 2);
    assert!(status.sensors["accelerometer"].is_recent);
    assert_eq!(status.sensors["gyroscope"].time_since_last_update, None);
}

#[tokio::test]
async fn test_device_not_found() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/device/missing/info"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"error": "device not found"})),
        )
        .mount(&server)
        .await;

    let err = client.device_status("missing").await.unwrap_err();
    assert!(err.is_not_found(), "expected 404, got: {err:?}");
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/devices"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = client.devices().await.unwrap_err();
    assert!(
        matches!(err, Error::Status { status: 503, .. }),
        "expected Status error, got: {err:?}"
    );
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_malformed_body() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = client.devices().await.unwrap_err();
    assert!(err.is_malformed(), "expected Deserialization error, got: {err:?}");
}
