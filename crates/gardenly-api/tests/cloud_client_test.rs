// Integration tests for `CloudClient` using wiremock.
#![allow(clippy::unwrap_used)]

use std::time::Duration;

use pretty_assertions::assert_eq;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gardenly_api::{CloudClient, Error, HttpMethod, TlsMode, TransportConfig};
use url::Url;

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, CloudClient) {
    let server = MockServer::start().await;
    let client = CloudClient::from_reqwest(&server.uri(), reqwest::Client::new()).unwrap();
    (server, client)
}

fn token() -> SecretString {
    SecretString::from("tok-123".to_owned())
}

// ── Sessions ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_login_returns_tokens() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/sg-1/sessions"))
        .and(body_json(json!({
            "sessions": { "email": "me@example.com", "password": "hunter2" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sessions": { "token": "tok-123", "user_id": "u-1", "refresh_token": "ref-9" }
        })))
        .mount(&server)
        .await;

    let tokens = client
        .login("me@example.com", &SecretString::from("hunter2".to_owned()))
        .await
        .unwrap();

    assert_eq!(tokens.token.expose_secret(), "tok-123");
    assert_eq!(tokens.user_id, "u-1");
    assert_eq!(tokens.refresh_token.expose_secret(), "ref-9");
}

#[tokio::test]
async fn test_login_unauthorized_is_auth_error() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/sg-1/sessions"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = client
        .login("me@example.com", &SecretString::from("wrong".to_owned()))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Authentication { .. }), "got {err:?}");
    assert!(err.is_auth_expired());
}

#[tokio::test]
async fn test_login_without_tokens_is_auth_error() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/sg-1/sessions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "sessions": { "token": "t" } })),
        )
        .mount(&server)
        .await;

    let err = client
        .login("me@example.com", &SecretString::from("pw".to_owned()))
        .await
        .unwrap_err();

    match err {
        Error::Authentication { message } => assert_eq!(message, "no auth data received"),
        other => panic!("expected Authentication, got {other:?}"),
    }
}

// ── Reads ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_list_locations_sends_session_header() {
    let (server, client) = setup().await;

    let body = json!({ "locations": [ { "id": "L1", "name": "Garden" } ] });

    Mock::given(method("GET"))
        .and(path("/sg-1/locations"))
        .and(query_param("user_id", "u-1"))
        .and(header("X-Session", "tok-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let doc = client.list_locations(&token(), "u-1").await.unwrap();
    assert_eq!(doc, body);
}

#[tokio::test]
async fn test_list_devices_filters_by_location() {
    let (server, client) = setup().await;

    let body = json!({ "devices": [ { "id": "D1", "name": "Mower", "abilities": [] } ] });

    Mock::given(method("GET"))
        .and(path("/sg-1/devices"))
        .and(query_param("locationId", "L1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let doc = client.list_devices(&token(), "L1").await.unwrap();
    assert_eq!(doc["devices"][0]["name"], "Mower");
}

#[tokio::test]
async fn test_expired_session_maps_to_session_expired() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/sg-1/devices"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = client.list_devices(&token(), "L1").await.unwrap_err();
    assert!(matches!(err, Error::SessionExpired));
}

#[tokio::test]
async fn test_server_error_is_transient_api_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/sg-1/locations"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = client.list_locations(&token(), "u-1").await.unwrap_err();
    match &err {
        Error::Api { status, message } => {
            assert_eq!(*status, 503);
            assert_eq!(message, "maintenance");
        }
        other => panic!("expected Api, got {other:?}"),
    }
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_slow_cloud_reports_configured_timeout() {
    let server = MockServer::start().await;
    let transport = TransportConfig {
        tls: TlsMode::System,
        timeout: Duration::from_secs(1),
    };
    let client = CloudClient::new(Url::parse(&server.uri()).unwrap(), &transport).unwrap();

    Mock::given(method("GET"))
        .and(path("/sg-1/devices"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "devices": [] }))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let err = client.list_devices(&token(), "L1").await.unwrap_err();
    assert!(matches!(err, Error::Timeout { timeout_secs: 1 }), "{err:?}");
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_invalid_json_keeps_body() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/sg-1/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
        .mount(&server)
        .await;

    let err = client.list_devices(&token(), "L1").await.unwrap_err();
    match err {
        Error::Deserialization { body, .. } => assert_eq!(body, "{not json"),
        other => panic!("expected Deserialization, got {other:?}"),
    }
}

// ── Writes ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_send_put_encodes_segments_and_query() {
    let (server, client) = setup().await;

    let payload = json!({ "properties": { "name": "watering_timer_1", "value": { "duration": 30 } } });

    Mock::given(method("PUT"))
        .and(path("/sg-1/devices/D1/outlet/properties/watering_timer_1"))
        .and(query_param("locationId", "L1"))
        .and(body_json(&payload))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let segments: Vec<String> = ["sg-1", "devices", "D1", "outlet", "properties", "watering_timer_1"]
        .iter()
        .map(|s| (*s).to_owned())
        .collect();
    let query = vec![("locationId".to_owned(), "L1".to_owned())];

    let resp = client
        .send(HttpMethod::Put, &segments, &query, &payload, &token())
        .await
        .unwrap();

    assert_eq!(resp, serde_json::Value::Null);
}

#[test]
fn test_resource_url_escapes_segments() {
    let client = CloudClient::from_reqwest("https://example.test/", reqwest::Client::new()).unwrap();
    let url = client
        .resource_url(&["sg-1".into(), "devices".into(), "a b".into()], &[])
        .unwrap();
    assert_eq!(url.as_str(), "https://example.test/sg-1/devices/a%20b");
}
