//! Upstream backends and the playback prober against a mock HTTP server.

use liveness_service::config::{CdnConfig, RelayConfig};
use liveness_service::services::{
    BackendError, CdnBackend, HealthProbe, HttpHealthProbe, ProbeError, RelayBackend,
    StreamingBackend,
};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn cdn(server: &MockServer) -> CdnBackend {
    CdnBackend::new(
        reqwest::Client::new(),
        CdnConfig {
            api_base: server.uri(),
            api_token: Some("secret-token".to_string()),
            pull_base: "https://pull.example.com/".to_string(),
            app: "live".to_string(),
        },
    )
}

fn relay(server: &MockServer) -> RelayBackend {
    RelayBackend::new(
        reqwest::Client::new(),
        RelayConfig {
            api_base: server.uri(),
            pull_base: "http://relay.example.com:8080".to_string(),
            app: "live".to_string(),
        },
    )
}

async fn mock_cdn_state(server: &MockServer, room_id: i64, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(format!("/v1/streams/room_{}/state", room_id)))
        .and(header("authorization", "Bearer secret-token"))
        .respond_with(response)
        .mount(server)
        .await;
}

async fn mock_relay_streams(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/api/v1/streams"))
        .and(query_param("count", "1000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_cdn_active_state_is_live() {
    let server = MockServer::start().await;
    mock_cdn_state(
        &server,
        7,
        ResponseTemplate::new(200).set_body_json(json!({ "state": "active" })),
    )
    .await;

    assert!(cdn(&server).is_live(7).await.unwrap());
}

#[tokio::test]
async fn test_cdn_inactive_and_unknown_streams_are_not_live() {
    let server = MockServer::start().await;
    mock_cdn_state(
        &server,
        7,
        ResponseTemplate::new(200).set_body_json(json!({ "state": "inactive" })),
    )
    .await;
    mock_cdn_state(&server, 8, ResponseTemplate::new(404)).await;

    let backend = cdn(&server);
    assert!(!backend.is_live(7).await.unwrap());
    assert!(!backend.is_live(8).await.unwrap());
}

#[tokio::test]
async fn test_cdn_server_error_is_not_an_answer() {
    let server = MockServer::start().await;
    mock_cdn_state(&server, 7, ResponseTemplate::new(500)).await;

    let err = cdn(&server).is_live(7).await.unwrap_err();
    assert!(matches!(err, BackendError::Status { status: 500, .. }));
}

#[tokio::test]
async fn test_cdn_playback_url() {
    let server = MockServer::start().await;
    assert_eq!(
        cdn(&server).playback_url(7),
        "https://pull.example.com/live/room_7.m3u8"
    );
}

#[tokio::test]
async fn test_relay_publishing_stream_is_live() {
    let server = MockServer::start().await;
    mock_relay_streams(
        &server,
        json!({
            "code": 0,
            "streams": [
                { "app": "live", "name": "room_7", "publish": { "active": true } },
                { "app": "live", "name": "room_8", "publish": { "active": false } },
                { "app": "other", "name": "room_9", "publish": { "active": true } }
            ]
        }),
    )
    .await;

    let backend = relay(&server);
    assert!(backend.is_live(7).await.unwrap());
    assert!(!backend.is_live(8).await.unwrap());
    assert!(!backend.is_live(9).await.unwrap());
    assert!(!backend.is_live(10).await.unwrap());
}

#[tokio::test]
async fn test_relay_error_code_is_reported() {
    let server = MockServer::start().await;
    mock_relay_streams(&server, json!({ "code": 1005, "streams": [] })).await;

    let err = relay(&server).is_live(7).await.unwrap_err();
    assert!(matches!(err, BackendError::Api { code: 1005 }));
}

fn publishing(names: impl IntoIterator<Item = String>) -> serde_json::Value {
    let streams: Vec<_> = names
        .into_iter()
        .map(|name| json!({ "app": "live", "name": name, "publish": { "active": true } }))
        .collect();
    json!({ "code": 0, "streams": streams })
}

async fn mock_relay_page(server: &MockServer, start: usize, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/api/v1/streams"))
        .and(query_param("start", start.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_relay_room_beyond_first_full_page_is_live() {
    let server = MockServer::start().await;
    mock_relay_page(
        &server,
        0,
        publishing((1000..2000).map(|room| format!("room_{}", room))),
    )
    .await;
    mock_relay_page(&server, 1000, publishing(["room_7".to_string()])).await;

    assert!(relay(&server).is_live(7).await.unwrap());
}

#[tokio::test]
async fn test_relay_absence_needs_a_short_page() {
    let server = MockServer::start().await;
    mock_relay_page(
        &server,
        0,
        publishing(["room_1".to_string(), "room_2".to_string()]),
    )
    .await;
    mock_relay_page(&server, 2, publishing(["room_3".to_string()])).await;

    let backend = relay(&server).with_page_size(2);
    assert!(backend.is_live(3).await.unwrap());
    assert!(!backend.is_live(9).await.unwrap());
}

#[tokio::test]
async fn test_relay_listing_that_never_ends_is_an_error() {
    let server = MockServer::start().await;
    // Ignores `start` and keeps returning the same full page.
    Mock::given(method("GET"))
        .and(path("/api/v1/streams"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(publishing(["room_1".to_string(), "room_2".to_string()])),
        )
        .mount(&server)
        .await;

    let err = relay(&server).with_page_size(2).is_live(9).await.unwrap_err();
    assert!(matches!(err, BackendError::Incomplete { .. }));
}

#[tokio::test]
async fn test_relay_playback_url() {
    let server = MockServer::start().await;
    assert_eq!(
        relay(&server).playback_url(7),
        "http://relay.example.com:8080/live/room_7.flv"
    );
}

#[tokio::test]
async fn test_probe_only_accepts_ok() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/live/room_7.m3u8"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/live/room_8.m3u8"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/live/room_9.m3u8"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let probe = HttpHealthProbe::new(Duration::from_secs(2)).unwrap();
    let url = |room: i64| format!("{}/live/room_{}.m3u8", server.uri(), room);

    assert!(probe.probe(&url(7)).await.is_ok());
    assert!(matches!(
        probe.probe(&url(8)).await,
        Err(ProbeError::Status(204))
    ));
    assert!(matches!(
        probe.probe(&url(9)).await,
        Err(ProbeError::Status(503))
    ));
    // No mock mounted: wiremock answers 404.
    assert!(matches!(
        probe.probe(&url(10)).await,
        Err(ProbeError::Status(404))
    ));
}

#[tokio::test]
async fn test_probe_times_out_on_slow_playback() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/live/room_7.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let probe = HttpHealthProbe::new(Duration::from_millis(50)).unwrap();
    let result = probe
        .probe(&format!("{}/live/room_7.m3u8", server.uri()))
        .await;

    assert!(matches!(result, Err(ProbeError::Transport(_))));
}
