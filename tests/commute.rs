//! Integration tests for `CommuteEngine` against a mock routing service.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use rental_scout::config::CommuteConfig;
use rental_scout::enrich::{CommuteEngine, Lookup};
use rental_scout::models::LocationInput;
use rental_scout::store::MemoryStore;

fn engine(server: &MockServer, api_key: Option<&str>) -> CommuteEngine {
    let config = CommuteConfig {
        endpoint: format!("{}/routes", server.uri()),
        api_key: api_key.map(str::to_string),
        inter_request_delay: Duration::ZERO,
        timeout_secs: 5,
        ..CommuteConfig::default()
    };
    CommuteEngine::new(Arc::new(MemoryStore::new()), config).expect("failed to build test engine")
}

fn origin(id: i64) -> LocationInput {
    LocationInput {
        id,
        lat: 35.6467,
        lng: 139.7101,
        walk_minutes: 0,
    }
}

#[tokio::test]
async fn computes_transit_commute_with_auth_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/routes"))
        .and(header("x-goog-api-key", "test-key"))
        .and(header("x-goog-fieldmask", "routes.duration,routes.legs.steps.travelMode"))
        .and(body_partial_json(json!({"travelMode": "TRANSIT"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "routes": [{
                "duration": "1680s",
                "legs": [{"steps": [
                    {"travelMode": "WALK"},
                    {"travelMode": "TRANSIT"},
                    {"travelMode": "TRANSIT"},
                    {"travelMode": "WALK"}
                ]}]
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine(&server, Some("test-key"));
    let (info, lookup) = engine.commute(&origin(5)).await;

    assert_eq!(lookup, Lookup::Computed);
    assert_eq!(info.minutes, 28);
    assert_eq!(info.text, "28 min");
    assert_eq!(info.transfers, 1);

    let (cached, lookup) = engine.commute(&origin(5)).await;
    assert_eq!(lookup, Lookup::Cached);
    assert_eq!(cached.minutes, 28);
}

#[tokio::test]
async fn failed_lookup_is_negatively_cached() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine(&server, Some("test-key"));
    let (first, lookup) = engine.commute(&origin(8)).await;
    assert_eq!(lookup, Lookup::Failed);
    assert!(first.is_placeholder());

    let (second, lookup) = engine.commute(&origin(8)).await;
    assert_eq!(lookup, Lookup::Cached);
    assert!(second.is_placeholder());
}

#[tokio::test]
async fn batch_without_api_key_yields_placeholders() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let engine = engine(&server, None);
    let report = engine.commute_batch(&[origin(1), origin(2)]).await;

    assert_eq!(report.failed, 2);
    assert!(report.results.values().all(|info| info.is_placeholder()));
}
