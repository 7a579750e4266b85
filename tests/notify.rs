//! Integration tests for `NotificationDispatcher` delivering to mock push
//! endpoints over HTTP.

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use rental_scout::config::PushConfig;
use rental_scout::models::{Listing, PushKeys, PushSubscription};
use rental_scout::notify::{HttpPushTransport, NotificationDispatcher};
use rental_scout::store::{MemoryStore, Store};

// Receiver keys from the RFC 8291 worked example.
const P256DH: &str =
    "BCVxsr7N_eNgVRqvHtD0zTZsEc6-VV-JvLexhqUzORcxaOzi6-AYWXvTBHm4bjyPjs7Vd8pZGH6SRpkNtoIAiw4";
const AUTH: &str = "BTBZMqHH6r4Tts7J_aSIgg";

fn listing(id: i64, name: &str, rent: i64) -> Listing {
    serde_json::from_value(json!({
        "id": id, "name": name, "lat": 35.65, "lng": 139.70, "rent": rent,
        "size": 22.0, "bedrooms": 1, "layout": "1K",
        "slug": format!("flat-{id}"), "roomNumber": "101",
        "wardSlug": "meguro-ku", "prefectureSlug": "tokyo"
    }))
    .expect("valid listing fixture")
}

fn subscription(endpoint: String) -> PushSubscription {
    PushSubscription {
        endpoint,
        keys: PushKeys {
            p256dh: P256DH.into(),
            auth: AUTH.into(),
        },
        registered_at: None,
    }
}

fn dispatcher(store: Arc<dyn Store>) -> NotificationDispatcher {
    let transport = HttpPushTransport::new(&PushConfig::default()).expect("push transport");
    NotificationDispatcher::new(store, Arc::new(transport), "https://rent.example.jp", 50)
}

#[tokio::test]
async fn several_listings_share_one_encrypted_delivery() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/push/a"))
        .and(header("ttl", "86400"))
        .and(header("content-encoding", "aes128gcm"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = dispatcher(Arc::new(MemoryStore::new()));
    dispatcher
        .registry()
        .register(subscription(format!("{}/push/a", server.uri())))
        .await
        .unwrap();

    let records = dispatcher
        .dispatch(&[listing(1, "Maison Meguro", 98000), listing(2, "Villa Gotanda", 120000)])
        .await
        .unwrap();
    assert_eq!(records.len(), 2);

    let requests = server.received_requests().await.expect("request recording enabled");
    assert_eq!(requests.len(), 1);
    assert!(
        !String::from_utf8_lossy(&requests[0].body).contains("Maison Meguro"),
        "payload must be encrypted"
    );

    let history = dispatcher.history().await.unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn gone_endpoint_is_removed_while_others_still_receive() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/push/gone"))
        .respond_with(ResponseTemplate::new(410))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/push/flaky"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/push/ok"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = dispatcher(Arc::new(MemoryStore::new()));
    for name in ["gone", "flaky", "ok"] {
        dispatcher
            .registry()
            .register(subscription(format!("{}/push/{name}", server.uri())))
            .await
            .unwrap();
    }

    let records = dispatcher
        .dispatch(&[listing(7, "Nakameguro Terrace", 105000)])
        .await
        .expect("delivery failures do not fail the dispatch");
    assert_eq!(records.len(), 1);

    let remaining: Vec<String> = dispatcher
        .registry()
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|(_, sub)| sub.endpoint)
        .collect();
    assert_eq!(remaining.len(), 2);
    assert!(remaining.iter().all(|endpoint| !endpoint.ends_with("/gone")));
}
