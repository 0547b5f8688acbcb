// Connection-state reporting, bounded retry, and stream delivery against wiremock.
#![allow(clippy::unwrap_used)]

use std::time::Duration;

use secrecy::SecretString;
use serde_json::json;
use url::Url;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use smarthome_api::{
    ClientEvent, DirigeraClient, Error, ErrorKind, HomeAssistantClient, HttpSession,
    HueBridgeClient, LinkState, NanoleafClient, RequestKind, TlsMode, TransportConfig,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn session() -> HttpSession {
    HttpSession::new(TransportConfig::new(TlsMode::System, Duration::from_secs(2))).unwrap()
}

fn url(server: &MockServer, suffix: &str) -> Url {
    Url::parse(&format!("{}{suffix}", server.uri())).unwrap()
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<ClientEvent>) -> Vec<ClientEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn problems(events: &[ClientEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, ClientEvent::ConnectionProblem { .. }))
        .count()
}

// ── Connection problem ──────────────────────────────────────────────

#[tokio::test]
async fn test_connection_problem_emitted_once_while_down() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/states"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = HomeAssistantClient::new(
        url(&server, "/api/"),
        Some(SecretString::from("T")),
        session(),
    );
    let mut rx = client.tracker().subscribe();

    for _ in 0..3 {
        assert!(client.states().await.is_err());
    }

    assert_eq!(problems(&drain(&mut rx)), 1);
    assert_eq!(client.tracker().link(), LinkState::Disconnected);
    assert_eq!(client.tracker().last_error(), Some(ErrorKind::Transport));
}

#[tokio::test]
async fn test_recovery_rearms_connection_problem() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/states"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/states"))
        .and(header("authorization", "Bearer T"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "entity_id": "light.desk", "state": "on", "attributes": { "brightness": 255 } }
        ])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/states"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = HomeAssistantClient::new(
        url(&server, "/api/"),
        Some(SecretString::from("T")),
        session(),
    );
    let mut rx = client.tracker().subscribe();

    assert!(client.states().await.is_err());
    let states = client.states().await.unwrap();
    assert_eq!(states[0].entity_id, "light.desk");
    assert!(client.states().await.is_err());

    let events = drain(&mut rx);
    assert_eq!(problems(&events), 2);
    assert!(events.iter().any(|e| matches!(
        e,
        ClientEvent::Response { kind: RequestKind::States, .. }
    )));
}

#[tokio::test]
async fn test_malformed_body_does_not_disconnect() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/states"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/states"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
        .mount(&server)
        .await;

    let client = HomeAssistantClient::new(
        url(&server, "/api/"),
        Some(SecretString::from("T")),
        session(),
    );
    let mut rx = client.tracker().subscribe();

    client.states().await.unwrap();
    let err = client.states().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Parse);
    assert!(client.tracker().is_connected());
    assert_eq!(problems(&drain(&mut rx)), 0);
}

// ── Nanoleaf bounded retry ──────────────────────────────────────────

#[tokio::test]
async fn test_nanoleaf_retries_rate_limit_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/tok/state"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/tok/state"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "on": { "value": true },
            "brightness": { "value": 40, "max": 100, "min": 0 },
            "colorMode": "effect"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = NanoleafClient::new(
        url(&server, "/api/v1/"),
        Some(SecretString::from("tok")),
        session(),
    );
    let state = client.state().await.unwrap();
    assert_eq!(state.brightness.unwrap().value, 40.0);
}

#[tokio::test]
async fn test_nanoleaf_retry_is_bounded_to_three() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/tok/effects/effectsList"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&server)
        .await;

    let client = NanoleafClient::new(
        url(&server, "/api/v1/"),
        Some(SecretString::from("tok")),
        session(),
    );
    let err = client.effects_list().await.unwrap_err();
    assert!(matches!(err, Error::HttpStatus { status: 429, .. }));
}

#[tokio::test]
async fn test_nanoleaf_without_token_is_not_paired() {
    let client = NanoleafClient::new(
        Url::parse("http://127.0.0.1:9/api/v1/").unwrap(),
        None,
        session(),
    );
    assert!(matches!(client.info().await, Err(Error::NotPaired)));
}

// ── Streams ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_hue_event_stream_delivers_updates() {
    let server = MockServer::start().await;
    let body = "id: 1700000000:0\n\
data: [{\"type\":\"update\",\"data\":[{\"type\":\"light\",\"id\":\"L1\",\"dimming\":{\"brightness\":50.0}}]}]\n\n";
    Mock::given(method("GET"))
        .and(path("/eventstream/clip/v2"))
        .and(header("hue-application-key", "key"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let client = HueBridgeClient::new(url(&server, "/"), Some(SecretString::from("key")), session());
    let mut rx = client.tracker().subscribe();

    assert!(client.keep_event_stream().unwrap());

    let update = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let ClientEvent::StreamData(value) = rx.recv().await.unwrap() {
                return value;
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(update["id"], "L1");
    assert_eq!(update["dimming"]["brightness"], 50.0);
    client.stop_event_stream();
    assert!(!client.event_stream_open());
}

#[tokio::test]
async fn test_dirigera_event_stream_reports_refused_socket() {
    let client = DirigeraClient::new(
        Url::parse("http://127.0.0.1:9/v1/").unwrap(),
        Some(SecretString::from("tok")),
        session(),
    );
    let mut rx = client.tracker().subscribe();

    assert!(client.keep_event_stream().unwrap());

    let problem = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let ClientEvent::ConnectionProblem { kind, .. } = rx.recv().await.unwrap() {
                return kind;
            }
        }
    })
    .await
    .unwrap();

    assert_ne!(problem, ErrorKind::Parse);
    assert_eq!(client.tracker().link(), LinkState::Disconnected);
    client.stop_event_stream();
}

#[tokio::test]
async fn test_nanoleaf_event_stream_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/tok/events"))
        .and(query_param("id", "1,3"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("id: 1\ndata: {\"events\":[{\"attr\":1,\"value\":false}]}\n\n"),
        )
        .mount(&server)
        .await;

    let client = NanoleafClient::new(
        url(&server, "/api/v1/"),
        Some(SecretString::from("tok")),
        session(),
    );
    let mut rx = client.tracker().subscribe();
    client.keep_event_stream().unwrap();

    let event = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let ClientEvent::StreamData(value) = rx.recv().await.unwrap() {
                return value;
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(event["id"], 1);
    assert_eq!(event["events"][0]["value"], false);
}
