// Button-pairing flows against wiremock: bounded retry and single terminal signal.
#![allow(clippy::unwrap_used)]

use std::time::Duration;

use secrecy::ExposeSecret;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use smarthome_api::{
    ClientEvent, DirigeraClient, Error, HttpSession, HueBridgeClient, HueSyncClient,
    NanoleafClient, PairingPolicy, TlsMode, TransportConfig,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn session() -> HttpSession {
    HttpSession::new(TransportConfig::new(TlsMode::System, Duration::from_secs(2))).unwrap()
}

fn fast_policy() -> PairingPolicy {
    PairingPolicy {
        interval: Duration::from_millis(1),
        max_attempts: 15,
    }
}

fn base(server: &MockServer, suffix: &str) -> Url {
    Url::parse(&format!("{}{suffix}", server.uri())).unwrap()
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<ClientEvent>) -> Vec<ClientEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ── Dirigera ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_dirigera_pairing_stops_after_fifteen_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/oauth/authorize"))
        .and(query_param("audience", "homesmart.local"))
        .and(query_param("code_challenge_method", "S256"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": "abc" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/oauth/token"))
        .respond_with(ResponseTemplate::new(403).set_body_string("button not pressed"))
        .expect(15)
        .mount(&server)
        .await;

    let client = DirigeraClient::new(base(&server, "/v1/"), None, session());
    let mut rx = client.tracker().subscribe();

    let result = client
        .pair("smarthome", fast_policy(), &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(Error::PairingFailed { attempts: 15 })));
    let events = drain(&mut rx);
    let failures = events
        .iter()
        .filter(|e| matches!(e, ClientEvent::PairingFailed { .. }))
        .count();
    assert_eq!(failures, 1);
    assert!(!events.iter().any(|e| matches!(e, ClientEvent::ConnectionProblem { .. })));
    assert!(!client.is_paired());
}

#[tokio::test]
async fn test_dirigera_pairing_returns_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/oauth/authorize"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": "abc" })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "tok" })))
        .mount(&server)
        .await;

    let client = DirigeraClient::new(base(&server, "/v1/"), None, session());
    let mut rx = client.tracker().subscribe();

    let token = client
        .pair("smarthome", fast_policy(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(token.expose_secret(), "tok");
    assert!(client.is_paired());
    assert!(matches!(rx.try_recv(), Ok(ClientEvent::PairingSucceeded)));
}

// ── Sync box ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_sync_box_registration_bounded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/registrations"))
        .and(body_partial_json(json!({ "appName": "smarthome" })))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({ "code": 16, "message": "Invalid State" })),
        )
        .expect(15)
        .mount(&server)
        .await;

    let client = HueSyncClient::new(base(&server, "/api/v1/"), None, session());
    let mut rx = client.tracker().subscribe();

    let result = client
        .register("smarthome", "desktop", fast_policy(), &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(Error::PairingFailed { attempts: 15 })));
    assert!(matches!(
        drain(&mut rx).as_slice(),
        [ClientEvent::PairingFailed { attempts: 15 }]
    ));
}

// ── Hue bridge ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_hue_create_user_waits_for_link_button() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "error": { "type": 101, "address": "", "description": "link button not pressed" } }
        ])))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api"))
        .and(body_partial_json(json!({ "generateclientkey": true })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "success": { "username": "app-key", "clientkey": "CK" } }
        ])))
        .mount(&server)
        .await;

    let client = HueBridgeClient::new(base(&server, "/"), None, session());
    let credentials = client
        .pair("smarthome#desktop", fast_policy(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(credentials.username, "app-key");
    assert_eq!(credentials.clientkey.as_deref(), Some("CK"));
    assert!(client.is_paired());
}

// ── Nanoleaf ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_nanoleaf_pairing_uses_token_afterwards() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "auth_token": "NL" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/NL/effects/select"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!("Northern Lights")))
        .expect(1)
        .mount(&server)
        .await;

    let client = NanoleafClient::new(base(&server, "/api/v1/"), None, session());
    client
        .pair(fast_policy(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(client.current_effect().await.unwrap(), "Northern Lights");
}

#[tokio::test]
async fn test_cancelled_pairing_emits_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/new"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let client = NanoleafClient::new(base(&server, "/api/v1/"), None, session());
    let mut rx = client.tracker().subscribe();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = client.pair(fast_policy(), &cancel).await;
    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(drain(&mut rx).is_empty());
}
