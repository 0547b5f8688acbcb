// Shelly gen1/gen2 clients against wiremock, including digest auth retry.
#![allow(clippy::unwrap_used)]

use std::time::Duration;

use secrecy::SecretString;
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use smarthome_api::shelly::{CoverCommand, ShellyGeneration};
use smarthome_api::{Error, HttpSession, ShellyClient, TlsMode, TransportConfig};

const CHALLENGE: &str =
    r#"Digest qop="auth", realm="shellyplus1-a8032ab12345", nonce="1700000000", algorithm=SHA-256"#;

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup(generation: u8, password: Option<&str>) -> (MockServer, ShellyClient) {
    let server = MockServer::start().await;
    let info = if generation >= 2 {
        json!({ "gen": generation, "model": "SNSW-001X16EU", "auth_en": password.is_some() })
    } else {
        json!({ "type": "SHSW-25", "auth": password.is_some() })
    };
    Mock::given(method("GET"))
        .and(path("/shelly"))
        .respond_with(ResponseTemplate::new(200).set_body_json(info))
        .mount(&server)
        .await;

    let session =
        HttpSession::new(TransportConfig::new(TlsMode::System, Duration::from_secs(2))).unwrap();
    let client = ShellyClient::new(
        Url::parse(&format!("{}/", server.uri())).unwrap(),
        Some("admin".into()),
        password.map(SecretString::from),
        session,
    );
    (server, client)
}

// ── Digest ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_digest_retry_succeeds_after_one_challenge() {
    let (server, client) = setup(2, Some("secret")).await;

    Mock::given(method("POST"))
        .and(path("/rpc"))
        .respond_with(
            ResponseTemplate::new(401).insert_header("WWW-Authenticate", CHALLENGE),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rpc"))
        .and(body_partial_json(json!({
            "method": "Switch.Set",
            "params": { "id": 0, "on": true },
            "auth": {
                "realm": "shellyplus1-a8032ab12345",
                "username": "admin",
                "nonce": 1_700_000_000_u64,
                "algorithm": "SHA-256"
            }
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "id": 1, "src": "shellyplus1", "result": { "was_on": false } })),
        )
        .expect(1)
        .mount(&server)
        .await;

    client.set_switch(0, true).await.unwrap();
}

#[tokio::test]
async fn test_digest_second_401_is_not_retried() {
    let (server, client) = setup(2, Some("wrong")).await;

    Mock::given(method("POST"))
        .and(path("/rpc"))
        .respond_with(
            ResponseTemplate::new(401).insert_header("WWW-Authenticate", CHALLENGE),
        )
        .expect(2)
        .mount(&server)
        .await;

    let err = client.set_switch(0, true).await.unwrap_err();
    assert!(matches!(err, Error::Authentication { .. }));
}

#[tokio::test]
async fn test_401_without_password_fails_immediately() {
    let (server, client) = setup(2, None).await;

    Mock::given(method("POST"))
        .and(path("/rpc"))
        .respond_with(
            ResponseTemplate::new(401).insert_header("WWW-Authenticate", CHALLENGE),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = client.status().await.unwrap_err();
    assert!(err.is_auth_expired());
}

// ── Gen2 ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_gen2_cover_position() {
    let (server, client) = setup(3, None).await;

    Mock::given(method("POST"))
        .and(path("/rpc"))
        .and(body_partial_json(json!({
            "method": "Cover.GoToPosition",
            "params": { "id": 0, "pos": 40 }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 1, "result": null })))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(client.generation().await.unwrap(), ShellyGeneration::Gen2);
    client.cover(0, CoverCommand::ToPosition(40)).await.unwrap();
}

// ── Gen1 ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_gen1_relay_uses_query_string() {
    let (server, client) = setup(1, None).await;

    Mock::given(method("GET"))
        .and(path("/relay/1"))
        .and(query_param("turn", "off"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ison": false })))
        .expect(1)
        .mount(&server)
        .await;

    client.set_switch(1, false).await.unwrap();
}

#[tokio::test]
async fn test_gen1_roller_to_position() {
    let (server, client) = setup(1, None).await;

    Mock::given(method("GET"))
        .and(path("/roller/0"))
        .and(query_param("go", "to_pos"))
        .and(query_param("roller_pos", "75"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "state": "open" })))
        .expect(1)
        .mount(&server)
        .await;

    client.cover(0, CoverCommand::ToPosition(75)).await.unwrap();
}
