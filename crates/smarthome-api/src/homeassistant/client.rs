// Async client for Home Assistant.
//
// Base: http(s)://<host>:8123/api/
// Auth: long-lived access token as Bearer
// Push: /api/websocket with auth -> subscribe_events(state_changed)

use std::sync::Arc;

use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use super::models::{HaArea, HaState, decode_states};
use crate::auth::TokenSlot;
use crate::connection::{ClientEvent, ConnectionTracker, RequestKind};
use crate::error::Error;
use crate::rest::{RestClient, TokenPlacement};
use crate::subscription::StreamSubscription;
use crate::transport::{HttpSession, TlsMode, TransportConfig};
use crate::websocket::{self, FrameReply};

pub const DEFAULT_PORT: u16 = 8123;
const SUBSCRIPTION_ID: u64 = 1;

/// Renders every area with its entity ids as a JSON list.
pub const AREAS_TEMPLATE: &str = "{% set ns = namespace(areas=[]) %}\
{% for area in areas() %}\
{% set ns.areas = ns.areas + [{\"id\": area, \"name\": area_name(area), \"entities\": area_entities(area)}] %}\
{% endfor %}\
{{ ns.areas | tojson }}";

// ── WebSocket handshake ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaSocketPhase {
    AwaitingAuth,
    Authenticating,
    Subscribing,
    Subscribed,
}

/// What to do with one incoming WebSocket message.
#[derive(Debug)]
pub enum HaSocketStep {
    Send(Value),
    /// `state_changed` event data: `{entity_id, old_state, new_state}`.
    Event(Value),
    Fail(Error),
    Ignore,
}

/// `auth_required -> auth -> auth_ok -> subscribe_events -> result`,
/// then a stream of events.
pub struct HaSocketHandshake {
    phase: HaSocketPhase,
    token: SecretString,
}

impl HaSocketHandshake {
    pub fn new(token: SecretString) -> Self {
        Self {
            phase: HaSocketPhase::AwaitingAuth,
            token,
        }
    }

    pub fn phase(&self) -> HaSocketPhase {
        self.phase
    }

    pub fn on_message(&mut self, message: &Value) -> HaSocketStep {
        let kind = message.get("type").and_then(Value::as_str).unwrap_or_default();
        match kind {
            "auth_required" => {
                self.phase = HaSocketPhase::Authenticating;
                HaSocketStep::Send(json!({
                    "type": "auth",
                    "access_token": self.token.expose_secret(),
                }))
            }
            "auth_ok" => {
                self.phase = HaSocketPhase::Subscribing;
                HaSocketStep::Send(json!({
                    "id": SUBSCRIPTION_ID,
                    "type": "subscribe_events",
                    "event_type": "state_changed",
                }))
            }
            "auth_invalid" => HaSocketStep::Fail(Error::Authentication {
                message: message
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("access token rejected")
                    .to_owned(),
            }),
            "result" if message.get("id").and_then(Value::as_u64) == Some(SUBSCRIPTION_ID) => {
                if message.get("success").and_then(Value::as_bool) == Some(true) {
                    self.phase = HaSocketPhase::Subscribed;
                    debug!("subscribed to state_changed");
                    HaSocketStep::Ignore
                } else {
                    HaSocketStep::Fail(Error::Protocol(format!(
                        "subscribe_events rejected: {message}"
                    )))
                }
            }
            "event" => match message.get("event").and_then(|e| e.get("data")) {
                Some(data) if self.phase == HaSocketPhase::Subscribed => {
                    HaSocketStep::Event(data.clone())
                }
                _ => HaSocketStep::Ignore,
            },
            _ => HaSocketStep::Ignore,
        }
    }
}

// ── Client ───────────────────────────────────────────────────────────

pub struct HomeAssistantClient {
    rest: RestClient,
    token: Arc<TokenSlot>,
    stream: StreamSubscription,
}

impl HomeAssistantClient {
    /// `base` is the instance root, e.g. `http://homeassistant.local:8123/`.
    pub fn for_base(
        base: &str,
        token: Option<SecretString>,
        transport: TransportConfig,
    ) -> Result<Self, Error> {
        let base_url = Url::parse(base)?.join("api/")?;
        Ok(Self::new(base_url, token, HttpSession::new(transport)?))
    }

    pub fn new(base_url: Url, token: Option<SecretString>, session: HttpSession) -> Self {
        let token = Arc::new(TokenSlot::new(token));
        let rest = RestClient::new(session, base_url, ConnectionTracker::new())
            .with_credential(Arc::clone(&token), TokenPlacement::Bearer);
        Self {
            rest,
            token,
            stream: StreamSubscription::new(),
        }
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        self.rest.tracker()
    }

    pub fn session(&self) -> &HttpSession {
        self.rest.session()
    }

    // ── Data ─────────────────────────────────────────────────────────

    pub async fn states(&self) -> Result<Vec<HaState>, Error> {
        let reply = self
            .rest
            .request(Method::GET, "states", None, RequestKind::States)
            .await?;
        Ok(decode_states(&reply))
    }

    pub async fn areas(&self) -> Result<Vec<HaArea>, Error> {
        let body = json!({ "template": AREAS_TEMPLATE });
        let reply = self
            .rest
            .request(Method::POST, "template", Some(&body), RequestKind::Areas)
            .await?;
        serde_json::from_value(reply.clone()).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: reply.to_string(),
        })
    }

    // ── Actions ──────────────────────────────────────────────────────

    /// `POST /api/services/<domain>/<service>`.
    pub async fn call_service(&self, domain: &str, service: &str, data: &Value) -> Result<(), Error> {
        self.rest
            .request(
                Method::POST,
                &format!("services/{domain}/{service}"),
                Some(data),
                RequestKind::Set,
            )
            .await?;
        self.rest.tracker().emit(ClientEvent::ChangeOccurred);
        Ok(())
    }

    // ── Event stream ─────────────────────────────────────────────────

    pub fn keep_event_stream(&self) -> Result<bool, Error> {
        let token = self.token.require()?;
        let url = websocket_url(self.rest.base_url())?;
        let insecure = matches!(self.rest.session().tls(), TlsMode::DangerAcceptInvalid);
        let tracker = self.rest.tracker().clone();

        Ok(self.stream.keep(move |cancel| async move {
            if let Err(e) = run_socket(&url, token, insecure, &tracker, &cancel).await {
                info!(error = %e, "Home Assistant event stream ended");
            }
        }))
    }

    pub fn stop_event_stream(&self) {
        self.stream.stop();
    }

    pub fn event_stream_open(&self) -> bool {
        self.stream.is_open()
    }
}

async fn run_socket(
    url: &Url,
    token: SecretString,
    insecure: bool,
    tracker: &ConnectionTracker,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let connected = tokio::select! {
        biased;
        () = cancel.cancelled() => return Ok(()),
        ws = websocket::connect(url, &[], insecure) => ws,
    };
    let ws = connected.inspect_err(|e| {
        tracker.failed(e);
    })?;
    tracker.succeeded();

    let mut handshake = HaSocketHandshake::new(token);
    websocket::pump(ws, cancel, |text| {
        let message: Value = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "malformed Home Assistant frame");
                return FrameReply::Nothing;
            }
        };
        match handshake.on_message(&message) {
            HaSocketStep::Send(reply) => FrameReply::Send(reply.to_string()),
            HaSocketStep::Event(data) => {
                tracker.emit(ClientEvent::StreamData(Arc::new(data)));
                FrameReply::Nothing
            }
            HaSocketStep::Fail(e) => FrameReply::Fail(e),
            HaSocketStep::Ignore => FrameReply::Nothing,
        }
    })
    .await
    .inspect_err(|e| {
        tracker.failed(e);
    })
}

/// `http://host:8123/api/` becomes `ws://host:8123/api/websocket`.
fn websocket_url(base: &Url) -> Result<Url, Error> {
    let mut url = base.join("websocket")?;
    let scheme = if base.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme)
        .map_err(|()| Error::Protocol(format!("cannot derive WebSocket URL from {base}")))?;
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(handshake: &mut HaSocketHandshake, message: Value) -> HaSocketStep {
        handshake.on_message(&message)
    }

    #[test]
    fn handshake_authenticates_then_subscribes() {
        let mut handshake = HaSocketHandshake::new(SecretString::from("T"));

        let HaSocketStep::Send(auth) = step(&mut handshake, json!({"type": "auth_required"})) else {
            panic!("expected auth message");
        };
        assert_eq!(auth, json!({"type": "auth", "access_token": "T"}));

        let HaSocketStep::Send(subscribe) = step(&mut handshake, json!({"type": "auth_ok"})) else {
            panic!("expected subscribe message");
        };
        assert_eq!(subscribe["event_type"], "state_changed");

        assert!(matches!(
            step(&mut handshake, json!({"id": 1, "type": "result", "success": true})),
            HaSocketStep::Ignore
        ));
        assert_eq!(handshake.phase(), HaSocketPhase::Subscribed);

        let event = json!({"type": "event", "event": {"event_type": "state_changed",
            "data": {"entity_id": "light.a", "new_state": {"state": "on"}}}});
        match step(&mut handshake, event) {
            HaSocketStep::Event(data) => assert_eq!(data["entity_id"], "light.a"),
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn invalid_token_fails_with_auth_error() {
        let mut handshake = HaSocketHandshake::new(SecretString::from("bad"));
        step(&mut handshake, json!({"type": "auth_required"}));
        match step(&mut handshake, json!({"type": "auth_invalid", "message": "Invalid access token"})) {
            HaSocketStep::Fail(e) => assert!(e.is_auth_expired()),
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn events_before_subscription_are_ignored() {
        let mut handshake = HaSocketHandshake::new(SecretString::from("T"));
        let event = json!({"type": "event", "event": {"data": {"entity_id": "light.a"}}});
        assert!(matches!(step(&mut handshake, event), HaSocketStep::Ignore));
    }

    #[test]
    fn websocket_url_follows_scheme() {
        let base = Url::parse("https://ha.local:8123/api/").unwrap();
        assert_eq!(websocket_url(&base).unwrap().as_str(), "wss://ha.local:8123/api/websocket");
    }
}
