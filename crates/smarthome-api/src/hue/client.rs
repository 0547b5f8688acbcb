// Async client for the Philips Hue bridge (CLIP v2).
//
// Base: https://<bridge>/
// Auth: `hue-application-key` header (the v1 `username`)
// Push: GET /eventstream/clip/v2 (text/event-stream)

use std::sync::Arc;

use reqwest::Method;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::models::{HueCredentials, HueEntertainmentConfiguration, HueResources};
use crate::auth::TokenSlot;
use crate::connection::{ClientEvent, ConnectionTracker, RequestKind};
use crate::error::Error;
use crate::pairing::{PairingPolicy, PairingStep, run_pairing};
use crate::rest::{RestClient, TokenPlacement};
use crate::sse;
use crate::subscription::StreamSubscription;
use crate::transport::{HttpSession, TransportConfig};

const APP_KEY_HEADER: &str = "hue-application-key";
/// `createUser` error while the link button is not pressed.
const LINK_BUTTON_NOT_PRESSED: u64 = 101;

/// One item decoded from an event-stream frame.
#[derive(Debug, Clone, PartialEq)]
pub enum HueEventItem {
    /// A partial resource (`{"type": "light", "id": ..., "dimming": ...}`).
    Update(Value),
    /// A resource was added or deleted; the tree needs a re-fetch.
    Structural,
}

pub struct HueBridgeClient {
    rest: RestClient,
    app_key: Arc<TokenSlot>,
    stream: StreamSubscription,
}

impl HueBridgeClient {
    // ── Constructors ─────────────────────────────────────────────────

    /// Client for a bridge at `host` with its self-signed certificate.
    pub fn for_host(
        host: &str,
        app_key: Option<SecretString>,
        transport: TransportConfig,
    ) -> Result<Self, Error> {
        let base_url = Url::parse(&format!("https://{host}/"))?;
        Ok(Self::new(base_url, app_key, HttpSession::new(transport)?))
    }

    pub fn new(base_url: Url, app_key: Option<SecretString>, session: HttpSession) -> Self {
        let app_key = Arc::new(TokenSlot::new(app_key));
        let rest = RestClient::new(session, base_url, ConnectionTracker::new())
            .with_credential(Arc::clone(&app_key), TokenPlacement::Header(APP_KEY_HEADER));
        Self {
            rest,
            app_key,
            stream: StreamSubscription::new(),
        }
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        self.rest.tracker()
    }

    pub fn session(&self) -> &HttpSession {
        self.rest.session()
    }

    pub fn is_paired(&self) -> bool {
        self.app_key.is_set()
    }

    // ── Pairing ──────────────────────────────────────────────────────

    /// Create an application key; the link button must be pressed
    /// during the polling window.
    pub async fn pair(
        &self,
        devicetype: &str,
        policy: PairingPolicy,
        cancel: &CancellationToken,
    ) -> Result<HueCredentials, Error> {
        self.app_key.clear();
        let body = json!({ "devicetype": devicetype, "generateclientkey": true });
        let body = &body;
        let rest = &self.rest;

        let credentials = run_pairing(policy, rest.tracker(), cancel, move |_| async move {
            let reply = rest.probe(Method::POST, "api", Some(body)).await?;
            parse_create_user(&reply)
        })
        .await?;

        self.app_key
            .set(SecretString::from(credentials.username.clone()));
        Ok(credentials)
    }

    // ── Data ─────────────────────────────────────────────────────────

    /// Every resource in one round trip.
    pub async fn get_all(&self) -> Result<HueResources, Error> {
        let reply = self
            .rest
            .request(Method::GET, "clip/v2/resource", None, RequestKind::AllData)
            .await?;
        report_clip_errors(&reply);
        Ok(HueResources::from_reply(&reply))
    }

    pub async fn entertainment_configurations(
        &self,
    ) -> Result<Vec<HueEntertainmentConfiguration>, Error> {
        let reply = self
            .rest
            .request(
                Method::GET,
                "clip/v2/resource/entertainment_configuration",
                None,
                RequestKind::Config,
            )
            .await?;
        Ok(HueResources::from_reply(&reply).entertainment)
    }

    // ── Actions ──────────────────────────────────────────────────────

    /// PUT a partial state onto one light.
    pub async fn set_light(&self, id: &str, body: &Value) -> Result<(), Error> {
        self.put(&format!("clip/v2/resource/light/{id}"), body).await
    }

    /// PUT a partial state onto a grouped light (room/zone service).
    pub async fn set_grouped_light(&self, id: &str, body: &Value) -> Result<(), Error> {
        self.put(&format!("clip/v2/resource/grouped_light/{id}"), body)
            .await
    }

    pub async fn recall_scene(&self, id: &str) -> Result<(), Error> {
        self.put(
            &format!("clip/v2/resource/scene/{id}"),
            &json!({ "recall": { "action": "active" } }),
        )
        .await
    }

    /// Start or stop streaming mode on an entertainment configuration.
    pub async fn set_entertainment(&self, id: &str, active: bool) -> Result<(), Error> {
        let action = if active { "start" } else { "stop" };
        self.put(
            &format!("clip/v2/resource/entertainment_configuration/{id}"),
            &json!({ "action": action }),
        )
        .await
    }

    async fn put(&self, path: &str, body: &Value) -> Result<(), Error> {
        let reply = self
            .rest
            .request(Method::PUT, path, Some(body), RequestKind::Set)
            .await?;
        report_clip_errors(&reply);
        self.rest.tracker().emit(ClientEvent::ChangeOccurred);
        Ok(())
    }

    // ── Event stream ─────────────────────────────────────────────────

    /// Open the event stream unless it is already open.
    pub fn keep_event_stream(&self) -> Result<bool, Error> {
        let url = self.rest.url("eventstream/clip/v2")?;
        let request = self
            .rest
            .stream_builder(Method::GET, url)
            .header(reqwest::header::ACCEPT, "text/event-stream");
        let tracker = self.rest.tracker().clone();

        Ok(self.stream.keep(move |cancel| async move {
            let result = sse::pump(request, &tracker, &cancel, |event| {
                match decode_event_data(&event.data) {
                    Ok(items) => {
                        for item in items {
                            match item {
                                HueEventItem::Update(value) => {
                                    tracker.emit(ClientEvent::StreamData(Arc::new(value)));
                                }
                                HueEventItem::Structural => tracker.emit(ClientEvent::ChangeOccurred),
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "malformed Hue event frame"),
                }
            })
            .await;
            if let Err(e) = result {
                info!(error = %e, "Hue event stream ended");
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

/// Decode one `data:` payload: a JSON array of `{type, data: [...]}`
/// containers.
pub fn decode_event_data(data: &str) -> Result<Vec<HueEventItem>, Error> {
    let containers: Vec<Value> =
        serde_json::from_str(data).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: data.to_owned(),
        })?;

    let mut items = Vec::new();
    for container in containers {
        let kind = container.get("type").and_then(Value::as_str).unwrap_or("update");
        let Some(resources) = container.get("data").and_then(Value::as_array) else {
            debug!("Hue event container without data");
            continue;
        };
        if kind == "update" {
            items.extend(resources.iter().cloned().map(HueEventItem::Update));
        } else if !resources.is_empty() {
            items.push(HueEventItem::Structural);
        }
    }
    Ok(items)
}

fn parse_create_user(reply: &Value) -> Result<PairingStep<HueCredentials>, Error> {
    let first = reply
        .as_array()
        .and_then(|items| items.first())
        .ok_or_else(|| Error::Protocol("createUser reply is not an array".into()))?;

    if let Some(success) = first.get("success") {
        let credentials: HueCredentials =
            serde_json::from_value(success.clone()).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body: success.to_string(),
            })?;
        return Ok(PairingStep::Done(credentials));
    }

    let error = first.get("error");
    let code = error.and_then(|e| e.get("type")).and_then(Value::as_u64);
    if code == Some(LINK_BUTTON_NOT_PRESSED) {
        return Ok(PairingStep::Pending);
    }
    Err(Error::Authentication {
        message: error
            .and_then(|e| e.get("description"))
            .and_then(Value::as_str)
            .unwrap_or("createUser rejected")
            .to_owned(),
    })
}

fn report_clip_errors(reply: &Value) {
    if let Some(errors) = reply.get("errors").and_then(Value::as_array) {
        for error in errors {
            warn!(error = %error, "Hue bridge reported an error");
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn event_frame_splits_into_updates() {
        let data = r#"[
            {"type": "update", "data": [
                {"type": "light", "id": "L1", "dimming": {"brightness": 50.0}},
                {"type": "light", "id": "L2", "on": {"on": false}}
            ]},
            {"type": "delete", "data": [{"type": "scene", "id": "S9"}]}
        ]"#;

        let items = decode_event_data(data).unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(
            items[0],
            HueEventItem::Update(json!({"type": "light", "id": "L1", "dimming": {"brightness": 50.0}}))
        );
        assert_eq!(items[2], HueEventItem::Structural);
    }

    #[test]
    fn link_button_error_is_pending() {
        let reply = json!([{"error": {"type": 101, "description": "link button not pressed"}}]);
        assert!(matches!(parse_create_user(&reply), Ok(PairingStep::Pending)));
    }

    #[test]
    fn success_carries_username() {
        let reply = json!([{"success": {"username": "abc", "clientkey": "K"}}]);
        match parse_create_user(&reply).unwrap() {
            PairingStep::Done(credentials) => assert_eq!(credentials.username, "abc"),
            PairingStep::Pending => panic!("expected credentials"),
        }
    }
}
