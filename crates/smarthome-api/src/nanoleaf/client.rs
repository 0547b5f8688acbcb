// Async client for one Nanoleaf panel controller.
//
// Base: http://<device>:16021/api/v1/
// Auth: token as the first path segment (`/api/v1/<token>/state`)
// Push: GET /api/v1/<token>/events?id=1,3 (id:/data: lines)
//
// The controllers drop requests under load, so reads go through the
// bounded retry of `RestClient::request_with_retry`.

use std::sync::Arc;

use reqwest::Method;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use super::models::{EVENT_EFFECTS, EVENT_STATE, NanoleafEvent, NanoleafInfo, NanoleafState};
use crate::auth::TokenSlot;
use crate::connection::{ClientEvent, ConnectionTracker, RequestKind};
use crate::error::Error;
use crate::pairing::{PairingPolicy, PairingStep, run_pairing};
use crate::rest::{RestClient, TokenPlacement};
use crate::sse;
use crate::subscription::StreamSubscription;
use crate::transport::{HttpSession, TransportConfig};

pub const DEFAULT_PORT: u16 = 16021;

pub struct NanoleafClient {
    rest: RestClient,
    token: Arc<TokenSlot>,
    stream: StreamSubscription,
}

impl NanoleafClient {
    pub fn for_host(
        host: &str,
        port: Option<u16>,
        token: Option<SecretString>,
        transport: TransportConfig,
    ) -> Result<Self, Error> {
        let port = port.unwrap_or(DEFAULT_PORT);
        let base_url = Url::parse(&format!("http://{host}:{port}/api/v1/"))?;
        Ok(Self::new(base_url, token, HttpSession::new(transport)?))
    }

    pub fn new(base_url: Url, token: Option<SecretString>, session: HttpSession) -> Self {
        let token = Arc::new(TokenSlot::new(token));
        let rest = RestClient::new(session, base_url, ConnectionTracker::new())
            .with_credential(Arc::clone(&token), TokenPlacement::PathPrefix);
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

    pub fn is_paired(&self) -> bool {
        self.token.is_set()
    }

    // ── Pairing ──────────────────────────────────────────────────────

    /// Request a token; the power button must be held for 5-7 seconds
    /// beforehand so the controller is in pairing mode.
    pub async fn pair(
        &self,
        policy: PairingPolicy,
        cancel: &CancellationToken,
    ) -> Result<SecretString, Error> {
        self.token.clear();
        let rest = &self.rest;

        let token = run_pairing(policy, rest.tracker(), cancel, move |_| async move {
            let reply = rest.probe(Method::POST, "new", None).await?;
            Ok(match reply.get("auth_token").and_then(Value::as_str) {
                Some(token) => PairingStep::Done(token.to_owned()),
                None => PairingStep::Pending,
            })
        })
        .await?;

        let token = SecretString::from(token);
        self.token.set(token.clone());
        Ok(token)
    }

    // ── Data facets ──────────────────────────────────────────────────

    pub async fn info(&self) -> Result<NanoleafInfo, Error> {
        let reply = self.get("", RequestKind::Info).await?;
        decode(reply)
    }

    pub async fn state(&self) -> Result<NanoleafState, Error> {
        let reply = self.get("state", RequestKind::States).await?;
        decode(reply)
    }

    pub async fn effects_list(&self) -> Result<Vec<String>, Error> {
        let reply = self.get("effects/effectsList", RequestKind::Effects).await?;
        decode(reply)
    }

    pub async fn current_effect(&self) -> Result<String, Error> {
        let reply = self.get("effects/select", RequestKind::CurrentEffect).await?;
        decode(reply)
    }

    async fn get(&self, path: &str, kind: RequestKind) -> Result<Value, Error> {
        self.require_token()?;
        self.rest
            .request_with_retry(Method::GET, path, None, kind)
            .await
    }

    // ── Actions ──────────────────────────────────────────────────────

    /// PUT a partial state (`{"on": {"value": true}}` etc.).
    pub async fn set_state(&self, body: &Value) -> Result<(), Error> {
        self.put("state", body).await
    }

    pub async fn select_effect(&self, name: &str) -> Result<(), Error> {
        self.put("effects", &json!({ "select": name })).await
    }

    async fn put(&self, path: &str, body: &Value) -> Result<(), Error> {
        self.require_token()?;
        self.rest
            .request_with_retry(Method::PUT, path, Some(body), RequestKind::Set)
            .await?;
        self.rest.tracker().emit(ClientEvent::ChangeOccurred);
        Ok(())
    }

    fn require_token(&self) -> Result<(), Error> {
        self.token.require().map(|_| ())
    }

    // ── Event stream ─────────────────────────────────────────────────

    /// Open the state/effects event stream unless it is already open.
    pub fn keep_event_stream(&self) -> Result<bool, Error> {
        self.require_token()?;
        let mut url = self.rest.url("events")?;
        url.set_query(Some(&format!("id={EVENT_STATE},{EVENT_EFFECTS}")));
        let request = self.rest.stream_builder(Method::GET, url);
        let tracker = self.rest.tracker().clone();

        Ok(self.stream.keep(move |cancel| async move {
            let result = sse::pump(request, &tracker, &cancel, |event| {
                match NanoleafEvent::parse(event.id.as_deref(), &event.data) {
                    Some(parsed) => tracker.emit(ClientEvent::StreamData(Arc::new(parsed.to_value()))),
                    None => warn!(data = %event.data, "malformed Nanoleaf event"),
                }
            })
            .await;
            if let Err(e) = result {
                info!(error = %e, "Nanoleaf event stream ended");
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

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, Error> {
    let body = value.to_string();
    serde_json::from_value(value).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body,
    })
}
