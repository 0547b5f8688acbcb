// Async client for the IKEA Dirigera hub.
//
// Base: https://<hub>:8443/v1/
// Auth: Bearer token obtained through a PKCE authorization-code flow that
// completes once the action button on the hub is pressed.
// Push: wss://<hub>:8443/v1 (JSON frames, `deviceStateChanged` et al.)

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use reqwest::Method;
use secrecy::SecretString;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use super::models::DirigeraHome;
use crate::auth::TokenSlot;
use crate::connection::{ClientEvent, ConnectionTracker, RequestKind};
use crate::error::Error;
use crate::pairing::{PairingPolicy, PairingStep, run_pairing};
use crate::rest::{RestClient, TokenPlacement};
use crate::subscription::StreamSubscription;
use crate::transport::{HttpSession, TlsMode, TransportConfig};
use crate::websocket::{self, FrameReply};

pub const DEFAULT_PORT: u16 = 8443;
const AUDIENCE: &str = "homesmart.local";
const VERIFIER_LEN: usize = 128;
const VERIFIER_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

// ── PKCE ─────────────────────────────────────────────────────────────

/// A PKCE verifier and its S256 challenge.
#[derive(Debug, Clone)]
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

impl Pkce {
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let verifier: String = (0..VERIFIER_LEN)
            .map(|_| char::from(VERIFIER_ALPHABET[rng.gen_range(0..VERIFIER_ALPHABET.len())]))
            .collect();
        Self::from_verifier(verifier)
    }

    pub fn from_verifier(verifier: String) -> Self {
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }
}

// ── Client ───────────────────────────────────────────────────────────

pub struct DirigeraClient {
    rest: RestClient,
    token: Arc<TokenSlot>,
    stream: StreamSubscription,
}

impl DirigeraClient {
    pub fn for_host(
        host: &str,
        port: Option<u16>,
        token: Option<SecretString>,
        transport: TransportConfig,
    ) -> Result<Self, Error> {
        let port = port.unwrap_or(DEFAULT_PORT);
        let base_url = Url::parse(&format!("https://{host}:{port}/v1/"))?;
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

    pub fn is_paired(&self) -> bool {
        self.token.is_set()
    }

    // ── Pairing ──────────────────────────────────────────────────────

    /// Run the authorize/token exchange. The action button on the hub
    /// must be pressed while the token request is being polled.
    pub async fn pair(
        &self,
        client_name: &str,
        policy: PairingPolicy,
        cancel: &CancellationToken,
    ) -> Result<SecretString, Error> {
        self.token.clear();
        let pkce = Pkce::generate();

        let mut authorize = self.rest.url("oauth/authorize")?;
        authorize
            .query_pairs_mut()
            .append_pair("audience", AUDIENCE)
            .append_pair("response_type", "code")
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", "S256");
        let reply = self
            .rest
            .probe_with(self.rest.builder(Method::GET, authorize))
            .await?;
        let code = reply
            .get("code")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Protocol("authorize reply without code".into()))?
            .to_owned();
        debug!("Dirigera authorization code received");

        let token_url = self.rest.url("oauth/token")?;
        let form = [
            ("code", code.as_str()),
            ("name", client_name),
            ("grant_type", "authorization_code"),
            ("code_verifier", pkce.verifier.as_str()),
        ];
        let form = &form;
        let token_url = &token_url;
        let rest = &self.rest;

        let token = run_pairing(policy, rest.tracker(), cancel, move |_| async move {
            let builder = rest.builder(Method::POST, token_url.clone()).form(form);
            let reply = rest.probe_with(builder).await?;
            Ok(match reply.get("access_token").and_then(Value::as_str) {
                Some(token) => PairingStep::Done(token.to_owned()),
                None => PairingStep::Pending,
            })
        })
        .await?;

        let token = SecretString::from(token);
        self.token.set(token.clone());
        Ok(token)
    }

    // ── Data ─────────────────────────────────────────────────────────

    pub async fn home(&self) -> Result<DirigeraHome, Error> {
        let reply = self
            .rest
            .request(Method::GET, "home", None, RequestKind::AllData)
            .await?;
        Ok(DirigeraHome::from_value(&reply))
    }

    // ── Actions ──────────────────────────────────────────────────────

    /// PATCH attributes onto one device.
    pub async fn patch_device(&self, id: &str, attributes: Value) -> Result<(), Error> {
        let body = json!([{ "attributes": attributes }]);
        self.rest
            .request(Method::PATCH, &format!("devices/{id}"), Some(&body), RequestKind::Set)
            .await?;
        self.rest.tracker().emit(ClientEvent::ChangeOccurred);
        Ok(())
    }

    pub async fn trigger_scene(&self, id: &str) -> Result<(), Error> {
        self.rest
            .request(
                Method::POST,
                &format!("scenes/{id}/trigger"),
                None,
                RequestKind::Set,
            )
            .await?;
        self.rest.tracker().emit(ClientEvent::ChangeOccurred);
        Ok(())
    }

    // ── Event stream ─────────────────────────────────────────────────

    /// Open the hub WebSocket unless it is already open.
    pub fn keep_event_stream(&self) -> Result<bool, Error> {
        let url = websocket_url(self.rest.base_url())?;
        let bearer = self.token.bearer()?;
        let bearer = bearer
            .to_str()
            .map_err(|e| Error::Authentication {
                message: e.to_string(),
            })?
            .to_owned();
        let insecure = matches!(self.rest.session().tls(), TlsMode::DangerAcceptInvalid);
        let tracker = self.rest.tracker().clone();

        Ok(self.stream.keep(move |cancel| async move {
            if let Err(e) = run_socket(&url, bearer, insecure, &tracker, &cancel).await {
                info!(error = %e, "Dirigera event stream ended");
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
    bearer: String,
    insecure: bool,
    tracker: &ConnectionTracker,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let headers = [("Authorization", bearer)];
    let connected = tokio::select! {
        biased;
        () = cancel.cancelled() => return Ok(()),
        ws = websocket::connect(url, &headers, insecure) => ws,
    };
    let ws = connected.inspect_err(|e| {
        tracker.failed(e);
    })?;
    tracker.succeeded();

    websocket::pump(ws, cancel, |text| {
        match classify_frame(text) {
            Some(DirigeraFrame::StateChanged(value)) => {
                tracker.emit(ClientEvent::StreamData(Arc::new(value)));
            }
            Some(DirigeraFrame::Structural) => tracker.emit(ClientEvent::ChangeOccurred),
            None => {}
        }
        FrameReply::Nothing
    })
    .await
    .inspect_err(|e| {
        tracker.failed(e);
    })
}

/// `https://hub:8443/v1/` becomes `wss://hub:8443/v1`.
fn websocket_url(base: &Url) -> Result<Url, Error> {
    let mut url = base.clone();
    let scheme = if base.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme)
        .map_err(|()| Error::Protocol(format!("cannot derive WebSocket URL from {base}")))?;
    let path = url.path().trim_end_matches('/').to_owned();
    url.set_path(&path);
    Ok(url)
}

#[derive(Debug, PartialEq)]
enum DirigeraFrame {
    StateChanged(Value),
    Structural,
}

fn classify_frame(text: &str) -> Option<DirigeraFrame> {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, "malformed Dirigera frame");
            return None;
        }
    };
    match value.get("type").and_then(Value::as_str) {
        Some("deviceStateChanged") => Some(DirigeraFrame::StateChanged(value)),
        Some(
            "deviceAdded" | "deviceRemoved" | "sceneCreated" | "sceneDeleted" | "sceneUpdated"
            | "roomCreated" | "roomDeleted" | "roomUpdated",
        ) => Some(DirigeraFrame::Structural),
        other => {
            tracing::trace!(kind = ?other, "ignoring Dirigera frame");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_matches_rfc7636_example() {
        let pkce = Pkce::from_verifier("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".into());
        assert_eq!(pkce.challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn generated_verifier_uses_unreserved_alphabet() {
        let pkce = Pkce::generate();
        assert_eq!(pkce.verifier.len(), VERIFIER_LEN);
        assert!(pkce.verifier.bytes().all(|b| VERIFIER_ALPHABET.contains(&b)));
    }

    #[test]
    fn websocket_url_drops_trailing_slash() {
        let base = Url::parse("https://10.0.0.5:8443/v1/").unwrap();
        assert_eq!(websocket_url(&base).unwrap().as_str(), "wss://10.0.0.5:8443/v1");
    }

    #[test]
    fn frames_are_classified() {
        let changed = r#"{"type":"deviceStateChanged","data":{"id":"d1","attributes":{"isOn":false}}}"#;
        assert!(matches!(classify_frame(changed), Some(DirigeraFrame::StateChanged(_))));
        assert_eq!(classify_frame(r#"{"type":"deviceAdded"}"#), Some(DirigeraFrame::Structural));
        assert_eq!(classify_frame(r#"{"type":"pong"}"#), None);
        assert_eq!(classify_frame("not json"), None);
    }
}
