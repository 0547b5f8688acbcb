// Async client for the Philips Hue HDMI sync box.
//
// Base: https://<box>/api/v1/
// Auth: Bearer access token from `registrations`
// TLS: the box presents a certificate chained to a vendor root CA; callers
// pin that CA through `TlsMode::PinnedCa`.
// No push channel: state is polled.

use std::sync::Arc;

use reqwest::Method;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::models::{SyncBoxState, SyncIntensity, SyncMode, SyncRegistration};
use crate::auth::TokenSlot;
use crate::connection::{ClientEvent, ConnectionTracker, RequestKind};
use crate::error::Error;
use crate::pairing::{PairingPolicy, PairingStep, run_pairing};
use crate::rest::{RestClient, TokenPlacement};
use crate::transport::{HttpSession, TransportConfig};

/// Sync-box brightness ceiling.
pub const MAX_BRIGHTNESS: u32 = 200;

pub struct HueSyncClient {
    rest: RestClient,
    token: Arc<TokenSlot>,
}

impl HueSyncClient {
    pub fn for_host(
        host: &str,
        token: Option<SecretString>,
        transport: TransportConfig,
    ) -> Result<Self, Error> {
        let base_url = Url::parse(&format!("https://{host}/api/v1/"))?;
        Ok(Self::new(base_url, token, HttpSession::new(transport)?))
    }

    pub fn new(base_url: Url, token: Option<SecretString>, session: HttpSession) -> Self {
        let token = Arc::new(TokenSlot::new(token));
        let rest = RestClient::new(session, base_url, ConnectionTracker::new())
            .with_credential(Arc::clone(&token), TokenPlacement::Bearer);
        Self { rest, token }
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

    // ── Registration ─────────────────────────────────────────────────

    /// Register this app; the button on the box must be held until the
    /// LED blinks green.
    pub async fn register(
        &self,
        app_name: &str,
        instance_name: &str,
        policy: PairingPolicy,
        cancel: &CancellationToken,
    ) -> Result<SecretString, Error> {
        self.token.clear();
        let body = json!({ "appName": app_name, "instanceName": instance_name });
        let body = &body;
        let rest = &self.rest;

        let registration = run_pairing(policy, rest.tracker(), cancel, move |_| async move {
            let reply = rest.probe(Method::POST, "registrations", Some(body)).await?;
            if reply.get("accessToken").is_none() {
                return Ok(PairingStep::Pending);
            }
            serde_json::from_value::<SyncRegistration>(reply.clone())
                .map(PairingStep::Done)
                .map_err(|e| Error::Deserialization {
                    message: e.to_string(),
                    body: reply.to_string(),
                })
        })
        .await?;

        let token = SecretString::from(registration.access_token);
        self.token.set(token.clone());
        Ok(token)
    }

    // ── State ────────────────────────────────────────────────────────

    pub async fn state(&self) -> Result<SyncBoxState, Error> {
        let reply = self
            .rest
            .request(Method::GET, "", None, RequestKind::Status)
            .await?;
        SyncBoxState::from_value(&reply).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: reply.to_string(),
        })
    }

    // ── Execution ────────────────────────────────────────────────────

    /// PUT a partial `execution` object.
    pub async fn execute(&self, body: &Value) -> Result<(), Error> {
        self.rest
            .request(Method::PUT, "execution", Some(body), RequestKind::Execution)
            .await?;
        self.rest.tracker().emit(ClientEvent::ChangeOccurred);
        Ok(())
    }

    pub async fn set_sync_active(&self, active: bool) -> Result<(), Error> {
        self.execute(&json!({ "syncActive": active })).await
    }

    pub async fn set_mode(&self, mode: SyncMode) -> Result<(), Error> {
        self.execute(&json!({ "mode": mode })).await
    }

    pub async fn set_hdmi_source(&self, input: &str) -> Result<(), Error> {
        self.execute(&json!({ "hdmiSource": input })).await
    }

    /// Brightness on the box's 0-200 scale.
    pub async fn set_brightness(&self, brightness: u32) -> Result<(), Error> {
        self.execute(&json!({ "brightness": brightness.min(MAX_BRIGHTNESS) }))
            .await
    }

    pub async fn set_intensity(&self, intensity: SyncIntensity) -> Result<(), Error> {
        self.execute(&json!({ "intensity": intensity })).await
    }

    /// Switch the box to standby or back to its last sync mode.
    pub async fn set_power(&self, on: bool) -> Result<(), Error> {
        if on {
            self.set_sync_active(true).await
        } else {
            self.set_mode(SyncMode::Powersave).await
        }
    }
}
