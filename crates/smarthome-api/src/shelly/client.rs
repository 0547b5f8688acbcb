// Async client for one Shelly device.
//
// Gen1: query-string REST (`/status`, `/relay/0?turn=on`), HTTP basic auth.
// Gen2+: JSON-RPC over `POST /rpc`, SHA-256 digest auth on 401.
// No push channel: state is polled.

use std::sync::RwLock;

use rand::Rng;
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

use super::digest::{auth_block, parse_challenge};
use super::models::{ShellyGeneration, ShellyInfo};
use crate::connection::{ClientEvent, ConnectionTracker, RequestKind};
use crate::error::Error;
use crate::rest::RestClient;
use crate::transport::{HttpSession, TransportConfig};

const RPC_ID: u64 = 1;

/// Gen1 roller / gen2 cover commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverCommand {
    Open,
    Close,
    Stop,
    /// 0 (closed) to 100 (open).
    ToPosition(u8),
}

pub struct ShellyClient {
    rest: RestClient,
    username: Option<String>,
    password: Option<SecretString>,
    generation: RwLock<Option<ShellyGeneration>>,
}

impl ShellyClient {
    pub fn for_host(
        host: &str,
        username: Option<String>,
        password: Option<SecretString>,
        transport: TransportConfig,
    ) -> Result<Self, Error> {
        let base_url = Url::parse(&format!("http://{host}/"))?;
        Ok(Self::new(base_url, username, password, HttpSession::new(transport)?))
    }

    pub fn new(
        base_url: Url,
        username: Option<String>,
        password: Option<SecretString>,
        session: HttpSession,
    ) -> Self {
        Self {
            rest: RestClient::new(session, base_url, ConnectionTracker::new()),
            username,
            password,
            generation: RwLock::new(None),
        }
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        self.rest.tracker()
    }

    pub fn session(&self) -> &HttpSession {
        self.rest.session()
    }

    // ── Identification ───────────────────────────────────────────────

    /// `GET /shelly` (never authenticated) and remember the generation.
    pub async fn detect(&self) -> Result<ShellyInfo, Error> {
        let reply = self
            .rest
            .request(Method::GET, "shelly", None, RequestKind::Info)
            .await?;
        let info: ShellyInfo =
            serde_json::from_value(reply.clone()).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body: reply.to_string(),
            })?;
        *self
            .generation
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(info.generation());
        debug!(generation = %info.generation(), model = info.model(), "Shelly detected");
        Ok(info)
    }

    /// The cached generation, detecting it on first use.
    pub async fn generation(&self) -> Result<ShellyGeneration, Error> {
        let cached = *self
            .generation
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match cached {
            Some(generation) => Ok(generation),
            None => Ok(self.detect().await?.generation()),
        }
    }

    // ── Data ─────────────────────────────────────────────────────────

    /// Full device status (gen1 `/status`, gen2 `Shelly.GetStatus`).
    pub async fn status(&self) -> Result<Value, Error> {
        match self.generation().await? {
            ShellyGeneration::Gen1 => self.gen1_get("status", &[], RequestKind::Status).await,
            ShellyGeneration::Gen2 => self.rpc("Shelly.GetStatus", json!({}), RequestKind::Status).await,
        }
    }

    /// Device configuration (gen1 `/settings`, gen2 `Shelly.GetConfig`).
    pub async fn config(&self) -> Result<Value, Error> {
        match self.generation().await? {
            ShellyGeneration::Gen1 => self.gen1_get("settings", &[], RequestKind::Config).await,
            ShellyGeneration::Gen2 => self.rpc("Shelly.GetConfig", json!({}), RequestKind::Config).await,
        }
    }

    // ── Actions ──────────────────────────────────────────────────────

    pub async fn set_switch(&self, index: u8, on: bool) -> Result<(), Error> {
        match self.generation().await? {
            ShellyGeneration::Gen1 => {
                let turn = if on { "on" } else { "off" };
                self.gen1_set(&format!("relay/{index}"), &[("turn", turn.to_owned())])
                    .await
            }
            ShellyGeneration::Gen2 => {
                self.rpc_set("Switch.Set", json!({ "id": index, "on": on }))
                    .await
            }
        }
    }

    /// Switch a dimmable light, optionally setting brightness (0-100).
    pub async fn set_light(&self, index: u8, on: bool, brightness: Option<u8>) -> Result<(), Error> {
        match self.generation().await? {
            ShellyGeneration::Gen1 => {
                let mut query = vec![("turn", if on { "on" } else { "off" }.to_owned())];
                if let Some(brightness) = brightness {
                    query.push(("brightness", brightness.min(100).to_string()));
                }
                self.gen1_set(&format!("light/{index}"), &query).await
            }
            ShellyGeneration::Gen2 => {
                let mut params = json!({ "id": index, "on": on });
                if let Some(brightness) = brightness {
                    params["brightness"] = json!(brightness.min(100));
                }
                self.rpc_set("Light.Set", params).await
            }
        }
    }

    /// Set an RGB light's color (gen1 `color/<i>`, gen2 `RGB.Set`).
    pub async fn set_color(&self, index: u8, rgb: [u8; 3]) -> Result<(), Error> {
        let [red, green, blue] = rgb;
        match self.generation().await? {
            ShellyGeneration::Gen1 => {
                let query = [
                    ("turn", "on".to_owned()),
                    ("red", red.to_string()),
                    ("green", green.to_string()),
                    ("blue", blue.to_string()),
                ];
                self.gen1_set(&format!("color/{index}"), &query).await
            }
            ShellyGeneration::Gen2 => {
                self.rpc_set("RGB.Set", json!({ "id": index, "on": true, "rgb": [red, green, blue] }))
                    .await
            }
        }
    }

    /// Switch an RGB light without touching its color.
    pub async fn set_rgb_power(&self, index: u8, on: bool) -> Result<(), Error> {
        match self.generation().await? {
            ShellyGeneration::Gen1 => {
                let turn = if on { "on" } else { "off" };
                self.gen1_set(&format!("color/{index}"), &[("turn", turn.to_owned())])
                    .await
            }
            ShellyGeneration::Gen2 => {
                self.rpc_set("RGB.Set", json!({ "id": index, "on": on }))
                    .await
            }
        }
    }

    pub async fn cover(&self, index: u8, command: CoverCommand) -> Result<(), Error> {
        match self.generation().await? {
            ShellyGeneration::Gen1 => {
                let query = match command {
                    CoverCommand::Open => vec![("go", "open".to_owned())],
                    CoverCommand::Close => vec![("go", "close".to_owned())],
                    CoverCommand::Stop => vec![("go", "stop".to_owned())],
                    CoverCommand::ToPosition(pos) => vec![
                        ("go", "to_pos".to_owned()),
                        ("roller_pos", pos.min(100).to_string()),
                    ],
                };
                self.gen1_set(&format!("roller/{index}"), &query).await
            }
            ShellyGeneration::Gen2 => match command {
                CoverCommand::Open => self.rpc_set("Cover.Open", json!({ "id": index })).await,
                CoverCommand::Close => self.rpc_set("Cover.Close", json!({ "id": index })).await,
                CoverCommand::Stop => self.rpc_set("Cover.Stop", json!({ "id": index })).await,
                CoverCommand::ToPosition(pos) => {
                    self.rpc_set("Cover.GoToPosition", json!({ "id": index, "pos": pos.min(100) }))
                        .await
                }
            },
        }
    }

    // ── Gen1 ─────────────────────────────────────────────────────────

    async fn gen1_get(
        &self,
        path: &str,
        query: &[(&str, String)],
        kind: RequestKind,
    ) -> Result<Value, Error> {
        let url = self.rest.url(path)?;
        debug!("GET {url} params={query:?}");
        let mut builder = self.rest.builder(Method::GET, url).query(query);
        if let (Some(user), Some(password)) = (&self.username, &self.password) {
            builder = builder.basic_auth(user, Some(password.expose_secret()));
        }
        self.rest.execute(builder, kind).await
    }

    async fn gen1_set(&self, path: &str, query: &[(&str, String)]) -> Result<(), Error> {
        self.gen1_get(path, query, RequestKind::Set).await?;
        self.rest.tracker().emit(ClientEvent::ChangeOccurred);
        Ok(())
    }

    // ── Gen2 RPC ─────────────────────────────────────────────────────

    async fn rpc_set(&self, method: &str, params: Value) -> Result<(), Error> {
        self.rpc(method, params, RequestKind::Set).await?;
        self.rest.tracker().emit(ClientEvent::ChangeOccurred);
        Ok(())
    }

    /// One JSON-RPC call. A 401 is answered once with a digest `auth`
    /// block; a second 401 is returned as an authentication error.
    pub async fn rpc(&self, method: &str, params: Value, kind: RequestKind) -> Result<Value, Error> {
        let url = self.rest.url("rpc")?;
        let mut body = json!({ "id": RPC_ID, "method": method, "params": params });
        debug!(method, "POST {url}");

        let first = self
            .rest
            .builder(Method::POST, url.clone())
            .json(&body)
            .send()
            .await;

        let reply = match first {
            Ok(resp) if resp.status() == reqwest::StatusCode::UNAUTHORIZED => {
                let challenge = resp
                    .headers()
                    .get(reqwest::header::WWW_AUTHENTICATE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_challenge);
                let (Some(challenge), Some(password)) = (challenge, &self.password) else {
                    let err = Error::Authentication {
                        message: "device requires a password".into(),
                    };
                    self.rest.tracker().failed(&err);
                    return Err(err);
                };

                let cnonce: u64 = rand::thread_rng().gen_range(1..u64::from(u32::MAX));
                body["auth"] = auth_block(&challenge, password.expose_secret(), cnonce);
                debug!(method, "retrying with digest auth");

                let retried = self
                    .rest
                    .builder(Method::POST, url)
                    .json(&body)
                    .send()
                    .await;
                self.rest.complete(retried, kind).await?
            }
            sent => self.rest.complete(sent, kind).await?,
        };

        rpc_result(reply)
    }
}

fn rpc_result(reply: Value) -> Result<Value, Error> {
    if let Some(error) = reply.get("error") {
        return Err(Error::Protocol(format!("RPC error: {error}")));
    }
    match reply {
        Value::Object(mut map) => Ok(map.remove("result").unwrap_or(Value::Null)),
        other => Err(Error::Protocol(format!("RPC reply is not an object: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_error_object_is_protocol_error() {
        let err = rpc_result(json!({"id": 1, "error": {"code": -103, "message": "bad id"}})).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn rpc_result_is_unwrapped() {
        let result = rpc_result(json!({"id": 1, "src": "x", "result": {"was_on": false}})).unwrap();
        assert_eq!(result, json!({"was_on": false}));
    }
}
