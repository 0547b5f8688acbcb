// ── Runtime bridge configuration ──
//
// These types describe how to reach each bridge. They carry credentials
// and tuning but never touch disk; `smarthome-config` builds them.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use smarthome_api::{PairingPolicy, TlsMode};

use crate::bridge::BridgeKind;
use crate::reconnect::ReconnectPolicy;
use crate::timers::GROUP_STAGGER;

/// Options shared by every plugin instance.
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    /// HTTP timeout for every request and stream connect.
    pub timeout: Duration,
    /// Drop devices of disconnected units from the published tree.
    pub hide_unavailable: bool,
    pub reconnect: ReconnectPolicy,
    pub pairing: PairingPolicy,
    /// Delay between per-device requests in group loops.
    pub stagger: Duration,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            hide_unavailable: false,
            reconnect: ReconnectPolicy::default(),
            pairing: PairingPolicy::default(),
            stagger: GROUP_STAGGER,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HueBridgeConfig {
    pub ip: String,
    pub app_key: Option<SecretString>,
    pub tls: TlsMode,
}

#[derive(Debug, Clone)]
pub struct HueSyncConfig {
    pub ip: String,
    pub token: Option<SecretString>,
    /// Vendor root CA (PEM) to pin; without it certificates are not
    /// verified.
    pub ca_pem: Option<Arc<[u8]>>,
}

impl HueSyncConfig {
    pub fn tls(&self) -> TlsMode {
        match &self.ca_pem {
            Some(pem) => TlsMode::PinnedCa(Arc::clone(pem)),
            None => TlsMode::DangerAcceptInvalid,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DirigeraConfig {
    pub ip: String,
    pub port: Option<u16>,
    pub token: Option<SecretString>,
}

#[derive(Debug, Clone)]
pub struct NanoleafDevice {
    /// Stable key, used as the unit and device id.
    pub key: String,
    pub ip: String,
    pub port: Option<u16>,
    pub token: Option<SecretString>,
}

#[derive(Debug, Clone, Default)]
pub struct NanoleafConfig {
    pub devices: Vec<NanoleafDevice>,
}

#[derive(Debug, Clone)]
pub struct HomeAssistantConfig {
    /// Instance root, e.g. `http://homeassistant.local:8123/`.
    pub url: String,
    pub token: Option<SecretString>,
    pub tls: TlsMode,
}

#[derive(Debug, Clone)]
pub struct ShellyDevice {
    pub key: String,
    pub ip: String,
    pub username: Option<String>,
    pub password: Option<SecretString>,
}

#[derive(Debug, Clone, Default)]
pub struct ShellyConfig {
    pub devices: Vec<ShellyDevice>,
}

#[derive(Debug, Clone)]
pub enum BridgeConfig {
    HueBridge(HueBridgeConfig),
    HueSync(HueSyncConfig),
    Dirigera(DirigeraConfig),
    Nanoleaf(NanoleafConfig),
    HomeAssistant(HomeAssistantConfig),
    Shelly(ShellyConfig),
}

impl BridgeConfig {
    pub fn kind(&self) -> BridgeKind {
        match self {
            Self::HueBridge(_) => BridgeKind::HueBridge,
            Self::HueSync(_) => BridgeKind::HueSync,
            Self::Dirigera(_) => BridgeKind::Dirigera,
            Self::Nanoleaf(_) => BridgeKind::Nanoleaf,
            Self::HomeAssistant(_) => BridgeKind::HomeAssistant,
            Self::Shelly(_) => BridgeKind::Shelly,
        }
    }
}

/// One named plugin instance.
#[derive(Debug, Clone)]
pub struct PluginConfig {
    pub id: String,
    pub bridge: BridgeConfig,
}
