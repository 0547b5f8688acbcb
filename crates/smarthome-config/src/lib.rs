//! Shared configuration for the smart-home bridge tools.
//!
//! `config.toml` plus `SMARTHOME_` environment overrides, credential
//! resolution (plaintext, env var, OS keyring) and translation into
//! `smarthome_core` plugin configs.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use smarthome_api::TlsMode;
use smarthome_core::config::{
    DirigeraConfig, HomeAssistantConfig, HueBridgeConfig, HueSyncConfig, NanoleafConfig, NanoleafDevice,
    ShellyConfig, ShellyDevice,
};
use smarthome_core::{BridgeConfig, BridgeKind, BridgeOptions, LoginState, PluginConfig};
use thiserror::Error;
use tracing::debug;

/// Keyring service name for stored tokens and passwords.
pub const KEYRING_SERVICE: &str = "smarthome";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for bridge '{bridge}'")]
    NoCredentials { bridge: String },

    #[error("no bridge named '{name}' in the config")]
    UnknownBridge { name: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// HTTP timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Drop devices of unreachable bridges from listings.
    #[serde(default)]
    pub hide_unavailable: bool,

    /// JSON blob of desired states replayed once after login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_login: Option<String>,

    /// Switch everything off on shutdown.
    #[serde(default)]
    pub off_shutdown: bool,

    /// Named bridges.
    #[serde(default)]
    pub bridges: BTreeMap<String, Bridge>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            hide_unavailable: false,
            on_login: None,
            off_shutdown: false,
            bridges: BTreeMap::new(),
        }
    }
}

fn default_timeout() -> u64 {
    5
}

/// One `[bridges.<name>]` table.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Bridge {
    /// `hue-bridge`, `hue-sync`, `dirigera`, `nanoleaf`, `home-assistant`
    /// or `shelly`.
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Home Assistant base URL; built from `ip`/`port` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Token / app key (plaintext, prefer keyring or env var).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Environment variable holding the token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Password (plaintext, prefer keyring or env var).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,

    /// CA certificate (PEM) to trust.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<PathBuf>,

    /// Accept any certificate.
    #[serde(default)]
    pub insecure: bool,

    /// Devices of a multi-device bridge (Nanoleaf, Shelly).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<DeviceEntry>,
}

/// One device of a multi-device bridge.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct DeviceEntry {
    /// Stable key; becomes part of every device id.
    pub key: String,
    pub ip: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
}

impl Bridge {
    pub fn kind(&self) -> Result<BridgeKind, ConfigError> {
        match BridgeKind::from_str(&self.kind) {
            Ok(BridgeKind::Universal) | Err(_) => Err(invalid(
                "kind",
                format!(
                    "expected 'hue-bridge', 'hue-sync', 'dirigera', 'nanoleaf', 'home-assistant' or 'shelly', got '{}'",
                    self.kind
                ),
            )),
            Ok(kind) => Ok(kind),
        }
    }

    fn ip(&self, name: &str) -> Result<String, ConfigError> {
        self.ip
            .clone()
            .filter(|ip| !ip.is_empty())
            .ok_or_else(|| invalid(format!("bridges.{name}.ip"), "missing"))
    }

    /// Keyring account for a device secret. A bare-`ip` bridge keeps its
    /// secrets under the bridge itself.
    pub fn device_account(&self, name: &str, key: &str, secret: &str) -> String {
        if self.devices.is_empty() {
            keyring_account(name, None, secret)
        } else {
            keyring_account(name, Some(key), secret)
        }
    }

    /// Configured devices; a bare `ip` stands for one device keyed by the
    /// bridge name.
    fn device_entries(&self, name: &str) -> Result<Vec<DeviceEntry>, ConfigError> {
        let entries = if self.devices.is_empty() {
            vec![DeviceEntry {
                key: name.to_owned(),
                ip: self.ip(name)?,
                port: self.port,
                token: self.token.clone(),
                token_env: self.token_env.clone(),
                username: self.username.clone(),
                password: self.password.clone(),
                password_env: self.password_env.clone(),
            }]
        } else {
            self.devices.clone()
        };
        let mut seen = BTreeSet::new();
        for entry in &entries {
            if entry.key.is_empty() || entry.key.contains(':') {
                return Err(invalid(
                    format!("bridges.{name}.devices.key"),
                    format!("'{}' must be non-empty and free of ':'", entry.key),
                ));
            }
            if !seen.insert(entry.key.as_str()) {
                return Err(invalid(
                    format!("bridges.{name}.devices.key"),
                    format!("duplicate key '{}'", entry.key),
                ));
            }
        }
        Ok(entries)
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "smarthome", "smarthome").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("smarthome");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the default path + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load `path` merged with `SMARTHOME_` variables. Nested keys use a
/// double underscore: `SMARTHOME_BRIDGES__HUE__TOKEN`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("SMARTHOME_").split("__"));

    let config: Config = figment.extract()?;
    debug!(path = %path.display(), bridges = config.bridges.len(), "config loaded");
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Keyring account for a bridge (or one of its devices) secret.
pub fn keyring_account(bridge: &str, device: Option<&str>, secret: &str) -> String {
    match device {
        Some(device) => format!("{bridge}/{device}/{secret}"),
        None => format!("{bridge}/{secret}"),
    }
}

/// Plaintext, then the named environment variable, then the keyring.
fn resolve_secret(plaintext: Option<&str>, env_name: Option<&str>, account: &str) -> Option<SecretString> {
    // 1. Plaintext in config
    if let Some(value) = plaintext.filter(|v| !v.is_empty()) {
        return Some(SecretString::from(value.to_owned()));
    }

    // 2. Named env var
    if let Some(env_name) = env_name {
        if let Ok(value) = std::env::var(env_name) {
            debug!(%account, env = env_name, "secret from environment");
            return Some(SecretString::from(value));
        }
    }

    // 3. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, account) {
        if let Ok(value) = entry.get_password() {
            debug!(%account, "secret from keyring");
            return Some(SecretString::from(value));
        }
    }
    None
}

/// Store a freshly paired token (or a password) in the keyring.
pub fn store_secret(account: &str, secret: &str) -> Result<(), ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, account)?.set_password(secret)?;
    Ok(())
}

// ── Translation to runtime configs ──────────────────────────────────

/// Plugin options from the global settings.
pub fn bridge_options(cfg: &Config) -> BridgeOptions {
    BridgeOptions {
        timeout: Duration::from_secs(cfg.timeout),
        hide_unavailable: cfg.hide_unavailable,
        ..BridgeOptions::default()
    }
}

/// The parsed `on_login` blob.
pub fn login_state(cfg: &Config) -> Result<LoginState, ConfigError> {
    LoginState::parse(cfg.on_login.as_deref().unwrap_or_default())
        .map_err(|e| invalid("on_login", e.to_string()))
}

/// Runtime config for the bridge called `name`.
pub fn plugin_config(cfg: &Config, name: &str) -> Result<PluginConfig, ConfigError> {
    let bridge = cfg.bridges.get(name).ok_or_else(|| ConfigError::UnknownBridge {
        name: name.to_owned(),
    })?;
    bridge_to_plugin_config(bridge, name)
}

/// Every configured bridge, in name order.
pub fn plugin_configs(cfg: &Config) -> Result<Vec<PluginConfig>, ConfigError> {
    cfg.bridges
        .iter()
        .map(|(name, bridge)| bridge_to_plugin_config(bridge, name))
        .collect()
}

/// Build a `PluginConfig` from one bridge table. Tokens may be missing
/// for bridges that can still be paired.
pub fn bridge_to_plugin_config(bridge: &Bridge, name: &str) -> Result<PluginConfig, ConfigError> {
    let token = || {
        resolve_secret(
            bridge.token.as_deref(),
            bridge.token_env.as_deref(),
            &keyring_account(name, None, "token"),
        )
    };

    let config = match bridge.kind()? {
        BridgeKind::HueBridge => BridgeConfig::HueBridge(HueBridgeConfig {
            ip: bridge.ip(name)?,
            app_key: token(),
            tls: match &bridge.ca_cert {
                Some(path) if !bridge.insecure => TlsMode::CustomCa(path.clone()),
                _ => TlsMode::DangerAcceptInvalid,
            },
        }),
        BridgeKind::HueSync => BridgeConfig::HueSync(HueSyncConfig {
            ip: bridge.ip(name)?,
            token: token(),
            ca_pem: match &bridge.ca_cert {
                Some(path) if !bridge.insecure => Some(Arc::from(std::fs::read(path)?)),
                _ => None,
            },
        }),
        BridgeKind::Dirigera => BridgeConfig::Dirigera(DirigeraConfig {
            ip: bridge.ip(name)?,
            port: bridge.port,
            token: token(),
        }),
        BridgeKind::HomeAssistant => {
            let url = match (&bridge.url, &bridge.ip) {
                (Some(url), _) => url.clone(),
                (None, Some(ip)) => format!("http://{ip}:{}/", bridge.port.unwrap_or(8123)),
                (None, None) => return Err(invalid(format!("bridges.{name}.url"), "missing url or ip")),
            };
            let tls = if bridge.insecure {
                TlsMode::DangerAcceptInvalid
            } else if let Some(path) = &bridge.ca_cert {
                TlsMode::CustomCa(path.clone())
            } else {
                TlsMode::System
            };
            let token = token().ok_or_else(|| ConfigError::NoCredentials {
                bridge: name.to_owned(),
            })?;
            BridgeConfig::HomeAssistant(HomeAssistantConfig {
                url,
                token: Some(token),
                tls,
            })
        }
        BridgeKind::Nanoleaf => {
            let devices = bridge
                .device_entries(name)?
                .into_iter()
                .map(|d| {
                    let token = resolve_secret(
                        d.token.as_deref(),
                        d.token_env.as_deref(),
                        &bridge.device_account(name, &d.key, "token"),
                    );
                    NanoleafDevice {
                        key: d.key,
                        ip: d.ip,
                        port: d.port,
                        token,
                    }
                })
                .collect();
            BridgeConfig::Nanoleaf(NanoleafConfig { devices })
        }
        BridgeKind::Shelly => {
            let devices = bridge
                .device_entries(name)?
                .into_iter()
                .map(|d| {
                    let password = resolve_secret(
                        d.password.as_deref(),
                        d.password_env.as_deref(),
                        &bridge.device_account(name, &d.key, "password"),
                    );
                    ShellyDevice {
                        username: d.username.or_else(|| password.as_ref().map(|_| "admin".to_owned())),
                        key: d.key,
                        ip: d.ip,
                        password,
                    }
                })
                .collect();
            BridgeConfig::Shelly(ShellyConfig { devices })
        }
        BridgeKind::Universal => return Err(invalid("kind", "universal is not configurable")),
    };

    Ok(PluginConfig {
        id: name.to_owned(),
        bridge: config,
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    fn bridge(kind: &str) -> Bridge {
        Bridge {
            kind: kind.into(),
            ip: Some("192.168.1.20".into()),
            ..Bridge::default()
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = bridge_to_plugin_config(&bridge("zigbee"), "x").unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
        let err = bridge_to_plugin_config(&bridge("universal"), "x").unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn plaintext_token_wins() {
        let mut hue = bridge("hue-bridge");
        hue.token = Some("app-key".into());
        let config = bridge_to_plugin_config(&hue, "hue").unwrap();
        let BridgeConfig::HueBridge(hue) = config.bridge else {
            panic!("wrong kind");
        };
        assert_eq!(hue.app_key.unwrap().expose_secret(), "app-key");
        assert!(matches!(hue.tls, TlsMode::DangerAcceptInvalid));
    }

    #[test]
    fn home_assistant_url_defaults_from_ip() {
        let mut ha = bridge("home-assistant");
        ha.token = Some("llat".into());
        let BridgeConfig::HomeAssistant(ha) = bridge_to_plugin_config(&ha, "ha").unwrap().bridge else {
            panic!("wrong kind");
        };
        assert_eq!(ha.url, "http://192.168.1.20:8123/");
    }

    #[test]
    fn bare_ip_is_one_device() {
        let BridgeConfig::Shelly(shelly) = bridge_to_plugin_config(&bridge("shelly"), "porch").unwrap().bridge
        else {
            panic!("wrong kind");
        };
        assert_eq!(shelly.devices.len(), 1);
        assert_eq!(shelly.devices[0].key, "porch");
        assert_eq!(shelly.devices[0].ip, "192.168.1.20");
    }

    #[test]
    fn duplicate_device_keys_are_rejected() {
        let mut nanoleaf = bridge("nanoleaf");
        let device = DeviceEntry {
            key: "shapes".into(),
            ip: "10.0.0.2".into(),
            ..DeviceEntry::default()
        };
        nanoleaf.devices = vec![device.clone(), device];
        assert!(matches!(
            bridge_to_plugin_config(&nanoleaf, "leaf"),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn keyring_accounts() {
        assert_eq!(keyring_account("hue", None, "token"), "hue/token");
        assert_eq!(keyring_account("leaf", Some("shapes"), "token"), "leaf/shapes/token");

        let mut leaf = bridge("nanoleaf");
        assert_eq!(leaf.device_account("leaf", "leaf", "token"), "leaf/token");
        leaf.devices.push(DeviceEntry {
            key: "shapes".into(),
            ..DeviceEntry::default()
        });
        assert_eq!(leaf.device_account("leaf", "shapes", "token"), "leaf/shapes/token");
    }
}
