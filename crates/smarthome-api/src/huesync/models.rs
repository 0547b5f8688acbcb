// Hue sync-box `/api/v1` payloads.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sync-box operating mode.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SyncMode {
    Video,
    Music,
    Game,
    Passthrough,
    Powersave,
}

impl SyncMode {
    /// Modes that actually drive the lights.
    pub fn is_syncing(self) -> bool {
        matches!(self, Self::Video | Self::Music | Self::Game)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SyncIntensity {
    Subtle,
    Moderate,
    High,
    Intense,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncDeviceInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub device_type: String,
    #[serde(default)]
    pub unique_id: String,
    #[serde(default)]
    pub firmware_version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncExecution {
    pub mode: SyncMode,
    #[serde(default)]
    pub sync_active: bool,
    #[serde(default)]
    pub hdmi_active: bool,
    #[serde(default)]
    pub hdmi_source: Option<String>,
    /// 0-200.
    #[serde(default)]
    pub brightness: u32,
    #[serde(default)]
    pub last_sync_mode: Option<SyncMode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HdmiInput {
    #[serde(skip)]
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
}

/// The whole box state from `GET /api/v1`.
#[derive(Debug, Clone)]
pub struct SyncBoxState {
    pub device: SyncDeviceInfo,
    pub execution: SyncExecution,
    pub inputs: Vec<HdmiInput>,
}

impl SyncBoxState {
    /// Decode the sections we use; unknown HDMI entries are skipped.
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        let device = match value.get("device") {
            Some(device) => SyncDeviceInfo::deserialize(device)?,
            None => SyncDeviceInfo::default(),
        };
        let execution = SyncExecution::deserialize(value.get("execution").unwrap_or(&Value::Null))?;

        let mut inputs = Vec::new();
        if let Some(hdmi) = value.get("hdmi").and_then(Value::as_object) {
            let sorted: BTreeMap<&String, &Value> = hdmi.iter().collect();
            for (key, entry) in sorted {
                if !key.starts_with("input") {
                    continue;
                }
                if let Ok(mut input) = HdmiInput::deserialize(entry) {
                    input.key.clone_from(key);
                    inputs.push(input);
                }
            }
        }

        Ok(Self {
            device,
            execution,
            inputs,
        })
    }
}

/// Access token returned by `POST /api/v1/registrations`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRegistration {
    pub registration_id: Option<Value>,
    pub access_token: String,
}
