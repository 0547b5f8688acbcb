// Shelly `/shelly` identification payload.

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ShellyGeneration {
    #[strum(serialize = "gen1")]
    Gen1,
    /// Gen2, Gen3 and Gen4 share the RPC protocol.
    #[strum(serialize = "gen2+")]
    Gen2,
}

/// `GET /shelly`. Gen1 reports `type` and `auth`; gen2+ reports `gen`,
/// `model` and `auth_en`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShellyInfo {
    #[serde(default, rename = "gen")]
    pub generation_number: Option<u8>,
    #[serde(default, rename = "type")]
    pub device_type: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub auth: Option<bool>,
    #[serde(default)]
    pub auth_en: Option<bool>,
}

impl ShellyInfo {
    pub fn generation(&self) -> ShellyGeneration {
        match self.generation_number {
            Some(g) if g >= 2 => ShellyGeneration::Gen2,
            _ => ShellyGeneration::Gen1,
        }
    }

    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .or(self.device_type.as_deref())
            .unwrap_or("shelly")
    }

    pub fn requires_auth(&self) -> bool {
        self.auth.or(self.auth_en).unwrap_or(false)
    }
}
