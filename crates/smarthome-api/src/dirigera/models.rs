// Dirigera hub `/v1/home` payloads.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirigeraAttributes {
    #[serde(default)]
    pub custom_name: String,
    #[serde(default)]
    pub is_on: Option<bool>,
    /// 1-100.
    #[serde(default)]
    pub light_level: Option<f64>,
    /// Degrees, 0-360.
    #[serde(default)]
    pub color_hue: Option<f64>,
    /// 0-1.
    #[serde(default)]
    pub color_saturation: Option<f64>,
    /// Kelvin.
    #[serde(default)]
    pub color_temperature: Option<u32>,
    #[serde(default)]
    pub color_temperature_min: Option<u32>,
    #[serde(default)]
    pub color_temperature_max: Option<u32>,
    /// `color` or `temperature`.
    #[serde(default)]
    pub color_mode: Option<String>,
    /// Percent closed, 0-100.
    #[serde(default)]
    pub blinds_current_level: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirigeraRoom {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirigeraCapabilities {
    #[serde(default)]
    pub can_receive: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirigeraDevice {
    pub id: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub device_type: String,
    #[serde(default = "reachable_default")]
    pub is_reachable: bool,
    #[serde(default)]
    pub attributes: DirigeraAttributes,
    #[serde(default)]
    pub capabilities: DirigeraCapabilities,
    #[serde(default)]
    pub room: Option<DirigeraRoom>,
}

fn reachable_default() -> bool {
    true
}

impl DirigeraDevice {
    pub fn can_receive(&self, attribute: &str) -> bool {
        self.capabilities.can_receive.iter().any(|a| a == attribute)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DirigeraSceneInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirigeraSceneAction {
    #[serde(default)]
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirigeraScene {
    pub id: String,
    #[serde(default)]
    pub info: DirigeraSceneInfo,
    #[serde(default)]
    pub actions: Vec<DirigeraSceneAction>,
}

/// `GET /v1/home`, decoded item by item.
#[derive(Debug, Clone, Default)]
pub struct DirigeraHome {
    pub devices: Vec<DirigeraDevice>,
    pub scenes: Vec<DirigeraScene>,
}

impl DirigeraHome {
    pub fn from_value(value: &Value) -> Self {
        Self {
            devices: decode_each(value.get("devices")),
            scenes: decode_each(value.get("scenes")),
        }
    }
}

fn decode_each<T: serde::de::DeserializeOwned>(items: Option<&Value>) -> Vec<T> {
    items
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    T::deserialize(item)
                        .inspect_err(|e| tracing::warn!(error = %e, "skipping malformed Dirigera item"))
                        .ok()
                })
                .collect()
        })
        .unwrap_or_default()
}
