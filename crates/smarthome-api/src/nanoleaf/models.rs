// Nanoleaf OpenAPI payloads.

use serde::Deserialize;
use serde_json::Value;

/// Event channel ids of `GET /events?id=...`.
pub const EVENT_STATE: u8 = 1;
pub const EVENT_LAYOUT: u8 = 2;
pub const EVENT_EFFECTS: u8 = 3;
pub const EVENT_TOUCH: u8 = 4;

/// Attribute ids inside a state event.
pub const ATTR_ON: u8 = 1;
pub const ATTR_BRIGHTNESS: u8 = 2;
pub const ATTR_HUE: u8 = 3;
pub const ATTR_SATURATION: u8 = 4;
pub const ATTR_COLOR_TEMPERATURE: u8 = 5;
pub const ATTR_COLOR_MODE: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct OnValue {
    pub value: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RangedValue {
    pub value: f64,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NanoleafState {
    #[serde(default)]
    pub on: Option<OnValue>,
    #[serde(default)]
    pub brightness: Option<RangedValue>,
    #[serde(default)]
    pub hue: Option<RangedValue>,
    #[serde(default)]
    pub sat: Option<RangedValue>,
    #[serde(default)]
    pub ct: Option<RangedValue>,
    /// `hs`, `ct` or `effect`.
    #[serde(default)]
    pub color_mode: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NanoleafInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub serial_no: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub firmware_version: String,
}

/// One `attr`/`value` pair from a streamed event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NanoleafAttrEvent {
    pub attr: u8,
    pub value: Value,
}

/// A decoded `id:`/`data:` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct NanoleafEvent {
    pub channel: u8,
    pub events: Vec<NanoleafAttrEvent>,
}

impl NanoleafEvent {
    /// Decode a frame; malformed attribute entries are skipped.
    pub fn parse(id: Option<&str>, data: &str) -> Option<Self> {
        let channel = id?.trim().parse().ok()?;
        let value: Value = serde_json::from_str(data).ok()?;
        let events = value
            .get("events")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| NanoleafAttrEvent::deserialize(item).ok())
                    .collect()
            })
            .unwrap_or_default();
        Some(Self { channel, events })
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "id": self.channel,
            "events": self
                .events
                .iter()
                .map(|e| serde_json::json!({ "attr": e.attr, "value": e.value }))
                .collect::<Vec<_>>(),
        })
    }
}
