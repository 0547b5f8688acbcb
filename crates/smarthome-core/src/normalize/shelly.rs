// Shelly: per-device status (and names from the device config) to the
// canonical tree.
//
// Every output channel is its own canonical device, id
// `<key>:<component>:<index>`. Each physical Shelly becomes a group.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use smarthome_api::shelly::{ShellyGeneration, ShellyInfo};

use super::from_percent;
use crate::color::Rgb;
use crate::error::CoreError;
use crate::model::{Capability, CanonicalTree, ColorMode, ConfigEntry, Device, Group};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ShellyComponent {
    Switch,
    Light,
    Rgb,
    Cover,
}

/// Address of one output channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellyChannel {
    pub key: String,
    pub component: ShellyComponent,
    pub index: u8,
}

impl ShellyChannel {
    pub fn new(key: impl Into<String>, component: ShellyComponent, index: u8) -> Self {
        Self {
            key: key.into(),
            component,
            index,
        }
    }

    pub fn parse(id: &str) -> Result<Self, CoreError> {
        let invalid = || CoreError::InvalidId { id: id.to_owned() };
        let mut parts = id.rsplitn(3, ':');
        let index = parts.next().and_then(|i| i.parse().ok()).ok_or_else(invalid)?;
        let component = parts.next().and_then(|c| c.parse().ok()).ok_or_else(invalid)?;
        let key = parts.next().filter(|k| !k.is_empty()).ok_or_else(invalid)?;
        Ok(Self::new(key, component, index))
    }
}

impl fmt::Display for ShellyChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.key, self.component, self.index)
    }
}

/// Working data for one Shelly.
#[derive(Debug, Clone, Default)]
pub struct ShellyRecord {
    pub info: Option<ShellyInfo>,
    pub status: Option<Value>,
    /// Gen1 `/settings` or gen2 `Shelly.GetConfig`, used for names.
    pub config: Option<Value>,
}

pub fn build(records: &BTreeMap<String, ShellyRecord>, previous: Option<&CanonicalTree>) -> CanonicalTree {
    let mut tree = CanonicalTree::new();

    for (key, record) in records {
        let (Some(info), Some(status)) = (&record.info, &record.status) else {
            continue;
        };
        let name = info.name.clone().filter(|n| !n.is_empty()).unwrap_or_else(|| key.clone());
        tree.config.insert(
            key.clone(),
            ConfigEntry {
                name: name.clone(),
                model: Some(info.model().to_owned()),
                firmware: None,
                connected: true,
            },
        );
        tree.insert_group(Group::new(key, &name));

        let config = record.config.as_ref().unwrap_or(&Value::Null);
        let devices = match info.generation() {
            ShellyGeneration::Gen1 => gen1_channels(key, status, config),
            ShellyGeneration::Gen2 => gen2_channels(key, status, config),
        };
        for mut device in devices {
            device.add_group(key);
            tree.insert_device(device);
        }
    }

    tree.finalize(previous);
    tree
}

fn channel_name(config: Option<&Value>, fallback: String) -> String {
    config
        .and_then(|c| c.get("name"))
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .map_or(fallback, str::to_owned)
}

fn items(value: &Value, field: &str) -> Vec<Value> {
    value
        .get(field)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn rgb_of(red: Option<&Value>, green: Option<&Value>, blue: Option<&Value>) -> Option<Rgb> {
    let c = |v: Option<&Value>| v.and_then(Value::as_u64).map(|n| n.min(255) as u8);
    Some(Rgb::new(c(red)?, c(green)?, c(blue)?))
}

// ── Gen1 ─────────────────────────────────────────────────────────────

fn gen1_channels(key: &str, status: &Value, settings: &Value) -> Vec<Device> {
    let mut out = Vec::new();

    for (i, relay) in items(status, "relays").iter().enumerate() {
        let channel = ShellyChannel::new(key, ShellyComponent::Switch, i as u8);
        let names = items(settings, "relays");
        let mut device = Device::new(channel.to_string(), channel_name(names.get(i), format!("{key} relay {i}")));
        device.mark(Capability::Switch);
        device.switch = relay.get("ison").and_then(Value::as_bool);
        out.push(device);
    }

    for (i, light) in items(status, "lights").iter().enumerate() {
        let names = items(settings, "lights");
        let color = rgb_of(light.get("red"), light.get("green"), light.get("blue"));
        let component = if color.is_some() {
            ShellyComponent::Rgb
        } else {
            ShellyComponent::Light
        };
        let channel = ShellyChannel::new(key, component, i as u8);
        let mut device = Device::new(channel.to_string(), channel_name(names.get(i), format!("{key} light {i}")));
        device.mark(Capability::Switch);
        device.switch = light.get("ison").and_then(Value::as_bool);
        if let Some(color) = color {
            device.set_color(color);
            device.color_mode = Some(ColorMode::Color);
        } else if let Some(brightness) = light.get("brightness") {
            device.mark(Capability::Brightness);
            device.brightness = brightness.as_f64().map(from_percent);
        }
        out.push(device);
    }

    for (i, roller) in items(status, "rollers").iter().enumerate() {
        let channel = ShellyChannel::new(key, ShellyComponent::Cover, i as u8);
        let names = items(settings, "rollers");
        let mut device = Device::new(channel.to_string(), channel_name(names.get(i), format!("{key} roller {i}")));
        cover_capabilities(&mut device, roller.get("current_pos"));
        out.push(device);
    }
    out
}

// ── Gen2+ ────────────────────────────────────────────────────────────

fn gen2_channels(key: &str, status: &Value, config: &Value) -> Vec<Device> {
    let Some(components) = status.as_object() else {
        return Vec::new();
    };
    let mut out = Vec::new();

    for (name, component_status) in components {
        let Some((kind, index)) = name.split_once(':') else {
            continue;
        };
        let (Ok(component), Ok(index)) = (kind.parse::<ShellyComponent>(), index.parse::<u8>()) else {
            continue;
        };
        let channel = ShellyChannel::new(key, component, index);
        let label = channel_name(config.get(name.as_str()), format!("{key} {kind} {index}"));
        let mut device = Device::new(channel.to_string(), label);

        match component {
            ShellyComponent::Switch => {
                device.mark(Capability::Switch);
                device.switch = component_status.get("output").and_then(Value::as_bool);
            }
            ShellyComponent::Light => {
                device.mark(Capability::Switch);
                device.switch = component_status.get("output").and_then(Value::as_bool);
                device.mark(Capability::Brightness);
                device.brightness = component_status
                    .get("brightness")
                    .and_then(Value::as_f64)
                    .map(from_percent);
            }
            ShellyComponent::Rgb => {
                device.mark(Capability::Switch);
                device.switch = component_status.get("output").and_then(Value::as_bool);
                device.mark(Capability::Color);
                device.color = component_status.get("rgb").and_then(|rgb| {
                    let rgb = rgb.as_array()?;
                    rgb_of(rgb.first(), rgb.get(1), rgb.get(2))
                });
                device.color_mode = Some(ColorMode::Color);
            }
            ShellyComponent::Cover => {
                cover_capabilities(&mut device, component_status.get("current_pos"));
            }
        }
        out.push(device);
    }
    out
}

/// Uncalibrated covers report a null position; they still go up and down.
fn cover_capabilities(device: &mut Device, current_pos: Option<&Value>) {
    device.mark(Capability::Up);
    device.mark(Capability::Down);
    if let Some(pos) = current_pos {
        device.mark(Capability::Position);
        device.position = pos.as_f64().map(from_percent);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn info(value: Value) -> ShellyInfo {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn channel_ids_round_trip_through_display() {
        let channel = ShellyChannel::parse("garage:door:cover:1").unwrap();
        assert_eq!(channel.key, "garage:door");
        assert_eq!(channel.component, ShellyComponent::Cover);
        assert_eq!(channel.index, 1);
        assert_eq!(channel.to_string(), "garage:door:cover:1");
        assert!(ShellyChannel::parse("plug:fridge:0").is_err());
        assert!(ShellyChannel::parse(":switch:0").is_err());
    }

    #[test]
    fn gen1_relays_lights_and_rollers() {
        let mut records = BTreeMap::new();
        records.insert(
            "hall".to_owned(),
            ShellyRecord {
                info: Some(info(json!({"type": "SHSW-25", "name": "Hall"}))),
                status: Some(json!({
                    "relays": [{"ison": true}],
                    "lights": [{"ison": false, "brightness": 30}, {"ison": true, "red": 255, "green": 0, "blue": 10}],
                    "rollers": [{"current_pos": 40}]
                })),
                config: Some(json!({"relays": [{"name": "Porch"}]})),
            },
        );

        let tree = build(&records, None);
        assert!(tree.violations().is_empty());
        assert_eq!(tree.devices["hall:switch:0"].name, "Porch");
        assert_eq!(tree.devices["hall:switch:0"].switch, Some(true));
        assert_eq!(tree.devices["hall:light:0"].brightness, Some(0.3));
        assert_eq!(tree.devices["hall:rgb:1"].color, Some(Rgb::new(255, 0, 10)));
        assert_eq!(tree.devices["hall:cover:0"].position, Some(0.4));
        assert_eq!(tree.groups["hall"].devices.len(), 4);
    }

    #[test]
    fn gen2_components() {
        let mut records = BTreeMap::new();
        records.insert(
            "plug".to_owned(),
            ShellyRecord {
                info: Some(info(json!({"gen": 2, "model": "SNSW-001P16EU"}))),
                status: Some(json!({
                    "sys": {"uptime": 5},
                    "switch:0": {"output": false},
                    "cover:0": {"current_pos": null},
                    "light:1": {"output": true, "brightness": 75}
                })),
                config: Some(json!({"switch:0": {"name": "Heater"}})),
            },
        );

        let tree = build(&records, None);
        assert!(tree.violations().is_empty());
        assert_eq!(tree.devices["plug:switch:0"].name, "Heater");
        assert_eq!(tree.devices["plug:light:1"].brightness, Some(0.75));
        let cover = &tree.devices["plug:cover:0"];
        assert!(cover.has(Capability::Position) && cover.has(Capability::Up));
        assert_eq!(cover.position, Some(0.0));
        assert_eq!(tree.config["plug"].model.as_deref(), Some("SNSW-001P16EU"));
    }
}
