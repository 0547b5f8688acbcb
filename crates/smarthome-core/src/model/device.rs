// ── Canonical device and group records ──

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::color::Rgb;

/// What a device or group can be asked to do.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Capability {
    Switch,
    Brightness,
    Color,
    ColorTemperature,
    Position,
    Up,
    Down,
    Activate,
}

impl Capability {
    /// Capabilities that carry a value field on [`Device`].
    pub fn has_value(self) -> bool {
        matches!(
            self,
            Self::Switch | Self::Brightness | Self::Color | Self::ColorTemperature | Self::Position
        )
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntryType {
    #[default]
    Device,
    Scene,
    Group,
}

/// Menu section an entry is rendered in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Section {
    Common,
    Static,
    Group,
    #[default]
    Device,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ColorMode {
    Color,
    Temperature,
}

/// One controllable entity of a plugin instance.
///
/// Value fields are `Some` exactly when the matching capability is
/// listed, once the owning tree has been finalized. Normalizers may mark
/// a capability without a value when the vendor field is present but
/// unreadable; finalization then carries the last known value over.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EntryType,
    pub name: String,
    pub section: Section,
    pub capabilities: BTreeSet<Capability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub switch: Option<bool>,
    /// 0.0 to 1.0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<f64>,
    /// 0.0 (closed) to 1.0 (open).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Rgb>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_temperature: Option<Rgb>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_mode: Option<ColorMode>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub associated: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ct_min: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ct_max: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl Device {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn scene(id: impl Into<String>, name: impl Into<String>) -> Self {
        let mut scene = Self::new(id, name);
        scene.kind = EntryType::Scene;
        scene.section = Section::Static;
        scene.capabilities.insert(Capability::Activate);
        scene
    }

    pub fn with_section(mut self, section: Section) -> Self {
        self.section = section;
        self
    }

    pub fn is_scene(&self) -> bool {
        self.kind == EntryType::Scene
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// List a capability whose value is currently unknown.
    pub fn mark(&mut self, capability: Capability) {
        self.capabilities.insert(capability);
    }

    pub fn set_switch(&mut self, on: bool) {
        self.mark(Capability::Switch);
        self.switch = Some(on);
    }

    pub fn set_brightness(&mut self, brightness: f64) {
        self.mark(Capability::Brightness);
        self.brightness = Some(brightness.clamp(0.0, 1.0));
    }

    pub fn set_position(&mut self, position: f64) {
        self.mark(Capability::Position);
        self.position = Some(position.clamp(0.0, 1.0));
    }

    pub fn set_color(&mut self, color: Rgb) {
        self.mark(Capability::Color);
        self.color = Some(color);
    }

    pub fn set_color_temperature(&mut self, color: Rgb) {
        self.mark(Capability::ColorTemperature);
        self.color_temperature = Some(color);
    }

    pub fn add_group(&mut self, group: impl Into<String>) {
        push_unique(&mut self.groups, group.into());
    }

    pub fn add_associated(&mut self, id: impl Into<String>) {
        push_unique(&mut self.associated, id.into());
    }

    /// Whether every listed value capability has a value and no value
    /// is present without its capability.
    pub fn satisfies_capability_invariant(&self) -> bool {
        let pairs = [
            (Capability::Switch, self.switch.is_some()),
            (Capability::Brightness, self.brightness.is_some()),
            (Capability::Position, self.position.is_some()),
            (Capability::Color, self.color.is_some()),
            (Capability::ColorTemperature, self.color_temperature.is_some()),
        ];
        pairs
            .iter()
            .all(|(capability, present)| self.has(*capability) == *present)
    }

    /// Fill unset value fields from an earlier snapshot of the same device.
    pub(crate) fn carry_over(&mut self, previous: &Device) {
        if self.has(Capability::Switch) && self.switch.is_none() {
            self.switch = previous.switch;
        }
        if self.has(Capability::Brightness) && self.brightness.is_none() {
            self.brightness = previous.brightness;
        }
        if self.has(Capability::Position) && self.position.is_none() {
            self.position = previous.position;
        }
        if self.has(Capability::Color) && self.color.is_none() {
            self.color = previous.color;
        }
        if self.has(Capability::ColorTemperature) && self.color_temperature.is_none() {
            self.color_temperature = previous.color_temperature;
        }
        if self.color_mode.is_none() {
            self.color_mode = previous.color_mode;
        }
    }

    /// Defaults for capabilities never read, and removal of stray values.
    pub(crate) fn settle(&mut self) {
        let has = |c| self.capabilities.contains(&c);
        let (switch, brightness, position, color, ct) = (
            has(Capability::Switch),
            has(Capability::Brightness),
            has(Capability::Position),
            has(Capability::Color),
            has(Capability::ColorTemperature),
        );
        self.switch = if switch { Some(self.switch.unwrap_or(false)) } else { None };
        self.brightness = if brightness { Some(self.brightness.unwrap_or(0.0)) } else { None };
        self.position = if position { Some(self.position.unwrap_or(0.0)) } else { None };
        self.color = if color { Some(self.color.unwrap_or(Rgb::WHITE)) } else { None };
        self.color_temperature = if ct {
            Some(self.color_temperature.unwrap_or(Rgb::WHITE))
        } else {
            None
        };
        if !color && !ct {
            self.color_mode = None;
        }
    }
}

/// A room, zone or area.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub section: Section,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Union of member device capabilities, rebuilt on finalize.
    pub capabilities: BTreeSet<Capability>,
    /// Member device ids, rebuilt on finalize.
    pub devices: Vec<String>,
}

impl Group {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            section: Section::Group,
            ..Self::default()
        }
    }

    pub fn with_icon(mut self, icon: Option<String>) -> Self {
        self.icon = icon;
        self
    }
}

/// Per-bridge (or per-device, for multi-device plugins) metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware: Option<String>,
    pub connected: bool,
}

pub(crate) fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setters_mark_capabilities() {
        let mut device = Device::new("L1", "Lamp");
        device.set_switch(true);
        device.set_brightness(1.7);
        assert!(device.has(Capability::Switch));
        assert_eq!(device.brightness, Some(1.0));
        assert!(device.satisfies_capability_invariant());
    }

    #[test]
    fn marked_capability_without_value_breaks_invariant_until_settled() {
        let mut device = Device::new("L1", "Lamp");
        device.mark(Capability::Position);
        assert!(!device.satisfies_capability_invariant());
        device.settle();
        assert_eq!(device.position, Some(0.0));
        assert!(device.satisfies_capability_invariant());
    }

    #[test]
    fn stray_values_are_dropped() {
        let mut device = Device::new("L1", "Lamp");
        device.color = Some(Rgb::WHITE);
        device.settle();
        assert_eq!(device.color, None);
    }

    #[test]
    fn capability_names_are_snake_case() {
        assert_eq!(Capability::ColorTemperature.to_string(), "color_temperature");
        assert_eq!(
            serde_json::to_value(Capability::ColorTemperature).unwrap(),
            serde_json::json!("color_temperature")
        );
    }
}
