// IKEA Dirigera: `/v1/home` to the canonical tree.
//
// Capabilities follow each device's `canReceive` list. Rooms become
// groups. Blinds report how far they are closed; positions are stored as
// how far they are open.

use std::collections::BTreeMap;

use serde_json::Value;
use smarthome_api::dirigera::DirigeraHome;
use smarthome_api::dirigera::models::{DirigeraAttributes, DirigeraDevice};

use super::{EventOutcome, from_percent};
use crate::color::{hsv_to_rgb, kelvin_to_rgb, rgb_to_hsv};
use crate::model::{ALL_GROUP, Capability, CanonicalTree, ColorMode, ConfigEntry, Device, Group};
use crate::reconcile::BRIDGE_UNIT;

pub const ATTR_ON: &str = "isOn";
pub const ATTR_LEVEL: &str = "lightLevel";
pub const ATTR_HUE: &str = "colorHue";
pub const ATTR_SATURATION: &str = "colorSaturation";
pub const ATTR_TEMPERATURE: &str = "colorTemperature";
pub const ATTR_BLINDS: &str = "blindsTargetLevel";

/// Scene name to the hub scene ids sharing it.
pub type DirigeraIndex = BTreeMap<String, Vec<String>>;

pub fn build(home: &DirigeraHome, previous: Option<&CanonicalTree>) -> (CanonicalTree, DirigeraIndex) {
    let mut tree = CanonicalTree::new();
    let mut index = DirigeraIndex::new();

    tree.config.insert(
        BRIDGE_UNIT.to_owned(),
        ConfigEntry {
            name: "Dirigera".into(),
            connected: true,
            ..ConfigEntry::default()
        },
    );

    for device in &home.devices {
        let Some(mut canonical) = device_entry(device) else {
            continue;
        };
        if let Some(room) = &device.room {
            if !tree.groups.contains_key(&room.id) {
                tree.insert_group(Group::new(&room.id, &room.name).with_icon(room.icon.clone()));
            }
            canonical.add_group(&room.id);
        }
        tree.insert_device(canonical);
    }

    for scene in &home.scenes {
        let name = scene.info.name.as_str();
        if name.is_empty() {
            continue;
        }
        let mut targets: Vec<&str> = scene
            .actions
            .iter()
            .filter_map(|a| a.device_id.as_deref())
            .filter(|id| tree.devices.contains_key(*id))
            .collect();
        if targets.is_empty() {
            targets.push(ALL_GROUP);
        }
        tree.add_scene(name, targets);
        index.entry(name.to_owned()).or_default().push(scene.id.clone());
    }

    tree.finalize(previous);
    (tree, index)
}

/// `None` for hub-internal devices with nothing controllable.
fn device_entry(device: &DirigeraDevice) -> Option<Device> {
    let name = if device.attributes.custom_name.is_empty() {
        &device.id
    } else {
        &device.attributes.custom_name
    };
    let mut canonical = Device::new(&device.id, name);
    canonical.icon = Some(device.device_type.clone()).filter(|t| !t.is_empty());

    let attrs = &device.attributes;
    if device.can_receive(ATTR_ON) {
        canonical.mark(Capability::Switch);
    }
    if device.can_receive(ATTR_LEVEL) {
        canonical.mark(Capability::Brightness);
    }
    if device.can_receive(ATTR_HUE) && device.can_receive(ATTR_SATURATION) {
        canonical.mark(Capability::Color);
    }
    if device.can_receive(ATTR_TEMPERATURE) {
        canonical.mark(Capability::ColorTemperature);
        canonical.ct_min = attrs.color_temperature_min;
        canonical.ct_max = attrs.color_temperature_max;
    }
    if device.can_receive(ATTR_BLINDS) {
        canonical.mark(Capability::Position);
        canonical.mark(Capability::Up);
        canonical.mark(Capability::Down);
    }
    if canonical.capabilities.is_empty() {
        return None;
    }

    // Unreachable devices keep their capabilities; values carry over.
    if device.is_reachable {
        fill_values(&mut canonical, attrs);
    }
    Some(canonical)
}

fn fill_values(canonical: &mut Device, attrs: &DirigeraAttributes) {
    if canonical.has(Capability::Switch) {
        if let Some(on) = attrs.is_on {
            canonical.switch = Some(on);
        }
    }
    if canonical.has(Capability::Brightness) {
        if let Some(level) = attrs.light_level {
            canonical.brightness = Some(from_percent(level));
        }
    }
    if canonical.has(Capability::Color) {
        if let (Some(hue), Some(sat)) = (attrs.color_hue, attrs.color_saturation) {
            canonical.color = Some(hsv_to_rgb(hue, sat * 100.0, 100.0));
        }
    }
    if canonical.has(Capability::ColorTemperature) {
        if let Some(kelvin) = attrs.color_temperature {
            canonical.color_temperature = Some(kelvin_to_rgb(kelvin));
        }
    }
    if canonical.has(Capability::Position) {
        if let Some(closed) = attrs.blinds_current_level {
            canonical.position = Some(1.0 - from_percent(closed));
        }
    }
    canonical.color_mode = match attrs.color_mode.as_deref() {
        Some("color") => Some(ColorMode::Color),
        Some("temperature") => Some(ColorMode::Temperature),
        _ => None,
    };
}

/// Merge a `deviceStateChanged` message into `tree`.
pub fn apply_event(tree: &mut CanonicalTree, message: &Value) -> EventOutcome {
    if message.get("type").and_then(Value::as_str) != Some("deviceStateChanged") {
        return EventOutcome::Ignored;
    }
    let Some(data) = message.get("data") else {
        return EventOutcome::Ignored;
    };
    let Some(id) = data.get("id").and_then(Value::as_str) else {
        tracing::warn!("Dirigera state change without device id");
        return EventOutcome::Ignored;
    };
    let Some(device) = tree.device_mut(id) else {
        return EventOutcome::Ignored;
    };
    let Some(attrs) = data.get("attributes") else {
        return EventOutcome::Ignored;
    };

    let mut changed = false;
    if let Some(on) = attrs.get(ATTR_ON).and_then(Value::as_bool) {
        if device.has(Capability::Switch) {
            device.switch = Some(on);
            changed = true;
        }
    }
    if let Some(level) = attrs.get(ATTR_LEVEL).and_then(Value::as_f64) {
        if device.has(Capability::Brightness) {
            device.brightness = Some(from_percent(level));
            changed = true;
        }
    }

    let hue = attrs.get(ATTR_HUE).and_then(Value::as_f64);
    let sat = attrs.get(ATTR_SATURATION).and_then(Value::as_f64);
    if device.has(Capability::Color) && (hue.is_some() || sat.is_some()) {
        let current = rgb_to_hsv(device.color.unwrap_or_default());
        let hue = hue.unwrap_or(current.h);
        let sat = sat.map_or(current.s, |s| s * 100.0);
        device.color = Some(hsv_to_rgb(hue, sat, 100.0));
        changed = true;
    }

    if let Some(kelvin) = attrs.get(ATTR_TEMPERATURE).and_then(Value::as_u64) {
        if device.has(Capability::ColorTemperature) {
            device.color_temperature = Some(kelvin_to_rgb(kelvin as u32));
            changed = true;
        }
    }
    if let Some(closed) = attrs.get("blindsCurrentLevel").and_then(Value::as_f64) {
        if device.has(Capability::Position) {
            device.position = Some(1.0 - from_percent(closed));
            changed = true;
        }
    }
    match attrs.get("colorMode").and_then(Value::as_str) {
        Some("color") => device.color_mode = Some(ColorMode::Color),
        Some("temperature") => device.color_mode = Some(ColorMode::Temperature),
        _ => {}
    }

    if changed {
        EventOutcome::Patched
    } else {
        EventOutcome::Ignored
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::color::Rgb;

    fn home() -> DirigeraHome {
        DirigeraHome::from_value(&json!({
            "devices": [
                {"id": "d1", "type": "light", "deviceType": "light",
                 "attributes": {"customName": "Lamp", "isOn": true, "lightLevel": 40,
                    "colorHue": 0.0, "colorSaturation": 1.0, "colorTemperature": 2700,
                    "colorTemperatureMin": 4000, "colorTemperatureMax": 2202, "colorMode": "color"},
                 "capabilities": {"canReceive": ["isOn", "lightLevel", "colorHue", "colorSaturation", "colorTemperature"]},
                 "room": {"id": "r1", "name": "Hall", "icon": "rooms_hallway"}},
                {"id": "b1", "type": "blinds", "deviceType": "blinds",
                 "attributes": {"customName": "Blind", "blindsCurrentLevel": 25},
                 "capabilities": {"canReceive": ["blindsTargetLevel"]},
                 "room": {"id": "r1", "name": "Hall"}},
                {"id": "hub", "type": "gateway", "attributes": {"customName": "Hub"},
                 "capabilities": {"canReceive": ["customName"]}},
                {"id": "d2", "type": "light", "isReachable": false,
                 "attributes": {"customName": "Porch", "isOn": true},
                 "capabilities": {"canReceive": ["isOn"]}}
            ],
            "scenes": [
                {"id": "s1", "info": {"name": "Evening"}, "actions": [{"deviceId": "d1"}]},
                {"id": "s2", "info": {"name": "Evening"}, "actions": [{"deviceId": "b1"}]},
                {"id": "s3", "info": {"name": "Away"}, "actions": []}
            ]
        }))
    }

    #[test]
    fn maps_capabilities_from_can_receive() {
        let (tree, index) = build(&home(), None);
        assert!(tree.violations().is_empty());
        assert!(!tree.devices.contains_key("hub"));

        let lamp = &tree.devices["d1"];
        assert_eq!(lamp.brightness, Some(0.4));
        assert_eq!(lamp.color, Some(Rgb::new(255, 0, 0)));
        assert_eq!(lamp.color_mode, Some(ColorMode::Color));
        assert!(!lamp.has(Capability::Position));

        let blind = &tree.devices["b1"];
        assert_eq!(blind.position, Some(0.75));
        assert!(blind.has(Capability::Up) && blind.has(Capability::Down));

        assert_eq!(tree.groups["r1"].devices, vec!["b1".to_owned(), "d1".to_owned()]);
        assert_eq!(
            tree.devices["scene:Evening"].associated,
            vec!["d1".to_owned(), "b1".to_owned()]
        );
        assert_eq!(tree.devices["scene:Away"].associated, vec![ALL_GROUP.to_owned()]);
        assert_eq!(index["Evening"], vec!["s1".to_owned(), "s2".to_owned()]);
    }

    #[test]
    fn unreachable_device_keeps_last_known_state() {
        let (first, _) = build(&home(), None);
        let mut previous = first;
        previous.device_mut("d2").unwrap().switch = Some(true);
        let (tree, _) = build(&home(), Some(&previous));
        assert_eq!(tree.devices["d2"].switch, Some(true));

        let (fresh, _) = build(&home(), None);
        assert_eq!(fresh.devices["d2"].switch, Some(false));
    }

    #[test]
    fn state_change_patches_attributes() {
        let (mut tree, _) = build(&home(), None);
        let outcome = apply_event(
            &mut tree,
            &json!({"type": "deviceStateChanged",
                    "data": {"id": "d1", "attributes": {"isOn": false, "colorHue": 120.0}}}),
        );
        assert_eq!(outcome, EventOutcome::Patched);
        let lamp = &tree.devices["d1"];
        assert_eq!(lamp.switch, Some(false));
        assert_eq!(lamp.color, Some(Rgb::new(0, 255, 0)));
        assert_eq!(lamp.brightness, Some(0.4));
        assert!(tree.devices["d1"].satisfies_capability_invariant());

        let ignored = apply_event(&mut tree, &json!({"type": "sceneUpdated", "data": {}}));
        assert_eq!(ignored, EventOutcome::Ignored);
    }
}
