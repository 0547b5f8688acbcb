// Hue bridge: CLIP v2 resources to the canonical tree.
//
// Lights become devices, rooms and zones become groups, scenes are merged
// by name with the rooms/zones they belong to as `associated`.

use std::collections::BTreeMap;

use serde_json::Value;
use smarthome_api::hue::HueResources;
use smarthome_api::hue::models::{ColorTemperature, HueGroup, HueLight};

use super::{EventOutcome, from_percent};
use crate::color::{kelvin_to_rgb, mirek_to_kelvin, xy_bri_to_color};
use crate::model::{Capability, CanonicalTree, ColorMode, ConfigEntry, Device, Group};
use crate::reconcile::BRIDGE_UNIT;

/// Vendor ids the plugin needs to route canonical actions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HueIndex {
    /// Room/zone id to its `grouped_light` service.
    pub grouped_lights: BTreeMap<String, String>,
    /// Scene name to (room/zone id to vendor scene id).
    pub scenes: BTreeMap<String, BTreeMap<String, String>>,
}

impl HueIndex {
    pub fn scene_for(&self, name: &str, group: &str) -> Option<&str> {
        self.scenes.get(name)?.get(group).map(String::as_str)
    }
}

pub fn build(resources: &HueResources, previous: Option<&CanonicalTree>) -> (CanonicalTree, HueIndex) {
    let mut tree = CanonicalTree::new();
    let mut index = HueIndex::default();

    tree.config.insert(
        BRIDGE_UNIT.to_owned(),
        ConfigEntry {
            name: "Hue bridge".into(),
            connected: true,
            ..ConfigEntry::default()
        },
    );

    // Device id to the light services it exposes (rooms list devices).
    let device_lights: BTreeMap<&str, Vec<&str>> = resources
        .devices
        .iter()
        .map(|d| {
            let lights = d
                .services
                .iter()
                .filter(|s| s.rtype == "light")
                .map(|s| s.rid.as_str())
                .collect();
            (d.id.as_str(), lights)
        })
        .collect();
    let device_names: BTreeMap<&str, &str> = resources
        .devices
        .iter()
        .map(|d| (d.id.as_str(), d.metadata.name.as_str()))
        .collect();

    for light in &resources.lights {
        let owner_name = light
            .owner
            .as_ref()
            .and_then(|o| device_names.get(o.rid.as_str()))
            .copied();
        tree.insert_device(light_device(light, owner_name));
    }

    for group in resources.rooms.iter().chain(&resources.zones) {
        tree.insert_group(
            Group::new(&group.id, &group.metadata.name).with_icon(group.metadata.archetype.clone()),
        );
        if let Some(grouped) = group.services.iter().find(|s| s.rtype == "grouped_light") {
            index
                .grouped_lights
                .insert(group.id.clone(), grouped.rid.clone());
        }
        for light_id in member_lights(group, &device_lights) {
            if let Some(device) = tree.device_mut(light_id) {
                device.add_group(&group.id);
            }
        }
    }

    for scene in &resources.scenes {
        let name = scene.metadata.name.as_str();
        if name.is_empty() {
            continue;
        }
        tree.add_scene(name, [scene.group.rid.as_str()]);
        index
            .scenes
            .entry(name.to_owned())
            .or_default()
            .insert(scene.group.rid.clone(), scene.id.clone());
    }

    tree.finalize(previous);
    (tree, index)
}

fn member_lights<'a>(group: &'a HueGroup, device_lights: &BTreeMap<&str, Vec<&'a str>>) -> Vec<&'a str> {
    let mut out = Vec::new();
    for child in &group.children {
        match child.rtype.as_str() {
            "light" => out.push(child.rid.as_str()),
            "device" => {
                if let Some(lights) = device_lights.get(child.rid.as_str()) {
                    out.extend(lights.iter().copied());
                }
            }
            _ => {}
        }
    }
    out
}

fn light_device(light: &HueLight, owner_name: Option<&str>) -> Device {
    let name = if light.metadata.name.is_empty() {
        owner_name.unwrap_or(&light.id)
    } else {
        &light.metadata.name
    };
    let mut device = Device::new(&light.id, name);
    device.icon.clone_from(&light.metadata.archetype);

    if let Some(on) = light.on {
        device.set_switch(on.on);
    }
    if let Some(dimming) = light.dimming {
        device.set_brightness(from_percent(dimming.brightness));
    }
    if let Some(color) = &light.color {
        device.set_color(xy_bri_to_color(color.xy.x, color.xy.y, 1.0));
    }
    if let Some(ct) = &light.color_temperature {
        apply_color_temperature(&mut device, ct);
        if let Some(schema) = ct.mirek_schema {
            device.ct_min = Some(mirek_to_kelvin(schema.mirek_maximum));
            device.ct_max = Some(mirek_to_kelvin(schema.mirek_minimum));
        }
    }

    device.color_mode = match (&light.color, &light.color_temperature) {
        (_, Some(ct)) if ct.mirek_valid && ct.mirek.is_some() => Some(ColorMode::Temperature),
        (Some(_), _) => Some(ColorMode::Color),
        _ => None,
    };
    device
}

fn apply_color_temperature(device: &mut Device, ct: &ColorTemperature) {
    match ct.mirek {
        Some(mirek) if ct.mirek_valid => {
            device.set_color_temperature(kelvin_to_rgb(mirek_to_kelvin(mirek)));
        }
        // Light is in color mode; white point is unreadable right now.
        _ => device.mark(Capability::ColorTemperature),
    }
}

/// Merge one event-stream update item into `tree`.
pub fn apply_event(tree: &mut CanonicalTree, item: &Value) -> EventOutcome {
    if item.get("type").and_then(Value::as_str) != Some("light") {
        return EventOutcome::Ignored;
    }
    let Some(id) = item.get("id").and_then(Value::as_str) else {
        tracing::warn!("Hue light update without id");
        return EventOutcome::Ignored;
    };
    let Some(device) = tree.device_mut(id) else {
        return EventOutcome::NeedsRefresh;
    };

    let mut changed = false;
    if let Some(on) = item.pointer("/on/on").and_then(Value::as_bool) {
        device.set_switch(on);
        changed = true;
    }
    if let Some(brightness) = item.pointer("/dimming/brightness").and_then(Value::as_f64) {
        device.set_brightness(from_percent(brightness));
        changed = true;
    }
    if let (Some(x), Some(y)) = (
        item.pointer("/color/xy/x").and_then(Value::as_f64),
        item.pointer("/color/xy/y").and_then(Value::as_f64),
    ) {
        device.set_color(xy_bri_to_color(x, y, 1.0));
        device.color_mode = Some(ColorMode::Color);
        changed = true;
    }
    let mirek_valid = item
        .pointer("/color_temperature/mirek_valid")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    if let Some(mirek) = item.pointer("/color_temperature/mirek").and_then(Value::as_u64) {
        if mirek_valid {
            device.set_color_temperature(kelvin_to_rgb(mirek_to_kelvin(mirek as u32)));
            device.color_mode = Some(ColorMode::Temperature);
            changed = true;
        }
    }

    if changed {
        EventOutcome::Patched
    } else {
        EventOutcome::Ignored
    }
}
