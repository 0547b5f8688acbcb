// Home Assistant: entity states plus areas to the canonical tree.
//
// Entities are devices keyed by `entity_id`, areas are groups. Scenes and
// scripts become scene entries associated with the areas they sit in.

use std::collections::BTreeMap;

use serde_json::Value;
use smarthome_api::homeassistant::{HaArea, HaState};

use super::{EventOutcome, from_percent};
use crate::color::{Rgb, kelvin_to_rgb};
use crate::model::{ALL_GROUP, Capability, CanonicalTree, ColorMode, ConfigEntry, Device, Group};
use crate::reconcile::BRIDGE_UNIT;

const BRIGHTNESS_MODES: &[&str] = &["brightness", "color_temp", "hs", "xy", "rgb", "rgbw", "rgbww", "white"];
const COLOR_MODES: &[&str] = &["hs", "xy", "rgb", "rgbw", "rgbww"];

/// Working data: both facets, updated in place by `state_changed` events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HaRecord {
    pub states: Option<BTreeMap<String, HaState>>,
    pub areas: Option<Vec<HaArea>>,
}

impl HaRecord {
    pub fn set_states(&mut self, states: Vec<HaState>) {
        self.states = Some(
            states
                .into_iter()
                .filter(HaState::is_supported)
                .map(|s| (s.entity_id.clone(), s))
                .collect(),
        );
    }

    /// Apply one `{entity_id, old_state, new_state}` event.
    ///
    /// Entities appearing or disappearing need their area membership, so
    /// they ask for a re-fetch.
    pub fn apply_event(&mut self, event: &Value) -> EventOutcome {
        let Some(entity_id) = event.get("entity_id").and_then(Value::as_str) else {
            tracing::warn!("state_changed event without entity_id");
            return EventOutcome::Ignored;
        };
        let states = self.states.get_or_insert_with(BTreeMap::new);

        match event.get("new_state") {
            None | Some(Value::Null) => {
                if states.remove(entity_id).is_some() {
                    EventOutcome::NeedsRefresh
                } else {
                    EventOutcome::Ignored
                }
            }
            Some(new_state) => {
                let state = match serde_json::from_value::<HaState>(new_state.clone()) {
                    Ok(state) => state,
                    Err(e) => {
                        tracing::warn!(entity = %entity_id, error = %e, "malformed new_state");
                        return EventOutcome::Ignored;
                    }
                };
                if !state.is_supported() {
                    return EventOutcome::Ignored;
                }
                match states.insert(entity_id.to_owned(), state) {
                    Some(_) => EventOutcome::Patched,
                    None => EventOutcome::NeedsRefresh,
                }
            }
        }
    }
}

/// Scene id to the script/scene entity ids sharing its name.
pub type HaIndex = BTreeMap<String, Vec<String>>;

pub fn build(record: &HaRecord, previous: Option<&CanonicalTree>) -> (CanonicalTree, HaIndex) {
    let mut tree = CanonicalTree::new();
    let mut index = HaIndex::new();

    tree.config.insert(
        BRIDGE_UNIT.to_owned(),
        ConfigEntry {
            name: "Home Assistant".into(),
            connected: true,
            ..ConfigEntry::default()
        },
    );

    let mut areas_of: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for area in record.areas.iter().flatten() {
        tree.insert_group(Group::new(&area.id, &area.name));
        for entity in &area.entities {
            areas_of.entry(entity.as_str()).or_default().push(area.id.as_str());
        }
    }

    for state in record.states.iter().flat_map(BTreeMap::values) {
        let areas = areas_of.get(state.entity_id.as_str()).cloned().unwrap_or_default();
        match state.domain() {
            "scene" | "script" => {
                let targets = if areas.is_empty() { vec![ALL_GROUP] } else { areas };
                let scene = tree.add_scene(state.friendly_name(), targets);
                index
                    .entry(scene.id.clone())
                    .or_default()
                    .push(state.entity_id.clone());
            }
            domain => {
                let Some(mut device) = entity_device(domain, state) else {
                    continue;
                };
                for area in areas {
                    device.add_group(area);
                }
                tree.insert_device(device);
            }
        }
    }

    tree.finalize(previous);
    (tree, index)
}

fn entity_device(domain: &str, state: &HaState) -> Option<Device> {
    let mut device = Device::new(&state.entity_id, state.friendly_name());
    device.icon = state
        .attributes
        .get("icon")
        .and_then(Value::as_str)
        .map(str::to_owned);
    let readable = !state.is_unavailable();
    let attrs = &state.attributes;

    match domain {
        "light" => {
            device.mark(Capability::Switch);
            let modes: Vec<&str> = attrs
                .get("supported_color_modes")
                .and_then(Value::as_array)
                .map(|m| m.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            if modes.iter().any(|m| BRIGHTNESS_MODES.contains(m)) {
                device.mark(Capability::Brightness);
            }
            if modes.iter().any(|m| COLOR_MODES.contains(m)) {
                device.mark(Capability::Color);
            }
            if modes.contains(&"color_temp") {
                device.mark(Capability::ColorTemperature);
                device.ct_min = attrs.get("min_color_temp_kelvin").and_then(Value::as_u64).map(|k| k as u32);
                device.ct_max = attrs.get("max_color_temp_kelvin").and_then(Value::as_u64).map(|k| k as u32);
            }
            if readable {
                fill_light(&mut device, state);
            }
        }
        "switch" | "input_boolean" | "fan" => {
            device.mark(Capability::Switch);
            if readable {
                device.switch = Some(state.state == "on");
            }
        }
        "cover" => {
            device.mark(Capability::Up);
            device.mark(Capability::Down);
            if let Some(position) = attrs.get("current_position") {
                device.mark(Capability::Position);
                if let Some(position) = position.as_f64() {
                    device.position = Some(from_percent(position));
                }
            }
        }
        _ => return None,
    }
    Some(device)
}

fn fill_light(device: &mut Device, state: &HaState) {
    let attrs = &state.attributes;
    device.switch = Some(state.state == "on");

    // Attributes are null while the light is off; last values carry over.
    if device.has(Capability::Brightness) {
        if let Some(b) = attrs.get("brightness").and_then(Value::as_f64) {
            device.brightness = Some((b / 255.0).clamp(0.0, 1.0));
        }
    }
    if device.has(Capability::Color) {
        if let Some(rgb) = attrs.get("rgb_color").and_then(parse_rgb) {
            device.color = Some(rgb);
        }
    }
    if device.has(Capability::ColorTemperature) {
        if let Some(kelvin) = attrs.get("color_temp_kelvin").and_then(Value::as_u64) {
            device.color_temperature = Some(kelvin_to_rgb(kelvin as u32));
        }
    }
    device.color_mode = match attrs.get("color_mode").and_then(Value::as_str) {
        Some("color_temp") => Some(ColorMode::Temperature),
        Some(mode) if COLOR_MODES.contains(&mode) => Some(ColorMode::Color),
        _ => None,
    };
}

fn parse_rgb(value: &Value) -> Option<Rgb> {
    let channels = value.as_array()?;
    let mut out = [0u8; 3];
    for (slot, channel) in out.iter_mut().zip(channels) {
        *slot = channel.as_u64()?.min(255) as u8;
    }
    (channels.len() == 3).then(|| Rgb::new(out[0], out[1], out[2]))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn state(entity_id: &str, state: &str, attributes: Value) -> HaState {
        HaState {
            entity_id: entity_id.into(),
            state: state.into(),
            attributes,
        }
    }

    fn record() -> HaRecord {
        let mut record = HaRecord::default();
        record.set_states(vec![
            state(
                "light.kitchen",
                "on",
                json!({"friendly_name": "Kitchen", "supported_color_modes": ["color_temp", "hs"],
                       "brightness": 255, "rgb_color": [255, 0, 0], "color_mode": "hs",
                       "color_temp_kelvin": null, "min_color_temp_kelvin": 2000, "max_color_temp_kelvin": 6500}),
            ),
            state("switch.kettle", "off", json!({"friendly_name": "Kettle"})),
            state("cover.blind", "open", json!({"friendly_name": "Blind", "current_position": 60})),
            state("scene.movie", "scening", json!({"friendly_name": "Movie"})),
            state("script.movie", "off", json!({"friendly_name": "Movie"})),
            state("sensor.temp", "21", json!({})),
        ]);
        record.areas = Some(vec![HaArea {
            id: "kitchen".into(),
            name: "Kitchen".into(),
            entities: vec!["light.kitchen".into(), "switch.kettle".into(), "scene.movie".into()],
        }]);
        record
    }

    #[test]
    fn maps_domains_and_areas() {
        let (tree, index) = build(&record(), None);
        assert!(tree.violations().is_empty());
        assert!(!tree.devices.contains_key("sensor.temp"));

        let light = &tree.devices["light.kitchen"];
        assert_eq!(light.brightness, Some(1.0));
        assert_eq!(light.color, Some(Rgb::new(255, 0, 0)));
        assert!(light.has(Capability::ColorTemperature));
        assert_eq!(light.ct_max, Some(6500));
        assert_eq!(light.color_mode, Some(ColorMode::Color));

        assert_eq!(tree.devices["cover.blind"].position, Some(0.6));
        assert_eq!(
            tree.groups["kitchen"].devices,
            vec!["light.kitchen".to_owned(), "switch.kettle".to_owned()]
        );

        let movie = &tree.devices["scene:Movie"];
        assert_eq!(movie.associated, vec!["kitchen".to_owned(), ALL_GROUP.to_owned()]);
        assert_eq!(
            index["scene:Movie"],
            vec!["scene.movie".to_owned(), "script.movie".to_owned()]
        );
    }

    #[test]
    fn events_patch_add_and_remove() {
        let mut rec = record();
        let changed = rec.apply_event(&json!({
            "entity_id": "switch.kettle",
            "new_state": {"entity_id": "switch.kettle", "state": "on", "attributes": {}}
        }));
        assert_eq!(changed, EventOutcome::Patched);
        assert_eq!(rec.states.as_ref().unwrap()["switch.kettle"].state, "on");

        let added = rec.apply_event(&json!({
            "entity_id": "fan.desk",
            "new_state": {"entity_id": "fan.desk", "state": "on", "attributes": {}}
        }));
        assert_eq!(added, EventOutcome::NeedsRefresh);

        let removed = rec.apply_event(&json!({"entity_id": "fan.desk", "new_state": null}));
        assert_eq!(removed, EventOutcome::NeedsRefresh);

        let unsupported = rec.apply_event(&json!({
            "entity_id": "sensor.temp",
            "new_state": {"entity_id": "sensor.temp", "state": "22"}
        }));
        assert_eq!(unsupported, EventOutcome::Ignored);
    }

    #[test]
    fn unavailable_light_keeps_previous_values() {
        let (before, _) = build(&record(), None);
        let mut rec = record();
        rec.apply_event(&json!({
            "entity_id": "light.kitchen",
            "new_state": {"entity_id": "light.kitchen", "state": "unavailable",
                          "attributes": {"supported_color_modes": ["color_temp", "hs"]}}
        }));
        let (after, _) = build(&rec, Some(&before));
        assert_eq!(after.devices["light.kitchen"].switch, Some(true));
        assert_eq!(after.devices["light.kitchen"].color, Some(Rgb::new(255, 0, 0)));
    }
}
