// Nanoleaf: per-device working records to the canonical tree.
//
// Each panel set is fetched in four facets (info, state, effects list,
// current effect). Facets and streamed attribute events are merged into a
// `NanoleafRecord`; the tree is rebuilt from all records.

use std::collections::BTreeMap;

use serde_json::Value;
use smarthome_api::nanoleaf::models::{
    ATTR_BRIGHTNESS, ATTR_COLOR_MODE, ATTR_COLOR_TEMPERATURE, ATTR_HUE, ATTR_ON, ATTR_SATURATION,
    EVENT_EFFECTS, EVENT_STATE, OnValue, RangedValue,
};
use smarthome_api::nanoleaf::{NanoleafInfo, NanoleafState};

use super::{EventOutcome, from_percent};
use crate::color::{hsv_to_rgb, kelvin_to_rgb};
use crate::model::{CanonicalTree, ColorMode, ConfigEntry, Device};

/// Effect-channel attribute carrying the selected effect name.
const ATTR_SELECTED_EFFECT: u8 = 1;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NanoleafRecord {
    pub info: Option<NanoleafInfo>,
    pub state: Option<NanoleafState>,
    pub effects: Option<Vec<String>>,
    pub current_effect: Option<String>,
}

impl NanoleafRecord {
    fn state_mut(&mut self) -> &mut NanoleafState {
        self.state.get_or_insert_with(|| NanoleafState {
            on: None,
            brightness: None,
            hue: None,
            sat: None,
            ct: None,
            color_mode: None,
        })
    }

    /// Apply one decoded `{"id": channel, "events": [...]}` message.
    pub fn apply_event(&mut self, message: &Value) -> EventOutcome {
        let channel = message.get("id").and_then(Value::as_u64);
        let Some(events) = message.get("events").and_then(Value::as_array) else {
            return EventOutcome::Ignored;
        };

        let mut changed = false;
        for event in events {
            let (Some(attr), Some(value)) = (
                event.get("attr").and_then(Value::as_u64),
                event.get("value"),
            ) else {
                tracing::warn!(?event, "malformed Nanoleaf attribute event");
                continue;
            };
            let attr = attr as u8;
            changed |= match channel.map(|c| c as u8) {
                Some(EVENT_STATE) => self.apply_state_attr(attr, value),
                Some(EVENT_EFFECTS) if attr == ATTR_SELECTED_EFFECT => match value.as_str() {
                    Some(name) => {
                        self.current_effect = Some(name.to_owned());
                        true
                    }
                    None => false,
                },
                _ => false,
            };
        }

        if changed {
            EventOutcome::Patched
        } else {
            EventOutcome::Ignored
        }
    }

    fn apply_state_attr(&mut self, attr: u8, value: &Value) -> bool {
        let state = self.state_mut();
        let ranged = |slot: &mut Option<RangedValue>, value: f64| {
            let (min, max) = slot.map_or((None, None), |r| (r.min, r.max));
            *slot = Some(RangedValue { value, min, max });
        };
        match attr {
            ATTR_ON => match value.as_bool() {
                Some(on) => state.on = Some(OnValue { value: on }),
                None => return false,
            },
            ATTR_BRIGHTNESS | ATTR_HUE | ATTR_SATURATION | ATTR_COLOR_TEMPERATURE => {
                let Some(number) = value.as_f64() else {
                    return false;
                };
                let slot = match attr {
                    ATTR_BRIGHTNESS => &mut state.brightness,
                    ATTR_HUE => &mut state.hue,
                    ATTR_SATURATION => &mut state.sat,
                    _ => &mut state.ct,
                };
                ranged(slot, number);
            }
            ATTR_COLOR_MODE => match value.as_str() {
                Some(mode) => state.color_mode = Some(mode.to_owned()),
                None => return false,
            },
            _ => return false,
        }
        true
    }
}

/// Rebuild the tree from every record that has at least info and state.
pub fn build(records: &BTreeMap<String, NanoleafRecord>, previous: Option<&CanonicalTree>) -> CanonicalTree {
    let mut tree = CanonicalTree::new();

    for (key, record) in records {
        let (Some(info), Some(state)) = (&record.info, &record.state) else {
            continue;
        };
        tree.config.insert(
            key.clone(),
            ConfigEntry {
                name: info.name.clone(),
                model: Some(info.model.clone()).filter(|m| !m.is_empty()),
                firmware: Some(info.firmware_version.clone()).filter(|f| !f.is_empty()),
                connected: true,
            },
        );
        let name = if info.name.is_empty() { key } else { &info.name };
        tree.insert_device(device_entry(key, name, state));

        for effect in record.effects.iter().flatten() {
            tree.add_scene(effect, [key.as_str()]);
        }
    }

    tree.finalize(previous);
    tree
}

fn device_entry(key: &str, name: &str, state: &NanoleafState) -> Device {
    let mut device = Device::new(key, name);
    if let Some(on) = state.on {
        device.set_switch(on.value);
    }
    if let Some(brightness) = state.brightness {
        device.set_brightness(from_percent(brightness.value));
    }
    if let (Some(hue), Some(sat)) = (state.hue, state.sat) {
        device.set_color(hsv_to_rgb(hue.value, sat.value, 100.0));
    }
    if let Some(ct) = state.ct {
        device.set_color_temperature(kelvin_to_rgb(ct.value.round() as u32));
        device.ct_min = ct.min.map(|v| v.round() as u32);
        device.ct_max = ct.max.map(|v| v.round() as u32);
    }
    device.color_mode = match state.color_mode.as_deref() {
        Some("hs") => Some(ColorMode::Color),
        Some("ct") => Some(ColorMode::Temperature),
        _ => None,
    };
    device
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::color::Rgb;

    fn record() -> NanoleafRecord {
        NanoleafRecord {
            info: Some(
                serde_json::from_value(json!({"name": "Shapes", "model": "NL42", "firmwareVersion": "9.2"}))
                    .unwrap(),
            ),
            state: Some(
                serde_json::from_value(json!({
                    "on": {"value": true},
                    "brightness": {"value": 80, "min": 0, "max": 100},
                    "hue": {"value": 240, "min": 0, "max": 360},
                    "sat": {"value": 100, "min": 0, "max": 100},
                    "ct": {"value": 4000, "min": 1200, "max": 6500},
                    "colorMode": "hs"
                }))
                .unwrap(),
            ),
            effects: Some(vec!["Northern Lights".into(), "Forest".into()]),
            current_effect: Some("Forest".into()),
        }
    }

    #[test]
    fn builds_device_and_effect_scenes() {
        let mut records = BTreeMap::new();
        records.insert("shapes".to_owned(), record());
        records.insert("pending".to_owned(), NanoleafRecord::default());

        let tree = build(&records, None);
        assert!(tree.violations().is_empty());
        assert!(!tree.devices.contains_key("pending"));

        let device = &tree.devices["shapes"];
        assert_eq!(device.brightness, Some(0.8));
        assert_eq!(device.color, Some(Rgb::new(0, 0, 255)));
        assert_eq!(device.ct_min, Some(1200));
        assert_eq!(device.color_mode, Some(ColorMode::Color));
        assert_eq!(
            tree.devices["scene:Forest"].associated,
            vec!["shapes".to_owned()]
        );
        assert_eq!(tree.config["shapes"].firmware.as_deref(), Some("9.2"));
    }

    #[test]
    fn state_events_patch_the_record() {
        let mut rec = record();
        let outcome = rec.apply_event(&json!({
            "id": 1,
            "events": [{"attr": 2, "value": 10}, {"attr": 1, "value": false}, {"attr": 99, "value": 0}]
        }));
        assert_eq!(outcome, EventOutcome::Patched);
        let state = rec.state.as_ref().unwrap();
        assert_eq!(state.brightness.unwrap().value, 10.0);
        assert_eq!(state.brightness.unwrap().max, Some(100.0));
        assert!(!state.on.unwrap().value);

        let outcome = rec.apply_event(&json!({"id": 3, "events": [{"attr": 1, "value": "Northern Lights"}]}));
        assert_eq!(outcome, EventOutcome::Patched);
        assert_eq!(rec.current_effect.as_deref(), Some("Northern Lights"));
    }

    #[test]
    fn events_before_state_are_buffered() {
        let mut rec = NanoleafRecord::default();
        rec.apply_event(&json!({"id": 1, "events": [{"attr": 1, "value": true}]}));
        assert_eq!(rec.state.as_ref().unwrap().on, Some(OnValue { value: true }));
        assert!(rec.info.is_none());
    }
}
