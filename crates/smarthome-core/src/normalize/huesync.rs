// Hue sync box: one switchable, dimmable device plus a scene per sync
// mode and per HDMI input.

use std::collections::BTreeMap;

use smarthome_api::huesync::{MAX_BRIGHTNESS, SyncBoxState, SyncMode};
use strum::IntoEnumIterator;

use crate::model::{CanonicalTree, ConfigEntry, Device, Section};
use crate::reconcile::BRIDGE_UNIT;

/// Canonical id of the sync box device.
pub const SYNC_DEVICE: &str = "syncbox";

/// What a sync-box scene triggers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncScene {
    Mode(SyncMode),
    /// HDMI input key, e.g. `input2`.
    Input(String),
}

/// Scene id to sync-box command.
pub type SyncIndex = BTreeMap<String, SyncScene>;

fn mode_label(mode: SyncMode) -> &'static str {
    match mode {
        SyncMode::Video => "Video",
        SyncMode::Music => "Music",
        SyncMode::Game => "Game",
        SyncMode::Passthrough => "Passthrough",
        SyncMode::Powersave => "Power save",
    }
}

pub fn build(state: &SyncBoxState, previous: Option<&CanonicalTree>) -> (CanonicalTree, SyncIndex) {
    let mut tree = CanonicalTree::new();
    let mut index = SyncIndex::new();

    let name = if state.device.name.is_empty() {
        "Sync box"
    } else {
        &state.device.name
    };
    tree.config.insert(
        BRIDGE_UNIT.to_owned(),
        ConfigEntry {
            name: name.to_owned(),
            model: Some(state.device.device_type.clone()).filter(|m| !m.is_empty()),
            firmware: state.device.firmware_version.clone(),
            connected: true,
        },
    );

    let mut device = Device::new(SYNC_DEVICE, name).with_section(Section::Common);
    device.set_switch(state.execution.sync_active);
    device.set_brightness(f64::from(state.execution.brightness) / f64::from(MAX_BRIGHTNESS));
    tree.insert_device(device);

    for mode in SyncMode::iter() {
        let scene = tree.add_scene(mode_label(mode), [SYNC_DEVICE]);
        index.insert(scene.id.clone(), SyncScene::Mode(mode));
    }
    for input in &state.inputs {
        let label = if input.name.is_empty() {
            format!("HDMI {}", input.key)
        } else {
            format!("HDMI {}", input.name)
        };
        let scene = tree.add_scene(&label, [SYNC_DEVICE]);
        index.insert(scene.id.clone(), SyncScene::Input(input.key.clone()));
    }

    tree.finalize(previous);
    (tree, index)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::model::scene_id;

    #[test]
    fn sync_box_becomes_device_and_scenes() {
        let state = SyncBoxState::from_value(&json!({
            "device": {"name": "Living TV", "deviceType": "HSB1", "firmwareVersion": "1.12"},
            "execution": {"mode": "video", "syncActive": true, "brightness": 100},
            "hdmi": {
                "input1": {"name": "Console", "status": "linked"},
                "input2": {"name": "", "status": "unplugged"}
            }
        }))
        .unwrap();

        let (tree, index) = build(&state, None);
        assert!(tree.violations().is_empty());

        let device = &tree.devices[SYNC_DEVICE];
        assert_eq!(device.section, Section::Common);
        assert_eq!(device.switch, Some(true));
        assert_eq!(device.brightness, Some(0.5));

        assert_eq!(index[&scene_id("Music")], SyncScene::Mode(SyncMode::Music));
        assert_eq!(
            index[&scene_id("HDMI Console")],
            SyncScene::Input("input1".into())
        );
        assert_eq!(
            index[&scene_id("HDMI input2")],
            SyncScene::Input("input2".into())
        );
        assert_eq!(tree.scenes().count(), 7);
        assert_eq!(tree.config[BRIDGE_UNIT].model.as_deref(), Some("HSB1"));
    }
}
