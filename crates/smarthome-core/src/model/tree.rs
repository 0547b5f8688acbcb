// ── Canonical tree ──
//
// `{config, groups, devices}` for one plugin instance. Normalizers fill a
// fresh tree and call `finalize` against the previous snapshot; partial
// events patch a clone of the current tree in place.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::device::{ConfigEntry, Device, Group};

/// Implicit group containing every non-scene device. Never stored.
pub const ALL_GROUP: &str = "_all_";

/// Id prefix of scene pseudo-devices.
pub const SCENE_PREFIX: &str = "scene:";

pub fn scene_id(name: &str) -> String {
    format!("{SCENE_PREFIX}{name}")
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CanonicalTree {
    pub config: BTreeMap<String, ConfigEntry>,
    pub groups: BTreeMap<String, Group>,
    pub devices: BTreeMap<String, Device>,
}

impl CanonicalTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty() && self.groups.is_empty()
    }

    pub fn insert_group(&mut self, group: Group) {
        self.groups.insert(group.id.clone(), group);
    }

    pub fn insert_device(&mut self, device: Device) {
        self.devices.insert(device.id.clone(), device);
    }

    pub fn device(&self, id: &str) -> Option<&Device> {
        self.devices.get(id)
    }

    pub fn device_mut(&mut self, id: &str) -> Option<&mut Device> {
        self.devices.get_mut(id)
    }

    /// Add a scene or effect, merging with an existing entry of the same
    /// name: the `associated` lists are unioned.
    pub fn add_scene<I, S>(&mut self, name: &str, associated: I) -> &mut Device
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = scene_id(name);
        let scene = self
            .devices
            .entry(id.clone())
            .or_insert_with(|| Device::scene(id, name));
        for target in associated {
            scene.add_associated(target);
        }
        scene
    }

    pub fn scenes(&self) -> impl Iterator<Item = &Device> {
        self.devices.values().filter(|d| d.is_scene())
    }

    /// Device ids belonging to `group`, resolving [`ALL_GROUP`].
    pub fn members(&self, group: &str) -> Option<Vec<String>> {
        if group == ALL_GROUP {
            return Some(
                self.devices
                    .values()
                    .filter(|d| !d.is_scene())
                    .map(|d| d.id.clone())
                    .collect(),
            );
        }
        self.groups.get(group).map(|g| g.devices.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        id == ALL_GROUP || self.devices.contains_key(id) || self.groups.contains_key(id)
    }

    /// Settle the tree after a full normalization pass.
    ///
    /// Drops dangling group references, carries last known values over
    /// from `previous` for capabilities that are present but unreadable,
    /// defaults values never seen, and rebuilds group membership and
    /// capability unions.
    pub fn finalize(&mut self, previous: Option<&CanonicalTree>) {
        let group_ids: BTreeSet<String> = self.groups.keys().cloned().collect();

        for device in self.devices.values_mut() {
            let id = device.id.clone();
            device.groups.retain(|g| {
                let known = g == ALL_GROUP || group_ids.contains(g);
                if !known {
                    warn!(device = %id, group = %g, "dropping unknown group reference");
                }
                known
            });
            device.groups.retain(|g| g != ALL_GROUP);

            if let Some(before) = previous.and_then(|p| p.devices.get(&device.id)) {
                device.carry_over(before);
            }
            device.settle();
        }

        self.rebuild_groups();
    }

    /// Recompute `group.devices` and `group.capabilities` from devices.
    pub fn rebuild_groups(&mut self) {
        for group in self.groups.values_mut() {
            group.devices.clear();
            group.capabilities.clear();
        }
        for device in self.devices.values().filter(|d| !d.is_scene()) {
            for group_id in &device.groups {
                if let Some(group) = self.groups.get_mut(group_id) {
                    group.devices.push(device.id.clone());
                    group.capabilities.extend(device.capabilities.iter().copied());
                }
            }
        }
    }

    /// Human-readable invariant violations; empty when the tree is sound.
    pub fn violations(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.groups.contains_key(ALL_GROUP) {
            out.push(format!("{ALL_GROUP} must not be stored"));
        }
        for device in self.devices.values() {
            for group in &device.groups {
                if !self.groups.contains_key(group) {
                    out.push(format!("device {} references missing group {group}", device.id));
                }
            }
            if !device.satisfies_capability_invariant() {
                out.push(format!("device {} breaks the capability invariant", device.id));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::color::Rgb;
    use crate::model::Capability;

    fn lamp(id: &str, group: &str) -> Device {
        let mut device = Device::new(id, id);
        device.set_switch(true);
        device.add_group(group);
        device
    }

    #[test]
    fn finalize_rebuilds_groups_and_drops_dangling_refs() {
        let mut tree = CanonicalTree::new();
        tree.insert_group(Group::new("room", "Room"));
        let mut device = lamp("a", "room");
        device.add_group("ghost");
        tree.insert_device(device);
        let mut dimmer = lamp("b", "room");
        dimmer.set_brightness(0.3);
        tree.insert_device(dimmer);

        tree.finalize(None);

        assert!(tree.violations().is_empty());
        assert_eq!(tree.devices["a"].groups, vec!["room".to_owned()]);
        let room = &tree.groups["room"];
        assert_eq!(room.devices, vec!["a".to_owned(), "b".to_owned()]);
        assert!(room.capabilities.contains(&Capability::Brightness));
    }

    #[test]
    fn unreadable_values_keep_last_known() {
        let mut first = CanonicalTree::new();
        let mut device = Device::new("a", "A");
        device.set_color(Rgb::new(10, 20, 30));
        first.insert_device(device);
        first.finalize(None);

        let mut second = CanonicalTree::new();
        let mut device = Device::new("a", "A");
        device.mark(Capability::Color);
        second.insert_device(device);
        second.finalize(Some(&first));

        assert_eq!(second.devices["a"].color, Some(Rgb::new(10, 20, 30)));
    }

    #[test]
    fn scenes_with_the_same_name_merge() {
        let mut tree = CanonicalTree::new();
        tree.add_scene("Relax", ["g1", "g2"]);
        tree.add_scene("Relax", ["g2", "g3"]);
        let scenes: Vec<_> = tree.scenes().collect();
        assert_eq!(scenes.len(), 1);
        assert_eq!(scenes[0].associated, vec!["g1", "g2", "g3"]);
        assert_eq!(scenes[0].id, "scene:Relax");
    }

    #[test]
    fn all_group_lists_every_device_but_scenes() {
        let mut tree = CanonicalTree::new();
        tree.insert_device(lamp("a", "x"));
        tree.add_scene("Relax", ["a"]);
        assert_eq!(tree.members(ALL_GROUP), Some(vec!["a".to_owned()]));
        assert!(tree.contains(ALL_GROUP));
    }
}
