// ── Canonical domain model ──
//
// Vendor-neutral devices, groups and scenes shared by every plugin and
// the universal aggregator.

mod device;
mod id;
mod tree;

pub use device::{Capability, ColorMode, ConfigEntry, Device, EntryType, Group, Section};
pub use id::{AggregateId, SEPARATOR};
pub use tree::{ALL_GROUP, CanonicalTree, SCENE_PREFIX, scene_id};

pub use crate::color::Rgb;
