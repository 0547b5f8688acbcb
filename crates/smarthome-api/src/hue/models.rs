// Hue bridge CLIP v2 resource types.
//
// `GET /clip/v2/resource` returns every resource in one flat `data` array
// tagged by `type`. Items are decoded one by one so a single malformed
// resource is skipped instead of failing the whole fetch.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

// ── Shared fragments ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResourceRef {
    pub rid: String,
    pub rtype: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub archetype: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct OnState {
    pub on: bool,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Dimming {
    /// Percent, 0-100.
    pub brightness: f64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct XyPoint {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColorState {
    pub xy: XyPoint,
    #[serde(default)]
    pub gamut_type: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct MirekSchema {
    pub mirek_minimum: u32,
    pub mirek_maximum: u32,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ColorTemperature {
    #[serde(default)]
    pub mirek: Option<u32>,
    #[serde(default)]
    pub mirek_valid: bool,
    #[serde(default)]
    pub mirek_schema: Option<MirekSchema>,
}

// ── Resources ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct HueLight {
    pub id: String,
    #[serde(default)]
    pub owner: Option<ResourceRef>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub on: Option<OnState>,
    #[serde(default)]
    pub dimming: Option<Dimming>,
    #[serde(default)]
    pub color: Option<ColorState>,
    #[serde(default)]
    pub color_temperature: Option<ColorTemperature>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HueGroupedLight {
    pub id: String,
    #[serde(default)]
    pub owner: Option<ResourceRef>,
    #[serde(default)]
    pub on: Option<OnState>,
    #[serde(default)]
    pub dimming: Option<Dimming>,
}

/// A room or a zone. Rooms list devices as children, zones list lights.
#[derive(Debug, Clone, Deserialize)]
pub struct HueGroup {
    pub id: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub children: Vec<ResourceRef>,
    #[serde(default)]
    pub services: Vec<ResourceRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HueDevice {
    pub id: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub services: Vec<ResourceRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HueScene {
    pub id: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub group: ResourceRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HueEntertainmentConfiguration {
    pub id: String,
    #[serde(default)]
    pub metadata: Metadata,
    /// `active` or `inactive`.
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub configuration_type: Option<String>,
}

impl HueEntertainmentConfiguration {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

/// Credentials returned by `createUser`.
#[derive(Debug, Clone, Deserialize)]
pub struct HueCredentials {
    pub username: String,
    #[serde(default)]
    pub clientkey: Option<String>,
}

// ── Partitioned snapshot ─────────────────────────────────────────────

/// All resources of interest, partitioned by `type`.
#[derive(Debug, Clone, Default)]
pub struct HueResources {
    pub lights: Vec<HueLight>,
    pub grouped_lights: Vec<HueGroupedLight>,
    pub rooms: Vec<HueGroup>,
    pub zones: Vec<HueGroup>,
    pub devices: Vec<HueDevice>,
    pub scenes: Vec<HueScene>,
    pub entertainment: Vec<HueEntertainmentConfiguration>,
}

impl HueResources {
    /// Partition the `data` array of a `/clip/v2/resource` reply.
    pub fn from_data(data: &[Value]) -> Self {
        let mut out = Self::default();
        for item in data {
            let Some(rtype) = item.get("type").and_then(Value::as_str) else {
                tracing::warn!("Hue resource without type, skipping");
                continue;
            };
            match rtype {
                "light" => push_decoded(&mut out.lights, item),
                "grouped_light" => push_decoded(&mut out.grouped_lights, item),
                "room" => push_decoded(&mut out.rooms, item),
                "zone" => push_decoded(&mut out.zones, item),
                "device" => push_decoded(&mut out.devices, item),
                "scene" => push_decoded(&mut out.scenes, item),
                "entertainment_configuration" => push_decoded(&mut out.entertainment, item),
                _ => {}
            }
        }
        out
    }

    /// Parse a full `{"errors": [...], "data": [...]}` reply.
    pub fn from_reply(reply: &Value) -> Self {
        let data = reply
            .get("data")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        Self::from_data(data)
    }
}

fn push_decoded<T: DeserializeOwned>(into: &mut Vec<T>, item: &Value) {
    match T::deserialize(item) {
        Ok(value) => into.push(value),
        Err(e) => tracing::warn!(error = %e, "skipping malformed Hue resource"),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn partitions_by_type_and_skips_bad_items() {
        let reply = json!({
            "errors": [],
            "data": [
                {"type": "light", "id": "L1", "metadata": {"name": "Desk"},
                 "on": {"on": true}, "dimming": {"brightness": 80.0}},
                {"type": "light", "metadata": {"name": "no id"}},
                {"type": "room", "id": "R1", "metadata": {"name": "Office"},
                 "children": [{"rid": "D1", "rtype": "device"}]},
                {"type": "scene", "id": "S1", "metadata": {"name": "Relax"},
                 "group": {"rid": "R1", "rtype": "room"}},
                {"type": "bridge", "id": "B"}
            ]
        });

        let resources = HueResources::from_reply(&reply);
        assert_eq!(resources.lights.len(), 1);
        assert_eq!(resources.lights[0].metadata.name, "Desk");
        assert_eq!(resources.rooms[0].children[0].rid, "D1");
        assert_eq!(resources.scenes[0].group.rtype, "room");
    }
}
