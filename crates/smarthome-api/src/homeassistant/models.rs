// Home Assistant REST payloads.

use serde::Deserialize;
use serde_json::Value;

/// Entity domains this layer controls.
pub const SUPPORTED_DOMAINS: &[&str] = &[
    "light",
    "switch",
    "cover",
    "scene",
    "script",
    "input_boolean",
    "fan",
];

/// One row of `GET /api/states`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HaState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Value,
}

impl HaState {
    pub fn domain(&self) -> &str {
        self.entity_id
            .split_once('.')
            .map_or(self.entity_id.as_str(), |(domain, _)| domain)
    }

    pub fn is_supported(&self) -> bool {
        SUPPORTED_DOMAINS.contains(&self.domain())
    }

    pub fn friendly_name(&self) -> &str {
        self.attributes
            .get("friendly_name")
            .and_then(Value::as_str)
            .unwrap_or(&self.entity_id)
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self.state.as_str(), "unavailable" | "unknown")
    }
}

/// One area from the areas template.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HaArea {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub entities: Vec<String>,
}

/// Decode each row separately so one broken entity is skipped.
pub fn decode_states(value: &Value) -> Vec<HaState> {
    value
        .as_array()
        .map(|rows| {
            rows.iter()
                .filter_map(|row| {
                    HaState::deserialize(row)
                        .inspect_err(|e| tracing::warn!(error = %e, "skipping malformed state row"))
                        .ok()
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn domain_and_name() {
        let state = HaState {
            entity_id: "light.kitchen".into(),
            state: "on".into(),
            attributes: json!({"friendly_name": "Kitchen"}),
        };
        assert_eq!(state.domain(), "light");
        assert!(state.is_supported());
        assert_eq!(state.friendly_name(), "Kitchen");
    }

    #[test]
    fn broken_rows_are_skipped() {
        let states = decode_states(&json!([
            {"entity_id": "switch.fan", "state": "off"},
            {"state": "on"}
        ]));
        assert_eq!(states.len(), 1);
    }
}
