// ── Aggregate identifiers ──
//
// The universal aggregator re-keys every child id as `<plugin>::<id>`.
// Splitting happens at the first separator, so original ids may
// themselves contain `::`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

pub const SEPARATOR: &str = "::";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AggregateId {
    pub plugin: String,
    pub original: String,
}

impl AggregateId {
    pub fn new(plugin: impl Into<String>, original: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            original: original.into(),
        }
    }

    pub fn parse(id: &str) -> Result<Self, CoreError> {
        match id.split_once(SEPARATOR) {
            Some((plugin, original)) if !plugin.is_empty() && !original.is_empty() => {
                Ok(Self::new(plugin, original))
            }
            _ => Err(CoreError::InvalidId { id: id.to_owned() }),
        }
    }
}

impl fmt::Display for AggregateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.plugin, self.original)
    }
}

impl FromStr for AggregateId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_at_first_separator() {
        let id = AggregateId::parse("hue-1::light::abc").unwrap();
        assert_eq!(id.plugin, "hue-1");
        assert_eq!(id.original, "light::abc");
        assert_eq!(id.to_string(), "hue-1::light::abc");
    }

    #[test]
    fn rejects_unprefixed_ids() {
        assert!(matches!(AggregateId::parse("plain"), Err(CoreError::InvalidId { .. })));
        assert!(AggregateId::parse("::x").is_err());
        assert!(AggregateId::parse("x::").is_err());
    }
}
