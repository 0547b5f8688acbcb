// ── Response normalizers ──
//
// Vendor JSON to canonical trees, plus the in-place patchers applied to
// push events. Capabilities are listed only when the backing vendor field
// exists; fields that exist but cannot be read are marked without a value
// so finalization keeps the last known one.

pub mod dirigera;
pub mod homeassistant;
pub mod hue;
pub mod huesync;
pub mod nanoleaf;
pub mod shelly;

/// Result of applying one push event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Fields were updated in place.
    Patched,
    /// Nothing relevant changed.
    Ignored,
    /// The event refers to something the tree does not know; re-fetch.
    NeedsRefresh,
}

impl EventOutcome {
    pub fn changed(self) -> bool {
        self == Self::Patched
    }
}

/// 0-100 percent to 0.0-1.0.
pub(crate) fn from_percent(value: f64) -> f64 {
    (value / 100.0).clamp(0.0, 1.0)
}

/// 0.0-1.0 to a whole percent.
pub(crate) fn to_percent(value: f64) -> u8 {
    (value.clamp(0.0, 1.0) * 100.0).round() as u8
}
