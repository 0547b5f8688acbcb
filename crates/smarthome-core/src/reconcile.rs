// ── Event/state reconciler ──
//
// Per plugin instance: tracks which data facets each unit (the bridge, or
// one device of a multi-device plugin) has delivered, when the instance
// becomes ready, and whether its links are all down or only partly down.
// The reconciler only decides which signal to raise; plugins own the
// working data and the tree.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::bridge::Connectivity;

/// Unit name of single-bridge plugins.
pub const BRIDGE_UNIT: &str = "bridge";

/// One independently fetched piece of a vendor's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Facet {
    AllData,
    Status,
    Info,
    State,
    EffectsList,
    CurrentEffect,
    States,
    Areas,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Phase {
    Uninitialized,
    Ready,
    Disconnected,
}

/// What the plugin should do after feeding the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Nothing to publish yet.
    None,
    /// Publish and tell consumers to rebuild.
    Rebuild,
    /// Publish as an incremental update.
    Patch,
    /// Report a connection problem with this connectivity.
    Problem(Connectivity),
}

impl Signal {
    /// Combine the signals of several fetches: rebuild beats patch beats
    /// nothing.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Self::Rebuild, _) | (_, Self::Rebuild) => Self::Rebuild,
            (Self::Patch, _) | (_, Self::Patch) => Self::Patch,
            (first, _) => first,
        }
    }
}

#[derive(Debug, Default)]
struct UnitState {
    seen: BTreeSet<Facet>,
    up: Option<bool>,
}

#[derive(Debug)]
pub struct Reconciler {
    required: BTreeSet<Facet>,
    units: BTreeMap<String, UnitState>,
    phase: Phase,
}

impl Reconciler {
    pub fn new<U, S>(required: &[Facet], units: U) -> Self
    where
        U: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: required.iter().copied().collect(),
            units: units
                .into_iter()
                .map(|u| (u.into(), UnitState::default()))
                .collect(),
            phase: Phase::Uninitialized,
        }
    }

    /// Single-unit reconciler.
    pub fn single(required: &[Facet]) -> Self {
        Self::new(required, [BRIDGE_UNIT])
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_ready(&self) -> bool {
        self.phase == Phase::Ready
    }

    pub fn has_all_facets(&self, unit: &str) -> bool {
        self.units
            .get(unit)
            .is_some_and(|state| self.required.is_subset(&state.seen))
    }

    /// A full fetch of `facet` for `unit` completed.
    pub fn facet_arrived(&mut self, unit: &str, facet: Facet) -> Signal {
        let state = self.units.entry(unit.to_owned()).or_default();
        state.seen.insert(facet);
        state.up = Some(true);

        match self.phase {
            Phase::Ready => Signal::Patch,
            Phase::Uninitialized | Phase::Disconnected => {
                if self.gate_open() {
                    debug!(from = %self.phase, "reconciler ready");
                    self.phase = Phase::Ready;
                    Signal::Rebuild
                } else {
                    Signal::None
                }
            }
        }
    }

    /// A structural change makes the next fetch a rebuild.
    pub fn structure_changed(&mut self) {
        if self.phase == Phase::Ready {
            self.phase = Phase::Uninitialized;
        }
    }

    /// A partial push update was merged into the working record.
    pub fn event_arrived(&mut self, unit: &str) -> Signal {
        if self.phase == Phase::Ready && self.has_all_facets(unit) {
            Signal::Patch
        } else {
            Signal::None
        }
    }

    /// The transport for `unit` reported a connection problem. Repeats for
    /// a unit already down yield [`Signal::None`].
    pub fn connection_problem(&mut self, unit: &str) -> Signal {
        let state = self.units.entry(unit.to_owned()).or_default();
        if state.up == Some(false) {
            return Signal::None;
        }
        state.up = Some(false);
        let connectivity = self.connectivity();
        if connectivity == Connectivity::AllDown {
            self.phase = Phase::Disconnected;
        }
        Signal::Problem(connectivity)
    }

    /// Forget a unit's facets (its working data was reset).
    pub fn reset_unit(&mut self, unit: &str) {
        if let Some(state) = self.units.get_mut(unit) {
            state.seen.clear();
        }
    }

    pub fn reset(&mut self) {
        for state in self.units.values_mut() {
            *state = UnitState::default();
        }
        self.phase = Phase::Uninitialized;
    }

    pub fn connectivity(&self) -> Connectivity {
        let known: Vec<bool> = self.units.values().filter_map(|s| s.up).collect();
        if known.is_empty() {
            Connectivity::Unknown
        } else if known.iter().all(|up| *up) {
            Connectivity::Connected
        } else if known.iter().any(|up| *up) {
            Connectivity::PartiallyDown
        } else {
            Connectivity::AllDown
        }
    }

    /// Units whose link is currently down.
    pub fn down_units(&self) -> Vec<String> {
        self.units
            .iter()
            .filter(|(_, s)| s.up == Some(false))
            .map(|(u, _)| u.clone())
            .collect()
    }

    /// Ready once at least one unit is complete and every unit that is not
    /// known to be down is complete too.
    fn gate_open(&self) -> bool {
        let mut any_complete = false;
        for state in self.units.values() {
            let complete = self.required.is_subset(&state.seen);
            if complete {
                any_complete = true;
            } else if state.up != Some(false) {
                return false;
            }
        }
        any_complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NANOLEAF: &[Facet] = &[Facet::Info, Facet::State, Facet::EffectsList, Facet::CurrentEffect];

    #[test]
    fn ready_waits_for_every_facet() {
        let mut rec = Reconciler::single(NANOLEAF);
        assert_eq!(rec.facet_arrived(BRIDGE_UNIT, Facet::Info), Signal::None);
        assert_eq!(rec.facet_arrived(BRIDGE_UNIT, Facet::State), Signal::None);
        // Buffered into the working record, no readiness yet.
        assert_eq!(rec.event_arrived(BRIDGE_UNIT), Signal::None);
        assert_eq!(rec.facet_arrived(BRIDGE_UNIT, Facet::EffectsList), Signal::None);
        assert_eq!(rec.facet_arrived(BRIDGE_UNIT, Facet::CurrentEffect), Signal::Rebuild);
        assert_eq!(rec.phase(), Phase::Ready);
        assert_eq!(rec.event_arrived(BRIDGE_UNIT), Signal::Patch);
        assert_eq!(rec.facet_arrived(BRIDGE_UNIT, Facet::State), Signal::Patch);
    }

    #[test]
    fn home_assistant_needs_states_and_areas() {
        let mut rec = Reconciler::single(&[Facet::States, Facet::Areas]);
        assert_eq!(rec.facet_arrived(BRIDGE_UNIT, Facet::States), Signal::None);
        assert_eq!(rec.facet_arrived(BRIDGE_UNIT, Facet::Areas), Signal::Rebuild);
    }

    #[test]
    fn partial_versus_total_outage() {
        let mut rec = Reconciler::new(&[Facet::Status], ["a", "b"]);
        assert_eq!(rec.facet_arrived("a", Facet::Status), Signal::None);
        assert_eq!(rec.facet_arrived("b", Facet::Status), Signal::Rebuild);
        assert_eq!(
            rec.connection_problem("a"),
            Signal::Problem(Connectivity::PartiallyDown)
        );
        assert_eq!(rec.phase(), Phase::Ready);
        assert_eq!(rec.connection_problem("b"), Signal::Problem(Connectivity::AllDown));
        assert_eq!(rec.connection_problem("b"), Signal::None);
        assert_eq!(rec.phase(), Phase::Disconnected);
        assert_eq!(rec.facet_arrived("b", Facet::Status), Signal::Rebuild);
        assert_eq!(rec.down_units(), vec!["a".to_owned()]);
    }

    #[test]
    fn a_down_unit_does_not_block_readiness() {
        let mut rec = Reconciler::new(&[Facet::Status], ["a", "b"]);
        rec.connection_problem("a");
        assert_eq!(rec.facet_arrived("b", Facet::Status), Signal::Rebuild);
    }
}
