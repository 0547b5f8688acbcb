// ── Login / shutdown state replay ──
//
// The `on_login` setting is a JSON object mapping device or group ids to
// the state they should be put in when the session starts:
//
//     {"_all_": {"switch": true}, "L1": {"brightness": 0.4, "color": {"red": 255, "green": 0, "blue": 0}}}
//
// Replay runs at most once per plugin instance lifetime.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::bridge::{ActionRequest, DeviceBridge, Target, dispatch};
use crate::color::Rgb;
use crate::error::CoreError;
use crate::model::ALL_GROUP;

/// Desired state for one device or group.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DesiredState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub switch: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Rgb>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_temperature: Option<Rgb>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<f64>,
    /// Scene id to activate on this target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene: Option<String>,
}

impl DesiredState {
    /// Requests in application order: switch first so later values land
    /// on a powered device.
    pub fn requests(&self) -> Vec<ActionRequest> {
        let mut out = Vec::new();
        if let Some(on) = self.switch {
            out.push(ActionRequest::Switch(on));
        }
        if self.switch == Some(false) {
            return out;
        }
        if let Some(scene) = &self.scene {
            out.push(ActionRequest::Scene(scene.clone()));
        }
        if let Some(b) = self.brightness {
            out.push(ActionRequest::Brightness(b.clamp(0.0, 1.0)));
        }
        if let Some(c) = self.color {
            out.push(ActionRequest::Color(c));
        }
        if let Some(c) = self.color_temperature {
            out.push(ActionRequest::ColorTemperature(c));
        }
        if let Some(p) = self.position {
            out.push(ActionRequest::Position(p.clamp(0.0, 1.0)));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoginState {
    pub targets: BTreeMap<String, DesiredState>,
}

impl LoginState {
    pub fn parse(blob: &str) -> Result<Self, CoreError> {
        if blob.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(blob).map_err(|e| CoreError::InvalidLoginState {
            message: e.to_string(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Once-per-instance guard for login replay.
#[derive(Debug, Default)]
pub struct LoginReplay {
    applied: AtomicBool,
}

impl LoginReplay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the replay; `false` if it already ran.
    pub fn begin(&self) -> bool {
        !self.applied.swap(true, Ordering::SeqCst)
    }

    pub fn has_run(&self) -> bool {
        self.applied.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplayOutcome {
    pub applied: usize,
    pub skipped: usize,
}

/// Replay `state` onto `bridge` unless it already happened for this
/// instance. Unknown ids and unsupported actions are skipped.
pub async fn apply_login_state(
    bridge: &dyn DeviceBridge,
    state: &LoginState,
) -> Result<Option<ReplayOutcome>, CoreError> {
    if !bridge.login_replay().begin() {
        return Ok(None);
    }
    let tree = bridge.tree();
    let mut outcome = ReplayOutcome::default();

    for (id, desired) in &state.targets {
        let target = match Target::resolve(&tree, id) {
            Ok(target) => target,
            Err(e) => {
                warn!(bridge = %bridge.id(), error = %e, "login state target skipped");
                outcome.skipped += 1;
                continue;
            }
        };
        for request in desired.requests() {
            match dispatch(bridge, &target, &request).await {
                Ok(true) => outcome.applied += 1,
                Ok(false) => outcome.skipped += 1,
                Err(e) => {
                    warn!(bridge = %bridge.id(), target = %id, error = %e, "login state action failed");
                    outcome.skipped += 1;
                }
            }
        }
    }
    info!(bridge = %bridge.id(), applied = outcome.applied, skipped = outcome.skipped, "login state applied");
    Ok(Some(outcome))
}

/// Switch everything off when `off_shutdown` is set.
pub async fn apply_shutdown(bridge: &dyn DeviceBridge, off_shutdown: bool) -> Result<bool, CoreError> {
    if !off_shutdown {
        return Ok(false);
    }
    let tree = bridge.tree();
    let target = Target::resolve(&tree, ALL_GROUP)?;
    dispatch(bridge, &target, &ActionRequest::Switch(false)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_blob() {
        let state = LoginState::parse(
            r#"{"_all_": {"switch": true}, "L1": {"brightness": 0.4, "color": {"red": 255, "green": 0, "blue": 0}}}"#,
        )
        .unwrap();
        assert_eq!(state.targets.len(), 2);
        assert_eq!(state.targets["L1"].color, Some(Rgb::new(255, 0, 0)));
        assert_eq!(
            state.targets["L1"].requests(),
            vec![
                ActionRequest::Brightness(0.4),
                ActionRequest::Color(Rgb::new(255, 0, 0))
            ]
        );
    }

    #[test]
    fn switching_off_skips_other_values() {
        let desired = DesiredState {
            switch: Some(false),
            brightness: Some(0.5),
            ..DesiredState::default()
        };
        assert_eq!(desired.requests(), vec![ActionRequest::Switch(false)]);
    }

    #[test]
    fn empty_and_invalid_blobs() {
        assert!(LoginState::parse("").unwrap().is_empty());
        assert!(matches!(
            LoginState::parse(r#"{"x": {"volume": 3}}"#),
            Err(CoreError::InvalidLoginState { .. })
        ));
    }

    #[test]
    fn replay_guard_runs_once() {
        let replay = LoginReplay::new();
        assert!(replay.begin());
        assert!(!replay.begin());
        assert!(replay.has_run());
    }
}
