// ── DeviceBridge capability interface ──
//
// Every vendor plugin and the universal aggregator implement this trait.
// Actions a plugin cannot perform keep the default `Unsupported` body and
// are left out of its `ActionSet`, which callers probe before dispatching.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::color::Rgb;
use crate::error::CoreError;
use crate::login::LoginReplay;
use crate::model::CanonicalTree;
use crate::stream::TreeStream;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum BridgeKind {
    HueBridge,
    HueSync,
    Dirigera,
    Nanoleaf,
    HomeAssistant,
    Shelly,
    Universal,
}

// ── Action surface ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum Action {
    Switch,
    Brightness,
    Color,
    ColorTemperature,
    Position,
    Up,
    Down,
    Scene,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Scope {
    Single,
    Group,
}

/// Which `(action, scope)` pairs a bridge implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActionSet(u32);

impl ActionSet {
    pub const EMPTY: Self = Self(0);

    const fn bit(action: Action, scope: Scope) -> u32 {
        let slot = action as u32 * 2 + scope as u32;
        1 << slot
    }

    #[must_use]
    pub const fn with(self, action: Action, scope: Scope) -> Self {
        Self(self.0 | Self::bit(action, scope))
    }

    /// Both scopes of `action`.
    #[must_use]
    pub const fn with_both(self, action: Action) -> Self {
        self.with(action, Scope::Single).with(action, Scope::Group)
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn supports(self, action: Action, scope: Scope) -> bool {
        self.0 & Self::bit(action, scope) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// The entity an action is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Single(String),
    /// A group id plus the member ids to act on.
    Group { id: String, members: Vec<String> },
}

impl Target {
    pub fn single(id: impl Into<String>) -> Self {
        Self::Single(id.into())
    }

    pub fn group(id: impl Into<String>, members: Vec<String>) -> Self {
        Self::Group {
            id: id.into(),
            members,
        }
    }

    pub fn scope(&self) -> Scope {
        match self {
            Self::Single(_) => Scope::Single,
            Self::Group { .. } => Scope::Group,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Single(id) | Self::Group { id, .. } => id,
        }
    }

    /// Device ids the action ultimately touches.
    pub fn device_ids(&self) -> Vec<String> {
        match self {
            Self::Single(id) => vec![id.clone()],
            Self::Group { members, .. } => members.clone(),
        }
    }

    /// Resolve `id` against `tree`: groups (including the implicit
    /// all-devices group) become group targets with their members.
    pub fn resolve(tree: &CanonicalTree, id: &str) -> Result<Self, CoreError> {
        if tree.devices.contains_key(id) {
            return Ok(Self::single(id));
        }
        tree.members(id)
            .map(|members| Self::group(id, members))
            .ok_or_else(|| CoreError::unknown_device(id))
    }
}

// ── Events and connectivity ──────────────────────────────────────────

/// Whether a plugin's links are up, per unit (bridge or device).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Connectivity {
    /// Nothing attempted yet.
    Unknown,
    Connected,
    PartiallyDown,
    AllDown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// The tree was republished. `rebuild` is set for a first load or a
    /// structural change, clear for an incremental patch.
    DataReady { rebuild: bool },
    ConnectionProblem { connectivity: Connectivity },
    PairingSucceeded,
    PairingFailed { attempts: u32 },
}

// ── The trait ────────────────────────────────────────────────────────

#[async_trait]
pub trait DeviceBridge: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> BridgeKind;

    fn actions(&self) -> ActionSet;

    fn tree(&self) -> Arc<CanonicalTree>;

    fn watch(&self) -> TreeStream;

    fn events(&self) -> broadcast::Receiver<BridgeEvent>;

    fn connectivity(&self) -> Connectivity;

    fn login_replay(&self) -> &LoginReplay;

    /// Build clients and start listening to them. Does no I/O.
    async fn prepare(&self) -> Result<(), CoreError>;

    /// Fetch every data facet and republish the tree. Transport and
    /// parse failures are recovered internally and only show up in
    /// [`connectivity`](Self::connectivity); auth and configuration
    /// problems are returned.
    async fn request_data(&self) -> Result<(), CoreError>;

    /// Stop streams, cancel every timer and drop working state.
    async fn clear_instance(&self);

    /// Apply a new HTTP timeout to every client session.
    fn set_timeout(&self, timeout: Duration) -> Result<(), CoreError>;

    /// Run the vendor's pairing flow and return the new credential.
    async fn pair(&self, _unit: Option<&str>, _cancel: &CancellationToken) -> Result<SecretString, CoreError> {
        Err(CoreError::unsupported("pair"))
    }

    async fn switch(&self, _target: &Target, _on: bool) -> Result<(), CoreError> {
        Err(CoreError::unsupported("switch"))
    }

    /// `value` is 0.0 to 1.0.
    async fn brightness(&self, _target: &Target, _value: f64) -> Result<(), CoreError> {
        Err(CoreError::unsupported("brightness"))
    }

    async fn color(&self, _target: &Target, _color: Rgb) -> Result<(), CoreError> {
        Err(CoreError::unsupported("color"))
    }

    /// `color` is a white point as produced by `kelvin_to_rgb`.
    async fn color_temperature(&self, _target: &Target, _color: Rgb) -> Result<(), CoreError> {
        Err(CoreError::unsupported("color_temperature"))
    }

    /// `value` is 0.0 (closed) to 1.0 (open).
    async fn position(&self, _target: &Target, _value: f64) -> Result<(), CoreError> {
        Err(CoreError::unsupported("position"))
    }

    async fn up(&self, _target: &Target) -> Result<(), CoreError> {
        Err(CoreError::unsupported("up"))
    }

    async fn down(&self, _target: &Target) -> Result<(), CoreError> {
        Err(CoreError::unsupported("down"))
    }

    /// Activate scene `scene` on the given group or device ids
    /// ([`ALL_GROUP`](crate::model::ALL_GROUP) for everywhere it applies).
    async fn scene(&self, _scene: &str, _targets: &[String]) -> Result<(), CoreError> {
        Err(CoreError::unsupported("scene"))
    }
}

/// Dispatch `action` only when `bridge` advertises it; otherwise a no-op.
pub async fn dispatch(
    bridge: &dyn DeviceBridge,
    target: &Target,
    request: &ActionRequest,
) -> Result<bool, CoreError> {
    let action = request.action();
    if !bridge.actions().supports(action, target.scope()) {
        tracing::debug!(bridge = %bridge.id(), %action, scope = %target.scope(), "action not supported, skipping");
        return Ok(false);
    }
    match request {
        ActionRequest::Switch(on) => bridge.switch(target, *on).await?,
        ActionRequest::Brightness(v) => bridge.brightness(target, *v).await?,
        ActionRequest::Color(c) => bridge.color(target, *c).await?,
        ActionRequest::ColorTemperature(c) => bridge.color_temperature(target, *c).await?,
        ActionRequest::Position(v) => bridge.position(target, *v).await?,
        ActionRequest::Up => bridge.up(target).await?,
        ActionRequest::Down => bridge.down(target).await?,
        ActionRequest::Scene(scene) => bridge.scene(scene, &[target.id().to_owned()]).await?,
    }
    Ok(true)
}

/// An action with its argument, for generic dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionRequest {
    Switch(bool),
    Brightness(f64),
    Color(Rgb),
    ColorTemperature(Rgb),
    Position(f64),
    Up,
    Down,
    Scene(String),
}

impl ActionRequest {
    pub fn action(&self) -> Action {
        match self {
            Self::Switch(_) => Action::Switch,
            Self::Brightness(_) => Action::Brightness,
            Self::Color(_) => Action::Color,
            Self::ColorTemperature(_) => Action::ColorTemperature,
            Self::Position(_) => Action::Position,
            Self::Up => Action::Up,
            Self::Down => Action::Down,
            Self::Scene(_) => Action::Scene,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ALL_GROUP, Device, Group};

    #[test]
    fn action_set_tracks_scopes_independently() {
        let set = ActionSet::EMPTY
            .with(Action::Switch, Scope::Single)
            .with_both(Action::Brightness);
        assert!(set.supports(Action::Switch, Scope::Single));
        assert!(!set.supports(Action::Switch, Scope::Group));
        assert!(set.supports(Action::Brightness, Scope::Group));
        assert!(!set.supports(Action::Scene, Scope::Single));
    }

    #[test]
    fn targets_resolve_against_the_tree() {
        let mut tree = CanonicalTree::new();
        tree.insert_group(Group::new("g", "G"));
        let mut device = Device::new("d", "D");
        device.set_switch(true);
        device.add_group("g");
        tree.insert_device(device);
        tree.finalize(None);

        assert_eq!(Target::resolve(&tree, "d").unwrap(), Target::single("d"));
        assert_eq!(
            Target::resolve(&tree, "g").unwrap(),
            Target::group("g", vec!["d".into()])
        );
        assert_eq!(
            Target::resolve(&tree, ALL_GROUP).unwrap().device_ids(),
            vec!["d".to_owned()]
        );
        assert!(Target::resolve(&tree, "nope").is_err());
    }
}
