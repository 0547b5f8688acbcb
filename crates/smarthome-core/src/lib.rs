//! Canonical device layer between `smarthome-api` and its consumers (CLI).
//!
//! - **[`DeviceBridge`]** is the one interface every vendor plugin and the
//!   [`UniversalBridge`] implement: lifecycle (`prepare`, `request_data`,
//!   `clear_instance`), the published [`CanonicalTree`], bridge events and
//!   the action methods. [`ActionSet`] advertises which actions a bridge
//!   supports; [`dispatch`] skips the rest.
//!
//! - **Normalizers** ([`normalize`]) turn vendor payloads into the canonical
//!   `{config, groups, devices}` tree and patch it from streamed deltas.
//!
//! - **[`Reconciler`]** tracks which data facets have arrived per unit and
//!   decides between a rebuild, a patch or a connection-problem signal.
//!
//! - **[`TreeStore`]** / **[`TreeStream`]** hold the published tree and hand
//!   out snapshots and change notifications.
//!
//! - **Color math** ([`color`]), login/shutdown replay ([`login`]),
//!   reconnect backoff ([`reconnect`]) and per-instance task tracking
//!   ([`timers`]).

pub mod bridge;
pub mod color;
pub mod config;
pub mod error;
pub mod login;
pub mod model;
pub mod normalize;
pub mod plugins;
pub mod reconcile;
pub mod reconnect;
pub mod store;
pub mod stream;
pub mod timers;
pub mod universal;

// ── Primary re-exports ──────────────────────────────────────────────
pub use bridge::{
    Action, ActionRequest, ActionSet, BridgeEvent, BridgeKind, Connectivity, DeviceBridge, Scope,
    Target, dispatch,
};
pub use color::{Hsv, Rgb};
pub use config::{BridgeConfig, BridgeOptions, PluginConfig};
pub use error::CoreError;
pub use login::{LoginState, ReplayOutcome, apply_login_state, apply_shutdown};
pub use model::{
    ALL_GROUP, AggregateId, CanonicalTree, Capability, ConfigEntry, Device, Group, Section,
};
pub use reconcile::{Facet, Reconciler, Signal};
pub use reconnect::{ReconnectPolicy, supervise};
pub use store::TreeStore;
pub use stream::TreeStream;
pub use universal::UniversalBridge;
