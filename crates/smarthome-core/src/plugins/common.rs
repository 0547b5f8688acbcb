// ── Plugin plumbing shared by every vendor ──
//
// `PluginShared` holds what each plugin instance owns besides its
// clients: the published tree, the bridge event channel, tracked timers,
// the reconciler and the login-replay guard. `spawn_listener` turns a
// client's `ClientEvent` stream into reconciler input.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use smarthome_api::{ClientEvent, ConnectionTracker, ErrorKind};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::bridge::{BridgeEvent, BridgeKind, Connectivity, Target};
use crate::config::BridgeOptions;
use crate::error::CoreError;
use crate::login::LoginReplay;
use crate::model::{ALL_GROUP, Capability, CanonicalTree, SCENE_PREFIX, scene_id};
use crate::reconcile::{BRIDGE_UNIT, Facet, Reconciler, Signal};
use crate::store::TreeStore;
use crate::timers::TimerSet;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Writes trigger a re-poll; bursts inside this window collapse into one.
pub(crate) const REFRESH_DEBOUNCE: Duration = Duration::from_millis(500);

pub(crate) struct PluginShared {
    pub id: String,
    pub kind: BridgeKind,
    pub options: BridgeOptions,
    pub store: TreeStore,
    pub timers: TimerSet,
    pub login: LoginReplay,
    events: broadcast::Sender<BridgeEvent>,
    reconciler: Mutex<Reconciler>,
    refresh_pending: AtomicBool,
}

impl PluginShared {
    pub fn new(id: &str, kind: BridgeKind, options: BridgeOptions, reconciler: Reconciler) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            id: id.to_owned(),
            kind,
            options,
            store: TreeStore::new(),
            timers: TimerSet::new(),
            login: LoginReplay::new(),
            events,
            reconciler: Mutex::new(reconciler),
            refresh_pending: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: BridgeEvent) {
        let _ = self.events.send(event);
    }

    pub fn reconciler(&self) -> MutexGuard<'_, Reconciler> {
        self.reconciler
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn connectivity(&self) -> Connectivity {
        self.reconciler().connectivity()
    }

    pub fn facet_arrived(&self, unit: &str, facet: Facet) -> Signal {
        self.reconciler().facet_arrived(unit, facet)
    }

    /// Publish a freshly normalized tree according to `signal`. Nothing is
    /// published before the reconciler is ready.
    pub fn publish(&self, mut tree: CanonicalTree, signal: Signal) {
        let rebuild = match signal {
            Signal::Rebuild => true,
            Signal::Patch => false,
            Signal::None | Signal::Problem(_) => return,
        };
        self.apply_availability(&mut tree);
        self.store.publish(tree);
        self.emit(BridgeEvent::DataReady { rebuild });
    }

    /// Patch the published tree in place, then signal an incremental update
    /// if the reconciler agrees.
    pub fn patch<F>(&self, unit: &str, apply: F) -> bool
    where
        F: FnOnce(&mut CanonicalTree) -> bool,
    {
        if !self.reconciler().is_ready() {
            return false;
        }
        if !self.store.modify(apply) {
            return false;
        }
        match self.reconciler().event_arrived(unit) {
            Signal::Patch => {
                self.emit(BridgeEvent::DataReady { rebuild: false });
                true
            }
            _ => false,
        }
    }

    /// A unit's link went down.
    pub fn report_problem(&self, unit: &str) {
        let signal = self.reconciler().connection_problem(unit);
        let Signal::Problem(connectivity) = signal else {
            return;
        };
        warn!(bridge = %self.id, %unit, %connectivity, "connection problem");
        self.store.modify(|tree| {
            let before = tree.clone();
            self.apply_availability(tree);
            *tree != before
        });
        self.emit(BridgeEvent::ConnectionProblem { connectivity });
    }

    /// Mark down units as disconnected and, with `hide_unavailable`,
    /// drop their devices.
    pub fn apply_availability(&self, tree: &mut CanonicalTree) {
        let down = self.reconciler().down_units();
        if down.is_empty() {
            return;
        }
        for unit in &down {
            if let Some(entry) = tree.config.get_mut(unit) {
                entry.connected = false;
            }
        }
        if !self.options.hide_unavailable {
            return;
        }

        let owned = |id: &str| {
            down.iter().any(|unit| {
                unit == BRIDGE_UNIT || id == unit || id.starts_with(&format!("{unit}:"))
            })
        };
        tree.devices.retain(|id, device| device.is_scene() || !owned(id));
        let remaining: BTreeSet<String> = tree
            .devices
            .values()
            .filter(|d| !d.is_scene())
            .map(|d| d.id.clone())
            .collect();
        let groups: BTreeSet<String> = tree.groups.keys().cloned().collect();
        tree.devices.retain(|_, device| {
            !device.is_scene()
                || (!remaining.is_empty()
                    && device.associated.iter().any(|a| {
                        a == ALL_GROUP || remaining.contains(a) || groups.contains(a)
                    }))
        });
        tree.rebuild_groups();
    }

    /// Sort a failed fetch for `unit`.
    ///
    /// Auth and configuration problems are returned. Transport failures
    /// were already counted by the client tracker and only flip the unit
    /// down. Parse failures forget the unit's facets; the caller resets
    /// its working data.
    pub fn absorb(&self, unit: &str, err: smarthome_api::Error) -> Result<ErrorKind, CoreError> {
        let kind = err.kind();
        match kind {
            ErrorKind::Auth => {
                self.report_problem(unit);
                Err(CoreError::from(err))
            }
            ErrorKind::Transport => {
                if matches!(
                    err,
                    smarthome_api::Error::InvalidUrl(_)
                        | smarthome_api::Error::Tls(_)
                        | smarthome_api::Error::Cancelled
                ) {
                    return Err(CoreError::from(err));
                }
                debug!(bridge = %self.id, %unit, error = %err, "fetch failed");
                self.report_problem(unit);
                Ok(kind)
            }
            ErrorKind::Parse => {
                warn!(bridge = %self.id, %unit, error = %err, "malformed reply, resetting working data");
                self.reconciler().reset_unit(unit);
                Ok(kind)
            }
            ErrorKind::Protocol => {
                warn!(bridge = %self.id, %unit, error = %err, "unexpected reply shape");
                Ok(kind)
            }
        }
    }

    /// Device ids of `target` that have `capability`.
    ///
    /// A single target lacking it is an error; group members lacking it
    /// are skipped.
    pub fn members_with(&self, target: &Target, capability: Capability) -> Result<Vec<String>, CoreError> {
        let tree = self.store.snapshot();
        match target {
            Target::Single(id) => {
                let device = tree.device(id).ok_or_else(|| CoreError::unknown_device(id))?;
                if device.has(capability) {
                    Ok(vec![id.clone()])
                } else {
                    Err(CoreError::unsupported(format!("{capability} on {id}")))
                }
            }
            Target::Group { members, .. } => Ok(members
                .iter()
                .filter(|id| tree.device(id).is_some_and(|d| d.has(capability)))
                .cloned()
                .collect()),
        }
    }

    /// Run `step` for each of `ids`, staggered when there is more than one.
    pub async fn each<F, Fut>(&self, ids: Vec<String>, step: F) -> Result<(), CoreError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<(), CoreError>>,
    {
        self.timers.paced(ids, self.options.stagger, step).await
    }

    /// Cancel timers and forget all state.
    pub fn clear(&self) {
        self.timers.clear();
        self.reconciler().reset();
        self.refresh_pending.store(false, Ordering::SeqCst);
        self.store.clear();
    }
}

/// Scene argument to a scene id: names get the `scene:` prefix, ids pass
/// through.
pub(crate) fn scene_key(scene: &str) -> String {
    if scene.starts_with(SCENE_PREFIX) {
        scene.to_owned()
    } else {
        scene_id(scene)
    }
}

// ── Client event listener ────────────────────────────────────────────

/// The parts of a plugin a client listener calls back into.
#[async_trait]
pub(crate) trait ClientEventHandler: Send + Sync + 'static {
    fn shared(&self) -> &PluginShared;

    /// Merge one streamed delta from `unit`.
    async fn on_stream_data(self: Arc<Self>, unit: &str, data: &Value);

    /// Re-fetch after a write or a structural change.
    async fn refresh(self: Arc<Self>);
}

/// Ask for a debounced re-poll.
pub(crate) fn schedule_refresh<H: ClientEventHandler>(handler: &Arc<H>) {
    let shared = handler.shared();
    if shared.refresh_pending.swap(true, Ordering::SeqCst) {
        return;
    }
    let handler = Arc::clone(handler);
    shared.timers.after(REFRESH_DEBOUNCE, async move {
        handler.shared().refresh_pending.store(false, Ordering::SeqCst);
        handler.refresh().await;
    });
}

/// Forward `tracker`'s events for `unit` into `handler` until the plugin's
/// timers are cleared.
pub(crate) fn spawn_listener<H: ClientEventHandler>(handler: &Arc<H>, unit: &str, tracker: &ConnectionTracker) {
    let mut rx = tracker.subscribe();
    let unit = unit.to_owned();
    let task_handler = Arc::clone(handler);

    handler.shared().timers.spawn(move |cancel| async move {
        let handler = task_handler;
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Ok(ClientEvent::ConnectionProblem { kind, message }) => {
                        debug!(%unit, %kind, %message, "client reported connection problem");
                        handler.shared().report_problem(&unit);
                    }
                    Ok(ClientEvent::StreamData(data)) => {
                        Arc::clone(&handler).on_stream_data(&unit, &data).await;
                    }
                    Ok(ClientEvent::ChangeOccurred) => schedule_refresh(&handler),
                    Ok(ClientEvent::PairingSucceeded) => {
                        info!(bridge = %handler.shared().id, %unit, "pairing succeeded");
                        handler.shared().emit(BridgeEvent::PairingSucceeded);
                    }
                    Ok(ClientEvent::PairingFailed { attempts }) => {
                        warn!(bridge = %handler.shared().id, %unit, attempts, "pairing failed");
                        handler.shared().emit(BridgeEvent::PairingFailed { attempts });
                    }
                    Ok(ClientEvent::Response { kind, .. }) => {
                        debug!(%unit, %kind, "response");
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(%unit, skipped, "client events lagged, re-polling");
                        schedule_refresh(&handler);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });
}
