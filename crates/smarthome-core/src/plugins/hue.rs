// Philips Hue bridge plugin.
//
// One full resource fetch per refresh, SSE deltas patched in place. Room
// and zone actions go through the group's `grouped_light` service when it
// has one; everything else walks the member lights.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::{Value, json};
use smarthome_api::hue::HueEntertainmentConfiguration;
use smarthome_api::{HueBridgeClient, TransportConfig};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::common::{ClientEventHandler, PluginShared, schedule_refresh, spawn_listener};
use crate::bridge::{
    Action, ActionSet, BridgeEvent, BridgeKind, Connectivity, DeviceBridge, Target,
};
use crate::color::{Rgb, color_to_hue_xy, kelvin_to_mirek, rgb_to_kelvin};
use crate::config::{BridgeOptions, HueBridgeConfig};
use crate::error::CoreError;
use crate::login::LoginReplay;
use crate::model::{ALL_GROUP, Capability, CanonicalTree, SCENE_PREFIX};
use crate::normalize::hue::{self, HueIndex};
use crate::normalize::{EventOutcome, to_percent};
use crate::reconcile::{BRIDGE_UNIT, Facet, Reconciler};
use crate::stream::TreeStream;

const ACTIONS: ActionSet = ActionSet::EMPTY
    .with_both(Action::Switch)
    .with_both(Action::Brightness)
    .with_both(Action::Color)
    .with_both(Action::ColorTemperature)
    .with_both(Action::Scene);

pub struct HueBridgePlugin {
    inner: Arc<HueInner>,
}

struct HueInner {
    shared: PluginShared,
    config: HueBridgeConfig,
    client: ArcSwapOption<HueBridgeClient>,
    index: Mutex<HueIndex>,
}

impl HueBridgePlugin {
    pub fn new(id: &str, config: HueBridgeConfig, options: BridgeOptions) -> Self {
        Self {
            inner: Arc::new(HueInner {
                shared: PluginShared::new(
                    id,
                    BridgeKind::HueBridge,
                    options,
                    Reconciler::single(&[Facet::AllData]),
                ),
                config,
                client: ArcSwapOption::empty(),
                index: Mutex::new(HueIndex::default()),
            }),
        }
    }

    /// Entertainment areas known to the bridge.
    pub async fn entertainment_areas(&self) -> Result<Vec<HueEntertainmentConfiguration>, CoreError> {
        Ok(self.inner.client()?.entertainment_configurations().await?)
    }

    /// Start or stop streaming mode on an entertainment area.
    pub async fn set_entertainment(&self, id: &str, active: bool) -> Result<(), CoreError> {
        info!(bridge = %self.inner.shared.id, area = %id, active, "entertainment mode");
        Ok(self.inner.client()?.set_entertainment(id, active).await?)
    }
}

impl HueInner {
    fn client(&self) -> Result<Arc<HueBridgeClient>, CoreError> {
        self.client.load_full().ok_or_else(|| CoreError::NotConnected {
            bridge: self.shared.id.clone(),
        })
    }

    fn index(&self) -> std::sync::MutexGuard<'_, HueIndex> {
        self.index
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    async fn fetch(&self) -> Result<(), CoreError> {
        let client = self.client()?;
        match client.get_all().await {
            Ok(resources) => {
                let previous = self.shared.store.snapshot();
                let (tree, index) = hue::build(&resources, Some(&previous));
                *self.index() = index;
                let signal = self.shared.facet_arrived(BRIDGE_UNIT, Facet::AllData);
                self.shared.publish(tree, signal);
                if let Err(e) = client.keep_event_stream() {
                    warn!(bridge = %self.shared.id, error = %e, "could not open Hue event stream");
                }
                Ok(())
            }
            Err(e) => {
                if self.shared.absorb(BRIDGE_UNIT, e)? == smarthome_api::ErrorKind::Parse {
                    *self.index() = HueIndex::default();
                }
                Ok(())
            }
        }
    }

    /// Send `body` to `target`: one grouped-light call for rooms and zones
    /// that have the service, one call per capable light otherwise.
    async fn put(&self, target: &Target, capability: Capability, body: Value) -> Result<(), CoreError> {
        let client = self.client()?;
        if let Target::Group { id, .. } = target {
            let grouped = self.index().grouped_lights.get(id).cloned();
            if let Some(grouped) = grouped {
                debug!(group = %id, %grouped, "using grouped light");
                return Ok(client.set_grouped_light(&grouped, &body).await?);
            }
        }

        let ids = self.shared.members_with(target, capability)?;
        let (client, body) = (&client, &body);
        self.shared
            .each(ids, |id| async move { Ok(client.set_light(&id, body).await?) })
            .await
    }

    fn mirek_for(&self, target: &Target, color: Rgb) -> u32 {
        let tree = self.shared.store.snapshot();
        let range = match target {
            Target::Single(id) => tree
                .device(id)
                .and_then(|d| Some((d.ct_min?, d.ct_max?))),
            Target::Group { .. } => None,
        };
        kelvin_to_mirek(rgb_to_kelvin(color, range))
    }

    /// Vendor scene ids for scene `name` on each of `targets`.
    fn scene_ids(&self, name: &str, targets: &[String]) -> Vec<String> {
        let index = self.index();
        let Some(by_group) = index.scenes.get(name) else {
            return Vec::new();
        };
        if targets.iter().any(|t| t == ALL_GROUP) {
            return by_group.values().cloned().collect();
        }

        let tree = self.shared.store.snapshot();
        let mut out = Vec::new();
        for target in targets {
            // A light stands for the rooms and zones it belongs to.
            let groups = match tree.device(target) {
                Some(device) => device.groups.clone(),
                None => vec![target.clone()],
            };
            for group in groups {
                if let Some(scene) = by_group.get(&group) {
                    if !out.contains(scene) {
                        out.push(scene.clone());
                    }
                }
            }
        }
        out
    }
}

#[async_trait]
impl ClientEventHandler for HueInner {
    fn shared(&self) -> &PluginShared {
        &self.shared
    }

    async fn on_stream_data(self: Arc<Self>, unit: &str, data: &Value) {
        let mut refresh = false;
        self.shared.patch(unit, |tree| match hue::apply_event(tree, data) {
            EventOutcome::Patched => true,
            EventOutcome::NeedsRefresh => {
                refresh = true;
                false
            }
            EventOutcome::Ignored => false,
        });
        if refresh {
            schedule_refresh(&self);
        }
    }

    async fn refresh(self: Arc<Self>) {
        if let Err(e) = self.fetch().await {
            warn!(bridge = %self.shared.id, error = %e, "Hue refresh failed");
        }
    }
}

#[async_trait]
impl DeviceBridge for HueBridgePlugin {
    fn id(&self) -> &str {
        &self.inner.shared.id
    }

    fn kind(&self) -> BridgeKind {
        self.inner.shared.kind
    }

    fn actions(&self) -> ActionSet {
        ACTIONS
    }

    fn tree(&self) -> Arc<CanonicalTree> {
        self.inner.shared.store.snapshot()
    }

    fn watch(&self) -> TreeStream {
        self.inner.shared.store.subscribe()
    }

    fn events(&self) -> broadcast::Receiver<BridgeEvent> {
        self.inner.shared.subscribe()
    }

    fn connectivity(&self) -> Connectivity {
        self.inner.shared.connectivity()
    }

    fn login_replay(&self) -> &LoginReplay {
        &self.inner.shared.login
    }

    async fn prepare(&self) -> Result<(), CoreError> {
        if self.inner.client.load().is_some() {
            return Ok(());
        }
        let transport = TransportConfig::new(self.inner.config.tls.clone(), self.inner.shared.options.timeout);
        let client = HueBridgeClient::for_host(&self.inner.config.ip, self.inner.config.app_key.clone(), transport)?;
        spawn_listener(&self.inner, BRIDGE_UNIT, client.tracker());
        self.inner.client.store(Some(Arc::new(client)));
        debug!(bridge = %self.inner.shared.id, ip = %self.inner.config.ip, "Hue bridge prepared");
        Ok(())
    }

    async fn request_data(&self) -> Result<(), CoreError> {
        self.inner.fetch().await
    }

    async fn clear_instance(&self) {
        if let Some(client) = self.inner.client.swap(None) {
            client.stop_event_stream();
            client.tracker().reset();
        }
        self.inner.shared.clear();
        *self.inner.index() = HueIndex::default();
    }

    fn set_timeout(&self, timeout: Duration) -> Result<(), CoreError> {
        if let Some(client) = self.inner.client.load_full() {
            client.session().set_timeout(timeout)?;
        }
        Ok(())
    }

    async fn pair(&self, _unit: Option<&str>, cancel: &CancellationToken) -> Result<SecretString, CoreError> {
        let client = self.inner.client()?;
        let devicetype = format!("smarthome#{}", self.inner.shared.id);
        let credentials = client
            .pair(&devicetype, self.inner.shared.options.pairing, cancel)
            .await?;
        Ok(SecretString::from(credentials.username))
    }

    async fn switch(&self, target: &Target, on: bool) -> Result<(), CoreError> {
        self.inner
            .put(target, Capability::Switch, json!({ "on": { "on": on } }))
            .await
    }

    async fn brightness(&self, target: &Target, value: f64) -> Result<(), CoreError> {
        let body = json!({
            "on": { "on": value > 0.0 },
            "dimming": { "brightness": f64::from(to_percent(value)) },
        });
        self.inner.put(target, Capability::Brightness, body).await
    }

    async fn color(&self, target: &Target, color: Rgb) -> Result<(), CoreError> {
        let (x, y) = color_to_hue_xy(color);
        let body = json!({ "on": { "on": true }, "color": { "xy": { "x": x, "y": y } } });
        self.inner.put(target, Capability::Color, body).await
    }

    async fn color_temperature(&self, target: &Target, color: Rgb) -> Result<(), CoreError> {
        let mirek = self.inner.mirek_for(target, color);
        let body = json!({ "on": { "on": true }, "color_temperature": { "mirek": mirek } });
        self.inner.put(target, Capability::ColorTemperature, body).await
    }

    async fn scene(&self, scene: &str, targets: &[String]) -> Result<(), CoreError> {
        let name = scene.strip_prefix(SCENE_PREFIX).unwrap_or(scene);
        let ids = self.inner.scene_ids(name, targets);
        if ids.is_empty() {
            return Err(CoreError::unknown_device(scene));
        }
        let client = self.inner.client()?;
        let client = &client;
        self.inner
            .shared
            .each(ids, |id| async move { Ok(client.recall_scene(&id).await?) })
            .await
    }
}
