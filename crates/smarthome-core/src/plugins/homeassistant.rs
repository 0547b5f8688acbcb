// Home Assistant plugin.
//
// States and areas are two facets fetched together; `state_changed`
// events from the WebSocket update the working record. Actions become
// service calls, one per entity domain with every targeted entity listed.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use serde_json::{Value, json};
use smarthome_api::{HomeAssistantClient, TransportConfig};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::common::{ClientEventHandler, PluginShared, scene_key, schedule_refresh, spawn_listener};
use crate::bridge::{Action, ActionSet, BridgeEvent, BridgeKind, Connectivity, DeviceBridge, Target};
use crate::color::{Rgb, rgb_to_kelvin};
use crate::config::{BridgeOptions, HomeAssistantConfig};
use crate::error::CoreError;
use crate::login::LoginReplay;
use crate::model::{ALL_GROUP, CanonicalTree, Capability};
use crate::normalize::homeassistant::{self, HaIndex, HaRecord};
use crate::normalize::{EventOutcome, to_percent};
use crate::reconcile::{BRIDGE_UNIT, Facet, Reconciler, Signal};
use crate::stream::TreeStream;

const ACTIONS: ActionSet = ActionSet::EMPTY
    .with_both(Action::Switch)
    .with_both(Action::Brightness)
    .with_both(Action::Color)
    .with_both(Action::ColorTemperature)
    .with_both(Action::Position)
    .with_both(Action::Up)
    .with_both(Action::Down)
    .with_both(Action::Scene);

pub struct HomeAssistantPlugin {
    inner: Arc<HaInner>,
}

struct HaInner {
    shared: PluginShared,
    config: HomeAssistantConfig,
    client: ArcSwapOption<HomeAssistantClient>,
    record: Mutex<HaRecord>,
    index: Mutex<HaIndex>,
}

impl HomeAssistantPlugin {
    pub fn new(id: &str, config: HomeAssistantConfig, options: BridgeOptions) -> Self {
        Self {
            inner: Arc::new(HaInner {
                shared: PluginShared::new(
                    id,
                    BridgeKind::HomeAssistant,
                    options,
                    Reconciler::single(&[Facet::States, Facet::Areas]),
                ),
                config,
                client: ArcSwapOption::empty(),
                record: Mutex::new(HaRecord::default()),
                index: Mutex::new(HaIndex::new()),
            }),
        }
    }
}

/// Entity ids split by their domain (`light.kitchen` -> `light`).
fn by_domain(ids: Vec<String>) -> BTreeMap<String, Vec<String>> {
    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for id in ids {
        let domain = id.split_once('.').map_or("", |(d, _)| d).to_owned();
        out.entry(domain).or_default().push(id);
    }
    out
}

impl HaInner {
    fn client(&self) -> Result<Arc<HomeAssistantClient>, CoreError> {
        self.client.load_full().ok_or_else(|| CoreError::NotConnected {
            bridge: self.shared.id.clone(),
        })
    }

    fn record(&self) -> MutexGuard<'_, HaRecord> {
        self.record
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn index(&self) -> MutexGuard<'_, HaIndex> {
        self.index
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn absorb(&self, err: smarthome_api::Error) -> Result<(), CoreError> {
        if self.shared.absorb(BRIDGE_UNIT, err)? == smarthome_api::ErrorKind::Parse {
            *self.record() = HaRecord::default();
        }
        Ok(())
    }

    async fn fetch(&self) -> Result<(), CoreError> {
        let client = self.client()?;
        let (states, areas) = tokio::join!(client.states(), client.areas());

        let mut signal = Signal::None;
        match states {
            Ok(states) => {
                self.record().set_states(states);
                signal = self.shared.facet_arrived(BRIDGE_UNIT, Facet::States);
            }
            Err(e) => self.absorb(e)?,
        }
        match areas {
            Ok(areas) => {
                self.record().areas = Some(areas);
                signal = signal.merge(self.shared.facet_arrived(BRIDGE_UNIT, Facet::Areas));
            }
            Err(e) => self.absorb(e)?,
        }
        if signal == Signal::None {
            return Ok(());
        }

        let previous = self.shared.store.snapshot();
        let (tree, index) = homeassistant::build(&self.record(), Some(&previous));
        *self.index() = index;
        self.shared.publish(tree, signal);
        if let Err(e) = client.keep_event_stream() {
            warn!(bridge = %self.shared.id, error = %e, "could not open Home Assistant event stream");
        }
        Ok(())
    }

    /// Call `service` once per domain over the capable entities of
    /// `target`, merging `data` into each call.
    async fn call(&self, target: &Target, capability: Capability, service: &str, data: Value) -> Result<(), CoreError> {
        let ids = self.shared.members_with(target, capability)?;
        if ids.is_empty() {
            return Ok(());
        }
        let client = self.client()?;
        for (domain, entities) in by_domain(ids) {
            let mut body = json!({ "entity_id": entities });
            if let (Some(body), Some(extra)) = (body.as_object_mut(), data.as_object()) {
                body.extend(extra.clone());
            }
            debug!(%domain, %service, "calling service");
            client.call_service(&domain, service, &body).await?;
        }
        Ok(())
    }

    /// Narrowest device temperature range among the targeted lights.
    fn kelvin_range(&self, target: &Target) -> Option<(u32, u32)> {
        let tree = self.shared.store.snapshot();
        target
            .device_ids()
            .iter()
            .filter_map(|id| {
                let device = tree.device(id)?;
                Some((device.ct_min?, device.ct_max?))
            })
            .reduce(|(lo_a, hi_a), (lo_b, hi_b)| (lo_a.max(lo_b), hi_a.min(hi_b)))
    }

    /// Script and scene entities for `scene`, restricted to the targeted
    /// areas when any entity sits in one of them.
    fn scene_entities(&self, scene: &str, targets: &[String]) -> Vec<String> {
        let Some(entities) = self.index().get(&scene_key(scene)).cloned() else {
            return Vec::new();
        };
        if targets.iter().any(|t| t == ALL_GROUP) {
            return entities;
        }
        let record = self.record();
        let in_targets: Vec<String> = entities
            .iter()
            .filter(|entity| {
                record.areas.iter().flatten().any(|area| {
                    targets.contains(&area.id) && area.entities.contains(entity)
                })
            })
            .cloned()
            .collect();
        if in_targets.is_empty() { entities } else { in_targets }
    }
}

#[async_trait]
impl ClientEventHandler for HaInner {
    fn shared(&self) -> &PluginShared {
        &self.shared
    }

    async fn on_stream_data(self: Arc<Self>, unit: &str, data: &Value) {
        let outcome = self.record().apply_event(data);
        match outcome {
            EventOutcome::Patched => {
                self.shared.patch(unit, |tree| {
                    let (mut rebuilt, index) = homeassistant::build(&self.record(), Some(&*tree));
                    *self.index() = index;
                    self.shared.apply_availability(&mut rebuilt);
                    let changed = rebuilt != *tree;
                    *tree = rebuilt;
                    changed
                });
            }
            EventOutcome::NeedsRefresh => schedule_refresh(&self),
            EventOutcome::Ignored => {}
        }
    }

    async fn refresh(self: Arc<Self>) {
        if let Err(e) = self.fetch().await {
            warn!(bridge = %self.shared.id, error = %e, "Home Assistant refresh failed");
        }
    }
}

#[async_trait]
impl DeviceBridge for HomeAssistantPlugin {
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
        let config = &self.inner.config;
        let transport = TransportConfig::new(config.tls.clone(), self.inner.shared.options.timeout);
        let client = HomeAssistantClient::for_base(&config.url, config.token.clone(), transport)?;
        spawn_listener(&self.inner, BRIDGE_UNIT, client.tracker());
        self.inner.client.store(Some(Arc::new(client)));
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
        *self.inner.record() = HaRecord::default();
        self.inner.index().clear();
    }

    fn set_timeout(&self, timeout: Duration) -> Result<(), CoreError> {
        if let Some(client) = self.inner.client.load_full() {
            client.session().set_timeout(timeout)?;
        }
        Ok(())
    }

    async fn switch(&self, target: &Target, on: bool) -> Result<(), CoreError> {
        let service = if on { "turn_on" } else { "turn_off" };
        self.inner
            .call(target, Capability::Switch, service, json!({}))
            .await
    }

    async fn brightness(&self, target: &Target, value: f64) -> Result<(), CoreError> {
        if value <= 0.0 {
            return self
                .inner
                .call(target, Capability::Brightness, "turn_off", json!({}))
                .await;
        }
        let data = json!({ "brightness_pct": to_percent(value) });
        self.inner
            .call(target, Capability::Brightness, "turn_on", data)
            .await
    }

    async fn color(&self, target: &Target, color: Rgb) -> Result<(), CoreError> {
        let data = json!({ "rgb_color": [color.red, color.green, color.blue] });
        self.inner.call(target, Capability::Color, "turn_on", data).await
    }

    async fn color_temperature(&self, target: &Target, color: Rgb) -> Result<(), CoreError> {
        let kelvin = rgb_to_kelvin(color, self.inner.kelvin_range(target));
        let data = json!({ "color_temp_kelvin": kelvin });
        self.inner
            .call(target, Capability::ColorTemperature, "turn_on", data)
            .await
    }

    async fn position(&self, target: &Target, value: f64) -> Result<(), CoreError> {
        let data = json!({ "position": to_percent(value) });
        self.inner
            .call(target, Capability::Position, "set_cover_position", data)
            .await
    }

    async fn up(&self, target: &Target) -> Result<(), CoreError> {
        self.inner
            .call(target, Capability::Up, "open_cover", json!({}))
            .await
    }

    async fn down(&self, target: &Target) -> Result<(), CoreError> {
        self.inner
            .call(target, Capability::Down, "close_cover", json!({}))
            .await
    }

    async fn scene(&self, scene: &str, targets: &[String]) -> Result<(), CoreError> {
        let entities = self.inner.scene_entities(scene, targets);
        if entities.is_empty() {
            return Err(CoreError::unknown_device(scene));
        }
        let client = self.inner.client()?;
        for (domain, ids) in by_domain(entities) {
            client
                .call_service(&domain, "turn_on", &json!({ "entity_id": ids }))
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn entities_split_by_domain() {
        let split = by_domain(vec![
            "light.a".into(),
            "switch.b".into(),
            "light.c".into(),
        ]);
        assert_eq!(split["light"], vec!["light.a".to_owned(), "light.c".to_owned()]);
        assert_eq!(split["switch"], vec!["switch.b".to_owned()]);
    }
}
