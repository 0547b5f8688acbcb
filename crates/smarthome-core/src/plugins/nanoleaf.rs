// Nanoleaf plugin: any number of panel controllers under one instance.
//
// Each controller is its own unit with four facets. The controllers drop
// requests when busy, so facets of one device are fetched in sequence;
// different devices are fetched concurrently.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::join_all;
use secrecy::SecretString;
use serde_json::{Value, json};
use smarthome_api::{NanoleafClient, TlsMode, TransportConfig};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::common::{ClientEventHandler, PluginShared, spawn_listener};
use crate::bridge::{Action, ActionSet, BridgeEvent, BridgeKind, Connectivity, DeviceBridge, Target};
use crate::color::{Rgb, rgb_to_hsv, rgb_to_kelvin};
use crate::config::{BridgeOptions, NanoleafConfig};
use crate::error::CoreError;
use crate::login::LoginReplay;
use crate::model::{ALL_GROUP, CanonicalTree, Capability, SCENE_PREFIX};
use crate::normalize::nanoleaf::{self, NanoleafRecord};
use crate::normalize::{EventOutcome, to_percent};
use crate::reconcile::{Facet, Reconciler, Signal};
use crate::stream::TreeStream;

const FACETS: [Facet; 4] = [Facet::Info, Facet::State, Facet::EffectsList, Facet::CurrentEffect];

const ACTIONS: ActionSet = ActionSet::EMPTY
    .with_both(Action::Switch)
    .with_both(Action::Brightness)
    .with_both(Action::Color)
    .with_both(Action::ColorTemperature)
    .with_both(Action::Scene);

pub struct NanoleafPlugin {
    inner: Arc<NanoleafInner>,
}

struct NanoleafInner {
    shared: PluginShared,
    config: NanoleafConfig,
    clients: DashMap<String, Arc<NanoleafClient>>,
    records: Mutex<BTreeMap<String, NanoleafRecord>>,
    /// One full fetch at a time.
    fetching: tokio::sync::Mutex<()>,
}

impl NanoleafPlugin {
    pub fn new(id: &str, config: NanoleafConfig, options: BridgeOptions) -> Self {
        let units: Vec<String> = config.devices.iter().map(|d| d.key.clone()).collect();
        Self {
            inner: Arc::new(NanoleafInner {
                shared: PluginShared::new(id, BridgeKind::Nanoleaf, options, Reconciler::new(&FACETS, units)),
                config,
                clients: DashMap::new(),
                records: Mutex::new(BTreeMap::new()),
                fetching: tokio::sync::Mutex::new(()),
            }),
        }
    }
}

impl NanoleafInner {
    fn client(&self, key: &str) -> Result<Arc<NanoleafClient>, CoreError> {
        self.clients
            .get(key)
            .map(|c| Arc::clone(c.value()))
            .ok_or_else(|| CoreError::NotConnected {
                bridge: format!("{}/{key}", self.shared.id),
            })
    }

    fn records(&self) -> MutexGuard<'_, BTreeMap<String, NanoleafRecord>> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Record a facet failure; a malformed reply drops the device's
    /// working data.
    fn absorb(&self, key: &str, err: smarthome_api::Error) -> Result<(), CoreError> {
        if self.shared.absorb(key, err)? == smarthome_api::ErrorKind::Parse {
            self.records().remove(key);
        }
        Ok(())
    }

    /// Fetch the four facets of one device. Stops at the first failure.
    async fn fetch_device(&self, key: &str) -> Result<Signal, CoreError> {
        let client = self.client(key)?;
        let mut signal = Signal::None;

        let info = match client.info().await {
            Ok(info) => info,
            Err(e) => return self.absorb(key, e).map(|()| signal),
        };
        self.records().entry(key.to_owned()).or_default().info = Some(info);
        signal = signal.merge(self.shared.facet_arrived(key, Facet::Info));

        let state = match client.state().await {
            Ok(state) => state,
            Err(e) => return self.absorb(key, e).map(|()| signal),
        };
        self.records().entry(key.to_owned()).or_default().state = Some(state);
        signal = signal.merge(self.shared.facet_arrived(key, Facet::State));

        let effects = match client.effects_list().await {
            Ok(effects) => effects,
            Err(e) => return self.absorb(key, e).map(|()| signal),
        };
        self.records().entry(key.to_owned()).or_default().effects = Some(effects);
        signal = signal.merge(self.shared.facet_arrived(key, Facet::EffectsList));

        let current = match client.current_effect().await {
            Ok(current) => current,
            Err(e) => return self.absorb(key, e).map(|()| signal),
        };
        self.records().entry(key.to_owned()).or_default().current_effect = Some(current);
        signal = signal.merge(self.shared.facet_arrived(key, Facet::CurrentEffect));

        if let Err(e) = client.keep_event_stream() {
            warn!(bridge = %self.shared.id, device = %key, error = %e, "could not open Nanoleaf event stream");
        }
        Ok(signal)
    }

    async fn fetch(&self) -> Result<(), CoreError> {
        let _guard = self.fetching.lock().await;
        let keys: Vec<String> = self.config.devices.iter().map(|d| d.key.clone()).collect();
        let results = join_all(keys.iter().map(|key| self.fetch_device(key))).await;

        let mut signal = Signal::None;
        for result in results {
            signal = signal.merge(result?);
        }
        let previous = self.shared.store.snapshot();
        let tree = nanoleaf::build(&self.records(), Some(&previous));
        self.shared.publish(tree, signal);
        Ok(())
    }

    /// PUT `body` to every capable device of `target`.
    async fn put(&self, target: &Target, capability: Capability, body: impl Fn(&str) -> Value) -> Result<(), CoreError> {
        let ids = self.shared.members_with(target, capability)?;
        let body = &body;
        self.shared
            .each(ids, |key| async move {
                let client = self.client(&key)?;
                Ok(client.set_state(&body(&key)).await?)
            })
            .await
    }

    fn kelvin_range(&self, key: &str) -> Option<(u32, u32)> {
        let tree = self.shared.store.snapshot();
        let device = tree.device(key)?;
        Some((device.ct_min?, device.ct_max?))
    }
}

#[async_trait]
impl ClientEventHandler for NanoleafInner {
    fn shared(&self) -> &PluginShared {
        &self.shared
    }

    async fn on_stream_data(self: Arc<Self>, unit: &str, data: &Value) {
        let outcome = match self.records().get_mut(unit) {
            Some(record) => record.apply_event(data),
            None => EventOutcome::Ignored,
        };
        if !outcome.changed() {
            return;
        }
        self.shared.patch(unit, |tree| {
            let mut rebuilt = nanoleaf::build(&self.records(), Some(&*tree));
            self.shared.apply_availability(&mut rebuilt);
            let changed = rebuilt != *tree;
            *tree = rebuilt;
            changed
        });
    }

    async fn refresh(self: Arc<Self>) {
        if let Err(e) = self.fetch().await {
            warn!(bridge = %self.shared.id, error = %e, "Nanoleaf refresh failed");
        }
    }
}

#[async_trait]
impl DeviceBridge for NanoleafPlugin {
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
        let timeout = self.inner.shared.options.timeout;
        for device in &self.inner.config.devices {
            if self.inner.clients.contains_key(&device.key) {
                continue;
            }
            let transport = TransportConfig::new(TlsMode::System, timeout);
            let client = NanoleafClient::for_host(&device.ip, device.port, device.token.clone(), transport)?;
            spawn_listener(&self.inner, &device.key, client.tracker());
            self.inner.clients.insert(device.key.clone(), Arc::new(client));
            debug!(bridge = %self.inner.shared.id, device = %device.key, "Nanoleaf prepared");
        }
        Ok(())
    }

    async fn request_data(&self) -> Result<(), CoreError> {
        self.inner.fetch().await
    }

    async fn clear_instance(&self) {
        for entry in &self.inner.clients {
            entry.value().stop_event_stream();
            entry.value().tracker().reset();
        }
        self.inner.clients.clear();
        self.inner.shared.clear();
        self.inner.records().clear();
    }

    fn set_timeout(&self, timeout: Duration) -> Result<(), CoreError> {
        for entry in &self.inner.clients {
            entry.value().session().set_timeout(timeout)?;
        }
        Ok(())
    }

    /// Pair one controller; `unit` may be left out when only one is
    /// configured.
    async fn pair(&self, unit: Option<&str>, cancel: &CancellationToken) -> Result<SecretString, CoreError> {
        let key = match (unit, self.inner.config.devices.as_slice()) {
            (Some(key), _) => key.to_owned(),
            (None, [only]) => only.key.clone(),
            (None, _) => {
                return Err(CoreError::Config {
                    message: "several Nanoleaf devices configured, name the one to pair".into(),
                });
            }
        };
        let client = self.inner.client(&key)?;
        Ok(client.pair(self.inner.shared.options.pairing, cancel).await?)
    }

    async fn switch(&self, target: &Target, on: bool) -> Result<(), CoreError> {
        self.inner
            .put(target, Capability::Switch, |_| json!({ "on": { "value": on } }))
            .await
    }

    async fn brightness(&self, target: &Target, value: f64) -> Result<(), CoreError> {
        if value <= 0.0 {
            return self.switch(target, false).await;
        }
        let level = to_percent(value);
        self.inner
            .put(target, Capability::Brightness, |_| json!({ "brightness": { "value": level } }))
            .await
    }

    async fn color(&self, target: &Target, color: Rgb) -> Result<(), CoreError> {
        let hsv = rgb_to_hsv(color);
        let (hue, sat) = (hsv.h.round() as u32, hsv.s.round() as u32);
        self.inner
            .put(target, Capability::Color, |_| {
                json!({ "hue": { "value": hue }, "sat": { "value": sat } })
            })
            .await
    }

    async fn color_temperature(&self, target: &Target, color: Rgb) -> Result<(), CoreError> {
        let inner = &self.inner;
        inner
            .put(target, Capability::ColorTemperature, |key| {
                json!({ "ct": { "value": rgb_to_kelvin(color, inner.kelvin_range(key)) } })
            })
            .await
    }

    /// Effects are per controller: the effect is selected on each target
    /// that lists it.
    async fn scene(&self, scene: &str, targets: &[String]) -> Result<(), CoreError> {
        let name = scene.strip_prefix(SCENE_PREFIX).unwrap_or(scene);
        let everywhere = targets.iter().any(|t| t == ALL_GROUP);
        let keys: Vec<String> = self
            .inner
            .records()
            .iter()
            .filter(|(key, record)| {
                (everywhere || targets.contains(key))
                    && record.effects.iter().flatten().any(|e| e == name)
            })
            .map(|(key, _)| key.clone())
            .collect();
        if keys.is_empty() {
            return Err(CoreError::unknown_device(scene));
        }
        let inner = &self.inner;
        inner
            .shared
            .each(keys, |key| async move {
                let client = inner.client(&key)?;
                Ok(client.select_effect(name).await?)
            })
            .await
    }
}
