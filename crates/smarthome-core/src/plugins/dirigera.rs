// IKEA Dirigera hub plugin.
//
// Full `/home` fetch plus WebSocket state deltas. The hub has no group
// endpoint, so room actions walk the members one PATCH at a time.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::{Value, json};
use smarthome_api::{DirigeraClient, TlsMode, TransportConfig};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::common::{ClientEventHandler, PluginShared, schedule_refresh, spawn_listener};
use crate::bridge::{Action, ActionSet, BridgeEvent, BridgeKind, Connectivity, DeviceBridge, Target};
use crate::color::{Rgb, rgb_to_hsv, rgb_to_kelvin};
use crate::config::{BridgeOptions, DirigeraConfig};
use crate::error::CoreError;
use crate::login::LoginReplay;
use crate::model::{CanonicalTree, Capability, SCENE_PREFIX};
use crate::normalize::dirigera::{
    self, ATTR_BLINDS, ATTR_HUE, ATTR_LEVEL, ATTR_ON, ATTR_SATURATION, ATTR_TEMPERATURE, DirigeraIndex,
};
use crate::normalize::{EventOutcome, to_percent};
use crate::reconcile::{BRIDGE_UNIT, Facet, Reconciler};
use crate::stream::TreeStream;

const CLIENT_NAME: &str = "smarthome";

const ACTIONS: ActionSet = ActionSet::EMPTY
    .with_both(Action::Switch)
    .with_both(Action::Brightness)
    .with_both(Action::Color)
    .with_both(Action::ColorTemperature)
    .with_both(Action::Position)
    .with_both(Action::Up)
    .with_both(Action::Down)
    .with_both(Action::Scene);

pub struct DirigeraPlugin {
    inner: Arc<DirigeraInner>,
}

struct DirigeraInner {
    shared: PluginShared,
    config: DirigeraConfig,
    client: ArcSwapOption<DirigeraClient>,
    index: Mutex<DirigeraIndex>,
}

impl DirigeraPlugin {
    pub fn new(id: &str, config: DirigeraConfig, options: BridgeOptions) -> Self {
        Self {
            inner: Arc::new(DirigeraInner {
                shared: PluginShared::new(id, BridgeKind::Dirigera, options, Reconciler::single(&[Facet::AllData])),
                config,
                client: ArcSwapOption::empty(),
                index: Mutex::new(DirigeraIndex::new()),
            }),
        }
    }
}

impl DirigeraInner {
    fn client(&self) -> Result<Arc<DirigeraClient>, CoreError> {
        self.client.load_full().ok_or_else(|| CoreError::NotConnected {
            bridge: self.shared.id.clone(),
        })
    }

    fn index(&self) -> std::sync::MutexGuard<'_, DirigeraIndex> {
        self.index
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    async fn fetch(&self) -> Result<(), CoreError> {
        let client = self.client()?;
        match client.home().await {
            Ok(home) => {
                let previous = self.shared.store.snapshot();
                let (tree, index) = dirigera::build(&home, Some(&previous));
                *self.index() = index;
                let signal = self.shared.facet_arrived(BRIDGE_UNIT, Facet::AllData);
                self.shared.publish(tree, signal);
                if let Err(e) = client.keep_event_stream() {
                    warn!(bridge = %self.shared.id, error = %e, "could not open Dirigera event stream");
                }
                Ok(())
            }
            Err(e) => {
                self.shared.absorb(BRIDGE_UNIT, e)?;
                Ok(())
            }
        }
    }

    /// PATCH the attributes built by `attributes` onto every capable
    /// device of `target`.
    async fn patch<F>(&self, target: &Target, capability: Capability, attributes: F) -> Result<(), CoreError>
    where
        F: Fn(&str) -> Value,
    {
        let client = self.client()?;
        let ids = self.shared.members_with(target, capability)?;
        let (client, attributes) = (&client, &attributes);
        self.shared
            .each(ids, |id| async move {
                let body = attributes(&id);
                Ok(client.patch_device(&id, body).await?)
            })
            .await
    }

    /// A device's temperature range, low end first. The hub reports it
    /// inverted.
    fn kelvin_range(&self, id: &str) -> Option<(u32, u32)> {
        let tree = self.shared.store.snapshot();
        let device = tree.device(id)?;
        let (a, b) = (device.ct_min?, device.ct_max?);
        Some((a.min(b), a.max(b)))
    }
}

#[async_trait]
impl ClientEventHandler for DirigeraInner {
    fn shared(&self) -> &PluginShared {
        &self.shared
    }

    async fn on_stream_data(self: Arc<Self>, unit: &str, data: &Value) {
        let mut refresh = false;
        self.shared.patch(unit, |tree| match dirigera::apply_event(tree, data) {
            EventOutcome::Patched => true,
            EventOutcome::NeedsRefresh => {
                refresh = true;
                false
            }
            EventOutcome::Ignored => false,
        });
        let kind = data.get("type").and_then(Value::as_str).unwrap_or_default();
        if refresh || kind.ends_with("Added") || kind.ends_with("Removed") {
            debug!(bridge = %self.shared.id, %kind, "structural change, re-fetching");
            schedule_refresh(&self);
        }
    }

    async fn refresh(self: Arc<Self>) {
        if let Err(e) = self.fetch().await {
            warn!(bridge = %self.shared.id, error = %e, "Dirigera refresh failed");
        }
    }
}

#[async_trait]
impl DeviceBridge for DirigeraPlugin {
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
        // The hub serves a self-signed certificate.
        let transport = TransportConfig::new(TlsMode::DangerAcceptInvalid, self.inner.shared.options.timeout);
        let config = &self.inner.config;
        let client = DirigeraClient::for_host(&config.ip, config.port, config.token.clone(), transport)?;
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
        self.inner.index().clear();
    }

    fn set_timeout(&self, timeout: Duration) -> Result<(), CoreError> {
        if let Some(client) = self.inner.client.load_full() {
            client.session().set_timeout(timeout)?;
        }
        Ok(())
    }

    async fn pair(&self, _unit: Option<&str>, cancel: &CancellationToken) -> Result<SecretString, CoreError> {
        let client = self.inner.client()?;
        Ok(client
            .pair(CLIENT_NAME, self.inner.shared.options.pairing, cancel)
            .await?)
    }

    async fn switch(&self, target: &Target, on: bool) -> Result<(), CoreError> {
        self.inner
            .patch(target, Capability::Switch, |_| json!({ ATTR_ON: on }))
            .await
    }

    async fn brightness(&self, target: &Target, value: f64) -> Result<(), CoreError> {
        // The hub rejects level 0; dimming to zero switches off instead.
        if value <= 0.0 {
            return self.switch(target, false).await;
        }
        let level = to_percent(value).max(1);
        self.inner
            .patch(target, Capability::Brightness, |_| json!({ ATTR_LEVEL: level }))
            .await
    }

    async fn color(&self, target: &Target, color: Rgb) -> Result<(), CoreError> {
        let hsv = rgb_to_hsv(color);
        let body = json!({ ATTR_HUE: hsv.h, ATTR_SATURATION: hsv.s / 100.0 });
        self.inner
            .patch(target, Capability::Color, |_| body.clone())
            .await
    }

    async fn color_temperature(&self, target: &Target, color: Rgb) -> Result<(), CoreError> {
        let inner = &self.inner;
        inner
            .patch(target, Capability::ColorTemperature, |id| {
                json!({ ATTR_TEMPERATURE: rgb_to_kelvin(color, inner.kelvin_range(id)) })
            })
            .await
    }

    async fn position(&self, target: &Target, value: f64) -> Result<(), CoreError> {
        let closed = 100 - to_percent(value);
        self.inner
            .patch(target, Capability::Position, |_| json!({ ATTR_BLINDS: closed }))
            .await
    }

    async fn up(&self, target: &Target) -> Result<(), CoreError> {
        self.inner
            .patch(target, Capability::Up, |_| json!({ ATTR_BLINDS: 0 }))
            .await
    }

    async fn down(&self, target: &Target) -> Result<(), CoreError> {
        self.inner
            .patch(target, Capability::Down, |_| json!({ ATTR_BLINDS: 100 }))
            .await
    }

    async fn scene(&self, scene: &str, _targets: &[String]) -> Result<(), CoreError> {
        let name = scene.strip_prefix(SCENE_PREFIX).unwrap_or(scene);
        let ids = self
            .inner
            .index()
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::unknown_device(scene))?;
        let client = self.inner.client()?;
        let client = &client;
        self.inner
            .shared
            .each(ids, |id| async move { Ok(client.trigger_scene(&id).await?) })
            .await
    }
}
