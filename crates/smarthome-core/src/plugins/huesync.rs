// Philips Hue HDMI sync box plugin.
//
// The box has no push channel: every refresh is a full state poll, and
// each write schedules one.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::Value;
use smarthome_api::huesync::{MAX_BRIGHTNESS, SyncIntensity};
use smarthome_api::{HueSyncClient, TransportConfig};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::common::{ClientEventHandler, PluginShared, scene_key, spawn_listener};
use crate::bridge::{Action, ActionSet, BridgeEvent, BridgeKind, Connectivity, DeviceBridge, Scope, Target};
use crate::config::{BridgeOptions, HueSyncConfig};
use crate::error::CoreError;
use crate::login::LoginReplay;
use crate::model::CanonicalTree;
use crate::normalize::huesync::{self, SYNC_DEVICE, SyncIndex, SyncScene};
use crate::reconcile::{BRIDGE_UNIT, Facet, Reconciler};
use crate::stream::TreeStream;

const APP_NAME: &str = "smarthome";

const ACTIONS: ActionSet = ActionSet::EMPTY
    .with(Action::Switch, Scope::Single)
    .with(Action::Brightness, Scope::Single)
    .with_both(Action::Scene);

pub struct HueSyncPlugin {
    inner: Arc<SyncInner>,
}

struct SyncInner {
    shared: PluginShared,
    config: HueSyncConfig,
    client: ArcSwapOption<HueSyncClient>,
    index: Mutex<SyncIndex>,
}

impl HueSyncPlugin {
    pub fn new(id: &str, config: HueSyncConfig, options: BridgeOptions) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                shared: PluginShared::new(id, BridgeKind::HueSync, options, Reconciler::single(&[Facet::Status])),
                config,
                client: ArcSwapOption::empty(),
                index: Mutex::new(SyncIndex::new()),
            }),
        }
    }

    pub async fn set_intensity(&self, intensity: SyncIntensity) -> Result<(), CoreError> {
        Ok(self.inner.client()?.set_intensity(intensity).await?)
    }

    /// Standby (power-save mode) or back to syncing.
    pub async fn set_power(&self, on: bool) -> Result<(), CoreError> {
        info!(bridge = %self.inner.shared.id, on, "sync box power");
        Ok(self.inner.client()?.set_power(on).await?)
    }
}

impl SyncInner {
    fn client(&self) -> Result<Arc<HueSyncClient>, CoreError> {
        self.client.load_full().ok_or_else(|| CoreError::NotConnected {
            bridge: self.shared.id.clone(),
        })
    }

    fn index(&self) -> std::sync::MutexGuard<'_, SyncIndex> {
        self.index
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    async fn fetch(&self) -> Result<(), CoreError> {
        match self.client()?.state().await {
            Ok(state) => {
                let previous = self.shared.store.snapshot();
                let (tree, index) = huesync::build(&state, Some(&previous));
                *self.index() = index;
                let signal = self.shared.facet_arrived(BRIDGE_UNIT, Facet::Status);
                self.shared.publish(tree, signal);
                Ok(())
            }
            Err(e) => {
                self.shared.absorb(BRIDGE_UNIT, e)?;
                Ok(())
            }
        }
    }

    fn expect_device(target: &Target) -> Result<(), CoreError> {
        match target {
            Target::Single(id) if id == SYNC_DEVICE => Ok(()),
            other => Err(CoreError::unknown_device(other.id())),
        }
    }
}

#[async_trait]
impl ClientEventHandler for SyncInner {
    fn shared(&self) -> &PluginShared {
        &self.shared
    }

    async fn on_stream_data(self: Arc<Self>, unit: &str, _data: &Value) {
        debug!(%unit, "sync box has no stream, ignoring data");
    }

    async fn refresh(self: Arc<Self>) {
        if let Err(e) = self.fetch().await {
            warn!(bridge = %self.shared.id, error = %e, "sync box refresh failed");
        }
    }
}

#[async_trait]
impl DeviceBridge for HueSyncPlugin {
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
        let transport = TransportConfig::new(self.inner.config.tls(), self.inner.shared.options.timeout);
        let client = HueSyncClient::for_host(&self.inner.config.ip, self.inner.config.token.clone(), transport)?;
        spawn_listener(&self.inner, BRIDGE_UNIT, client.tracker());
        self.inner.client.store(Some(Arc::new(client)));
        Ok(())
    }

    async fn request_data(&self) -> Result<(), CoreError> {
        self.inner.fetch().await
    }

    async fn clear_instance(&self) {
        if let Some(client) = self.inner.client.swap(None) {
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
            .register(APP_NAME, &self.inner.shared.id, self.inner.shared.options.pairing, cancel)
            .await?)
    }

    async fn switch(&self, target: &Target, on: bool) -> Result<(), CoreError> {
        SyncInner::expect_device(target)?;
        Ok(self.inner.client()?.set_sync_active(on).await?)
    }

    async fn brightness(&self, target: &Target, value: f64) -> Result<(), CoreError> {
        SyncInner::expect_device(target)?;
        let level = (value.clamp(0.0, 1.0) * f64::from(MAX_BRIGHTNESS)).round() as u32;
        Ok(self.inner.client()?.set_brightness(level).await?)
    }

    async fn scene(&self, scene: &str, _targets: &[String]) -> Result<(), CoreError> {
        let command = self
            .inner
            .index()
            .get(&scene_key(scene))
            .cloned()
            .ok_or_else(|| CoreError::unknown_device(scene))?;
        let client = self.inner.client()?;
        match command {
            SyncScene::Mode(mode) => client.set_mode(mode).await?,
            SyncScene::Input(input) => client.set_hdmi_source(&input).await?,
        }
        Ok(())
    }
}
