// Shelly plugin: any number of gen1/gen2 devices under one instance.
//
// Shellies have no push channel. Each device is a unit with an info and
// a status facet; writes schedule a re-poll.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::join_all;
use serde_json::Value;
use smarthome_api::shelly::CoverCommand;
use smarthome_api::{ShellyClient, TlsMode, TransportConfig};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::common::{ClientEventHandler, PluginShared, spawn_listener};
use crate::bridge::{Action, ActionSet, BridgeEvent, BridgeKind, Connectivity, DeviceBridge, Target};
use crate::color::Rgb;
use crate::config::{BridgeOptions, ShellyConfig};
use crate::error::CoreError;
use crate::login::LoginReplay;
use crate::model::{CanonicalTree, Capability};
use crate::normalize::shelly::{self, ShellyChannel, ShellyComponent, ShellyRecord};
use crate::normalize::to_percent;
use crate::reconcile::{Facet, Reconciler, Signal};
use crate::stream::TreeStream;

const ACTIONS: ActionSet = ActionSet::EMPTY
    .with_both(Action::Switch)
    .with_both(Action::Brightness)
    .with_both(Action::Color)
    .with_both(Action::Position)
    .with_both(Action::Up)
    .with_both(Action::Down);

pub struct ShellyPlugin {
    inner: Arc<ShellyInner>,
}

struct ShellyInner {
    shared: PluginShared,
    config: ShellyConfig,
    clients: DashMap<String, Arc<ShellyClient>>,
    records: Mutex<BTreeMap<String, ShellyRecord>>,
}

impl ShellyPlugin {
    pub fn new(id: &str, config: ShellyConfig, options: BridgeOptions) -> Self {
        let units: Vec<String> = config.devices.iter().map(|d| d.key.clone()).collect();
        Self {
            inner: Arc::new(ShellyInner {
                shared: PluginShared::new(
                    id,
                    BridgeKind::Shelly,
                    options,
                    Reconciler::new(&[Facet::Info, Facet::Status], units),
                ),
                config,
                clients: DashMap::new(),
                records: Mutex::new(BTreeMap::new()),
            }),
        }
    }
}

impl ShellyInner {
    fn client(&self, key: &str) -> Result<Arc<ShellyClient>, CoreError> {
        self.clients
            .get(key)
            .map(|c| Arc::clone(c.value()))
            .ok_or_else(|| CoreError::NotConnected {
                bridge: format!("{}/{key}", self.shared.id),
            })
    }

    fn records(&self) -> MutexGuard<'_, BTreeMap<String, ShellyRecord>> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn absorb(&self, key: &str, err: smarthome_api::Error) -> Result<(), CoreError> {
        if self.shared.absorb(key, err)? == smarthome_api::ErrorKind::Parse {
            self.records().remove(key);
        }
        Ok(())
    }

    async fn fetch_device(&self, key: &str) -> Result<Signal, CoreError> {
        let client = self.client(key)?;
        let mut signal = Signal::None;

        // Identity and channel names only change on reconfiguration.
        let known = self.records().get(key).is_some_and(|r| r.info.is_some());
        if !known {
            let info = match client.detect().await {
                Ok(info) => info,
                Err(e) => return self.absorb(key, e).map(|()| signal),
            };
            let config = match client.config().await {
                Ok(config) => Some(config),
                Err(e) => {
                    debug!(device = %key, error = %e, "no Shelly config, using default names");
                    None
                }
            };
            let mut records = self.records();
            let record = records.entry(key.to_owned()).or_default();
            record.info = Some(info);
            record.config = config;
        }
        signal = self.shared.facet_arrived(key, Facet::Info);

        match client.status().await {
            Ok(status) => {
                self.records().entry(key.to_owned()).or_default().status = Some(status);
                signal = signal.merge(self.shared.facet_arrived(key, Facet::Status));
            }
            Err(e) => self.absorb(key, e)?,
        }
        Ok(signal)
    }

    async fn fetch(&self) -> Result<(), CoreError> {
        let keys: Vec<String> = self.config.devices.iter().map(|d| d.key.clone()).collect();
        let results = join_all(keys.iter().map(|key| self.fetch_device(key))).await;

        let mut signal = Signal::None;
        for result in results {
            signal = signal.merge(result?);
        }
        let previous = self.shared.store.snapshot();
        let tree = shelly::build(&self.records(), Some(&previous));
        self.shared.publish(tree, signal);
        Ok(())
    }

    /// Run `step` on each channel of `target` that has `capability`.
    async fn each_channel<F, Fut>(&self, target: &Target, capability: Capability, step: F) -> Result<(), CoreError>
    where
        F: Fn(Arc<ShellyClient>, ShellyChannel) -> Fut,
        Fut: Future<Output = Result<(), smarthome_api::Error>>,
    {
        let ids = self.shared.members_with(target, capability)?;
        let step = &step;
        self.shared
            .each(ids, |id| async move {
                let channel = ShellyChannel::parse(&id)?;
                let client = self.client(&channel.key)?;
                Ok(step(client, channel).await?)
            })
            .await
    }
}

#[async_trait]
impl ClientEventHandler for ShellyInner {
    fn shared(&self) -> &PluginShared {
        &self.shared
    }

    async fn on_stream_data(self: Arc<Self>, unit: &str, _data: &Value) {
        debug!(%unit, "Shelly has no stream, ignoring data");
    }

    async fn refresh(self: Arc<Self>) {
        if let Err(e) = self.fetch().await {
            warn!(bridge = %self.shared.id, error = %e, "Shelly refresh failed");
        }
    }
}

#[async_trait]
impl DeviceBridge for ShellyPlugin {
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
            let client = ShellyClient::for_host(&device.ip, device.username.clone(), device.password.clone(), transport)?;
            spawn_listener(&self.inner, &device.key, client.tracker());
            self.inner.clients.insert(device.key.clone(), Arc::new(client));
        }
        Ok(())
    }

    async fn request_data(&self) -> Result<(), CoreError> {
        self.inner.fetch().await
    }

    async fn clear_instance(&self) {
        for entry in &self.inner.clients {
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

    async fn switch(&self, target: &Target, on: bool) -> Result<(), CoreError> {
        self.inner
            .each_channel(target, Capability::Switch, |client, channel| async move {
                match channel.component {
                    ShellyComponent::Switch => client.set_switch(channel.index, on).await,
                    ShellyComponent::Light => client.set_light(channel.index, on, None).await,
                    ShellyComponent::Rgb => client.set_rgb_power(channel.index, on).await,
                    ShellyComponent::Cover => Ok(()),
                }
            })
            .await
    }

    async fn brightness(&self, target: &Target, value: f64) -> Result<(), CoreError> {
        let level = to_percent(value);
        self.inner
            .each_channel(target, Capability::Brightness, |client, channel| async move {
                client.set_light(channel.index, level > 0, Some(level)).await
            })
            .await
    }

    async fn color(&self, target: &Target, color: Rgb) -> Result<(), CoreError> {
        self.inner
            .each_channel(target, Capability::Color, |client, channel| async move {
                client
                    .set_color(channel.index, [color.red, color.green, color.blue])
                    .await
            })
            .await
    }

    async fn position(&self, target: &Target, value: f64) -> Result<(), CoreError> {
        let position = to_percent(value);
        self.inner
            .each_channel(target, Capability::Position, |client, channel| async move {
                client
                    .cover(channel.index, CoverCommand::ToPosition(position))
                    .await
            })
            .await
    }

    async fn up(&self, target: &Target) -> Result<(), CoreError> {
        self.inner
            .each_channel(target, Capability::Up, |client, channel| async move {
                client.cover(channel.index, CoverCommand::Open).await
            })
            .await
    }

    async fn down(&self, target: &Target) -> Result<(), CoreError> {
        self.inner
            .each_channel(target, Capability::Down, |client, channel| async move {
                client.cover(channel.index, CoverCommand::Close).await
            })
            .await
    }
}
