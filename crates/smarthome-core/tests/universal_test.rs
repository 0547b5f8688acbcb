// Universal aggregator over two Shelly plugins backed by wiremock.
#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use smarthome_core::config::{ShellyConfig, ShellyDevice};
use smarthome_core::plugins::ShellyPlugin;
use smarthome_core::universal::merged_group_id;
use smarthome_core::login::LoginReplay;
use smarthome_core::{
    ActionSet, BridgeEvent, BridgeKind, BridgeOptions, CanonicalTree, Connectivity, CoreError, DeviceBridge, Target,
    TreeStore, TreeStream, UniversalBridge,
};
use tokio::sync::broadcast;

// ── Helpers ─────────────────────────────────────────────────────────

async fn living_room_switch() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/shelly"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "gen": 2,
            "model": "SNSW-001X16EU",
            "name": "Living Room",
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rpc"))
        .and(body_partial_json(json!({ "method": "Shelly.GetConfig" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 1, "result": {} })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rpc"))
        .and(body_partial_json(json!({ "method": "Shelly.GetStatus" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 1,
            "result": { "switch:0": { "id": 0, "output": false } },
        })))
        .mount(&server)
        .await;
    server
}

fn shelly(id: &str, key: &str, server: &MockServer) -> Arc<dyn DeviceBridge> {
    let config = ShellyConfig {
        devices: vec![ShellyDevice {
            key: key.into(),
            ip: server.address().to_string(),
            username: None,
            password: None,
        }],
    };
    let options = BridgeOptions {
        timeout: Duration::from_secs(2),
        ..BridgeOptions::default()
    };
    Arc::new(ShellyPlugin::new(id, config, options))
}

/// Child whose refresh takes a while and counts how many run at once.
struct SlowChild {
    store: TreeStore,
    login: LoginReplay,
    events: broadcast::Sender<BridgeEvent>,
    active: AtomicUsize,
    peak: AtomicUsize,
    refreshes: AtomicUsize,
}

impl SlowChild {
    fn new() -> Self {
        let (events, _) = broadcast::channel(4);
        Self {
            store: TreeStore::new(),
            login: LoginReplay::new(),
            events,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DeviceBridge for SlowChild {
    fn id(&self) -> &str {
        "slow"
    }

    fn kind(&self) -> BridgeKind {
        BridgeKind::Shelly
    }

    fn actions(&self) -> ActionSet {
        ActionSet::EMPTY
    }

    fn tree(&self) -> Arc<CanonicalTree> {
        self.store.snapshot()
    }

    fn watch(&self) -> TreeStream {
        self.store.subscribe()
    }

    fn events(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    fn connectivity(&self) -> Connectivity {
        Connectivity::Connected
    }

    fn login_replay(&self) -> &LoginReplay {
        &self.login
    }

    async fn prepare(&self) -> Result<(), CoreError> {
        Ok(())
    }

    async fn request_data(&self) -> Result<(), CoreError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn clear_instance(&self) {}

    fn set_timeout(&self, _timeout: Duration) -> Result<(), CoreError> {
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_same_named_groups_merge_and_route() {
    let first = living_room_switch().await;
    let second = living_room_switch().await;
    for server in [&first, &second] {
        Mock::given(method("POST"))
            .and(path("/rpc"))
            .and(body_partial_json(json!({
                "method": "Switch.Set",
                "params": { "id": 0, "on": true },
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 1, "result": {} })))
            .expect(1)
            .mount(server)
            .await;
    }

    let universal = UniversalBridge::new("universal");
    universal.add_plugin("kitchen", shelly("kitchen", "k", &first)).unwrap();
    universal.add_plugin("lounge", shelly("lounge", "l", &second)).unwrap();
    assert_eq!(universal.kind(), BridgeKind::Universal);

    universal.prepare().await.unwrap();
    universal.request_data().await.unwrap();

    let tree = universal.tree();
    let group_id = merged_group_id("Living Room");
    assert_eq!(tree.groups.len(), 1);
    assert_eq!(
        tree.groups[&group_id].devices,
        vec!["kitchen::k:switch:0".to_owned(), "lounge::l:switch:0".to_owned()]
    );

    let target = Target::resolve(&tree, &group_id).unwrap();
    universal.switch(&target, true).await.unwrap();
    universal.clear_instance().await;
}

#[tokio::test]
async fn test_unknown_plugin_is_reported() {
    let universal = UniversalBridge::new("universal");
    let err = universal
        .switch(&Target::single("nowhere::x"), true)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::UnknownPlugin { .. }));

    let err = universal.add_plugin("a::b", universal_child()).unwrap_err();
    assert!(matches!(err, CoreError::InvalidId { .. }));
}

fn universal_child() -> Arc<dyn DeviceBridge> {
    Arc::new(UniversalBridge::new("nested"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_refreshes_run_one_at_a_time() {
    let child = Arc::new(SlowChild::new());
    let universal = Arc::new(UniversalBridge::new("universal"));
    universal.add_plugin("slow", Arc::clone(&child) as Arc<dyn DeviceBridge>).unwrap();

    let first = tokio::spawn({
        let universal = Arc::clone(&universal);
        async move { universal.request_data().await }
    });
    let second = tokio::spawn({
        let universal = Arc::clone(&universal);
        async move { universal.request_data().await }
    });
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    assert_eq!(child.refreshes.load(Ordering::SeqCst), 2);
    assert_eq!(child.peak.load(Ordering::SeqCst), 1);
    universal.clear_instance().await;
}
