// ── Universal aggregator ──
//
// Presents several plugin instances as one bridge. Every child id is
// re-keyed as `<plugin>::<id>`; groups are merged across plugins by name.
// Actions are split by owning plugin and forwarded to each child, which
// skips the ones it does not advertise.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::join_all;
use secrecy::SecretString;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::{
    Action, ActionRequest, ActionSet, BridgeEvent, BridgeKind, Connectivity, DeviceBridge, Scope, Target, dispatch,
};
use crate::color::Rgb;
use crate::error::CoreError;
use crate::login::LoginReplay;
use crate::model::{ALL_GROUP, AggregateId, CanonicalTree, ConfigEntry, Group, SCENE_PREFIX, SEPARATOR, scene_id};
use crate::store::TreeStore;
use crate::stream::TreeStream;
use crate::timers::TimerSet;

/// Plugin part of every merged group id.
pub const MERGED_GROUP: &str = "_group_";

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Merged group id for a group name.
pub fn merged_group_id(name: &str) -> String {
    format!("{MERGED_GROUP}{SEPARATOR}{name}")
}

/// Merged group id to the child groups it was built from.
type Routes = BTreeMap<String, Vec<AggregateId>>;

pub struct UniversalBridge {
    inner: Arc<UniversalInner>,
}

struct UniversalInner {
    id: String,
    children: DashMap<String, Arc<dyn DeviceBridge>>,
    watched: Mutex<BTreeSet<String>>,
    store: TreeStore,
    routes: ArcSwap<Routes>,
    timers: TimerSet,
    login: LoginReplay,
    events: broadcast::Sender<BridgeEvent>,
    /// One full refresh at a time.
    fetching: tokio::sync::Mutex<()>,
    /// Serializes merge and publish so routes and tree stay in step.
    merging: Mutex<()>,
}

impl UniversalBridge {
    pub fn new(id: &str) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(UniversalInner {
                id: id.to_owned(),
                children: DashMap::new(),
                watched: Mutex::new(BTreeSet::new()),
                store: TreeStore::new(),
                routes: ArcSwap::from_pointee(Routes::new()),
                timers: TimerSet::new(),
                login: LoginReplay::new(),
                events,
                fetching: tokio::sync::Mutex::new(()),
                merging: Mutex::new(()),
            }),
        }
    }

    /// Register a child under `plugin_id` and follow its tree. Ids must not
    /// contain the `::` separator.
    pub fn add_plugin(&self, plugin_id: &str, bridge: Arc<dyn DeviceBridge>) -> Result<(), CoreError> {
        if plugin_id.is_empty() || plugin_id.contains(SEPARATOR) || plugin_id == MERGED_GROUP {
            return Err(CoreError::InvalidId {
                id: plugin_id.to_owned(),
            });
        }
        self.inner.children.insert(plugin_id.to_owned(), bridge);
        self.inner.watch_child(plugin_id);
        self.inner.rebuild();
        Ok(())
    }

    pub fn plugin(&self, plugin_id: &str) -> Option<Arc<dyn DeviceBridge>> {
        self.inner.child(plugin_id).ok()
    }

    pub fn plugin_ids(&self) -> Vec<String> {
        self.inner.sorted_children().into_iter().map(|(id, _)| id).collect()
    }
}

impl UniversalInner {
    fn watched(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.watched
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn emit(&self, event: BridgeEvent) {
        let _ = self.events.send(event);
    }

    fn child(&self, plugin_id: &str) -> Result<Arc<dyn DeviceBridge>, CoreError> {
        self.children
            .get(plugin_id)
            .map(|c| Arc::clone(c.value()))
            .ok_or_else(|| CoreError::UnknownPlugin {
                id: plugin_id.to_owned(),
            })
    }

    fn sorted_children(&self) -> Vec<(String, Arc<dyn DeviceBridge>)> {
        let mut children: Vec<_> = self
            .children
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        children.sort_by(|a, b| a.0.cmp(&b.0));
        children
    }

    /// Follow one child's tree and events until cleared.
    fn watch_child(self: &Arc<Self>, plugin_id: &str) {
        if !self.watched().insert(plugin_id.to_owned()) {
            return;
        }
        let Ok(child) = self.child(plugin_id) else {
            return;
        };
        let inner = Arc::clone(self);
        let plugin_id = plugin_id.to_owned();
        self.timers.spawn(move |cancel| async move {
            let mut trees = child.watch();
            let mut events = child.events();
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    tree = trees.changed() => {
                        if tree.is_none() {
                            break;
                        }
                        inner.rebuild();
                    }
                    event = events.recv() => match event {
                        Ok(BridgeEvent::ConnectionProblem { .. }) => {
                            let connectivity = inner.connectivity();
                            warn!(bridge = %inner.id, plugin = %plugin_id, %connectivity, "child connection problem");
                            inner.emit(BridgeEvent::ConnectionProblem { connectivity });
                        }
                        Ok(BridgeEvent::DataReady { .. }) => {}
                        Ok(event) => inner.emit(event),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!(plugin = %plugin_id, skipped, "child events lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            debug!(plugin = %plugin_id, "stopped following child");
        });
    }

    /// Re-merge every child's current tree and publish if anything changed.
    fn rebuild(&self) {
        let _merging = self
            .merging
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let trees: Vec<(String, Arc<CanonicalTree>)> = self
            .sorted_children()
            .into_iter()
            .map(|(id, child)| (id, child.tree()))
            .collect();
        let (tree, routes) = merge(&trees);
        let previous = self.store.snapshot();
        if *previous == tree {
            return;
        }
        let rebuild = previous.devices.keys().ne(tree.devices.keys())
            || previous.groups.keys().ne(tree.groups.keys())
            || previous
                .groups
                .values()
                .zip(tree.groups.values())
                .any(|(a, b)| a.devices != b.devices);
        self.routes.store(Arc::new(routes));
        self.store.publish(tree);
        self.emit(BridgeEvent::DataReady { rebuild });
    }

    fn connectivity(&self) -> Connectivity {
        combine(self.children.iter().map(|c| c.value().connectivity()))
    }

    /// The child group a merged group stands for on `plugin_id`.
    fn child_group(&self, group: &str, plugin_id: &str) -> String {
        if group == ALL_GROUP {
            return ALL_GROUP.to_owned();
        }
        self.routes
            .load()
            .get(group)
            .and_then(|ids| ids.iter().find(|g| g.plugin == plugin_id))
            .map_or_else(|| group.to_owned(), |g| g.original.clone())
    }

    /// Forward `request` to the children owning `target`.
    async fn route(&self, target: &Target, request: ActionRequest) -> Result<(), CoreError> {
        match target {
            Target::Single(id) => {
                let id = AggregateId::parse(id)?;
                let child = self.child(&id.plugin)?;
                dispatch(child.as_ref(), &Target::single(id.original), &request).await?;
                Ok(())
            }
            Target::Group { id: group, members } => {
                let mut first_error = None;
                for (plugin_id, originals) in split_by_plugin(members)? {
                    let child = self.child(&plugin_id)?;
                    let child_target = Target::group(self.child_group(group, &plugin_id), originals);
                    if let Err(e) = dispatch(child.as_ref(), &child_target, &request).await {
                        warn!(bridge = %self.id, plugin = %plugin_id, error = %e, "group action failed");
                        first_error.get_or_insert(e);
                    }
                }
                first_error.map_or(Ok(()), Err)
            }
        }
    }

    /// Translate aggregate scene targets into `plugin_id`'s own ids.
    fn scene_targets(&self, plugin_id: &str, targets: &[String]) -> Vec<String> {
        let mut out = Vec::new();
        for target in targets {
            if target == ALL_GROUP {
                out.push(ALL_GROUP.to_owned());
                continue;
            }
            if let Some(groups) = self.routes.load().get(target) {
                out.extend(
                    groups
                        .iter()
                        .filter(|g| g.plugin == plugin_id)
                        .map(|g| g.original.clone()),
                );
                continue;
            }
            match AggregateId::parse(target) {
                Ok(id) if id.plugin == plugin_id => out.push(id.original),
                _ => {}
            }
        }
        out
    }
}

/// Aggregate member ids grouped by plugin, originals in input order.
fn split_by_plugin(members: &[String]) -> Result<BTreeMap<String, Vec<String>>, CoreError> {
    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for member in members {
        let id = AggregateId::parse(member)?;
        out.entry(id.plugin).or_default().push(id.original);
    }
    Ok(out)
}

/// Overall state of several children; ones that never tried are ignored
/// unless none has.
fn combine(states: impl Iterator<Item = Connectivity>) -> Connectivity {
    let known: Vec<Connectivity> = states.filter(|s| *s != Connectivity::Unknown).collect();
    if known.is_empty() {
        Connectivity::Unknown
    } else if known.iter().all(|s| *s == Connectivity::Connected) {
        Connectivity::Connected
    } else if known.iter().all(|s| *s == Connectivity::AllDown) {
        Connectivity::AllDown
    } else {
        Connectivity::PartiallyDown
    }
}

/// Re-key `id` from `plugin`'s namespace; groups map to their merged id.
fn rekey(plugin: &str, id: &str, child: &CanonicalTree) -> String {
    if id == ALL_GROUP {
        return ALL_GROUP.to_owned();
    }
    match child.groups.get(id) {
        Some(group) => merged_group_id(&group.name),
        None => AggregateId::new(plugin, id).to_string(),
    }
}

/// Build the aggregate tree from `(plugin id, tree)` pairs.
fn merge(children: &[(String, Arc<CanonicalTree>)]) -> (CanonicalTree, Routes) {
    let mut tree = CanonicalTree::new();
    let mut routes = Routes::new();

    for (plugin, child) in children {
        for (unit, entry) in &child.config {
            tree.config
                .insert(AggregateId::new(plugin, unit).to_string(), ConfigEntry::clone(entry));
        }

        for group in child.groups.values() {
            let id = merged_group_id(&group.name);
            routes
                .entry(id.clone())
                .or_default()
                .push(AggregateId::new(plugin, &group.id));
            if !tree.groups.contains_key(&id) {
                let mut merged = Group::new(id, group.name.clone()).with_icon(group.icon.clone());
                merged.section = group.section;
                tree.insert_group(merged);
            }
        }

        for device in child.devices.values() {
            let mut copy = device.clone();
            copy.id = AggregateId::new(plugin, &device.id).to_string();
            copy.groups.clear();
            for group in &device.groups {
                copy.add_group(rekey(plugin, group, child));
            }
            copy.associated.clear();
            for associated in &device.associated {
                copy.add_associated(rekey(plugin, associated, child));
            }
            tree.insert_device(copy);
        }
    }

    tree.rebuild_groups();
    (tree, routes)
}

#[async_trait]
impl DeviceBridge for UniversalBridge {
    fn id(&self) -> &str {
        &self.inner.id
    }

    fn kind(&self) -> BridgeKind {
        BridgeKind::Universal
    }

    /// Everything any child can do.
    fn actions(&self) -> ActionSet {
        self.inner
            .children
            .iter()
            .fold(ActionSet::EMPTY, |set, c| set.union(c.value().actions()))
    }

    fn tree(&self) -> Arc<CanonicalTree> {
        self.inner.store.snapshot()
    }

    fn watch(&self) -> TreeStream {
        self.inner.store.subscribe()
    }

    fn events(&self) -> broadcast::Receiver<BridgeEvent> {
        self.inner.events.subscribe()
    }

    fn connectivity(&self) -> Connectivity {
        self.inner.connectivity()
    }

    fn login_replay(&self) -> &LoginReplay {
        &self.inner.login
    }

    async fn prepare(&self) -> Result<(), CoreError> {
        let mut first_error = None;
        for (plugin_id, child) in self.inner.sorted_children() {
            self.inner.watch_child(&plugin_id);
            if let Err(e) = child.prepare().await {
                warn!(bridge = %self.inner.id, plugin = %plugin_id, error = %e, "child prepare failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn request_data(&self) -> Result<(), CoreError> {
        let _guard = self.inner.fetching.lock().await;
        let children = self.inner.sorted_children();
        let results = join_all(children.iter().map(|(_, child)| child.request_data())).await;

        let mut first_error = None;
        for ((plugin_id, _), result) in children.iter().zip(results) {
            if let Err(e) = result {
                warn!(bridge = %self.inner.id, plugin = %plugin_id, error = %e, "child refresh failed");
                first_error.get_or_insert(e);
            }
        }
        self.inner.rebuild();
        first_error.map_or(Ok(()), Err)
    }

    async fn clear_instance(&self) {
        self.inner.timers.clear();
        self.inner.watched().clear();
        for (_, child) in self.inner.sorted_children() {
            child.clear_instance().await;
        }
        self.inner.routes.store(Arc::new(Routes::new()));
        self.inner.store.clear();
    }

    fn set_timeout(&self, timeout: Duration) -> Result<(), CoreError> {
        for (_, child) in self.inner.sorted_children() {
            child.set_timeout(timeout)?;
        }
        Ok(())
    }

    /// `unit` names a child plugin, or `<plugin>::<unit>` for one device
    /// of a multi-device child.
    async fn pair(&self, unit: Option<&str>, cancel: &CancellationToken) -> Result<SecretString, CoreError> {
        let unit = unit.ok_or_else(|| CoreError::Config {
            message: "name the plugin to pair".into(),
        })?;
        match AggregateId::parse(unit) {
            Ok(id) => self.inner.child(&id.plugin)?.pair(Some(&id.original), cancel).await,
            Err(_) => self.inner.child(unit)?.pair(None, cancel).await,
        }
    }

    async fn switch(&self, target: &Target, on: bool) -> Result<(), CoreError> {
        self.inner.route(target, ActionRequest::Switch(on)).await
    }

    async fn brightness(&self, target: &Target, value: f64) -> Result<(), CoreError> {
        self.inner.route(target, ActionRequest::Brightness(value)).await
    }

    async fn color(&self, target: &Target, color: Rgb) -> Result<(), CoreError> {
        self.inner.route(target, ActionRequest::Color(color)).await
    }

    async fn color_temperature(&self, target: &Target, color: Rgb) -> Result<(), CoreError> {
        self.inner
            .route(target, ActionRequest::ColorTemperature(color))
            .await
    }

    async fn position(&self, target: &Target, value: f64) -> Result<(), CoreError> {
        self.inner.route(target, ActionRequest::Position(value)).await
    }

    async fn up(&self, target: &Target) -> Result<(), CoreError> {
        self.inner.route(target, ActionRequest::Up).await
    }

    async fn down(&self, target: &Target) -> Result<(), CoreError> {
        self.inner.route(target, ActionRequest::Down).await
    }

    /// `scene` is either an aggregate scene id, routed to its plugin, or a
    /// bare name, activated on every child that has a scene by that name.
    async fn scene(&self, scene: &str, targets: &[String]) -> Result<(), CoreError> {
        let owners: Vec<(String, String)> = match AggregateId::parse(scene) {
            Ok(id) if id.original.starts_with(SCENE_PREFIX) => vec![(id.plugin, id.original)],
            _ => {
                let key = if scene.starts_with(SCENE_PREFIX) {
                    scene.to_owned()
                } else {
                    scene_id(scene)
                };
                self.inner
                    .sorted_children()
                    .into_iter()
                    .filter(|(_, child)| child.tree().devices.contains_key(&key))
                    .map(|(plugin_id, _)| (plugin_id, key.clone()))
                    .collect()
            }
        };
        if owners.is_empty() {
            return Err(CoreError::unknown_device(scene));
        }

        let mut first_error = None;
        for (plugin_id, child_scene) in owners {
            let child = self.inner.child(&plugin_id)?;
            let child_targets = self.inner.scene_targets(&plugin_id, targets);
            if child_targets.is_empty() {
                debug!(plugin = %plugin_id, scene = %child_scene, "no targets on this plugin");
                continue;
            }
            let actions = child.actions();
            if !actions.supports(Action::Scene, Scope::Single) && !actions.supports(Action::Scene, Scope::Group) {
                debug!(plugin = %plugin_id, "plugin has no scenes, skipping");
                continue;
            }
            info!(plugin = %plugin_id, scene = %child_scene, "activating scene");
            if let Err(e) = child.scene(&child_scene, &child_targets).await {
                warn!(plugin = %plugin_id, error = %e, "scene failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::Device;

    fn child_tree(group_id: &str, devices: &[&str]) -> CanonicalTree {
        let mut tree = CanonicalTree::new();
        tree.insert_group(Group::new(group_id, "Living Room"));
        for id in devices {
            let mut device = Device::new(*id, *id);
            device.set_switch(false);
            device.add_group(group_id);
            tree.insert_device(device);
        }
        tree.add_scene("Relax", [group_id]);
        tree.config.insert("bridge".into(), ConfigEntry::default());
        tree.finalize(None);
        tree
    }

    #[test]
    fn same_named_groups_merge() {
        let children = vec![
            ("hue".to_owned(), Arc::new(child_tree("g1", &["l1", "l2"]))),
            ("shelly".to_owned(), Arc::new(child_tree("room", &["dev:switch:0"]))),
        ];
        let (tree, routes) = merge(&children);

        assert_eq!(tree.groups.len(), 1);
        let group = &tree.groups[&merged_group_id("Living Room")];
        assert_eq!(group.name, "Living Room");
        assert_eq!(
            group.devices,
            vec![
                "hue::l1".to_owned(),
                "hue::l2".to_owned(),
                "shelly::dev:switch:0".to_owned(),
            ]
        );
        assert_eq!(
            routes[&merged_group_id("Living Room")],
            vec![AggregateId::new("hue", "g1"), AggregateId::new("shelly", "room")]
        );
        assert!(tree.config.contains_key("hue::bridge"));
        assert!(tree.violations().is_empty());
    }

    #[test]
    fn scenes_keep_their_plugin_and_point_at_merged_groups() {
        let children = vec![("hue".to_owned(), Arc::new(child_tree("g1", &["l1"])))];
        let (tree, _) = merge(&children);
        let scene = &tree.devices["hue::scene:Relax"];
        assert!(scene.is_scene());
        assert_eq!(scene.associated, vec![merged_group_id("Living Room")]);
    }

    #[test]
    fn device_in_two_same_named_groups_is_listed_once() {
        let mut child = CanonicalTree::new();
        child.insert_group(Group::new("a", "Living Room"));
        child.insert_group(Group::new("b", "Kitchen"));
        child.insert_group(Group::new("c", "Living Room"));
        let mut device = Device::new("l1", "Lamp");
        device.set_switch(false);
        for group in ["a", "b", "c"] {
            device.add_group(group);
        }
        child.insert_device(device);
        child.finalize(None);

        let (tree, routes) = merge(&[("hue".to_owned(), Arc::new(child))]);
        let living = merged_group_id("Living Room");
        assert_eq!(tree.groups[&living].devices, vec!["hue::l1".to_owned()]);
        assert_eq!(tree.groups[&merged_group_id("Kitchen")].devices, vec!["hue::l1".to_owned()]);
        assert_eq!(
            tree.devices["hue::l1"].groups,
            vec![living.clone(), merged_group_id("Kitchen")]
        );
        assert_eq!(
            routes[&living],
            vec![AggregateId::new("hue", "a"), AggregateId::new("hue", "c")]
        );
    }

    #[test]
    fn members_split_by_plugin() {
        let split = split_by_plugin(&["a::1".into(), "b::2".into(), "a::3".into()]).unwrap();
        assert_eq!(split["a"], vec!["1".to_owned(), "3".to_owned()]);
        assert_eq!(split["b"], vec!["2".to_owned()]);
        assert!(split_by_plugin(&["plain".into()]).is_err());
    }

    #[test]
    fn connectivity_combines() {
        use Connectivity::{AllDown, Connected, PartiallyDown, Unknown};
        assert_eq!(combine([Unknown, Unknown].into_iter()), Unknown);
        assert_eq!(combine([Unknown, Connected].into_iter()), Connected);
        assert_eq!(combine([AllDown, AllDown].into_iter()), AllDown);
        assert_eq!(combine([Connected, AllDown].into_iter()), PartiallyDown);
    }
}
