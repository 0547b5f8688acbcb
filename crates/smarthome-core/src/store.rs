// ── Tree store ──
//
// Owns the published canonical tree of one plugin instance. Readers get
// cheap `Arc` snapshots; writers replace or patch a copy and publish it
// through a `watch` channel.

use std::sync::Arc;

use tokio::sync::watch;

use crate::model::CanonicalTree;
use crate::stream::TreeStream;

pub struct TreeStore {
    sender: watch::Sender<Arc<CanonicalTree>>,
}

impl TreeStore {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(Arc::new(CanonicalTree::new()));
        Self { sender }
    }

    pub fn snapshot(&self) -> Arc<CanonicalTree> {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> TreeStream {
        TreeStream::new(self.sender.subscribe())
    }

    /// Replace the tree wholesale.
    pub fn publish(&self, tree: CanonicalTree) {
        self.sender.send_replace(Arc::new(tree));
    }

    /// Patch the current tree. `apply` returns whether anything changed;
    /// nothing is published otherwise.
    pub fn modify<F>(&self, apply: F) -> bool
    where
        F: FnOnce(&mut CanonicalTree) -> bool,
    {
        self.sender.send_if_modified(|current| {
            let mut next = CanonicalTree::clone(current);
            if apply(&mut next) {
                *current = Arc::new(next);
                true
            } else {
                false
            }
        })
    }

    pub fn clear(&self) {
        self.publish(CanonicalTree::new());
    }
}

impl Default for TreeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Device;

    #[tokio::test]
    async fn subscribers_see_published_trees() {
        let store = TreeStore::new();
        let mut stream = store.subscribe();
        assert!(stream.current().is_empty());

        let mut tree = CanonicalTree::new();
        tree.insert_device(Device::new("a", "A"));
        store.publish(tree);

        let latest = stream.changed().await.unwrap();
        assert!(latest.devices.contains_key("a"));
    }

    #[test]
    fn unchanged_patch_is_not_published() {
        let store = TreeStore::new();
        let before = store.snapshot();
        assert!(!store.modify(|_| false));
        assert!(Arc::ptr_eq(&before, &store.snapshot()));
        assert!(store.modify(|tree| {
            tree.insert_device(Device::new("a", "A"));
            true
        }));
        assert_eq!(store.snapshot().devices.len(), 1);
    }
}
