// ── Reactive tree streams ──
//
// Subscription handle for consuming canonical tree snapshots.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::model::CanonicalTree;

/// A subscription to one plugin's canonical tree.
///
/// Provides both point-in-time snapshot access and reactive change
/// notification via [`changed`](Self::changed) or by converting into a
/// `Stream`.
pub struct TreeStream {
    current: Arc<CanonicalTree>,
    receiver: watch::Receiver<Arc<CanonicalTree>>,
}

impl TreeStream {
    pub(crate) fn new(receiver: watch::Receiver<Arc<CanonicalTree>>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// The snapshot captured at creation (or at the last `changed`).
    pub fn current(&self) -> &Arc<CanonicalTree> {
        &self.current
    }

    pub fn latest(&self) -> Arc<CanonicalTree> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next published tree. `None` once the plugin is gone.
    pub async fn changed(&mut self) -> Option<Arc<CanonicalTree>> {
        self.receiver.changed().await.ok()?;
        let snap = self.receiver.borrow_and_update().clone();
        self.current = snap.clone();
        Some(snap)
    }

    pub fn into_stream(self) -> TreeWatchStream {
        TreeWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter backed by a `watch::Receiver`.
pub struct TreeWatchStream {
    inner: WatchStream<Arc<CanonicalTree>>,
}

impl Stream for TreeWatchStream {
    type Item = Arc<CanonicalTree>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
