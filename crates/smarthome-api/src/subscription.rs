// The single live event-stream subscription of a vendor client.
//
// `keep` opens the channel only when none is open; `stop` cancels the
// pending read and releases the token so the next `keep` can re-open.

use std::future::Future;
use std::sync::Mutex;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct ActiveStream {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ActiveStream {
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && !self.handle.is_finished()
    }
}

/// At most one streaming task per vendor client.
#[derive(Default)]
pub struct StreamSubscription {
    active: Mutex<Option<ActiveStream>>,
}

impl StreamSubscription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the stream unless one is already live.
    ///
    /// `open` receives the cancellation token of the new subscription and
    /// must stop reading once it fires. Returns `true` if a new channel
    /// was spawned.
    pub fn keep<F, Fut>(&self, open: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut active = self.lock();
        if active.as_ref().is_some_and(ActiveStream::is_live) {
            return false;
        }

        if let Some(stale) = active.take() {
            stale.cancel.cancel();
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(open(cancel.clone()));
        *active = Some(ActiveStream { cancel, handle });
        tracing::debug!("event stream subscription opened");
        true
    }

    /// Cancel the pending read and drop the channel.
    pub fn stop(&self) {
        if let Some(stream) = self.lock().take() {
            stream.cancel.cancel();
            stream.handle.abort();
            tracing::debug!("event stream subscription stopped");
        }
    }

    pub fn is_open(&self) -> bool {
        self.lock().as_ref().is_some_and(ActiveStream::is_live)
    }

    /// Number of live channels: 0 or 1.
    pub fn channel_count(&self) -> usize {
        usize::from(self.is_open())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<ActiveStream>> {
        self.active
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Drop for StreamSubscription {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn pending_stream(opens: &Arc<AtomicUsize>) -> impl FnOnce(CancellationToken) -> futures_util::future::BoxFuture<'static, ()> {
        let opens = Arc::clone(opens);
        move |cancel| {
            opens.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { cancel.cancelled().await })
        }
    }

    #[tokio::test]
    async fn keep_twice_opens_one_channel() {
        let subscription = StreamSubscription::new();
        let opens = Arc::new(AtomicUsize::new(0));

        assert!(subscription.keep(pending_stream(&opens)));
        assert!(!subscription.keep(pending_stream(&opens)));

        assert_eq!(subscription.channel_count(), 1);
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_allows_reopen() {
        let subscription = StreamSubscription::new();
        let opens = Arc::new(AtomicUsize::new(0));

        subscription.keep(pending_stream(&opens));
        subscription.stop();
        assert_eq!(subscription.channel_count(), 0);

        assert!(subscription.keep(pending_stream(&opens)));
        assert_eq!(subscription.channel_count(), 1);
    }

    #[tokio::test]
    async fn finished_stream_is_reopened() {
        let subscription = StreamSubscription::new();
        subscription.keep(|_cancel| async {});
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert!(!subscription.is_open());
        let opens = Arc::new(AtomicUsize::new(0));
        assert!(subscription.keep(pending_stream(&opens)));
    }
}
