// ── Per-instance timer and task tracking ──
//
// Every background task or delayed callback a plugin starts is spawned
// through its `TimerSet`, so `clear()` on teardown leaves nothing pending
// that could touch a dropped instance.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::CoreError;

/// Delay between per-device requests in group loops.
pub const GROUP_STAGGER: Duration = Duration::from_millis(200);

pub struct TimerSet {
    cancel: Mutex<CancellationToken>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TimerSet {
    pub fn new() -> Self {
        Self {
            cancel: Mutex::new(CancellationToken::new()),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Token cancelled by the next [`clear`](Self::clear).
    pub fn token(&self) -> CancellationToken {
        lock(&self.cancel).child_token()
    }

    /// Spawn a tracked task. It receives a token that fires on `clear()`
    /// and is aborted if it ignores it.
    pub fn spawn<F, Fut>(&self, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task(self.token()));
        let mut handles = lock(&self.handles);
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Run `task` once after `delay`, unless cleared first.
    pub fn after<Fut>(&self, delay: Duration, task: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.spawn(move |cancel| async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => task.await,
            }
        });
    }

    /// Apply `step` to each item in order, sleeping `stagger` between
    /// steps. Stops early if the set is cleared. The first error is
    /// returned after the remaining items have still been tried.
    pub async fn paced<T, F, Fut>(&self, items: Vec<T>, stagger: Duration, mut step: F) -> Result<(), CoreError>
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = Result<(), CoreError>>,
    {
        let cancel = self.token();
        let mut first_error = None;
        let count = items.len();
        for (i, item) in items.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
            if let Err(e) = step(item).await {
                debug!(error = %e, "paced step failed");
                first_error.get_or_insert(e);
            }
            if i + 1 < count {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(CoreError::Cancelled),
                    () = tokio::time::sleep(stagger) => {}
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Tasks still running.
    pub fn pending(&self) -> usize {
        lock(&self.handles).iter().filter(|h| !h.is_finished()).count()
    }

    /// Cancel and abort everything; the set can be reused afterwards.
    pub fn clear(&self) {
        let old = std::mem::replace(&mut *lock(&self.cancel), CancellationToken::new());
        old.cancel();
        for handle in lock(&self.handles).drain(..) {
            handle.abort();
        }
    }
}

impl Default for TimerSet {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.clear();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
