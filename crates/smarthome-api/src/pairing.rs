// Physical-button pairing with bounded retry.
//
// Hue bridge `createUser`, Dirigera token polling, sync-box registration
// and Nanoleaf `new` all follow the same pattern: repeat a POST on a fixed
// interval until the user presses the button, up to a capped number of
// attempts. Exceeding the cap is terminal.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::{ClientEvent, ConnectionTracker};
use crate::error::Error;

/// Retry policy for button pairing.
#[derive(Debug, Clone, Copy)]
pub struct PairingPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PairingPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: 15,
        }
    }
}

/// Outcome of one pairing attempt.
#[derive(Debug)]
pub enum PairingStep<T> {
    /// The bridge granted credentials.
    Done(T),
    /// Button not pressed yet; try again.
    Pending,
}

/// Run `attempt` until it yields [`PairingStep::Done`] or the cap is hit.
///
/// Attempt errors count as "not yet" (bridges answer 4xx until the button
/// is pressed). Emits exactly one terminal `PairingSucceeded` or
/// `PairingFailed` on `tracker`, except on cancellation.
pub async fn run_pairing<T, F, Fut>(
    policy: PairingPolicy,
    tracker: &ConnectionTracker,
    cancel: &CancellationToken,
    mut attempt: F,
) -> Result<T, Error>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<PairingStep<T>, Error>>,
{
    for n in 1..=policy.max_attempts {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match attempt(n).await {
            Ok(PairingStep::Done(value)) => {
                info!(attempt = n, "pairing succeeded");
                tracker.emit(ClientEvent::PairingSucceeded);
                return Ok(value);
            }
            Ok(PairingStep::Pending) => debug!(attempt = n, "pairing pending"),
            Err(e) => debug!(attempt = n, error = %e, "pairing attempt rejected"),
        }

        if n < policy.max_attempts {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Error::Cancelled),
                () = tokio::time::sleep(policy.interval) => {}
            }
        }
    }

    warn!(attempts = policy.max_attempts, "pairing gave up");
    tracker.emit(ClientEvent::PairingFailed {
        attempts: policy.max_attempts,
    });
    Err(Error::PairingFailed {
        attempts: policy.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast(max_attempts: u32) -> PairingPolicy {
        PairingPolicy {
            interval: Duration::from_millis(1),
            max_attempts,
        }
    }

    #[tokio::test]
    async fn stops_at_cap_with_one_failure_event() {
        let tracker = ConnectionTracker::new();
        let mut rx = tracker.subscribe();
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), Error> =
            run_pairing(fast(15), &tracker, &CancellationToken::new(), |_| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Error::HttpStatus { status: 403, body: String::new() })
                }
            })
            .await;

        assert!(matches!(result, Err(Error::PairingFailed { attempts: 15 })));
        assert_eq!(calls.load(Ordering::SeqCst), 15);
        assert!(matches!(rx.try_recv(), Ok(ClientEvent::PairingFailed { attempts: 15 })));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn succeeds_once_button_pressed() {
        let tracker = ConnectionTracker::new();
        let result = run_pairing(fast(15), &tracker, &CancellationToken::new(), |n| async move {
            if n < 3 { Ok(PairingStep::Pending) } else { Ok(PairingStep::Done(n)) }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn cancellation_is_not_a_pairing_failure() {
        let tracker = ConnectionTracker::new();
        let mut rx = tracker.subscribe();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<(), Error> =
            run_pairing(fast(15), &tracker, &cancel, |_| async { Ok(PairingStep::Pending) }).await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(rx.try_recv().is_err());
    }
}
