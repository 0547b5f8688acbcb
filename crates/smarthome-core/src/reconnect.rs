// ── Reconnect backoff ──
//
// A disconnected bridge is retried after 10 s, doubling up to 10 minutes.
// `supervise` drives that loop for one bridge until cancelled.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::{BridgeEvent, Connectivity, DeviceBridge};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(10),
            max: Duration::from_secs(600),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

/// Stateful iterator over a policy's delays.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.policy.delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

/// Re-request data with backoff whenever the bridge reports that all of
/// its links are down. Returns when `cancel` fires or the bridge's event
/// channel closes.
pub async fn supervise(bridge: Arc<dyn DeviceBridge>, policy: ReconnectPolicy, cancel: CancellationToken) {
    let mut events = bridge.events();
    let mut backoff = Backoff::new(policy);

    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            event = events.recv() => event,
        };
        match event {
            Ok(BridgeEvent::ConnectionProblem {
                connectivity: Connectivity::AllDown,
            }) => {}
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                debug!(skipped = n, "supervisor lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }

        while bridge.connectivity() == Connectivity::AllDown {
            let delay = backoff.next_delay();
            info!(bridge = %bridge.id(), delay_secs = delay.as_secs(), "reconnecting");
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
            if let Err(e) = bridge.request_data().await {
                warn!(bridge = %bridge.id(), error = %e, "reconnect attempt failed");
            }
        }
        backoff.reset();
        // Drop problems reported while we were already retrying.
        events = events.resubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_and_cap() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u64> = (0..9).map(|n| policy.delay(n).as_secs()).collect();
        assert_eq!(delays, vec![10, 20, 40, 80, 160, 320, 600, 600, 600]);
        assert_eq!(policy.delay(64).as_secs(), 600);
    }

    #[test]
    fn backoff_resets() {
        let mut backoff = Backoff::new(ReconnectPolicy::default());
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.next_delay(), Duration::from_secs(40));
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(10));
    }
}
