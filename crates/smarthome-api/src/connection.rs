// Connection state and the typed client event channel.
//
// Each vendor client owns one `ConnectionTracker`. Request helpers report
// success or failure into it; the tracker flips the link state and emits
// `ClientEvent::ConnectionProblem` only on the transition into the
// disconnected state, never again while already disconnected.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::{Error, ErrorKind};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// What a successful response (or stream frame) was for.
///
/// Lets consumers correlate responses without blocking on the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum RequestKind {
    AllData,
    States,
    Areas,
    Status,
    Config,
    Info,
    Effects,
    CurrentEffect,
    Registration,
    Authorization,
    Execution,
    Set,
}

/// Events emitted by a vendor client.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Link went from connected (or unknown) to disconnected.
    ConnectionProblem { kind: ErrorKind, message: String },
    /// A request completed and its JSON body parsed.
    Response { kind: RequestKind, payload: Arc<Value> },
    /// One delta from the streaming channel.
    StreamData(Arc<Value>),
    /// A write succeeded; the owner should re-poll.
    ChangeOccurred,
    /// Pairing or registration produced a token.
    PairingSucceeded,
    /// Pairing hit its attempt cap. Emitted exactly once per flow.
    PairingFailed { attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Unknown,
    Connected,
    Disconnected,
}

#[derive(Debug)]
struct TrackerState {
    link: LinkState,
    last_error: Option<ErrorKind>,
}

/// Shared connection state + event sender for one vendor client.
///
/// Cheaply cloneable; the stream task holds a clone.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    state: Arc<Mutex<TrackerState>>,
    events: broadcast::Sender<ClientEvent>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(TrackerState {
                link: LinkState::Unknown,
                last_error: None,
            })),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: ClientEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub fn link(&self) -> LinkState {
        self.lock().link
    }

    pub fn is_connected(&self) -> bool {
        self.link() == LinkState::Connected
    }

    pub fn last_error(&self) -> Option<ErrorKind> {
        self.lock().last_error
    }

    /// Record a healthy exchange.
    pub fn succeeded(&self) {
        let mut state = self.lock();
        if state.link != LinkState::Connected {
            tracing::debug!("link connected");
        }
        state.link = LinkState::Connected;
        state.last_error = None;
    }

    /// Record a failure. Parse and protocol errors are tolerated on a
    /// healthy link; anything else disconnects. Returns `true` if a
    /// `ConnectionProblem` was emitted.
    pub fn failed(&self, err: &Error) -> bool {
        let kind = err.kind();
        let emit = {
            let mut state = self.lock();
            state.last_error = Some(kind);
            if matches!(kind, ErrorKind::Parse | ErrorKind::Protocol) {
                false
            } else if state.link == LinkState::Disconnected {
                false
            } else {
                state.link = LinkState::Disconnected;
                true
            }
        };

        if emit {
            tracing::warn!(error = %err, %kind, "connection problem");
            self.emit(ClientEvent::ConnectionProblem {
                kind,
                message: err.to_string(),
            });
        }
        emit
    }

    /// Forget the link state (used on teardown so a fresh instance
    /// reports its first failure).
    pub fn reset(&self) {
        let mut state = self.lock();
        state.link = LinkState::Unknown;
        state.last_error = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        // A poisoned tracker only means a panic elsewhere; the state is
        // still a plain enum pair.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}
