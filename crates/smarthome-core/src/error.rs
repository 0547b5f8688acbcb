// ── Core error types ──
//
// Errors surfaced by plugins and the aggregator. Transport detail from
// `smarthome_api` is folded into a handful of domain variants; the
// original coarse kind is kept so callers can still tell auth from
// connection trouble.

use smarthome_api::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Bridge {bridge} is not connected")]
    NotConnected { bridge: String },

    #[error("Cannot reach bridge: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Pairing failed after {attempts} attempts")]
    PairingFailed { attempts: u32 },

    #[error("Operation cancelled")]
    Cancelled,

    // ── Lookup errors ────────────────────────────────────────────────
    #[error("Unknown device or group: {id}")]
    UnknownDevice { id: String },

    #[error("Unknown plugin: {id}")]
    UnknownPlugin { id: String },

    #[error("Invalid aggregate id {id:?}: expected <plugin>::<id>")]
    InvalidId { id: String },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Operation not supported: {operation}")]
    Unsupported { operation: String },

    #[error("Invalid login state: {message}")]
    InvalidLoginState { message: String },

    // ── API errors (wrapped) ─────────────────────────────────────────
    #[error("Bridge API error: {message}")]
    Api {
        message: String,
        kind: ErrorKind,
        status: Option<u16>,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    pub fn unknown_device(id: impl Into<String>) -> Self {
        Self::UnknownDevice { id: id.into() }
    }

    /// Coarse kind, when the error came from a bridge client.
    pub fn api_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Api { kind, .. } => Some(*kind),
            Self::AuthenticationFailed { .. } | Self::PairingFailed { .. } => Some(ErrorKind::Auth),
            Self::ConnectionFailed { .. } | Self::NotConnected { .. } => Some(ErrorKind::Transport),
            _ => None,
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<smarthome_api::Error> for CoreError {
    fn from(err: smarthome_api::Error) -> Self {
        use smarthome_api::Error as Api;

        match err {
            Api::Authentication { message } => CoreError::AuthenticationFailed { message },
            Api::NotPaired => CoreError::AuthenticationFailed {
                message: "not paired -- run pairing first".into(),
            },
            Api::PairingFailed { attempts } => CoreError::PairingFailed { attempts },
            Api::Cancelled => CoreError::Cancelled,
            Api::Transport(ref e) if e.is_connect() || e.is_timeout() => {
                CoreError::ConnectionFailed {
                    reason: err.to_string(),
                }
            }
            Api::Tls(reason) => CoreError::ConnectionFailed {
                reason: format!("TLS error: {reason}"),
            },
            Api::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                reason: format!("WebSocket connection failed: {reason}"),
            },
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            other => CoreError::Api {
                message: other.to_string(),
                kind: other.kind(),
                status: other.status(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_status_errors_keep_their_kind() {
        let err: CoreError = smarthome_api::Error::HttpStatus {
            status: 503,
            body: "busy".into(),
        }
        .into();
        match err {
            CoreError::Api { kind, status, .. } => {
                assert_eq!(kind, ErrorKind::Transport);
                assert_eq!(status, Some(503));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn pairing_failure_maps_to_auth() {
        let err: CoreError = smarthome_api::Error::PairingFailed { attempts: 15 }.into();
        assert_eq!(err.api_kind(), Some(ErrorKind::Auth));
        assert_eq!(err.to_string(), "Pairing failed after 15 attempts");
    }
}
