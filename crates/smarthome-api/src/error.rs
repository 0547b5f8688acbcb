use thiserror::Error;

/// Coarse failure taxonomy shared by every vendor client.
///
/// Plugins branch on this rather than on individual variants: transport
/// failures flip connection state, parse failures reset working data,
/// auth failures end pairing or require re-authentication, protocol
/// failures skip the offending field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    Parse,
    Auth,
    Protocol,
}

/// Top-level error type for the `smarthome-api` crate.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Credentials rejected (401/403, expired token, bad digest).
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// A button-pairing or registration flow hit its attempt cap.
    #[error("Pairing failed after {attempts} attempts")]
    PairingFailed { attempts: u32 },

    /// The client has no token yet; pair first.
    #[error("Not paired -- no access token configured")]
    NotPaired,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, timeout).
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The bridge answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket or event stream closed by the remote end.
    #[error("Event stream closed: {reason}")]
    StreamClosed { reason: String },

    /// The operation was cancelled by teardown.
    #[error("Operation cancelled")]
    Cancelled,

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    /// Response parsed but did not have the expected shape.
    #[error("Unexpected response: {0}")]
    Protocol(String),
}

impl Error {
    /// Map onto the coarse taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Authentication { .. } | Self::PairingFailed { .. } | Self::NotPaired => {
                ErrorKind::Auth
            }
            Self::HttpStatus { status, .. } if *status == 401 || *status == 403 => ErrorKind::Auth,
            Self::Transport(e) if e.is_decode() => ErrorKind::Parse,
            Self::Transport(_)
            | Self::HttpStatus { .. }
            | Self::InvalidUrl(_)
            | Self::Tls(_)
            | Self::WebSocketConnect(_)
            | Self::StreamClosed { .. }
            | Self::Cancelled => ErrorKind::Transport,
            Self::Deserialization { .. } => ErrorKind::Parse,
            Self::Protocol(_) => ErrorKind::Protocol,
        }
    }

    /// Returns `true` if the token was rejected and re-pairing might help.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::Authentication { .. })
            || matches!(self, Self::HttpStatus { status, .. } if *status == 401 || *status == 403)
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            Self::WebSocketConnect(_) | Self::StreamClosed { .. } => true,
            _ => false,
        }
    }

    /// Returns the HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
