//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use smarthome_api::ErrorKind;
use smarthome_config::ConfigError;
use smarthome_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const UNSUPPORTED: i32 = 5;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach {bridge}: {reason}")]
    #[diagnostic(
        code(smarthome::connection_failed),
        help(
            "Check that the bridge is powered and on the same network.\n\
             Try: smarthome list -v"
        )
    )]
    ConnectionFailed { bridge: String, reason: String },

    #[error("Pairing with {bridge} failed after {attempts} attempts")]
    #[diagnostic(
        code(smarthome::pairing_failed),
        help("Press the link button on the bridge, then run the pair command again right away.")
    )]
    PairingFailed { bridge: String, attempts: u32 },

    #[error("Cancelled")]
    #[diagnostic(code(smarthome::cancelled))]
    Cancelled,

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(smarthome::auth_failed),
        help(
            "The stored token may have been revoked.\n\
             Run: smarthome pair <bridge>"
        )
    )]
    AuthFailed { message: String },

    #[error("No credentials configured for bridge '{bridge}'")]
    #[diagnostic(
        code(smarthome::no_credentials),
        help("Set token, token_env or password for this bridge in config.toml, or pair it.")
    )]
    NoCredentials { bridge: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(smarthome::not_found),
        help("Run: smarthome {list_command} to see what is available")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    #[error("No bridge named '{name}'")]
    #[diagnostic(
        code(smarthome::unknown_bridge),
        help("Configured bridges: {available}")
    )]
    UnknownBridge { name: String, available: String },

    // ── Operations ───────────────────────────────────────────────────
    #[error("'{operation}' is not supported here")]
    #[diagnostic(
        code(smarthome::unsupported),
        help("Run: smarthome list to see each device's capabilities")
    )]
    Unsupported { operation: String },

    #[error("Bridge API error ({kind}): {message}")]
    #[diagnostic(code(smarthome::api_error))]
    ApiError { kind: String, message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(smarthome::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("No bridges configured")]
    #[diagnostic(
        code(smarthome::no_config),
        help(
            "Add a [bridges.<name>] table to the config file.\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(smarthome::config))]
    Config(ConfigError),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(smarthome::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } | Self::PairingFailed { .. } => {
                exit_code::AUTH
            }
            Self::NotFound { .. } | Self::UnknownBridge { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. } | Self::NoConfig { .. } | Self::Config(_) => exit_code::USAGE,
            Self::Unsupported { .. } => exit_code::UNSUPPORTED,
            _ => exit_code::GENERAL,
        }
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotConnected { bridge } => CliError::ConnectionFailed {
                bridge,
                reason: "not connected".into(),
            },

            CoreError::ConnectionFailed { reason } => CliError::ConnectionFailed {
                bridge: "bridge".into(),
                reason,
            },

            CoreError::AuthenticationFailed { message } => CliError::AuthFailed { message },

            CoreError::PairingFailed { attempts } => CliError::PairingFailed {
                bridge: "bridge".into(),
                attempts,
            },

            CoreError::Cancelled => CliError::Cancelled,

            CoreError::UnknownDevice { id } => CliError::NotFound {
                resource_type: "device or group".into(),
                identifier: id,
                list_command: "list".into(),
            },

            CoreError::UnknownPlugin { id } => CliError::NotFound {
                resource_type: "bridge".into(),
                identifier: id,
                list_command: "list".into(),
            },

            CoreError::InvalidId { id } => CliError::Validation {
                field: "id".into(),
                reason: format!("{id:?} is not of the form <bridge>::<id>"),
            },

            CoreError::Unsupported { operation } => CliError::Unsupported { operation },

            CoreError::InvalidLoginState { message } => CliError::Validation {
                field: "on_login".into(),
                reason: message,
            },

            CoreError::Api {
                message,
                kind: ErrorKind::Auth,
                ..
            } => CliError::AuthFailed { message },

            CoreError::Api { message, kind, .. } => CliError::ApiError {
                kind: kind.to_string(),
                message,
            },

            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::NoCredentials { bridge } => CliError::NoCredentials { bridge },
            ConfigError::UnknownBridge { name } => CliError::UnknownBridge {
                name,
                available: String::new(),
            },
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Config(other),
        }
    }
}
