//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use gardenly_config::ConfigError;
use gardenly_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not reach the Gardena cloud: {message}")]
    #[diagnostic(
        code(gardenly::connection_failed),
        help("Check network access and [cloud] base_url, then try: gardenly check")
    )]
    ConnectionFailed { message: String },

    // ── Authentication ───────────────────────────────────────────────

    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(gardenly::auth_failed),
        help("Verify the account email and password.\nStore a new password with: gardenly config set-password")
    )]
    AuthFailed { message: String },

    #[error("No {what} configured")]
    #[diagnostic(
        code(gardenly::no_credentials),
        help("Set [cloud] {what} in the config file, export {env}, or run: gardenly config set-password")
    )]
    NoCredentials { what: String, env: String },

    // ── Resources ────────────────────────────────────────────────────

    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(gardenly::not_found),
        help("Run: gardenly {list_command} to see what exists")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    // ── API ──────────────────────────────────────────────────────────

    #[error("Cloud rejected the request (HTTP {status}): {message}")]
    #[diagnostic(code(gardenly::api_error))]
    ApiError { status: u16, message: String },

    #[error("Command on '{address}' failed: {message}")]
    #[diagnostic(code(gardenly::command_failed))]
    CommandFailed { address: String, message: String },

    #[error("Unexpected cloud response: {message}")]
    #[diagnostic(
        code(gardenly::schema),
        help("The cloud document no longer matches the descriptor. Try: gardenly discover")
    )]
    Schema { message: String },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(gardenly::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("{message}")]
    #[diagnostic(
        code(gardenly::config),
        help("Config file: {path}\nInspect it with: gardenly config show")
    )]
    Config { message: String, path: String },

    // ── Timeout ──────────────────────────────────────────────────────

    #[error("No answer after {seconds}s")]
    #[diagnostic(
        code(gardenly::timeout),
        help("Increase --timeout or check the cloud's responsiveness.")
    )]
    Timeout { seconds: u64 },

    #[error("Internal error: {0}")]
    #[diagnostic(code(gardenly::internal))]
    Internal(String),

    // ── IO / Serialization ────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(gardenly::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::Config { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Authentication { message } => CliError::AuthFailed { message },

            CoreError::Transport { message } => CliError::ConnectionFailed { message },

            CoreError::NotConnected => CliError::ConnectionFailed {
                message: "no session established".into(),
            },

            CoreError::Schema { message } => CliError::Schema { message },

            CoreError::Config { message } => CliError::Config {
                message,
                path: gardenly_config::config_path().display().to_string(),
            },

            CoreError::NodeNotFound { address } => CliError::NotFound {
                resource_type: "node".into(),
                identifier: address,
                list_command: "sync".into(),
            },

            err @ (CoreError::InvalidSegment { .. }
            | CoreError::MalformedAddress { .. }
            | CoreError::MissingDeviceContext { .. }
            | CoreError::UnresolvedParameters { .. }) => CliError::Validation {
                field: "address".into(),
                reason: err.to_string(),
            },

            CoreError::Api { status, message } => CliError::ApiError { status, message },

            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoCredentials { what, env } => CliError::NoCredentials {
                what: what.into(),
                env: env.into(),
            },
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Config {
                message: other.to_string(),
                path: gardenly_config::config_path().display().to_string(),
            },
        }
    }
}
