// ── Core error types ──
//
// The four failure classes the bridge reacts to (auth, transport, schema,
// config) plus the address and command errors of the datapoint engine.
// The `From<gardenly_api::Error>` impl translates transport-layer errors
// into these variants; consumers never see reqwest types.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    /// Bad credentials or rejected session. Surfaced on the connection
    /// status node; only retried by the reconnect schedule.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// Network failure or timeout. Triggers the reconnect schedule.
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Operation needs a session but none is established.
    #[error("Not connected to the cloud")]
    NotConnected,

    // ── Data errors ──────────────────────────────────────────────────
    /// Expected id or property missing from a cloud response.
    #[error("Schema mismatch: {message}")]
    Schema { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    /// Invalid startup configuration. Fatal: polling never starts.
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Address errors ───────────────────────────────────────────────
    #[error("Segment '{segment}' contains the reserved separator '{separator}'")]
    InvalidSegment { segment: String, separator: String },

    #[error("Malformed address '{address}': expected at least a location and a device segment")]
    MalformedAddress { address: String },

    // ── Command errors ───────────────────────────────────────────────
    #[error("Cannot derive location and device from '{address}'")]
    MissingDeviceContext { address: String },

    #[error("Parameters without a stored value under '{address}': {}", missing.join(", "))]
    UnresolvedParameters { address: String, missing: Vec<String> },

    // ── Store errors ─────────────────────────────────────────────────
    #[error("Node not found: {address}")]
    NodeNotFound { address: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("Cloud rejected the request (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Errors after which the poll loop drops to `Disconnected` and
    /// arms the reconnect timer.
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Authentication { .. } | Self::NotConnected
        )
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub(crate) fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<gardenly_api::Error> for CoreError {
    fn from(err: gardenly_api::Error) -> Self {
        match err {
            gardenly_api::Error::Authentication { message } => {
                CoreError::Authentication { message }
            }
            gardenly_api::Error::SessionExpired => CoreError::Authentication {
                message: "Session expired -- re-authentication required".into(),
            },
            gardenly_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Transport {
                        message: format!("request timed out: {e}"),
                    }
                } else if let Some(status) = e.status() {
                    CoreError::Api {
                        status: status.as_u16(),
                        message: e.to_string(),
                    }
                } else {
                    CoreError::Transport {
                        message: e.to_string(),
                    }
                }
            }
            gardenly_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            gardenly_api::Error::Timeout { timeout_secs } => CoreError::Transport {
                message: format!("request timed out after {timeout_secs}s"),
            },
            gardenly_api::Error::Tls(msg) => CoreError::Transport {
                message: format!("TLS error: {msg}"),
            },
            gardenly_api::Error::Api { status, message } if status >= 500 => {
                CoreError::Transport {
                    message: format!("HTTP {status}: {message}"),
                }
            }
            gardenly_api::Error::Api { status, message } => CoreError::Api { status, message },
            gardenly_api::Error::Deserialization { message, body: _ } => CoreError::Schema {
                message: format!("undecodable response: {message}"),
            },
        }
    }
}
