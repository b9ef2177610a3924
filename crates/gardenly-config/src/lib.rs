//! Configuration for the gardenly bridge.
//!
//! TOML file + `GARDENLY_` environment overlay, credential resolution
//! (env + keyring + plaintext), the JSON datapoint descriptor, and
//! translation to `gardenly_core::BridgeConfig`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use indexmap::IndexMap;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use gardenly_core::{
    BridgeConfig, ConfigDescriptor, DEFAULT_SEPARATOR, DescriptorEntry, PathCodec, PollSettings,
    TlsVerification,
};

pub const ENV_PREFIX: &str = "GARDENLY_";
pub const PASSWORD_ENV: &str = "GARDENLY_PASSWORD";
pub const USERNAME_ENV: &str = "GARDENLY_USERNAME";
pub const KEYRING_SERVICE: &str = "gardenly";

const REDACTED: &str = "********";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no {what} configured (set [cloud] {what}, {env} or the keyring entry)")]
    NoCredentials { what: &'static str, env: &'static str },

    #[error("descriptor {}: {reason}", path.display())]
    Descriptor { path: PathBuf, reason: String },

    #[error("keyring error: {0}")]
    Keyring(String),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl From<keyring::Error> for ConfigError {
    fn from(err: keyring::Error) -> Self {
        Self::Keyring(err.to_string())
    }
}

// ── TOML config structs ─────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub cloud: CloudSection,
    #[serde(default)]
    pub polling: PollingSection,
    #[serde(default)]
    pub datapoints: DatapointSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CloudSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Account email.
    pub username: Option<String>,

    /// Plaintext password (prefer keyring or env var).
    pub password: Option<String>,

    /// Name of an environment variable holding the password.
    pub password_env: Option<String>,

    /// Custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    #[serde(default)]
    pub insecure: bool,
}

impl Default for CloudSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout: default_timeout(),
            username: None,
            password: None,
            password_env: None,
            ca_cert: None,
            insecure: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PollingSection {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_reconnect")]
    pub reconnect_secs: u64,
    /// Refresh locations every N device polls.
    #[serde(default = "default_refresh_every")]
    pub location_refresh_every: u32,
}

impl Default for PollingSection {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            reconnect_secs: default_reconnect(),
            location_refresh_every: default_refresh_every(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DatapointSection {
    #[serde(default = "default_separator")]
    pub separator: String,
    #[serde(default = "default_smart")]
    pub smart: bool,
    /// JSON descriptor; relative paths resolve against the config dir.
    #[serde(default = "default_descriptor")]
    pub descriptor: PathBuf,
}

impl Default for DatapointSection {
    fn default() -> Self {
        Self {
            separator: default_separator(),
            smart: default_smart(),
            descriptor: default_descriptor(),
        }
    }
}

fn default_base_url() -> String {
    gardenly_api::DEFAULT_BASE_URL.into()
}
fn default_timeout() -> u64 {
    30
}
fn default_interval() -> u64 {
    300
}
fn default_reconnect() -> u64 {
    60
}
fn default_refresh_every() -> u32 {
    30
}
fn default_separator() -> String {
    DEFAULT_SEPARATOR.into()
}
fn default_smart() -> bool {
    true
}
fn default_descriptor() -> PathBuf {
    PathBuf::from("descriptor.json")
}

impl Config {
    /// Copy safe to print: the plaintext password is masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.cloud.password.is_some() {
            copy.cloud.password = Some(REDACTED.into());
        }
        copy
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("net", "gardenly", "gardenly").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("gardenly");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load from the canonical path + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load defaults, then `path` (if present), then `GARDENLY_*` env vars.
/// Nested keys use a double underscore: `GARDENLY_POLLING__INTERVAL_SECS`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading configuration");
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    Ok(figment.extract()?)
}

// ── Config saving ───────────────────────────────────────────────────

pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(&config_path(), cfg)
}

pub fn save_config_to(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, cfg.to_toml()?)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

pub fn resolve_username(cfg: &Config) -> Result<String, ConfigError> {
    cfg.cloud
        .username
        .clone()
        .or_else(|| std::env::var(USERNAME_ENV).ok())
        .filter(|u| !u.is_empty())
        .ok_or(ConfigError::NoCredentials {
            what: "username",
            env: USERNAME_ENV,
        })
}

/// Password chain: `password_env` var, `GARDENLY_PASSWORD`, keyring,
/// plaintext.
pub fn resolve_password(cfg: &Config, username: &str) -> Result<SecretString, ConfigError> {
    // 1. Configured env var
    if let Some(ref env_name) = cfg.cloud.password_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    // 2. Well-known env var
    if let Ok(val) = std::env::var(PASSWORD_ENV) {
        return Ok(SecretString::from(val));
    }

    // 3. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, username) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 4. Plaintext in config
    if let Some(ref pw) = cfg.cloud.password {
        return Ok(SecretString::from(pw.clone()));
    }

    Err(ConfigError::NoCredentials {
        what: "password",
        env: PASSWORD_ENV,
    })
}

/// Store a password in the system keyring.
pub fn store_password(username: &str, password: &str) -> Result<(), ConfigError> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, username)?;
    entry.set_password(password)?;
    Ok(())
}

// ── Descriptor ──────────────────────────────────────────────────────

/// Descriptor path, resolved against the config file's directory.
pub fn descriptor_path(cfg: &Config, config_file: &Path) -> PathBuf {
    let path = &cfg.datapoints.descriptor;
    if path.is_absolute() {
        return path.clone();
    }
    config_file
        .parent()
        .map_or_else(|| path.clone(), |dir| dir.join(path))
}

/// Read the raw descriptor: a JSON object of flattened keys to entries,
/// in file order.
pub fn read_descriptor(path: &Path) -> Result<IndexMap<String, DescriptorEntry>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Descriptor {
        path: path.to_owned(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&text).map_err(|e| ConfigError::Descriptor {
        path: path.to_owned(),
        reason: e.to_string(),
    })
}

/// Read and validate the descriptor against the configured separator.
pub fn load_descriptor(cfg: &Config, path: &Path) -> Result<ConfigDescriptor, ConfigError> {
    let codec = codec(cfg)?;
    let entries = read_descriptor(path)?;
    ConfigDescriptor::new(&codec, entries).map_err(|e| ConfigError::Descriptor {
        path: path.to_owned(),
        reason: e.to_string(),
    })
}

/// Write a descriptor file, pretty-printed.
pub fn write_descriptor(path: &Path, entries: &IndexMap<String, DescriptorEntry>) -> Result<(), ConfigError> {
    let text = serde_json::to_string_pretty(entries).map_err(|e| ConfigError::Descriptor {
        path: path.to_owned(),
        reason: e.to_string(),
    })?;
    std::fs::write(path, text)?;
    Ok(())
}

// ── Translation to core ─────────────────────────────────────────────

pub fn codec(cfg: &Config) -> Result<PathCodec, ConfigError> {
    PathCodec::new(cfg.datapoints.separator.clone()).map_err(|e| ConfigError::Validation {
        field: "datapoints.separator".into(),
        reason: e.to_string(),
    })
}

pub fn poll_settings(cfg: &Config) -> Result<PollSettings, ConfigError> {
    PollSettings::new(
        Duration::from_secs(cfg.polling.interval_secs),
        Duration::from_secs(cfg.polling.reconnect_secs),
        cfg.polling.location_refresh_every,
    )
    .map_err(|e| ConfigError::Validation {
        field: "polling".into(),
        reason: e.to_string(),
    })
}

/// Build a `BridgeConfig`, resolving credentials.
pub fn to_bridge_config(cfg: &Config) -> Result<BridgeConfig, ConfigError> {
    let url: url::Url = cfg.cloud.base_url.parse().map_err(|_| ConfigError::Validation {
        field: "cloud.base_url".into(),
        reason: format!("invalid URL: {}", cfg.cloud.base_url),
    })?;

    let username = resolve_username(cfg)?;
    let password = resolve_password(cfg, &username)?;

    let tls = if cfg.cloud.insecure {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca_path) = cfg.cloud.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::SystemDefaults
    };

    Ok(BridgeConfig {
        url,
        username,
        password,
        tls,
        timeout: Duration::from_secs(cfg.cloud.timeout),
        poll: poll_settings(cfg)?,
        codec: codec(cfg)?,
        smart_mode: cfg.datapoints.smart,
    })
}
