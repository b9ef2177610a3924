// ── Runtime bridge configuration ──
//
// Describes *how* to reach the cloud and how to poll it. Built by the
// binary from `gardenly-config`; core never reads files itself.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use gardenly_api::{CloudClient, TlsMode, TransportConfig};

use crate::address::PathCodec;
use crate::error::CoreError;

/// Shortest accepted poll interval.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(60);

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(60);
pub const DEFAULT_LOCATION_REFRESH_EVERY: u32 = 30;

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    #[default]
    SystemDefaults,
    CustomCa(PathBuf),
    DangerAcceptInvalid,
}

/// Poll cadence, validated at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    interval: Duration,
    reconnect_delay: Duration,
    location_refresh_every: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            location_refresh_every: DEFAULT_LOCATION_REFRESH_EVERY,
        }
    }
}

impl PollSettings {
    /// Intervals under [`MIN_POLL_INTERVAL`] are rejected, never clamped.
    pub fn new(
        interval: Duration,
        reconnect_delay: Duration,
        location_refresh_every: u32,
    ) -> Result<Self, CoreError> {
        if interval < MIN_POLL_INTERVAL {
            return Err(CoreError::config(format!(
                "polling interval {}s is below the {}s minimum",
                interval.as_secs(),
                MIN_POLL_INTERVAL.as_secs()
            )));
        }
        if reconnect_delay.is_zero() {
            return Err(CoreError::config("reconnect delay must be positive"));
        }
        if location_refresh_every == 0 {
            return Err(CoreError::config("location refresh cadence must be at least 1"));
        }
        Ok(Self {
            interval,
            reconnect_delay,
            location_refresh_every,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay
    }

    pub fn location_refresh_every(&self) -> u32 {
        self.location_refresh_every
    }
}

/// Everything needed to run the bridge against one account.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub url: Url,
    pub username: String,
    pub password: SecretString,
    pub tls: TlsVerification,
    pub timeout: Duration,
    pub poll: PollSettings,
    pub codec: PathCodec,
    /// Smart-datapoint mode: live values decide the node layout.
    pub smart_mode: bool,
}

impl BridgeConfig {
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            tls: match &self.tls {
                TlsVerification::SystemDefaults => TlsMode::System,
                TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
                TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
            },
            timeout: self.timeout,
        }
    }

    pub fn build_client(&self) -> Result<CloudClient, CoreError> {
        Ok(CloudClient::new(self.url.clone(), &self.transport())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_below_floor_is_rejected() {
        let err = PollSettings::new(Duration::from_secs(30), DEFAULT_RECONNECT_DELAY, 30);
        assert!(matches!(err, Err(CoreError::Config { .. })));
    }

    #[test]
    fn floor_itself_is_accepted() {
        let settings = PollSettings::new(MIN_POLL_INTERVAL, Duration::from_secs(5), 1);
        assert!(settings.is_ok());
    }

    #[test]
    fn zero_refresh_cadence_is_rejected() {
        assert!(PollSettings::new(DEFAULT_POLL_INTERVAL, DEFAULT_RECONNECT_DELAY, 0).is_err());
    }
}
