use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, socket::client::backoff::ReconnectConfig};

pub const DEFAULT_ENDPOINT: &str = "wss://websocket.tobit.com";

/// Overrides `endpoint_url`
pub const ENDPOINT_ENV: &str = "CHAYNS_WS_URL";
/// Overrides `auto_reconnect`, accepts `true`/`false`/`1`/`0`
pub const AUTO_RECONNECT_ENV: &str = "CHAYNS_WS_AUTO_RECONNECT";

/// Websocket client configuration
///
/// Can be built in code with the builder methods or loaded from a TOML
/// file such as:
///
/// ```toml
/// endpoint_url = "wss://websocket.tobit.com"
/// auto_reconnect = true
/// heartbeat_interval_ms = 60000
///
/// [reconnect]
/// short_delay_ms = 1000
/// reset = "on_open"
/// ```
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    pub endpoint_url: String,
    pub auto_reconnect: bool,
    /// liveness probe period
    pub heartbeat_interval_ms: u64,
    /// `None` keeps registration failures silent
    pub registration_timeout_ms: Option<u64>,
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint_url: DEFAULT_ENDPOINT.to_owned(),
            auto_reconnect: true,
            heartbeat_interval_ms: 60_000,
            registration_timeout_ms: None,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            ..Self::default()
        }
    }

    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn registration_timeout(mut self, timeout: Duration) -> Self {
        self.registration_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn registration_deadline(&self) -> Option<Duration> {
        self.registration_timeout_ms.map(Duration::from_millis)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config = Self::from_toml_str(&content)?;
        log::debug!("Loaded websocket config from: {}", path.display());
        Ok(config)
    }

    /// Apply environment overrides, `.env` is honoured when loaded by [`crate::setup`]
    pub fn apply_env(mut self) -> Self {
        if let Ok(url) = std::env::var(ENDPOINT_ENV) {
            if !url.trim().is_empty() {
                log::debug!("Endpoint overridden by {ENDPOINT_ENV}");
                self.endpoint_url = url.trim().to_owned();
            }
        }

        if let Ok(value) = std::env::var(AUTO_RECONNECT_ENV) {
            match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => self.auto_reconnect = true,
                "0" | "false" | "no" => self.auto_reconnect = false,
                other => log::warn!("Ignoring invalid {AUTO_RECONNECT_ENV} value: {other}"),
            }
        }

        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.endpoint_url.to_ascii_lowercase();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(ConfigError::InvalidUrl(self.endpoint_url.clone()));
        }

        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "heartbeat_interval_ms",
                reason: "must be greater than zero",
            });
        }

        if self.registration_timeout_ms == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "registration_timeout_ms",
                reason: "must be greater than zero when set",
            });
        }

        self.reconnect.validate()
    }

    /// Load from an optional file, apply env overrides and validate
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        }
        .apply_env();

        config.validate()?;
        Ok(config)
    }
}
