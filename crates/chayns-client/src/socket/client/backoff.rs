use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;

/// More consecutive failures than this select the medium delay
pub const MEDIUM_TIER_AFTER: u32 = 3;
/// More consecutive failures than this select the long delay
pub const LONG_TIER_AFTER: u32 = 10;

/// Which milestone clears the consecutive failure counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReset {
    /// socket opened
    #[default]
    OnOpen,
    /// server acknowledged the registration
    OnRegistered,
}

/// Tiered reconnect delay
///
/// Unlike a multiplicative backoff the delay only ever takes one of three
/// values, chosen by the number of consecutive failures.
#[derive(Debug, Clone)]
pub struct Backoff {
    short_delay: Duration,

    medium_delay: Duration,

    long_delay: Duration,

    reset: FailureReset,

    /// consecutive failures since the last reset
    failures: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            short_delay: Duration::from_secs(1),
            medium_delay: Duration::from_secs(10),
            long_delay: Duration::from_secs(60),
            reset: FailureReset::OnOpen,
            failures: 0,
        }
    }

    pub fn short_delay(mut self, delay: Duration) -> Self {
        self.short_delay = delay;
        self
    }

    pub fn medium_delay(mut self, delay: Duration) -> Self {
        self.medium_delay = delay;
        self
    }

    pub fn long_delay(mut self, delay: Duration) -> Self {
        self.long_delay = delay;
        self
    }

    pub fn reset_on(mut self, reset: FailureReset) -> Self {
        self.reset = reset;
        self
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    /// socket opened, clears the counter under [`FailureReset::OnOpen`]
    pub fn on_open(&mut self) {
        if self.reset == FailureReset::OnOpen {
            self.failures = 0;
        }
    }

    /// registration acknowledged, clears the counter under [`FailureReset::OnRegistered`]
    pub fn on_registered(&mut self) {
        if self.reset == FailureReset::OnRegistered {
            self.failures = 0;
        }
    }

    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures > LONG_TIER_AFTER {
            self.long_delay
        } else if failures > MEDIUM_TIER_AFTER {
            self.medium_delay
        } else {
            self.short_delay
        }
    }

    /// delay before the next reconnect attempt
    pub fn delay(&self) -> Duration {
        self.delay_for(self.failures)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

/// Reconnect delays, in milliseconds for config files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub short_delay_ms: u64,
    pub medium_delay_ms: u64,
    pub long_delay_ms: u64,
    pub reset: FailureReset,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            short_delay_ms: 1_000,
            medium_delay_ms: 10_000,
            long_delay_ms: 60_000,
            reset: FailureReset::OnOpen,
        }
    }
}

impl ReconnectConfig {
    pub fn create_backoff(&self) -> Backoff {
        Backoff::new()
            .short_delay(Duration::from_millis(self.short_delay_ms))
            .medium_delay(Duration::from_millis(self.medium_delay_ms))
            .long_delay(Duration::from_millis(self.long_delay_ms))
            .reset_on(self.reset)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.short_delay_ms > self.medium_delay_ms || self.medium_delay_ms > self.long_delay_ms {
            return Err(ConfigError::InvalidValue {
                field: "reconnect",
                reason: "delays must not decrease from short to long",
            });
        }
        Ok(())
    }
}
