//! Session configuration.
//!
//! ```toml
//! port = "/dev/ttyUSB0"
//! actuator_size = 150
//! retry_count = 5
//! ```

use crate::channel::RetryPolicy;
use crate::constants::*;
use crate::error::{Error, Result};
use crate::types::ActuatorSize;
use serde::Deserialize;
use std::time::Duration;

/// Settings of one controller session. Missing fields take the defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Serial port path (e.g. "/dev/ttyUSB0", "COM3")
    pub port: String,
    pub baud_rate: u32,
    pub actuator_size: ActuatorSize,
    /// Speed used when the caller does not give one, 0.01 mm/s
    pub default_speed: u32,
    /// Upper bound for commanded speeds, 0.01 mm/s
    pub max_speed: u32,
    /// 0.01 G
    pub default_acceleration: u16,
    /// Positioning band, 0.01 mm
    pub position_band: i32,
    pub retry_count: u32,
    pub retry_interval_ms: u64,
    pub read_timeout_ms: u64,
    pub command_acquire_timeout_ms: u64,
    pub query_acquire_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub homing_timeout_ms: u64,
    pub homing_check_interval_ms: u64,
    pub oscillation_margin_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            port: String::new(),
            baud_rate: BAUD_RATE,
            actuator_size: ActuatorSize::SixInch,
            default_speed: DEFAULT_SPEED,
            max_speed: MAX_SPEED,
            default_acceleration: DEFAULT_ACCELERATION,
            position_band: DEFAULT_POSITION_BAND,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            read_timeout_ms: READ_TIMEOUT_MS,
            command_acquire_timeout_ms: COMMAND_ACQUIRE_TIMEOUT_MS,
            query_acquire_timeout_ms: QUERY_ACQUIRE_TIMEOUT_MS,
            poll_interval_ms: POLL_INTERVAL_MS,
            homing_timeout_ms: HOMING_TIMEOUT_MS,
            homing_check_interval_ms: HOMING_CHECK_INTERVAL_MS,
            oscillation_margin_ms: OSCILLATION_MARGIN_MS,
        }
    }
}

impl SessionConfig {
    /// Default configuration for the given port
    pub fn for_port(port: impl Into<String>) -> Self {
        SessionConfig {
            port: port.into(),
            ..Default::default()
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: SessionConfig =
            toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry_count == 0 {
            return Err(Error::Config("retry_count must be at least 1".to_string()));
        }
        if self.max_speed == 0 {
            return Err(Error::Config("max_speed must be positive".to_string()));
        }
        if self.default_speed > self.max_speed {
            return Err(Error::Config(format!(
                "default_speed {} exceeds max_speed {}",
                self.default_speed, self.max_speed
            )));
        }
        if self.position_band < 0 {
            return Err(Error::Config("position_band must not be negative".to_string()));
        }
        if self.homing_check_interval_ms == 0 || self.poll_interval_ms == 0 {
            return Err(Error::Config(
                "poll and homing check intervals must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Travel range of the configured actuator, 0.01 mm
    pub fn travel_range(&self) -> i32 {
        self.actuator_size.travel_range()
    }

    /// Policy for retried queries
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retry_count: self.retry_count,
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            acquire_timeout: Duration::from_millis(self.query_acquire_timeout_ms),
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn command_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.command_acquire_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn homing_timeout(&self) -> Duration {
        Duration::from_millis(self.homing_timeout_ms)
    }

    pub fn homing_check_interval(&self) -> Duration {
        Duration::from_millis(self.homing_check_interval_ms)
    }

    pub fn oscillation_margin(&self) -> Duration {
        Duration::from_millis(self.oscillation_margin_ms)
    }
}
