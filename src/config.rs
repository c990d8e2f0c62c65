//! Scan and session settings.
//!
//! Both structs deserialize from TOML with every field optional; missing
//! fields take the defaults below. Call `validate()` before use.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BeepconError, Result};
use crate::protocol::MAX_CHUNK_PAYLOAD;
use crate::window::DEFAULT_WINDOW_CAPACITY;

/// Service UUID broadcast by factory-configured beepcons.
pub const DEFAULT_TARGET_UUID: Uuid = Uuid::from_u128(0xF940_3000_F5F8_466E_AFF9_2555_6B57_FE6D);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub target_uuid: Uuid,
    pub major_filter: Option<u16>,
    pub minor_filter: Option<u16>,
    /// Emit a broadcast event for every accepted advertisement
    pub report_each_broadcast: bool,
    /// Aggregation period; `None` aggregates once, when the scan stops
    pub tick_interval_deciseconds: Option<u32>,
    pub remove_outliers: bool,
    pub path_loss_exponent: f64,
    pub window_capacity: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            target_uuid: DEFAULT_TARGET_UUID,
            major_filter: None,
            minor_filter: None,
            report_each_broadcast: false,
            tick_interval_deciseconds: None,
            remove_outliers: false,
            path_loss_exponent: 2.0,
            window_capacity: DEFAULT_WINDOW_CAPACITY,
        }
    }
}

impl ScanConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input).map_err(|e| BeepconError::invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.path_loss_exponent.is_finite() || self.path_loss_exponent <= 0.0 {
            return Err(BeepconError::invalid(format!(
                "path loss exponent must be positive, got {}",
                self.path_loss_exponent
            )));
        }
        if self.minor_filter.is_some() && self.major_filter.is_none() {
            return Err(BeepconError::invalid("minor filter requires a major filter"));
        }
        if self.tick_interval_deciseconds == Some(0) {
            return Err(BeepconError::invalid("tick interval must be positive"));
        }
        if self.window_capacity == 0 {
            return Err(BeepconError::invalid("window capacity must be positive"));
        }
        Ok(())
    }

    pub fn tick_interval_ms(&self) -> Option<u64> {
        self.tick_interval_deciseconds.map(|ds| u64::from(ds) * 100)
    }
}

/// What to do when the device rejects the connect-time password.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidPasswordPolicy {
    Disconnect,
    /// Remain connected with only the ungated commands available
    StayConnected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub command_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub firmware_chunk_size: usize,
    pub invalid_password_policy: InvalidPasswordPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 5_000,
            connect_timeout_ms: 10_000,
            firmware_chunk_size: 16,
            invalid_password_policy: InvalidPasswordPolicy::Disconnect,
        }
    }
}

impl SessionConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input).map_err(|e| BeepconError::invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.command_timeout_ms == 0 || self.connect_timeout_ms == 0 {
            return Err(BeepconError::invalid("timeouts must be positive"));
        }
        if self.firmware_chunk_size == 0 || self.firmware_chunk_size > MAX_CHUNK_PAYLOAD {
            return Err(BeepconError::invalid(format!(
                "firmware chunk size must be within 1..={MAX_CHUNK_PAYLOAD}, got {}",
                self.firmware_chunk_size
            )));
        }
        Ok(())
    }
}
