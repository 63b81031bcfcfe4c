//! Controller configuration and the inbound config wire schema
//!
//! A `ConfigUpdate` frame is validated as a whole before any field is
//! applied; a rejected frame never leaves the configuration partially
//! mutated.

use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Deserializer, Serialize};

use crate::controller::DUTY_MAX;
use crate::errors::{FanBridgeError, Result};

/// Fan control mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FanMode {
    /// Temperature formula gated by the model flag
    Auto,
    /// Fixed operator-chosen duty
    Manual,
    /// Floor duty below the thresholds, full formula above them
    Range,
}

impl fmt::Display for FanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FanMode::Auto => write!(f, "auto"),
            FanMode::Manual => write!(f, "manual"),
            FanMode::Range => write!(f, "range"),
        }
    }
}

/// Mutable controller configuration, shared between the control loop and
/// the inbound config listener
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub mode: FanMode,
    /// Target duty in Manual mode, percent
    pub manual_pwm: u8,
    /// CPU temperature threshold in °C (Range mode and force override)
    pub cpu_threshold: i32,
    /// GPU temperature threshold in °C (Range mode and force override)
    pub gpu_threshold: i32,
    /// Minimum nonzero duty; targets below this stall the fan
    pub min_duty: u8,
    /// Maximum duty change per second
    pub slew_per_sec: u16,
    /// Hysteresis turn-on temperature in °C
    pub t_on: f64,
    /// Hysteresis hold temperature in °C, must stay below `t_on`
    pub t_off: f64,
    /// When set, duty forced to this value while either temperature is at
    /// or above its threshold
    pub force_pwm: Option<u8>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            mode: FanMode::Auto,
            manual_pwm: 0,
            cpu_threshold: 40,
            gpu_threshold: 40,
            min_duty: 20,
            slew_per_sec: 25,
            t_on: 38.0,
            t_off: 35.0,
            force_pwm: None,
        }
    }
}

impl ControllerConfig {
    /// Check the invariants that updates are not allowed to break
    pub fn validate(&self) -> Result<()> {
        if self.t_off >= self.t_on {
            return Err(FanBridgeError::Config(format!(
                "hysteresis points must satisfy t_off < t_on (got t_off={}, t_on={})",
                self.t_off, self.t_on
            )));
        }
        if self.manual_pwm > DUTY_MAX {
            return Err(FanBridgeError::InvalidPwm(self.manual_pwm));
        }
        if self.min_duty > DUTY_MAX {
            return Err(FanBridgeError::InvalidPwm(self.min_duty));
        }
        if let Some(force) = self.force_pwm {
            if force > DUTY_MAX {
                return Err(FanBridgeError::InvalidPwm(force));
            }
        }
        if self.slew_per_sec == 0 {
            return Err(FanBridgeError::Config(
                "slew rate must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply a partial update, validating it in full before any mutation
    pub fn apply(&mut self, update: &ConfigUpdate) -> Result<()> {
        if let Some(Some(force)) = update.force_pwm {
            if force > DUTY_MAX {
                return Err(FanBridgeError::InvalidPwm(force));
            }
        }

        if let Some(mode) = update.mode {
            self.mode = mode;
        }
        if let Some(pwm) = update.manual_pwm {
            // Manual target is clamped rather than rejected
            self.manual_pwm = pwm.min(DUTY_MAX);
        }
        if let Some(threshold) = update.cpu_threshold {
            self.cpu_threshold = threshold;
        }
        if let Some(threshold) = update.gpu_threshold {
            self.gpu_threshold = threshold;
        }
        if let Some(force) = update.force_pwm {
            self.force_pwm = force;
        }
        Ok(())
    }
}

/// Inbound config frame; every field is optional and absent fields leave
/// the configuration untouched
///
/// `force_pwm` distinguishes absent (no change) from JSON `null` (clear
/// the override).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<FanMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_pwm: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_threshold: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_threshold: Option<i32>,
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub force_pwm: Option<Option<u8>>,
}

impl ConfigUpdate {
    /// True when the frame carries no fields at all
    pub fn is_empty(&self) -> bool {
        *self == ConfigUpdate::default()
    }
}

/// Deserialize a field that was present in the JSON, keeping `null` as an
/// explicit inner `None`
fn deserialize_present<'de, T, D>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Synchronous reply to an inbound config frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigReply {
    pub status: ReplyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_mode: Option<FanMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_pwm: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Ok,
    Error,
}

impl ConfigReply {
    pub fn ok(mode: FanMode, pwm: u8) -> Self {
        Self {
            status: ReplyStatus::Ok,
            current_mode: Some(mode),
            current_pwm: Some(pwm),
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Error,
            current_mode: None,
            current_pwm: None,
            message: Some(message.into()),
        }
    }
}
