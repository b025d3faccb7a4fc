//! # Machine and Plate Loader Configuration
//!
//! One TOML document describes every machine model the host can drive, the
//! serial timing conventions, the plate loader servo layout and the table of
//! plate types (safety profiles). Everything is validated once at load time.
//!
//! ## Example
//!
//! ```toml
//! [serial]
//! machine = "Genmitsu 4040 PRO"
//!
//! [machines."Genmitsu 4040 PRO"]
//! baud_rate = 115200
//! x_offset = 0.0
//! y_offset = 0.0
//! x = { low_bound = -400.0, high_bound = 0.0 }
//! y = { low_bound = 0.0, high_bound = 400.0 }
//! z = { low_bound = -75.0, high_bound = 0.0 }
//!
//! [plate_types.shallow_plate]
//! plate_safe_angle = 50.0
//! lid_safe_angle = 40.0
//! description = "Standard 96-well plate"
//! ```
//!
//! See `wellhost.toml` at the repository root for the full annotated file.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::actuator::controller::MIN_MOVE_SPEED;
use crate::actuator::safety::SafetyProfile;
use crate::motion::completion::PollPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Unknown machine model '{name}' (available: {available:?})")]
    UnknownMachine { name: String, available: Vec<String> },
}

/// Top-level configuration document.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub machines: HashMap<String, MachineConfig>,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub plate_types: BTreeMap<String, SafetyProfile>,
}

/// Which port and which machine model to use.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SerialConfig {
    /// Serial device path. Auto-detected when absent.
    #[serde(default)]
    pub port: Option<String>,
    /// Key into `[machines]`.
    #[serde(default)]
    pub machine: Option<String>,
}

/// Inclusive range a logical coordinate must fall in before it is sent.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct AxisBounds {
    pub low_bound: f64,
    pub high_bound: f64,
}

impl AxisBounds {
    pub fn new(low_bound: f64, high_bound: f64) -> Self {
        Self { low_bound, high_bound }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.low_bound <= value && value <= self.high_bound
    }

    fn validate(&self, axis: &str, machine: &str) -> Result<(), ConfigError> {
        if !self.low_bound.is_finite() || !self.high_bound.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "Machine '{}': {} bounds must be finite",
                machine, axis
            )));
        }
        if self.low_bound > self.high_bound {
            return Err(ConfigError::Invalid(format!(
                "Machine '{}': {} low_bound {} exceeds high_bound {}",
                machine, axis, self.low_bound, self.high_bound
            )));
        }
        Ok(())
    }
}

/// Per machine model settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MachineConfig {
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    pub x: AxisBounds,
    pub y: AxisBounds,
    /// Machines without a Z table reject height moves.
    #[serde(default)]
    pub z: Option<AxisBounds>,
    #[serde(default)]
    pub x_offset: f64,
    #[serde(default)]
    pub y_offset: f64,
}

impl MachineConfig {
    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.baud_rate == 0 {
            return Err(ConfigError::Invalid(format!("Machine '{}': baud_rate must be > 0", name)));
        }
        self.x.validate("x", name)?;
        self.y.validate("y", name)?;
        if let Some(z) = &self.z {
            z.validate("z", name)?;
        }
        if !self.x_offset.is_finite() || !self.y_offset.is_finite() {
            return Err(ConfigError::Invalid(format!("Machine '{}': offsets must be finite", name)));
        }
        Ok(())
    }
}

/// Serial timing conventions for the motion firmware, in milliseconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimingConfig {
    #[serde(default = "default_wake_settle_ms")]
    pub wake_settle_ms: u64,
    #[serde(default = "default_status_delay_ms")]
    pub status_delay_ms: u64,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_reset_settle_ms")]
    pub reset_settle_ms: u64,
    #[serde(default = "default_completion_delay_ms")]
    pub completion_delay_ms: u64,
    #[serde(default = "default_poll_response_ms")]
    pub poll_response_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
    #[serde(default = "default_required_idle")]
    pub required_idle: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            wake_settle_ms: default_wake_settle_ms(),
            status_delay_ms: default_status_delay_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            reset_settle_ms: default_reset_settle_ms(),
            completion_delay_ms: default_completion_delay_ms(),
            poll_response_ms: default_poll_response_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            max_polls: default_max_polls(),
            required_idle: default_required_idle(),
        }
    }
}

impl TimingConfig {
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            initial_delay: Duration::from_millis(self.completion_delay_ms),
            response_delay: Duration::from_millis(self.poll_response_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_polls: self.max_polls,
            required_idle: self.required_idle,
        }
    }

    pub fn wake_settle(&self) -> Duration {
        Duration::from_millis(self.wake_settle_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn status_delay(&self) -> Duration {
        Duration::from_millis(self.status_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn reset_settle(&self) -> Duration {
        Duration::from_millis(self.reset_settle_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_polls == 0 {
            return Err(ConfigError::Invalid("timing.max_polls must be > 0".to_string()));
        }
        if self.required_idle == 0 {
            return Err(ConfigError::Invalid("timing.required_idle must be > 0".to_string()));
        }
        if self.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timing.read_timeout_ms must be > 0".to_string()));
        }
        Ok(())
    }
}

/// PWM channel assignment for the three loader servos.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct ServoChannels {
    pub plate_lift_1: u8,
    pub plate_lift_2: u8,
    pub lid: u8,
}

impl Default for ServoChannels {
    fn default() -> Self {
        Self { plate_lift_1: 3, plate_lift_2: 6, lid: 9 }
    }
}

/// Logical end positions of the plate lift and the lid, in degrees.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct ServoLimits {
    pub plate_down_angle: f64,
    pub plate_up_angle: f64,
    pub lid_closed_angle: f64,
    pub lid_open_angle: f64,
    /// Raised slightly past `plate_up_angle` for easier access.
    #[serde(default = "default_plate_pop_angle")]
    pub plate_pop_angle: f64,
}

impl Default for ServoLimits {
    fn default() -> Self {
        Self {
            plate_down_angle: 90.0,
            plate_up_angle: 0.0,
            lid_closed_angle: 50.0,
            lid_open_angle: 0.0,
            plate_pop_angle: default_plate_pop_angle(),
        }
    }
}

impl ServoLimits {
    /// Range the logical plate angle is clamped to.
    pub fn plate_range(&self) -> (f64, f64) {
        let low = self.plate_down_angle.min(self.plate_up_angle).min(self.plate_pop_angle);
        let high = self.plate_down_angle.max(self.plate_up_angle).max(self.plate_pop_angle);
        (low, high)
    }

    /// Range the logical lid angle is clamped to.
    pub fn lid_range(&self) -> (f64, f64) {
        (
            self.lid_closed_angle.min(self.lid_open_angle),
            self.lid_closed_angle.max(self.lid_open_angle),
        )
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct MovementConfig {
    /// Degrees per interpolation step.
    #[serde(default = "default_move_speed")]
    pub default_move_speed: f64,
    #[serde(default = "default_move_delay_ms")]
    pub default_move_delay_ms: u64,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            default_move_speed: default_move_speed(),
            default_move_delay_ms: default_move_delay_ms(),
        }
    }
}

/// Plate loader hardware layout.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct LoaderConfig {
    #[serde(default)]
    pub channels: ServoChannels,
    #[serde(default)]
    pub limits: ServoLimits,
    #[serde(default)]
    pub movement: MovementConfig,
    /// GPIO pin of the relay feeding servo power, if fitted.
    #[serde(default)]
    pub power_relay_pin: Option<u8>,
}

impl LoaderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = &self.limits;
        let angles = [
            limits.plate_down_angle,
            limits.plate_up_angle,
            limits.lid_closed_angle,
            limits.lid_open_angle,
            limits.plate_pop_angle,
        ];
        if angles.iter().any(|a| !a.is_finite()) {
            return Err(ConfigError::Invalid("loader.limits angles must be finite".to_string()));
        }
        let speed = self.movement.default_move_speed;
        if !speed.is_finite() || speed < MIN_MOVE_SPEED {
            return Err(ConfigError::Invalid(format!(
                "loader.movement.default_move_speed must be >= {} (got {})",
                MIN_MOVE_SPEED, speed
            )));
        }
        let c = &self.channels;
        if c.plate_lift_1 == c.plate_lift_2 || c.plate_lift_1 == c.lid || c.plate_lift_2 == c.lid {
            return Err(ConfigError::Invalid("loader.channels must be distinct".to_string()));
        }
        Ok(())
    }
}

impl Config {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, machine) in &self.machines {
            machine.validate(name)?;
        }
        if let Some(selected) = &self.serial.machine {
            self.machine(selected)?;
        }
        self.timing.validate()?;
        self.loader.validate()?;
        for (name, profile) in &self.plate_types {
            profile
                .validate()
                .map_err(|reason| ConfigError::Invalid(format!("plate_types.{}: {}", name, reason)))?;
        }
        Ok(())
    }

    pub fn machine(&self, name: &str) -> Result<&MachineConfig, ConfigError> {
        self.machines.get(name).ok_or_else(|| {
            let mut available: Vec<String> = self.machines.keys().cloned().collect();
            available.sort();
            ConfigError::UnknownMachine { name: name.to_string(), available }
        })
    }

    /// The machine named by `[serial] machine`, or the only one defined.
    pub fn selected_machine(&self) -> Result<(&str, &MachineConfig), ConfigError> {
        if let Some(name) = &self.serial.machine {
            return Ok((name.as_str(), self.machine(name)?));
        }
        let mut entries = self.machines.iter();
        match (entries.next(), entries.next()) {
            (Some((name, machine)), None) => Ok((name.as_str(), machine)),
            (None, _) => Err(ConfigError::Invalid("no machines configured".to_string())),
            _ => Err(ConfigError::Invalid(
                "several machines configured; set [serial] machine".to_string(),
            )),
        }
    }
}

fn default_baud_rate() -> u32 { 115200 }
fn default_wake_settle_ms() -> u64 { 1000 }
fn default_status_delay_ms() -> u64 { 200 }
fn default_retry_delay_ms() -> u64 { 100 }
fn default_read_timeout_ms() -> u64 { 2000 }
fn default_reset_settle_ms() -> u64 { 2000 }
fn default_completion_delay_ms() -> u64 { 1000 }
fn default_poll_response_ms() -> u64 { 100 }
fn default_poll_interval_ms() -> u64 { 500 }
fn default_max_polls() -> u32 { 30 }
fn default_required_idle() -> u32 { 2 }
fn default_plate_pop_angle() -> f64 { -5.0 }
fn default_move_speed() -> f64 { 2.0 }
fn default_move_delay_ms() -> u64 { 20 }

pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    match std::fs::read_to_string(path) {
        Ok(contents) => match Config::from_toml_str(&contents) {
            Ok(config) => {
                tracing::info!("Loaded configuration from {}", path.display());
                Ok(config)
            }
            Err(e) => {
                tracing::error!("Failed to load config '{}': {}", path.display(), e);
                Err(e)
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path.display(), e);
            Err(ConfigError::Io(e))
        }
    }
}
