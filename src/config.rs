//! Tunable parameters for sampling, engine control and telemetry.
//!
//! Every field has a default matching the deployed installation, so an
//! empty JSON object (or no file at all) yields a working configuration.

use crate::error::ConfigError;
use crate::filter::DEFAULT_STD_FACTOR;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use std::collections::BTreeMap;
use std::path::Path;

/// Upper bound on valid samples held in one window.
pub const MAX_WINDOW_SIZE: usize = 64;
/// Upper bound on queued estimates per sensor channel.
pub const MAX_BUFFER_CAPACITY: usize = 128;
/// The sensor needs at least this long held in reset to power-cycle.
pub const MIN_RESET_PULSE_MS: u64 = 100;

const DEFAULT_WINDOW_SIZE: usize = 10;
const DEFAULT_MAX_HUMIDITY: f64 = 100.0;
const DEFAULT_MAX_TEMPERATURE: f64 = 50.0;
const DEFAULT_BUFFER_CAPACITY: usize = 32;

const DEFAULT_START_THRESHOLD: f64 = 66.0;
const DEFAULT_STOP_THRESHOLD: f64 = 60.0;
const DEFAULT_DEBOUNCE_COUNT: u32 = 2;
const DEFAULT_CONTROL_POLL_SECS: u64 = 30;

const DEFAULT_TELEMETRY_URL: &str = "https://api.thingspeak.com/update";
const DEFAULT_TELEMETRY_TIMEOUT_SECS: u64 = 10;

const_assert!(DEFAULT_WINDOW_SIZE <= MAX_WINDOW_SIZE);
const_assert!(DEFAULT_BUFFER_CAPACITY <= MAX_BUFFER_CAPACITY);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HygrostatConfig {
    pub sampling: SamplingConfig,
    pub sensors: Vec<SensorChannelConfig>,
    pub control: ControlConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Valid readings per filter pass.
    pub window_size: usize,
    /// Samples further than this many standard deviations from the mean are dropped.
    pub std_factor: f64,
    pub max_humidity: f64,
    pub max_temperature: f64,
    pub reset_pulse_ms: u64,
    pub buffer_capacity: usize,
    /// Pause between consecutive sensor polls.
    pub poll_interval_ms: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            std_factor: DEFAULT_STD_FACTOR,
            max_humidity: DEFAULT_MAX_HUMIDITY,
            max_temperature: DEFAULT_MAX_TEMPERATURE,
            reset_pulse_ms: MIN_RESET_PULSE_MS,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            poll_interval_ms: 0,
        }
    }
}

impl SamplingConfig {
    pub fn reset_pulse(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.reset_pulse_ms.max(MIN_RESET_PULSE_MS))
    }
}

/// One physical sensor and the GPIO line that power-cycles it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorChannelConfig {
    pub id: u8,
    pub reset_line: u8,
    pub humidity_offset: f64,
    pub temperature_offset: f64,
    pub controls_engine: bool,
}

impl Default for SensorChannelConfig {
    fn default() -> Self {
        Self {
            id: 9,
            reset_line: 17,
            humidity_offset: 0.0,
            temperature_offset: 0.0,
            controls_engine: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Humidity (%) that must be exceeded before the engine starts.
    pub start_threshold: f64,
    /// Humidity (%) that must be undercut before the engine stops.
    pub stop_threshold: f64,
    /// A threshold must hold for more than this many consecutive evaluations.
    pub debounce_count: u32,
    pub poll_interval_secs: u64,
    /// Seed the engine state from the actuator instead of assuming OFF.
    pub reconcile_on_startup: bool,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            start_threshold: DEFAULT_START_THRESHOLD,
            stop_threshold: DEFAULT_STOP_THRESHOLD,
            debounce_count: DEFAULT_DEBOUNCE_COUNT,
            poll_interval_secs: DEFAULT_CONTROL_POLL_SECS,
            reconcile_on_startup: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FieldOrder {
    /// The counter for the current engine state is always reported in field4.
    #[default]
    StateDependent,
    /// field4 is always on-minutes, field5 always off-minutes.
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub base_url: String,
    pub timeout_secs: u64,
    pub field_order: FieldOrder,
    /// Hardware serial -> upload API key.
    pub endpoints: BTreeMap<String, String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: DEFAULT_TELEMETRY_URL.to_string(),
            timeout_secs: DEFAULT_TELEMETRY_TIMEOUT_SECS,
            field_order: FieldOrder::default(),
            endpoints: BTreeMap::new(),
        }
    }
}

impl HygrostatConfig {
    /// Read a JSON config file and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        let config = config.with_default_sensor();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus the single engine-driving sensor of the standard install.
    pub fn standard() -> Self {
        Self::default().with_default_sensor()
    }

    fn with_default_sensor(mut self) -> Self {
        if self.sensors.is_empty() {
            self.sensors.push(SensorChannelConfig::default());
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.sampling;
        if s.window_size == 0 || s.window_size > MAX_WINDOW_SIZE {
            return Err(ConfigError::Invalid(format!(
                "window_size must be in 1..={MAX_WINDOW_SIZE}, got {}",
                s.window_size
            )));
        }
        if !(s.std_factor.is_finite() && s.std_factor > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "std_factor must be positive, got {}",
                s.std_factor
            )));
        }
        if s.buffer_capacity == 0 || s.buffer_capacity > MAX_BUFFER_CAPACITY {
            return Err(ConfigError::Invalid(format!(
                "buffer_capacity must be in 1..={MAX_BUFFER_CAPACITY}, got {}",
                s.buffer_capacity
            )));
        }

        let c = &self.control;
        if c.stop_threshold >= c.start_threshold {
            return Err(ConfigError::Invalid(format!(
                "stop_threshold ({}) must be below start_threshold ({})",
                c.stop_threshold, c.start_threshold
            )));
        }
        if c.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid("poll_interval_secs must be non-zero".into()));
        }

        if self.sensors.is_empty() {
            return Err(ConfigError::Invalid("at least one sensor channel is required".into()));
        }
        let engine_channels = self.sensors.iter().filter(|ch| ch.controls_engine).count();
        if engine_channels != 1 {
            return Err(ConfigError::Invalid(format!(
                "exactly one sensor must have controls_engine set, found {engine_channels}"
            )));
        }
        for (i, ch) in self.sensors.iter().enumerate() {
            if self.sensors[..i].iter().any(|other| other.id == ch.id) {
                return Err(ConfigError::Invalid(format!("duplicate sensor id {}", ch.id)));
            }
        }
        Ok(())
    }

    pub fn engine_channel(&self) -> Option<&SensorChannelConfig> {
        self.sensors.iter().find(|ch| ch.controls_engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_config_is_valid() {
        let config = HygrostatConfig::standard();
        assert!(config.validate().is_ok());
        assert_eq!(config.sampling.window_size, 10);
        assert_eq!(config.control.start_threshold, 66.0);
        assert_eq!(config.control.stop_threshold, 60.0);
        assert_eq!(config.control.debounce_count, 2);
        assert_eq!(config.engine_channel().map(|ch| ch.id), Some(9));
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let mut config = HygrostatConfig::standard();
        config.control.stop_threshold = 70.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn oversized_window_is_rejected() {
        let mut config = HygrostatConfig::standard();
        config.sampling.window_size = MAX_WINDOW_SIZE + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn two_engine_channels_are_rejected() {
        let mut config = HygrostatConfig::standard();
        config.sensors.push(SensorChannelConfig {
            id: 10,
            reset_line: 27,
            ..SensorChannelConfig::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn reset_pulse_is_never_shorter_than_minimum() {
        let mut sampling = SamplingConfig::default();
        sampling.reset_pulse_ms = 5;
        assert_eq!(sampling.reset_pulse().as_millis(), 100);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: HygrostatConfig =
            serde_json::from_str(r#"{"control": {"start_threshold": 70.0}}"#).unwrap();
        assert_eq!(config.control.start_threshold, 70.0);
        assert_eq!(config.control.stop_threshold, 60.0);
        assert_eq!(config.telemetry.field_order, FieldOrder::StateDependent);
    }
}
