//! In-process stand-ins for the sensor, relay and reset line.
//!
//! Used by the `hygrostat` binary and the test suite. Faults are injected
//! from a fixed-seed LCG so runs are reproducible.

use super::{Actuator, HumiditySensor, RawReading, ResetLine, SensorReadError};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};

const DEFAULT_SEED: u64 = 0x1234_5678_9ABC_DEF0;

// Fault probabilities per read, in percent.
const ABSENT_RATE_PERCENT: f64 = 3.0;
const SPIKE_RATE_PERCENT: f64 = 2.0;
const ERROR_RATE_PERCENT: f64 = 1.0;

// Values a DHT22 reports when its framing goes wrong.
const SPIKE_TEMPERATURE: f64 = 999.0;
const SPIKE_HUMIDITY: f64 = 150.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedSensorConfig {
    pub base_temperature: f64,
    pub base_humidity: f64,
    /// Peak deviation of the uniform noise added to each reading.
    pub noise_amplitude: f64,
    /// Peak deviation of the slow humidity cycle; 0 keeps humidity flat.
    pub humidity_swing: f64,
    /// Reads per full humidity cycle.
    pub cycle_reads: u32,
    pub faults_enabled: bool,
    pub seed: u64,
}

impl Default for SimulatedSensorConfig {
    fn default() -> Self {
        Self {
            base_temperature: 20.0,
            base_humidity: 64.0,
            noise_amplitude: 0.5,
            humidity_swing: 0.0,
            cycle_reads: 600,
            faults_enabled: true,
            seed: DEFAULT_SEED,
        }
    }
}

/// Noisy humidity/temperature source with occasional DHT-style glitches.
#[derive(Debug)]
pub struct SimulatedSensor {
    config: SimulatedSensorConfig,
    reads: u64,
    rng_state: u64,
}

impl SimulatedSensor {
    pub fn new(config: SimulatedSensorConfig) -> Self {
        Self {
            reads: 0,
            rng_state: config.seed,
            config,
        }
    }

    // Linear congruential generator, Numerical Recipes parameters.
    fn next_random(&mut self) -> u64 {
        self.rng_state = self.rng_state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        self.rng_state
    }

    /// Uniform in `[0, 1)`.
    fn random_unit(&mut self) -> f64 {
        (self.next_random() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn chance(&mut self, percent: f64) -> bool {
        self.random_unit() * 100.0 < percent
    }

    fn noise(&mut self) -> f64 {
        (self.random_unit() * 2.0 - 1.0) * self.config.noise_amplitude
    }

    /// Humidity before noise: a slow sine around the base value, like a
    /// room drying out and soaking up again.
    fn cycle_humidity(&self) -> f64 {
        let period = f64::from(self.config.cycle_reads.max(1));
        let phase = (self.reads as f64 / period) * 2.0 * std::f64::consts::PI;
        self.config.base_humidity + self.config.humidity_swing * phase.sin()
    }
}

impl HumiditySensor for SimulatedSensor {
    fn read(&mut self) -> Result<RawReading, SensorReadError> {
        self.reads += 1;

        if self.config.faults_enabled {
            if self.chance(ERROR_RATE_PERCENT) {
                return Err(SensorReadError("checksum mismatch".into()));
            }
            if self.chance(ABSENT_RATE_PERCENT) {
                return Ok(RawReading::absent());
            }
            if self.chance(SPIKE_RATE_PERCENT) {
                return Ok(RawReading::new(SPIKE_TEMPERATURE, SPIKE_HUMIDITY));
            }
        }

        let temperature = self.config.base_temperature + self.noise();
        let humidity = (self.cycle_humidity() + self.noise()).clamp(0.0, 100.0);
        Ok(RawReading::new(temperature, humidity))
    }
}

/// Replays a fixed list of readings, wrapping around at the end.
#[derive(Debug, Clone)]
pub struct ScriptedSensor {
    script: Vec<RawReading>,
    position: usize,
}

impl ScriptedSensor {
    pub fn new(script: Vec<RawReading>) -> Self {
        Self { script, position: 0 }
    }

    /// Reads served so far.
    pub fn reads(&self) -> usize {
        self.position
    }
}

impl HumiditySensor for ScriptedSensor {
    fn read(&mut self) -> Result<RawReading, SensorReadError> {
        if self.script.is_empty() {
            return Err(SensorReadError("empty script".into()));
        }
        let reading = self.script[self.position % self.script.len()];
        self.position += 1;
        Ok(reading)
    }
}

#[derive(Debug, Default)]
struct RelayLog {
    output: Option<bool>,
    writes: Vec<bool>,
}

/// Relay that remembers what it was told.
#[derive(Debug, Clone, Default)]
pub struct SimulatedRelay {
    log: Arc<Mutex<RelayLog>>,
}

/// Read-only view of a [`SimulatedRelay`] kept after the relay is moved.
#[derive(Debug, Clone)]
pub struct RelayHandle {
    log: Arc<Mutex<RelayLog>>,
}

impl SimulatedRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// A relay that is already energised, as after a restart mid-run.
    pub fn with_initial_output(on: bool) -> Self {
        let relay = Self::default();
        relay.log.lock().unwrap_or_else(PoisonError::into_inner).output = Some(on);
        relay
    }

    pub fn handle(&self) -> RelayHandle {
        RelayHandle {
            log: Arc::clone(&self.log),
        }
    }
}

impl Actuator for SimulatedRelay {
    fn set_output(&mut self, on: bool) {
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        log.output = Some(on);
        log.writes.push(on);
    }

    fn current_output(&self) -> Option<bool> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).output
    }
}

impl RelayHandle {
    pub fn output(&self) -> Option<bool> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).output
    }

    pub fn writes(&self) -> Vec<bool> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).writes.clone()
    }
}

#[derive(Debug, Default)]
struct ResetLog {
    levels: Vec<bool>,
    pulses: usize,
}

/// Reset line that counts pulses instead of toggling a pin.
#[derive(Debug, Clone, Default)]
pub struct SimulatedResetLine {
    log: Arc<Mutex<ResetLog>>,
}

#[derive(Debug, Clone)]
pub struct ResetHandle {
    log: Arc<Mutex<ResetLog>>,
}

impl SimulatedResetLine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> ResetHandle {
        ResetHandle {
            log: Arc::clone(&self.log),
        }
    }
}

impl ResetLine for SimulatedResetLine {
    fn set_level(&mut self, high: bool) {
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        log.levels.push(high);
        if high && log.levels.len() >= 2 && !log.levels[log.levels.len() - 2] {
            log.pulses += 1;
        }
    }
}

impl ResetHandle {
    /// Completed low-then-high sequences.
    pub fn pulses(&self) -> usize {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).pulses
    }

    pub fn levels(&self) -> Vec<bool> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).levels.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_free_readings_stay_near_base() {
        let mut sensor = SimulatedSensor::new(SimulatedSensorConfig {
            faults_enabled: false,
            ..SimulatedSensorConfig::default()
        });
        for _ in 0..100 {
            let reading = sensor.read().unwrap();
            let t = reading.temperature.unwrap();
            let h = reading.humidity.unwrap();
            assert!((t - 20.0).abs() <= 0.5);
            assert!((h - 64.0).abs() <= 0.5);
        }
    }

    #[test]
    fn faults_eventually_appear() {
        let mut sensor = SimulatedSensor::new(SimulatedSensorConfig::default());
        let glitches = (0..2000)
            .filter(|_| match sensor.read() {
                Ok(r) => r.humidity.map_or(true, |h| h > 100.0),
                Err(_) => true,
            })
            .count();
        assert!(glitches > 0);
    }

    #[test]
    fn random_unit_is_in_range() {
        let mut sensor = SimulatedSensor::new(SimulatedSensorConfig::default());
        for _ in 0..1000 {
            let x = sensor.random_unit();
            assert!((0.0..1.0).contains(&x));
        }
    }

    #[test]
    fn reset_line_counts_pulses() {
        let mut line = SimulatedResetLine::new();
        let handle = line.handle();
        line.set_level(false);
        line.set_level(true);
        line.set_level(true);
        assert_eq!(handle.pulses(), 1);
        assert_eq!(handle.levels(), vec![false, true, true]);
    }
}
