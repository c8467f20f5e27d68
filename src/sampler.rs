//! Sensor acquisition, validation and windowed noise filtering.
//!
//! One [`SamplingAggregator`] runs per physical sensor on its own blocking
//! thread. Every poll takes the shared [`AcquisitionLock`], so reads (and
//! the reset pulses they may trigger) never overlap across sensors.
//!
//! ```text
//!   COLLECTING ──(window full)──▶ FILTER_AND_EMIT ──▶ COLLECTING
//! ```

use crate::buffer::{EstimateBuffer, FilteredEstimate};
use crate::config::{SamplingConfig, SensorChannelConfig, MAX_WINDOW_SIZE};
use crate::filter;
use crate::hardware::{HumiditySensor, RawReading, ResetLine};
use crate::reset::SensorResetPolicy;
use crate::shutdown::ShutdownToken;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Serialises access to the sensor bus across all samplers.
#[derive(Debug, Clone, Default)]
pub struct AcquisitionLock {
    inner: Arc<Mutex<()>>,
}

impl AcquisitionLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self) -> MutexGuard<'_, ()> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A reading that passed validation and calibration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub temperature: f64,
    pub humidity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    AbsentField,
    HumidityOutOfRange,
    TemperatureOutOfRange,
    ReadError,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PollOutcome {
    /// Sample added; the window now holds this many.
    Accepted(usize),
    Rejected(RejectReason),
    /// The window completed and an estimate was pushed to the buffer.
    Emitted(FilteredEstimate),
    /// The window completed but noise elimination left nothing to average.
    Discarded,
}

/// Diagnostic counters. Nothing in the control path reads these.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplerStats {
    pub polls: u64,
    pub valid: u64,
    pub absent: u64,
    pub humidity_out_of_range: u64,
    pub temperature_out_of_range: u64,
    pub read_errors: u64,
    pub reset_pulses: u64,
    pub windows_emitted: u64,
    pub windows_discarded: u64,
    pub valid_in_a_row: u64,
    pub invalid_in_a_row: u64,
}

impl SamplerStats {
    fn record_valid(&mut self) {
        self.valid += 1;
        self.valid_in_a_row += 1;
        self.invalid_in_a_row = 0;
    }

    fn record_rejected(&mut self, reason: RejectReason) {
        match reason {
            RejectReason::AbsentField => self.absent += 1,
            RejectReason::HumidityOutOfRange => self.humidity_out_of_range += 1,
            RejectReason::TemperatureOutOfRange => self.temperature_out_of_range += 1,
            RejectReason::ReadError => self.read_errors += 1,
        }
        self.invalid_in_a_row += 1;
        self.valid_in_a_row = 0;
    }

    pub fn rejected(&self) -> u64 {
        self.absent + self.humidity_out_of_range + self.temperature_out_of_range + self.read_errors
    }
}

/// Apply the channel's calibration offsets and check the admissible range.
pub fn validate(
    reading: RawReading,
    channel: &SensorChannelConfig,
    sampling: &SamplingConfig,
) -> Result<Sample, RejectReason> {
    let finite = |v: Option<f64>| v.filter(|x| x.is_finite());
    let (Some(temperature), Some(humidity)) = (finite(reading.temperature), finite(reading.humidity)) else {
        return Err(RejectReason::AbsentField);
    };

    let sample = Sample {
        temperature: temperature + channel.temperature_offset,
        humidity: humidity + channel.humidity_offset,
    };

    if sample.humidity > sampling.max_humidity {
        return Err(RejectReason::HumidityOutOfRange);
    }
    if sample.temperature > sampling.max_temperature {
        return Err(RejectReason::TemperatureOutOfRange);
    }
    Ok(sample)
}

pub struct SamplingAggregator<S: HumiditySensor, R: ResetLine> {
    channel: SensorChannelConfig,
    sampling: SamplingConfig,
    sensor: S,
    reset: SensorResetPolicy<R>,
    lock: AcquisitionLock,
    buffer: EstimateBuffer,
    window: Vec<Sample, MAX_WINDOW_SIZE>,
    stats: SamplerStats,
}

impl<S: HumiditySensor, R: ResetLine> SamplingAggregator<S, R> {
    pub fn new(
        channel: SensorChannelConfig,
        sampling: SamplingConfig,
        sensor: S,
        reset_line: R,
        lock: AcquisitionLock,
        buffer: EstimateBuffer,
    ) -> Self {
        let reset = SensorResetPolicy::new(reset_line, sampling.reset_pulse());
        Self {
            channel,
            sampling,
            sensor,
            reset,
            lock,
            buffer,
            window: Vec::new(),
            stats: SamplerStats::default(),
        }
    }

    pub fn sensor_id(&self) -> u8 {
        self.channel.id
    }

    pub fn stats(&self) -> &SamplerStats {
        &self.stats
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    fn window_size(&self) -> usize {
        self.sampling.window_size.clamp(1, MAX_WINDOW_SIZE)
    }

    /// One acquisition: read, validate, reset on fault, and emit when the
    /// window fills.
    pub fn poll_once(&mut self) -> PollOutcome {
        self.stats.polls += 1;
        let sensor_id = self.channel.id;

        let validated = {
            let _bus = self.lock.acquire();
            let validated = match self.sensor.read() {
                Ok(reading) => {
                    debug!(
                        sensor = sensor_id,
                        temperature = ?reading.temperature,
                        humidity = ?reading.humidity,
                        "raw reading"
                    );
                    validate(reading, &self.channel, &self.sampling)
                }
                Err(e) => {
                    warn!(sensor = sensor_id, error = %e, "sensor read failed");
                    Err(RejectReason::ReadError)
                }
            };
            if validated.is_err() {
                // The pulse runs with the bus held; reads are serialised anyway.
                self.reset.pulse(sensor_id);
                self.stats.reset_pulses = self.reset.pulses();
            }
            validated
        };

        let sample = match validated {
            Ok(sample) => sample,
            Err(reason) => {
                self.stats.record_rejected(reason);
                warn!(
                    sensor = sensor_id,
                    ?reason,
                    invalid_in_a_row = self.stats.invalid_in_a_row,
                    "rejected reading"
                );
                return PollOutcome::Rejected(reason);
            }
        };

        self.stats.record_valid();
        let pushed = self.window.push(sample);
        // The window is drained as soon as it reaches window_size.
        debug_assert!(pushed.is_ok(), "sample window overflowed at {}", self.window.len());

        if self.window.len() < self.window_size() {
            return PollOutcome::Accepted(self.window.len());
        }
        self.flush_window()
    }

    fn flush_window(&mut self) -> PollOutcome {
        let temperatures: std::vec::Vec<f64> = self.window.iter().map(|s| s.temperature).collect();
        let humidities: std::vec::Vec<f64> = self.window.iter().map(|s| s.humidity).collect();
        self.window.clear();

        let k = self.sampling.std_factor;
        let kept_humidity = filter::eliminate_noise(&humidities, k);
        let estimate = match (filter::filtered_mean(&temperatures, k), filter::mean(&kept_humidity)) {
            (Some(temperature), Some(humidity)) => FilteredEstimate {
                sensor_id: self.channel.id,
                temperature,
                humidity,
                samples_used: kept_humidity.len() as u8,
                produced_at: SystemTime::now(),
            },
            _ => {
                self.stats.windows_discarded += 1;
                warn!(sensor = self.channel.id, "noise filter removed every sample, window discarded");
                return PollOutcome::Discarded;
            }
        };

        // Fully built before the buffer lock is taken.
        self.buffer.push(estimate);
        self.stats.windows_emitted += 1;
        info!(
            sensor = estimate.sensor_id,
            temperature = estimate.temperature,
            humidity = estimate.humidity,
            samples = estimate.samples_used,
            valid_in_a_row = self.stats.valid_in_a_row,
            "filtered estimate"
        );
        PollOutcome::Emitted(estimate)
    }

    /// Poll until shutdown is requested. The iteration in progress always
    /// completes before the loop exits.
    pub fn run(mut self, shutdown: ShutdownToken) -> SamplerStats {
        let pause = Duration::from_millis(self.sampling.poll_interval_ms);
        info!(sensor = self.channel.id, window = self.window_size(), "sampler started");

        while !shutdown.is_triggered() {
            self.poll_once();
            if !pause.is_zero() {
                std::thread::sleep(pause);
            }
        }

        info!(
            sensor = self.channel.id,
            polls = self.stats.polls,
            emitted = self.stats.windows_emitted,
            rejected = self.stats.rejected(),
            "sampler stopped"
        );
        self.stats
    }
}
