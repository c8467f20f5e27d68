//! Collaborator interfaces for the physical world.
//!
//! The control core only talks to hardware through these traits, so the
//! same sampler and engine logic runs against real GPIO drivers or the
//! simulated devices in [`simulated`].

pub mod simulated;

pub use simulated::{RelayHandle, ResetHandle, ScriptedSensor, SimulatedRelay, SimulatedResetLine, SimulatedSensor};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One poll of a humidity/temperature sensor. A field is `None` when the
/// driver could not decode it.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RawReading {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
}

impl RawReading {
    pub fn new(temperature: f64, humidity: f64) -> Self {
        Self {
            temperature: Some(temperature),
            humidity: Some(humidity),
        }
    }

    pub fn absent() -> Self {
        Self::default()
    }
}

/// Driver-level read failure. The sampler treats it like an absent reading.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("sensor read failed: {0}")]
pub struct SensorReadError(pub String);

pub trait HumiditySensor: Send {
    /// Read one humidity/temperature pair. Drivers may retry internally.
    fn read(&mut self) -> Result<RawReading, SensorReadError>;
}

/// Binary output driving the engine relay.
pub trait Actuator: Send {
    fn set_output(&mut self, on: bool);

    /// Actual output level, if the hardware can report it.
    fn current_output(&self) -> Option<bool> {
        None
    }
}

/// Open-collector line that power-cycles a sensor.
pub trait ResetLine: Send {
    /// `true` powers the sensor, `false` holds it in reset.
    fn set_level(&mut self, high: bool);

    /// Deassert, hold for `hold`, reassert.
    fn pulse(&mut self, hold: Duration) {
        self.set_level(false);
        std::thread::sleep(hold);
        self.set_level(true);
    }
}

impl<T: HumiditySensor + ?Sized> HumiditySensor for Box<T> {
    fn read(&mut self) -> Result<RawReading, SensorReadError> {
        (**self).read()
    }
}

impl<T: Actuator + ?Sized> Actuator for Box<T> {
    fn set_output(&mut self, on: bool) {
        (**self).set_output(on);
    }

    fn current_output(&self) -> Option<bool> {
        (**self).current_output()
    }
}

impl<T: ResetLine + ?Sized> ResetLine for Box<T> {
    fn set_level(&mut self, high: bool) {
        (**self).set_level(high);
    }

    fn pulse(&mut self, hold: Duration) {
        (**self).pulse(hold);
    }
}
