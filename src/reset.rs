use crate::config::MIN_RESET_PULSE_MS;
use crate::hardware::ResetLine;
use std::time::Duration;
use tracing::warn;

/// Power-cycles a misbehaving sensor through its reset line.
pub struct SensorResetPolicy<R: ResetLine> {
    line: R,
    hold: Duration,
    pulses: u64,
}

impl<R: ResetLine> SensorResetPolicy<R> {
    /// `hold` below [`MIN_RESET_PULSE_MS`] is raised to the minimum.
    pub fn new(line: R, hold: Duration) -> Self {
        Self {
            line,
            hold: hold.max(Duration::from_millis(MIN_RESET_PULSE_MS)),
            pulses: 0,
        }
    }

    /// Deassert, wait, reassert. Blocks for the hold time.
    pub fn pulse(&mut self, sensor_id: u8) {
        warn!(sensor = sensor_id, hold_ms = self.hold.as_millis() as u64, "resetting sensor");
        self.line.pulse(self.hold);
        self.pulses += 1;
    }

    pub fn pulses(&self) -> u64 {
        self.pulses
    }

    pub fn hold(&self) -> Duration {
        self.hold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::SimulatedResetLine;
    use std::time::Instant;

    #[test]
    fn pulse_holds_line_low_for_minimum() {
        let line = SimulatedResetLine::new();
        let handle = line.handle();
        let mut policy = SensorResetPolicy::new(line, Duration::from_millis(1));
        assert_eq!(policy.hold(), Duration::from_millis(100));

        let started = Instant::now();
        policy.pulse(9);
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(handle.levels(), vec![false, true]);
        assert_eq!(policy.pulses(), 1);
    }
}
