//! Hysteresis switching of the engine relay on filtered humidity.
//!
//! Two thresholds define three bands:
//!
//! ```text
//!   humidity > start            high streak advances, low streak resets
//!   stop <= humidity <= start   dead zone, both streaks reset
//!   humidity < stop             low streak advances, high streak resets
//! ```
//!
//! A streak has to exceed `debounce_count` before the engine changes state,
//! so with the default of 2 it takes three qualifying estimates in a row.

use crate::config::ControlConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EngineStatus {
    #[default]
    Off,
    On,
}

impl EngineStatus {
    pub fn is_on(self) -> bool {
        self == EngineStatus::On
    }

    pub fn from_output(on: bool) -> Self {
        if on {
            EngineStatus::On
        } else {
            EngineStatus::Off
        }
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineStatus::Off => write!(f, "OFF"),
            EngineStatus::On => write!(f, "ON"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineState {
    pub status: EngineStatus,
    /// Minutes spent ON, frozen while OFF.
    pub on_elapsed_minutes: f64,
    /// Minutes spent OFF, frozen while ON.
    pub off_elapsed_minutes: f64,
    pub low_streak: u32,
    pub high_streak: u32,
    pub last_transition: Instant,
}

impl EngineState {
    fn new(status: EngineStatus, now: Instant) -> Self {
        Self {
            status,
            on_elapsed_minutes: 0.0,
            off_elapsed_minutes: 0.0,
            low_streak: 0,
            high_streak: 0,
            last_transition: now,
        }
    }
}

/// Result of feeding one estimate to the controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub status: EngineStatus,
    /// `Some(previous)` when this evaluation changed the state.
    pub transitioned_from: Option<EngineStatus>,
    pub high_streak: u32,
    pub low_streak: u32,
}

pub struct EngineController {
    config: ControlConfig,
    state: EngineState,
}

/// Elapsed minutes rounded to one decimal place.
fn minutes_since(since: Instant, now: Instant) -> f64 {
    let minutes = now.saturating_duration_since(since).as_secs_f64() / 60.0;
    (minutes * 10.0).round() / 10.0
}

impl EngineController {
    /// Starts OFF. No attempt is made to read the relay; see [`Self::reconcile`].
    pub fn new(config: ControlConfig, now: Instant) -> Self {
        Self::with_status(config, EngineStatus::Off, now)
    }

    pub fn with_status(config: ControlConfig, status: EngineStatus, now: Instant) -> Self {
        Self {
            config,
            state: EngineState::new(status, now),
        }
    }

    /// Adopt the actuator's real output level at startup. Returns whether
    /// the state changed.
    pub fn reconcile(&mut self, actual_output: Option<bool>, now: Instant) -> bool {
        let Some(on) = actual_output else {
            return false;
        };
        let actual = EngineStatus::from_output(on);
        if actual == self.state.status {
            return false;
        }
        info!(assumed = %self.state.status, actual = %actual, "engine state reconciled with actuator");
        self.state = EngineState::new(actual, now);
        true
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn status(&self) -> EngineStatus {
        self.state.status
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    /// Apply one filtered humidity value.
    pub fn evaluate(&mut self, humidity: f64, now: Instant) -> Evaluation {
        let before = self.state.status;
        let debounce = self.config.debounce_count;
        let s = &mut self.state;

        if humidity > self.config.start_threshold {
            s.high_streak = s.high_streak.saturating_add(1);
            if s.high_streak > debounce {
                s.status = EngineStatus::On;
                s.low_streak = 0;
            }
        } else {
            s.high_streak = 0;
        }

        if humidity < self.config.stop_threshold {
            s.low_streak = s.low_streak.saturating_add(1);
            if s.low_streak > debounce {
                s.status = EngineStatus::Off;
                s.high_streak = 0;
            }
        } else {
            s.low_streak = 0;
        }

        let transitioned_from = (s.status != before).then_some(before);
        if transitioned_from.is_some() {
            // Freeze the outgoing counter at its final value.
            let outgoing = minutes_since(s.last_transition, now);
            match before {
                EngineStatus::On => s.on_elapsed_minutes = outgoing,
                EngineStatus::Off => s.off_elapsed_minutes = outgoing,
            }
            s.last_transition = now;
            match s.status {
                EngineStatus::On => s.on_elapsed_minutes = 0.0,
                EngineStatus::Off => s.off_elapsed_minutes = 0.0,
            }
            info!(
                from = %before,
                to = %s.status,
                humidity,
                off_minutes = s.off_elapsed_minutes,
                on_minutes = s.on_elapsed_minutes,
                "engine transition"
            );
        }

        self.refresh_elapsed(now);

        Evaluation {
            status: self.state.status,
            transitioned_from,
            high_streak: self.state.high_streak,
            low_streak: self.state.low_streak,
        }
    }

    /// Recompute the running counter for the current state. The other
    /// counter keeps the value it had at the last transition.
    pub fn refresh_elapsed(&mut self, now: Instant) {
        let minutes = minutes_since(self.state.last_transition, now);
        match self.state.status {
            EngineStatus::On => self.state.on_elapsed_minutes = minutes,
            EngineStatus::Off => self.state.off_elapsed_minutes = minutes,
        }
    }
}
