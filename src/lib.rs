//! # Hygrostat
//!
//! Humidity-driven engine controller for a DHT22-class sensor and a relay.
//!
//! ## Features
//!
//! - **Noise filtering**: windows of valid readings are cleaned of
//!   outliers beyond a configurable number of standard deviations
//! - **Sensor recovery**: absent or out-of-range readings power-cycle the
//!   sensor through its reset line
//! - **Hysteresis control**: separate start/stop thresholds with debounce
//!   streaks switch the engine relay
//! - **Time accounting**: minutes spent in the current engine state
//! - **Telemetry**: filtered values and engine state uploaded each cycle,
//!   failures logged and skipped
//!
//! ## Quick Start
//!
//! ```rust
//! use hygrostat::config::ControlConfig;
//! use hygrostat::engine::{EngineController, EngineStatus};
//! use std::time::Instant;
//!
//! let mut engine = EngineController::new(ControlConfig::default(), Instant::now());
//! for _ in 0..3 {
//!     engine.evaluate(70.0, Instant::now());
//! }
//! assert_eq!(engine.status(), EngineStatus::On);
//! ```
//!
//! ## Architecture
//!
//! - [`filter`] - Outlier rejection over a sample window
//! - [`sampler`] - Per-sensor acquisition thread and window aggregation
//! - [`reset`] - Sensor reset pulse policy
//! - [`buffer`] - Producer/consumer hand-off of filtered estimates
//! - [`engine`] - Hysteresis state machine and elapsed-time counters
//! - [`telemetry`] - Report formatting and upload sinks
//! - [`identity`] - Board serial lookup and endpoint binding
//! - [`control_loop`] - Main loop tying it all together
//! - [`hardware`] - Collaborator traits and simulated devices

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod buffer;
pub mod config;
pub mod control_loop;
pub mod engine;
pub mod error;
pub mod filter;
pub mod hardware;
pub mod identity;
pub mod reset;
pub mod sampler;
pub mod shutdown;
pub mod telemetry;

// Re-export main public types for convenience
pub use buffer::{EstimateBuffer, FilteredEstimate};
pub use config::HygrostatConfig;
pub use control_loop::ControlLoop;
pub use engine::{EngineController, EngineStatus};
pub use sampler::SamplingAggregator;
pub use shutdown::{Shutdown, ShutdownToken};
