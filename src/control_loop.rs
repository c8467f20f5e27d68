//! The main loop: consume estimates, switch the engine, report.
//!
//! ```text
//!   sampler thread(s) ──▶ EstimateBuffer ──▶ ControlLoop ──▶ relay
//!                                                   └──────▶ telemetry
//! ```

use crate::buffer::{EstimateBuffer, FilteredEstimate};
use crate::config::{ControlConfig, HygrostatConfig};
use crate::engine::{EngineController, EngineState, EngineStatus, Evaluation};
use crate::error::{ConfigError, ControlError};
use crate::hardware::{Actuator, HumiditySensor, ResetLine};
use crate::identity::EndpointBinding;
use crate::sampler::{AcquisitionLock, SamplerStats, SamplingAggregator};
use crate::shutdown::ShutdownToken;
use crate::telemetry::{ReportOutcome, TelemetryReporter, TelemetryStats};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task::{self, JoinHandle};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopStats {
    pub cycles: u64,
    pub evaluations: u64,
    pub idle_cycles: u64,
    pub transitions: u64,
}

/// What one pass through the loop did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleReport {
    pub estimate: Option<FilteredEstimate>,
    pub evaluation: Option<Evaluation>,
    pub telemetry: Option<ReportOutcome>,
}

/// Telemetry reporter together with the endpoint it uploads to.
pub struct TelemetryLink {
    pub reporter: TelemetryReporter,
    pub endpoint: EndpointBinding,
}

pub struct ControlLoop<A: Actuator> {
    engine: EngineController,
    actuator: A,
    telemetry: Option<TelemetryLink>,
    engine_buffer: EstimateBuffer,
    auxiliary_buffers: Vec<EstimateBuffer>,
    poll_interval: Duration,
    stats: LoopStats,
}

impl<A: Actuator> ControlLoop<A> {
    pub fn new(
        config: ControlConfig,
        actuator: A,
        engine_buffer: EstimateBuffer,
        telemetry: Option<TelemetryLink>,
        now: Instant,
    ) -> Self {
        let reconcile = config.reconcile_on_startup;
        let poll_interval = Duration::from_secs(config.poll_interval_secs.max(1));
        let mut engine = EngineController::new(config, now);
        if reconcile {
            engine.reconcile(actuator.current_output(), now);
        }
        info!(status = %engine.status(), reconcile, "engine control initialised");

        Self {
            engine,
            actuator,
            telemetry,
            engine_buffer,
            auxiliary_buffers: Vec::new(),
            poll_interval,
            stats: LoopStats::default(),
        }
    }

    /// Estimates from these buffers are drained and logged but never
    /// drive the engine.
    #[must_use]
    pub fn with_auxiliary(mut self, buffers: Vec<EstimateBuffer>) -> Self {
        self.auxiliary_buffers = buffers;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn engine_state(&self) -> &EngineState {
        self.engine.state()
    }

    pub fn engine_status(&self) -> EngineStatus {
        self.engine.status()
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn telemetry_stats(&self) -> Option<TelemetryStats> {
        self.telemetry.as_ref().map(|link| link.reporter.stats())
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.telemetry.as_ref().and_then(|link| link.endpoint.url())
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    /// One iteration. An empty buffer is not an error: only the elapsed
    /// counters are refreshed.
    pub fn run_cycle(&mut self, now: Instant) -> CycleReport {
        self.stats.cycles += 1;

        if let Some(link) = self.telemetry.as_mut() {
            link.endpoint.ensure_resolved();
        }

        for buffer in &self.auxiliary_buffers {
            if let Some(aux) = buffer.pop_latest() {
                info!(
                    sensor = aux.sensor_id,
                    temperature = aux.temperature,
                    humidity = aux.humidity,
                    "auxiliary sensor estimate"
                );
            }
        }

        let Some(estimate) = self.engine_buffer.pop_latest() else {
            self.stats.idle_cycles += 1;
            self.engine.refresh_elapsed(now);
            debug!("no new estimate this cycle");
            return CycleReport {
                estimate: None,
                evaluation: None,
                telemetry: None,
            };
        };

        let evaluation = self.engine.evaluate(estimate.humidity, now);
        self.stats.evaluations += 1;
        if evaluation.transitioned_from.is_some() {
            self.stats.transitions += 1;
        }
        self.actuator.set_output(evaluation.status.is_on());

        let state = self.engine.state();
        info!(
            sensor = estimate.sensor_id,
            temperature = estimate.temperature,
            humidity = estimate.humidity,
            status = %state.status,
            on_minutes = state.on_elapsed_minutes,
            off_minutes = state.off_elapsed_minutes,
            high_streak = state.high_streak,
            low_streak = state.low_streak,
            "control cycle"
        );

        let telemetry = self.telemetry.as_mut().map(|link| {
            let endpoint = link.endpoint.url();
            link.reporter.report(endpoint, &estimate, state)
        });

        CycleReport {
            estimate: Some(estimate),
            evaluation: Some(evaluation),
            telemetry,
        }
    }

    /// A cycle may block on the HTTP sink. On a multi-threaded runtime the
    /// worker is handed off first so other tasks (the interrupt handler
    /// among them) keep running.
    fn run_cycle_blocking(&mut self) -> CycleReport {
        match Handle::current().runtime_flavor() {
            RuntimeFlavor::MultiThread => task::block_in_place(|| self.run_cycle(Instant::now())),
            _ => self.run_cycle(Instant::now()),
        }
    }

    /// Run cycles on the poll interval until shutdown, then wait for every
    /// sampler to finish its current poll.
    pub async fn run(
        mut self,
        samplers: Vec<JoinHandle<SamplerStats>>,
        mut shutdown: ShutdownToken,
    ) -> Result<LoopStats, ControlError> {
        let mut interval = time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.poll_interval.as_secs(), "control loop started");

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                () = shutdown.triggered() => {}
            }
            if shutdown.is_triggered() {
                info!("shutdown requested");
                break;
            }
            self.run_cycle_blocking();
        }

        for handle in samplers {
            match handle.await {
                Ok(stats) => info!(
                    polls = stats.polls,
                    emitted = stats.windows_emitted,
                    resets = stats.reset_pulses,
                    "sampler joined"
                ),
                Err(e) => {
                    error!(error = %e, "sampler task panicked");
                    return Err(e.into());
                }
            }
        }

        info!(
            cycles = self.stats.cycles,
            transitions = self.stats.transitions,
            "control loop stopped"
        );
        Ok(self.stats)
    }
}

/// Start a sampler on the blocking pool.
pub fn spawn_sampler<S, R>(aggregator: SamplingAggregator<S, R>, shutdown: ShutdownToken) -> JoinHandle<SamplerStats>
where
    S: HumiditySensor + 'static,
    R: ResetLine + 'static,
{
    task::spawn_blocking(move || aggregator.run(shutdown))
}

/// Hardware for one configured sensor channel.
pub struct ChannelHardware<S, R> {
    pub sensor: S,
    pub reset_line: R,
}

/// Wire samplers and the control loop from a validated config. Returns
/// the loop and the sampler handles to pass to [`ControlLoop::run`].
///
/// `hardware` must yield one entry per `config.sensors`, in the same order.
pub fn assemble<A, S, R>(
    config: &HygrostatConfig,
    actuator: A,
    hardware: impl IntoIterator<Item = ChannelHardware<S, R>>,
    telemetry: Option<TelemetryLink>,
    shutdown: &ShutdownToken,
) -> Result<(ControlLoop<A>, Vec<JoinHandle<SamplerStats>>), ControlError>
where
    A: Actuator,
    S: HumiditySensor + 'static,
    R: ResetLine + 'static,
{
    config.validate()?;
    let lock = AcquisitionLock::new();
    let mut engine_buffer = None;
    let mut auxiliary = Vec::new();
    let mut handles = Vec::new();

    let hardware: Vec<ChannelHardware<S, R>> = hardware.into_iter().collect();
    if hardware.len() != config.sensors.len() {
        return Err(ConfigError::Invalid(format!(
            "{} sensor channels configured but hardware supplied for {}",
            config.sensors.len(),
            hardware.len()
        ))
        .into());
    }

    for (channel, hw) in config.sensors.iter().zip(hardware) {
        let buffer = EstimateBuffer::new(config.sampling.buffer_capacity);
        if channel.controls_engine {
            engine_buffer = Some(buffer.clone());
        } else {
            auxiliary.push(buffer.clone());
        }
        let aggregator = SamplingAggregator::new(
            channel.clone(),
            config.sampling.clone(),
            hw.sensor,
            hw.reset_line,
            lock.clone(),
            buffer,
        );
        handles.push(spawn_sampler(aggregator, shutdown.clone()));
    }

    // validate() guarantees exactly one engine channel.
    let engine_buffer = engine_buffer.unwrap_or_else(|| EstimateBuffer::new(1));
    let control = ControlLoop::new(config.control.clone(), actuator, engine_buffer, telemetry, Instant::now())
        .with_auxiliary(auxiliary);
    Ok((control, handles))
}
