//! Upload of filtered readings and engine state to the remote channel.
//!
//! Reports are five numeric fields, matching the channel layout of the
//! existing dashboards:
//!
//! | field | value                           |
//! |-------|---------------------------------|
//! | 1     | filtered humidity (%)           |
//! | 2     | filtered temperature (C)        |
//! | 3     | engine on flag (0/1)            |
//! | 4, 5  | elapsed minutes, see [`FieldOrder`] |
//!
//! A failed upload is logged and forgotten; the next cycle sends fresh data.

use crate::buffer::FilteredEstimate;
use crate::config::{FieldOrder, TelemetryConfig};
use crate::engine::{EngineState, EngineStatus};
use crate::error::TelemetryError;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

const MAX_FIELDS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TelemetryField {
    pub name: &'static str,
    pub value: f64,
}

/// Ordered set of named numeric values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryReport {
    pub fields: Vec<TelemetryField, MAX_FIELDS>,
}

impl TelemetryReport {
    pub fn build(estimate: &FilteredEstimate, state: &EngineState, order: FieldOrder) -> Self {
        let on = state.status.is_on();
        let (field4, field5) = match (order, state.status) {
            (FieldOrder::StateDependent, EngineStatus::Off) => {
                (state.off_elapsed_minutes, state.on_elapsed_minutes)
            }
            _ => (state.on_elapsed_minutes, state.off_elapsed_minutes),
        };

        let mut fields = Vec::new();
        for (name, value) in [
            ("field1", estimate.humidity),
            ("field2", estimate.temperature),
            ("field3", if on { 1.0 } else { 0.0 }),
            ("field4", field4),
            ("field5", field5),
        ] {
            let pushed = fields.push(TelemetryField { name, value });
            debug_assert!(pushed.is_ok(), "telemetry report exceeds {MAX_FIELDS} fields");
        }
        Self { fields }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.fields.iter().find(|f| f.name == name).map(|f| f.value)
    }
}

pub trait TelemetrySink: Send {
    fn send(&mut self, endpoint: &str, report: &TelemetryReport) -> Result<(), TelemetryError>;
}

/// Sends reports as query parameters of an HTTP GET, the update API used
/// by ThingSpeak-style channels.
pub struct HttpTelemetrySink {
    agent: ureq::Agent,
}

impl HttpTelemetrySink {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(concat!("hygrostat/", env!("CARGO_PKG_VERSION")))
            .build();
        Self { agent }
    }

    pub fn from_config(config: &TelemetryConfig) -> Self {
        Self::new(Duration::from_secs(config.timeout_secs))
    }
}

impl TelemetrySink for HttpTelemetrySink {
    fn send(&mut self, endpoint: &str, report: &TelemetryReport) -> Result<(), TelemetryError> {
        let mut request = self.agent.get(endpoint);
        for field in &report.fields {
            request = request.query(field.name, &field.value.to_string());
        }

        let response = request.call().map_err(|e| match e {
            ureq::Error::Status(code, _) => TelemetryError::Status(code),
            other => TelemetryError::Transport(other.to_string()),
        })?;

        let body = response
            .into_string()
            .map_err(|e| TelemetryError::Transport(e.to_string()))?;
        // The update API answers with the new entry id, or 0 when it refused the update.
        if body.trim() == "0" {
            return Err(TelemetryError::Rejected);
        }
        debug!(entry = body.trim(), "telemetry accepted");
        Ok(())
    }
}

/// Writes reports to the log instead of the network.
#[derive(Debug, Default)]
pub struct LogTelemetrySink;

impl TelemetrySink for LogTelemetrySink {
    fn send(&mut self, endpoint: &str, report: &TelemetryReport) -> Result<(), TelemetryError> {
        let json = serde_json::to_string(report).map_err(|e| TelemetryError::Transport(e.to_string()))?;
        info!(endpoint, report = %json, "telemetry");
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryLog {
    sent: std::vec::Vec<(String, TelemetryReport)>,
    failing: bool,
}

/// Keeps every report in memory; can be switched to fail on demand.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    log: Arc<Mutex<MemoryLog>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).failing = failing;
    }

    pub fn reports(&self) -> std::vec::Vec<(String, TelemetryReport)> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).sent.clone()
    }
}

impl TelemetrySink for MemorySink {
    fn send(&mut self, endpoint: &str, report: &TelemetryReport) -> Result<(), TelemetryError> {
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        if log.failing {
            return Err(TelemetryError::Transport("sink offline".into()));
        }
        log.sent.push((endpoint.to_string(), report.clone()));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportOutcome {
    Sent,
    Failed,
    /// No endpoint resolved yet.
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryStats {
    pub sent: u64,
    pub failed: u64,
    pub skipped: u64,
}

pub struct TelemetryReporter {
    sink: Box<dyn TelemetrySink>,
    order: FieldOrder,
    stats: TelemetryStats,
}

impl TelemetryReporter {
    pub fn new(sink: Box<dyn TelemetrySink>, order: FieldOrder) -> Self {
        Self {
            sink,
            order,
            stats: TelemetryStats::default(),
        }
    }

    /// Format and send one report. Never fails; errors are logged and
    /// counted, and the next report goes out on the next cycle as usual.
    pub fn report(
        &mut self,
        endpoint: Option<&str>,
        estimate: &FilteredEstimate,
        state: &EngineState,
    ) -> ReportOutcome {
        let Some(endpoint) = endpoint else {
            self.stats.skipped += 1;
            debug!("telemetry skipped, endpoint unresolved");
            return ReportOutcome::Skipped;
        };

        let report = TelemetryReport::build(estimate, state, self.order);
        match self.sink.send(endpoint, &report) {
            Ok(()) => {
                self.stats.sent += 1;
                ReportOutcome::Sent
            }
            Err(e) => {
                self.stats.failed += 1;
                warn!(error = %e, failed = self.stats.failed, "telemetry upload failed, continuing");
                ReportOutcome::Failed
            }
        }
    }

    pub fn stats(&self) -> TelemetryStats {
        self.stats
    }
}
