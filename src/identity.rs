//! Board identification and upload endpoint lookup.
//!
//! Each installation uploads to its own channel. The board serial is read
//! once, matched against the configured endpoint table, and the resulting
//! URL is cached for the life of the process.

use crate::config::TelemetryConfig;
use crate::error::IdentityError;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};

const CPUINFO_PATH: &str = "/proc/cpuinfo";

/// Source of the hardware identifier.
pub trait IdentityResolver: Send {
    fn hardware_id(&mut self) -> Result<String, IdentityError>;
}

/// Reads the `Serial` line that Raspberry Pi kernels expose in cpuinfo.
#[derive(Debug, Clone)]
pub struct CpuInfoIdentity {
    path: PathBuf,
}

impl CpuInfoIdentity {
    pub fn new() -> Self {
        Self::with_path(CPUINFO_PATH)
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for CpuInfoIdentity {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the value of the `Serial` field from cpuinfo text.
pub fn parse_serial(cpuinfo: &str) -> Option<String> {
    cpuinfo
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim() == "Serial")
        .map(|(_, value)| value.trim().to_string())
        .filter(|serial| !serial.is_empty())
}

impl IdentityResolver for CpuInfoIdentity {
    fn hardware_id(&mut self) -> Result<String, IdentityError> {
        let text = std::fs::read_to_string(&self.path)?;
        parse_serial(&text).ok_or_else(|| IdentityError::SerialNotFound(self.path.display().to_string()))
    }
}

/// A fixed identifier, for simulation and tests.
#[derive(Debug, Clone)]
pub struct StaticIdentity(pub String);

impl IdentityResolver for StaticIdentity {
    fn hardware_id(&mut self) -> Result<String, IdentityError> {
        Ok(self.0.clone())
    }
}

/// Serial -> API key table plus the base update URL.
#[derive(Debug, Clone)]
pub struct EndpointTable {
    base_url: String,
    keys: BTreeMap<String, String>,
}

impl EndpointTable {
    pub fn new(base_url: impl Into<String>, keys: BTreeMap<String, String>) -> Self {
        Self {
            base_url: base_url.into(),
            keys,
        }
    }

    pub fn from_config(config: &TelemetryConfig) -> Self {
        Self::new(config.base_url.clone(), config.endpoints.clone())
    }

    pub fn resolve(&self, hardware_id: &str) -> Option<String> {
        self.keys
            .get(hardware_id)
            .map(|key| format!("{}?api_key={}", self.base_url, key))
    }
}

/// Lazily resolved, then cached, upload URL.
pub struct EndpointBinding {
    resolver: Box<dyn IdentityResolver>,
    table: EndpointTable,
    url: Option<String>,
    attempts: u32,
}

impl EndpointBinding {
    pub fn new(resolver: Box<dyn IdentityResolver>, table: EndpointTable) -> Self {
        Self {
            resolver,
            table,
            url: None,
            attempts: 0,
        }
    }

    /// The cached URL, resolving it first if this is still unresolved.
    /// Failures are logged and retried on the next call.
    pub fn ensure_resolved(&mut self) -> Option<&str> {
        if self.url.is_none() {
            self.attempts += 1;
            match self.try_resolve() {
                Ok(url) => {
                    info!(attempts = self.attempts, "upload endpoint resolved");
                    self.url = Some(url);
                }
                Err(e) => warn!(error = %e, attempts = self.attempts, "upload endpoint unresolved"),
            }
        }
        self.url.as_deref()
    }

    fn try_resolve(&mut self) -> Result<String, IdentityError> {
        let serial = self.resolver.hardware_id()?;
        info!(%serial, "hardware identified");
        self.table
            .resolve(&serial)
            .ok_or(IdentityError::UnknownSerial(serial))
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CPUINFO: &str = "processor\t: 0\nHardware\t: BCM2835\nRevision\t: a02082\nSerial\t\t: 000000001296c725\nModel\t\t: Raspberry Pi 3 Model B Rev 1.2\n";

    #[test]
    fn serial_is_parsed_from_cpuinfo() {
        assert_eq!(parse_serial(CPUINFO).as_deref(), Some("000000001296c725"));
        assert_eq!(parse_serial("processor : 0\n"), None);
    }

    #[test]
    fn table_builds_update_url() {
        let mut keys = BTreeMap::new();
        keys.insert("abc".to_string(), "KEY1".to_string());
        let table = EndpointTable::new("https://api.thingspeak.com/update", keys);
        assert_eq!(
            table.resolve("abc").as_deref(),
            Some("https://api.thingspeak.com/update?api_key=KEY1")
        );
        assert_eq!(table.resolve("zzz"), None);
    }
}
