use thiserror::Error;

/// Configuration could not be loaded or failed validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("server returned status {0}")]
    Status(u16),

    #[error("update rejected by endpoint")]
    Rejected,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("failed to read hardware identity: {0}")]
    Io(#[from] std::io::Error),

    #[error("no serial number found in {0}")]
    SerialNotFound(String),

    #[error("no endpoint configured for serial {0}")]
    UnknownSerial(String),
}

/// Top-level error surfaced by the binary.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("telemetry: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error("identity: {0}")]
    Identity(#[from] IdentityError),

    #[error("sampler task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
