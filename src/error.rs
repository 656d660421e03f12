use thiserror::Error;

/// Failures talking to the temperature sensor. Cloned into the device state
/// so the notify channel can keep reporting it until a read succeeds.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SensorError {
    #[error("failed to initialize sensor bus: {0}")]
    Setup(String),
    #[error("failed to read from sensor bus: {0}")]
    Read(String),
    #[error("short read from sensor bus: wanted {wanted} bytes, got {got}")]
    ShortRead { wanted: usize, got: usize },
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("`{command}` exited with {status}")]
    Exit { command: String, status: String },
    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),
    #[error("invalid network configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("failed to write {path}: {source}")]
    ConfigFile {
        path: String,
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("collector answered with status {0}")]
    Status(reqwest::StatusCode),
}

#[derive(Debug, Error)]
pub enum RadioError {
    #[error("failed to power on radio: {0}")]
    PowerOn(String),
    #[error("failed to resolve radio hardware address: {0}")]
    Identity(String),
    #[error("failed to register GATT service: {0}")]
    Service(String),
    #[error("failed to advertise: {0}")]
    Advertise(String),
}
