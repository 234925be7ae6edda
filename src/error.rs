use std::path::PathBuf;

use thiserror::Error;

/// Capture device failures. All of these end a run.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no capture device found")]
    NotFound,
    #[error("multiple capture devices found ({}); specify a device id", .0.join(", "))]
    Ambiguous(Vec<String>),
    #[error("camera init failed on {device}: {reason}")]
    InitFailed { device: String, reason: String },
    #[error("frame capture failed on {device}: {reason}")]
    Capture { device: String, reason: String },
    #[error("capture backend unavailable: {0}")]
    Unsupported(String),
}

/// Model artifact could not be turned into a working inference engine.
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("model file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("failed to start model runner {}: {source}", .path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("model handshake failed: {0}")]
    Handshake(String),
    #[error("unsupported model reference {0}")]
    Unsupported(String),
}

/// Single-frame inference failure. Never ends a run.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference engine error: {0}")]
    Engine(String),
    #[error("malformed inference result: {0}")]
    MalformedResult(String),
    #[error("frame is {actual} bytes, expected {expected} for {width}x{height} RGB")]
    InputMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("engine not running")]
    NotRunning,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum GpioError {
    #[error("gpio {pin}: {op} {}: {source}", .path.display())]
    Io {
        pin: u32,
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("gpio {pin} already released")]
    Released { pin: u32 },
    #[error("gpio {pin} read unexpected value {value:?}")]
    BadValue { pin: u32, value: String },
}

/// Errors that end a run. Per-frame `InferenceError`s are handled inside the
/// loop and never surface here.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    ModelLoad(#[from] ModelLoadError),
    #[error(transparent)]
    Gpio(#[from] GpioError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
