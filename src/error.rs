//! Error types for the microphone firmware

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The capture driver reported a fatal condition. The device must
    /// restart: sample buffers cannot be left in an undefined state.
    #[error("Hardware fault: {0}")]
    HardwareFault(String),

    #[error("Buffer allocation failed ({0} samples)")]
    BufferAlloc(usize),
}

impl AudioError {
    /// Faults that require a full device restart rather than recovery.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AudioError::HardwareFault(_) | AudioError::BufferAlloc(_))
    }
}

/// Streaming session errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    /// Request exceeded the parse buffer before a terminator was found.
    /// The buffer is discarded; the session itself is not disturbed.
    #[error("Request overflowed parse buffer ({0} bytes)")]
    ParseOverflow(usize),

    /// The transport accepted fewer bytes than one packet. Streaming
    /// stops; the session returns to idle on the next poll.
    #[error("Short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    #[error("Client disconnected")]
    Disconnected,
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Setter input outside the accepted range. State is not mutated.
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: String },

    #[error("Failed to read settings: {0}")]
    Load(String),

    #[error("Failed to write settings: {0}")]
    Save(String),

    #[error("Failed to parse settings: {0}")]
    Parse(String),
}

impl ConfigError {
    pub fn out_of_range(field: &'static str, value: impl ToString) -> Self {
        ConfigError::OutOfRange {
            field,
            value: value.to_string(),
        }
    }
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
