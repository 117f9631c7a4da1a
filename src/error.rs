//! Error handling for the uartcam service.

use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum CamError {
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Serial transport errors
    #[error("Serial error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// Capture device node missing (hardware-encoder mode)
    #[error("Camera device not found: {0}")]
    DeviceNotFound(String),

    /// Capture device could not be opened (software mode)
    #[error("Failed to open camera: {0}")]
    DeviceOpen(String),

    /// Start requested while a recording session is active
    #[error("Already recording")]
    AlreadyRecording,

    /// Stop requested with no active recording session
    #[error("Not recording")]
    NotRecording,

    /// Hardware encoder process failed to spawn
    #[error("Failed to spawn encoder: {0}")]
    EncoderSpawn(String),

    /// Software pipe encoder failed to open
    #[error("Failed to open video writer: {0}")]
    WriterOpen(String),

    /// Serial port could not be opened at startup
    #[error("Failed to open serial port {port}: {reason}")]
    SerialOpen { port: String, reason: String },

    /// Malformed command line received over the serial link
    #[error("Command parse error: {0}")]
    CommandParse(String),

    /// Failure while applying a command or operating the encoder
    #[error("Command dispatch error: {0}")]
    CommandDispatch(String),

    /// Generic application errors
    #[error("Application error: {0}")]
    App(String),
}

/// Application result type
pub type CamResult<T> = std::result::Result<T, CamError>;
