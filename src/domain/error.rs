use thiserror::Error;

/// SerialTerm unified error type
#[derive(Error, Debug)]
pub enum SerialTermError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to open port: {0}")]
    OpenFailed(String),

    #[error("Read error: {0}")]
    ReadFailed(String),

    #[error("Write error: {0}")]
    WriteFailed(String),

    #[error("Failed to close port: {0}")]
    CloseFailed(String),

    #[error("Serial ports are not supported in this environment")]
    Unsupported,

    #[error("Zero-copy reads are not supported by this port")]
    ZeroCopyUnsupported,

    #[error("Stream is locked")]
    StreamLocked,

    #[error("Device not connected")]
    NotConnected,

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Output error: {0}")]
    Output(String),
}

impl SerialTermError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

pub type SerialTermResult<T> = Result<T, SerialTermError>;
