//! Error types for the adapter and the host client

use thiserror::Error;

/// Adapter-specific errors
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Failed to open or connect to the adapter
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The other end of the link went away
    #[error("Link disconnected")]
    Disconnected,

    /// No data within the link timeout
    #[error("Communication timeout")]
    Timeout,

    /// The adapter answered a command with NACK
    #[error("NACK received for command 0x{0:02X}")]
    Nack(u8),

    /// The adapter answered with a different command code
    #[error("Unexpected reply 0x{reply:02X} to command 0x{command:02X}")]
    UnexpectedReply {
        /// Command that was sent
        command: u8,
        /// Command code of the reply
        reply: u8,
    },

    /// Reply payload has the wrong shape
    #[error("Malformed reply to command 0x{0:02X}")]
    MalformedReply(u8),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Configuration file could not be parsed
    #[error("Config error: {0}")]
    Config(String),

    /// Error from the flash engine or packet codec
    #[error(transparent)]
    Core(#[from] combiflash_core::Error),

    /// I/O error during communication
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port error
    #[cfg(feature = "serial")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

/// Result type for adapter operations
pub type Result<T> = std::result::Result<T, AdapterError>;

impl embedded_io::Error for AdapterError {
    fn kind(&self) -> embedded_io::ErrorKind {
        use embedded_io::ErrorKind;
        match self {
            Self::Disconnected => ErrorKind::ConnectionReset,
            Self::Timeout => ErrorKind::TimedOut,
            Self::InvalidParameter(_) => ErrorKind::InvalidInput,
            _ => ErrorKind::Other,
        }
    }
}

impl From<AdapterError> for combiflash_core::Error {
    fn from(e: AdapterError) -> Self {
        match e {
            AdapterError::Core(e) => e,
            AdapterError::Nack(_) => combiflash_core::Error::BdmError,
            AdapterError::Timeout => combiflash_core::Error::Timeout,
            _ => combiflash_core::Error::TransportError,
        }
    }
}
