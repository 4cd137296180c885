use std::path::PathBuf;

/// Errors that can occur in serial transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The device path could not be opened.
    #[error("device unavailable at {path}: {source}")]
    DeviceUnavailable {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The requested baud rate is not in the supported set.
    #[error("unsupported baud rate {0} (expected 4800, 9600, 19200, 38400, 57600 or 115200)")]
    UnsupportedBaud(u32),

    /// The baud rate text is not a number.
    #[error("invalid baud rate {0:?}")]
    InvalidBaud(String),

    /// Applying line settings to the device failed.
    #[error("failed to configure {path}: {source}")]
    Configure {
        path: PathBuf,
        source: std::io::Error,
    },

    /// An I/O error occurred on the device.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport has been closed; no further writes are accepted.
    #[error("transport is not active")]
    Inactive,

    /// The device reported a hang-up or error condition.
    #[error("device disconnected: {0}")]
    Disconnected(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;
