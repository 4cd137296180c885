/// Errors that can occur in multiplexer operations.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] groundlink_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] groundlink_frame::FrameError),

    /// A bounded ring is full and the overflow policy refused the packet.
    #[error("{queue} ring full (capacity {capacity})")]
    BufferOverflow {
        queue: &'static str,
        capacity: usize,
    },

    /// The multiplexer has been shut down or its transmit worker has stopped.
    #[error("multiplexer is stopped")]
    Stopped,

    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MuxError>;
