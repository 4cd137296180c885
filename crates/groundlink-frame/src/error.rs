/// Errors that can occur during packet encoding/decoding and frame scanning.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The embedded checksum disagrees with the recomputed one.
    #[error("checksum mismatch (frame says {expected:#05x}, computed {actual:#05x})")]
    ChecksumMismatch { expected: u16, actual: u16 },

    /// The type tag is not one of the known packet types.
    #[error("unsupported packet type {0:#04x}")]
    UnsupportedType(u8),

    /// The frame is structurally invalid (markers, length, alphabet).
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// An analog sample declares more channels than the protocol allows.
    #[error("too many channels ({count}, max {max})")]
    TooManyChannels { count: usize, max: usize },

    /// The encoded frame would exceed the maximum frame length.
    #[error("frame too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The accumulation buffer cannot hold the incoming chunk.
    #[error("accumulation buffer overflow ({needed} bytes, capacity {capacity})")]
    BufferOverflow { needed: usize, capacity: usize },

    /// An I/O error surfaced through a framed stream.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
