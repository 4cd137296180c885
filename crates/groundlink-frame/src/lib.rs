//! Printable, checksummed packet framing for the groundlink serial protocol.
//!
//! Every packet travels as a single frame of 7-bit printable characters:
//! - `(` and `)` mark the frame boundaries
//! - a one-letter type tag (`A` through `J`)
//! - the payload, spread 3 bytes to 4 characters over the `=`..`|` alphabet
//! - a two-character checksum of the tag and payload characters
//!
//! [`FrameScanner`] recovers frames from a noisy, arbitrarily chunked byte
//! stream; [`encode_packet`] and [`decode_packet`] convert between frames and
//! [`Packet`] values.

pub mod codec;
pub mod error;
pub mod packet;
pub mod scanner;
#[cfg(feature = "async")]
pub mod tokio_codec;

pub use codec::{
    checksum, decode_packet, encode, encode_packet, frame_len, END, MAX_FRAME_LEN, OFFSET, START,
};
pub use error::{FrameError, Result};
pub use packet::{AnalogData, Packet, PacketType, MAX_CHANNELS};
pub use scanner::{FrameScanner, ScanState, MIN_ACCUMULATION_CAPACITY};
#[cfg(feature = "async")]
pub use tokio_codec::PacketCodec;
