//! [`tokio_util::codec`] adapter for async byte streams.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::codec::encode_packet;
use crate::error::FrameError;
use crate::packet::Packet;
use crate::scanner::FrameScanner;

/// Frames [`Packet`]s over any `AsyncRead`/`AsyncWrite` via `FramedRead`,
/// `FramedWrite` or `Framed`.
///
/// Frames that fail to decode are logged and skipped, matching the
/// synchronous receive path.
#[derive(Debug, Default)]
pub struct PacketCodec {
    scanner: FrameScanner,
    rejected: u64,
}

impl PacketCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames dropped because they failed to decode.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, FrameError> {
        loop {
            while let Some(result) = self.scanner.next_packet() {
                match result {
                    Ok(packet) => return Ok(Some(packet)),
                    Err(err) => {
                        self.rejected += 1;
                        debug!(error = %err, "dropping undecodable frame");
                    }
                }
            }
            if src.is_empty() {
                return Ok(None);
            }
            let room = self.scanner.capacity() - self.scanner.pending();
            let chunk = src.split_to(src.len().min(room.max(1)));
            self.scanner.push(&chunk)?;
        }
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), FrameError> {
        encode_packet(&item, dst)
    }
}

impl Encoder<&Packet> for PacketCodec {
    type Error = FrameError;

    fn encode(&mut self, item: &Packet, dst: &mut BytesMut) -> Result<(), FrameError> {
        encode_packet(item, dst)
    }
}
