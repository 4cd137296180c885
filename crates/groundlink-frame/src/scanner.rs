use bytes::{Buf, Bytes, BytesMut};
use tracing::{trace, warn};

use crate::codec::{decode_packet, END, MAX_FRAME_LEN, START};
use crate::error::{FrameError, Result};
use crate::packet::Packet;

/// Smallest accumulation capacity a scanner will use: room for five
/// maximum-size frames.
pub const MIN_ACCUMULATION_CAPACITY: usize = 5 * MAX_FRAME_LEN;

/// Where the scanner is relative to the frame markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// No START seen since the last frame boundary.
    Seeking,
    /// A START was seen at `start` and no END has followed it yet.
    InFrame { start: usize },
}

/// Extracts complete frames from an arbitrarily chunked byte stream.
///
/// Bytes are appended with [`push`](FrameScanner::push) and frames pulled
/// with [`next_frame`](FrameScanner::next_frame). Every byte is examined
/// once. When a second START arrives before an END, the frame restarts at
/// the later START; bytes outside any START..END span are discarded.
#[derive(Debug)]
pub struct FrameScanner {
    buf: BytesMut,
    capacity: usize,
    state: ScanState,
    cursor: usize,
    overflows: u64,
    discarded: u64,
}

impl FrameScanner {
    pub fn new() -> Self {
        Self::with_capacity(MIN_ACCUMULATION_CAPACITY)
    }

    /// Create a scanner that holds at most `capacity` pending bytes.
    ///
    /// Capacities below [`MIN_ACCUMULATION_CAPACITY`] are raised to it.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_ACCUMULATION_CAPACITY);
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
            state: ScanState::Seeking,
            cursor: 0,
            overflows: 0,
            discarded: 0,
        }
    }

    /// Append a chunk of received bytes.
    ///
    /// If the chunk does not fit beside the pending bytes, the pending bytes
    /// are dropped (they cannot complete a valid frame within capacity) and
    /// the chunk is kept. A chunk larger than the whole capacity is refused.
    pub fn push(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.capacity {
            self.overflows += 1;
            return Err(FrameError::BufferOverflow {
                needed: bytes.len(),
                capacity: self.capacity,
            });
        }
        if self.buf.len() + bytes.len() > self.capacity {
            warn!(
                pending = self.buf.len(),
                incoming = bytes.len(),
                capacity = self.capacity,
                "accumulation buffer full, dropping pending bytes"
            );
            self.overflows += 1;
            self.discarded += self.buf.len() as u64;
            self.buf.clear();
            self.cursor = 0;
            self.state = ScanState::Seeking;
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Pull the next complete frame, START through END inclusive.
    ///
    /// Returns `None` once the pending bytes hold no further END. Partial
    /// frames stay buffered for the next [`push`](FrameScanner::push).
    pub fn next_frame(&mut self) -> Option<Bytes> {
        while self.cursor < self.buf.len() {
            match (self.buf[self.cursor], self.state) {
                (START, _) => self.state = ScanState::InFrame { start: self.cursor },
                (END, ScanState::InFrame { start }) => {
                    self.discard_front(start);
                    let frame = self.buf.split_to(self.cursor - start + 1).freeze();
                    self.cursor = 0;
                    self.state = ScanState::Seeking;
                    trace!(len = frame.len(), "frame extracted");
                    return Some(frame);
                }
                (END, ScanState::Seeking) => {
                    self.discard_front(self.cursor + 1);
                    self.cursor = 0;
                    continue;
                }
                _ => {}
            }
            self.cursor += 1;
        }
        self.compact();
        None
    }

    /// Pull and decode the next frame.
    ///
    /// Frames that fail to decode are returned as errors; the scanner has
    /// already moved past them.
    pub fn next_packet(&mut self) -> Option<Result<Packet>> {
        self.next_frame().map(|frame| decode_packet(&frame))
    }

    fn discard_front(&mut self, count: usize) {
        if count > 0 {
            self.buf.advance(count);
            self.discarded += count as u64;
        }
    }

    fn compact(&mut self) {
        match self.state {
            ScanState::Seeking => {
                let noise = self.buf.len();
                self.discard_front(noise);
                self.cursor = 0;
            }
            ScanState::InFrame { start } if start > 0 => {
                self.discard_front(start);
                self.cursor -= start;
                self.state = ScanState::InFrame { start: 0 };
            }
            ScanState::InFrame { .. } => {}
        }
    }

    /// Discard all pending bytes and return to [`ScanState::Seeking`].
    pub fn reset(&mut self) {
        self.buf.clear();
        self.cursor = 0;
        self.state = ScanState::Seeking;
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Bytes currently buffered.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of pushes that overflowed the accumulation buffer.
    pub fn overflows(&self) -> u64 {
        self.overflows
    }

    /// Number of bytes dropped as noise or on overflow.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }
}

impl Default for FrameScanner {
    fn default() -> Self {
        Self::new()
    }
}
