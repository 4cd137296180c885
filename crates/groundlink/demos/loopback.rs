//! Drives a multiplexer against a simulated sensor board, no hardware needed.
//!
//! Run with:
//!   cargo run --example loopback
//!
//! The board answers every analog-data-request with a six-channel sample;
//! replies are fed back in two halves to show frame reassembly.

use std::sync::mpsc::{self, Sender};
use std::sync::Mutex;
use std::time::Duration;

use groundlink::frame::{encode, FrameError, FrameScanner, Packet, PacketType};
use groundlink::mux::{Multiplexer, MuxConfig};
use groundlink::transport::{Link, Result as TransportResult, TransportError};

/// Pretends to be the board at the far end of the serial line.
struct SimulatedBoard {
    scanner: Mutex<FrameScanner>,
    replies: Mutex<Sender<Vec<u8>>>,
    tick: Mutex<i16>,
}

impl SimulatedBoard {
    fn new(replies: Sender<Vec<u8>>) -> Self {
        Self {
            scanner: Mutex::new(FrameScanner::new()),
            replies: Mutex::new(replies),
            tick: Mutex::new(0),
        }
    }

    fn sample(&self) -> groundlink::frame::Result<Packet> {
        let mut tick = self.tick.lock().unwrap_or_else(|e| e.into_inner());
        *tick += 1;
        let t = *tick;
        // Level board with a little wobble on the y axis.
        let values = vec![2048, 2048 + 40 * (t % 5), 2048, 2234, 2234, 2234];
        Packet::analog_data(values)
    }
}

impl Link for SimulatedBoard {
    fn write(&self, bytes: &[u8]) -> TransportResult<usize> {
        let hang_up = |err: FrameError| TransportError::Disconnected(err.to_string());
        let mut scanner = self.scanner.lock().unwrap_or_else(|e| e.into_inner());
        scanner.push(bytes).map_err(hang_up)?;
        while let Some(result) = scanner.next_packet() {
            let Ok(packet) = result else { continue };
            let reply = match packet.kind() {
                PacketType::AnalogDataRequest => self.sample().map_err(hang_up)?,
                PacketType::DeviceInfoRequest => {
                    Packet::raw(PacketType::DeviceInfoResponse, b"sim-1.0".to_vec())
                        .map_err(hang_up)?
                }
                _ => continue,
            };
            let frame = encode(&reply).map_err(hang_up)?;
            let replies = self.replies.lock().unwrap_or_else(|e| e.into_inner());
            let _ = replies.send(frame.to_vec());
        }
        Ok(bytes.len())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (reply_tx, reply_rx) = mpsc::channel();
    let mux = Multiplexer::start(SimulatedBoard::new(reply_tx), MuxConfig::default())?;

    let (seen_tx, seen_rx) = mpsc::channel();
    let seen_tx = Mutex::new(seen_tx);
    mux.register_fn(PacketType::AnalogDataResponse, move |packet: &Packet| {
        if let Some(sample) = packet.as_analog_data() {
            eprintln!("sample: {:?}", sample.values());
        }
        let _ = seen_tx.lock().map(|tx| tx.send(()));
    });
    mux.register_fn(PacketType::DeviceInfoResponse, |packet: &Packet| {
        if let Packet::Raw { payload, .. } = packet {
            let text = String::from_utf8_lossy(payload);
            eprintln!("device info: {}", text.trim_end_matches('\0'));
        }
    });

    mux.transmit(Packet::request(PacketType::DeviceInfoRequest)?)?;
    for _ in 0..5 {
        mux.transmit(Packet::request(PacketType::AnalogDataRequest)?)?;
    }

    for _ in 0..6 {
        let frame = reply_rx.recv_timeout(Duration::from_secs(1))?;
        let (head, tail) = frame.split_at(frame.len() / 2);
        mux.ingest(head);
        mux.ingest(tail);
    }
    for _ in 0..5 {
        seen_rx.recv_timeout(Duration::from_secs(1))?;
    }

    mux.shutdown();
    let stats = mux.stats();
    eprintln!(
        "sent {} packets, decoded {} frames, dispatched {}",
        stats.packets_sent, stats.frames_decoded, stats.packets_dispatched
    );
    Ok(())
}
