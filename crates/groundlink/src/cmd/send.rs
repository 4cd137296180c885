use std::sync::mpsc::{self, Receiver};
use std::sync::Mutex;
use std::time::Duration;

use groundlink_frame::{encode, Packet, PacketType};
use groundlink_mux::{Station, StationConfig};
use tracing::info;

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{mux_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_packet, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let packet = args.packet.to_packet()?;
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let response_kind = match (args.wait, packet.kind().response()) {
        (false, _) => None,
        (true, Some(kind)) => Some(kind),
        (true, None) => {
            return Err(CliError::new(
                USAGE,
                format!("{} is not a request; nothing to wait for", packet.kind()),
            ))
        }
    };

    let mut station = Station::open(StationConfig::new(&args.device, args.baud))
        .map_err(|err| mux_error("open failed", err))?;

    // Subscribe before sending so a fast reply is not missed.
    let responses = response_kind.map(|kind| subscribe(&station, kind));

    station
        .transmit(packet.clone())
        .map_err(|err| mux_error("send failed", err))?;
    info!(kind = %packet.kind(), size = packet.wire_size(), "packet queued");

    let response = match &responses {
        Some(rx) => Some(wait_for_response(rx, wait_timeout)),
        None => None,
    };

    station
        .close()
        .map_err(|err| mux_error("close failed", err))?;

    match response {
        None => Ok(SUCCESS),
        Some(Some(reply)) => {
            let frame = encode(&reply).map(|frame| frame.to_vec()).unwrap_or_default();
            print_packet(&reply, &frame, format);
            Ok(SUCCESS)
        }
        Some(None) => Err(CliError::new(
            TIMEOUT,
            format!("no response within {wait_timeout:?}"),
        )),
    }
}

fn subscribe(station: &Station, kind: PacketType) -> Receiver<Packet> {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    station.register_fn(kind, move |packet: &Packet| {
        if let Ok(tx) = tx.lock() {
            let _ = tx.send(packet.clone());
        }
    });
    rx
}

fn wait_for_response(rx: &Receiver<Packet>, timeout: Duration) -> Option<Packet> {
    rx.recv_timeout(timeout).ok()
}
