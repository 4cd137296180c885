use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use groundlink_frame::{encode, Packet, PacketType};
use groundlink_mux::{MuxError, Station, StationConfig};
use tracing::{debug, info, warn};

use crate::attitude::{AttitudeEstimator, Calibration};
use crate::cmd::{parse_duration, MonitorArgs};
use crate::exit::{
    frame_error, mux_error, CliError, CliResult, INTERNAL, SUCCESS, TIMEOUT, TRANSPORT_ERROR,
};
use crate::output::{print_attitude, print_packet, print_stats, OutputFormat};

/// How often the receive loop wakes to check for Ctrl-C and link health.
const TICK: Duration = Duration::from_millis(100);

/// Printed when no `--types` are given.
const DEFAULT_TYPES: [PacketType; 4] = [
    PacketType::AnalogNameResponse,
    PacketType::AnalogDataResponse,
    PacketType::DeviceInfoResponse,
    PacketType::ParamResponse,
];

enum Outcome {
    Stopped,
    CountReached,
    TimedOut,
    LinkLost,
}

pub fn run(args: MonitorArgs, format: OutputFormat) -> CliResult<i32> {
    let request_every = args.request_every.as_deref().map(parse_duration).transpose()?;
    let deadline = args
        .timeout
        .as_deref()
        .map(parse_duration)
        .transpose()?
        .map(|timeout| Instant::now() + timeout);
    let estimator = match (&args.calibration, args.attitude) {
        (Some(path), _) => Some(AttitudeEstimator::new(Calibration::load(path)?)),
        (None, true) => Some(AttitudeEstimator::default()),
        (None, false) => None,
    };
    let mut kinds = args.types.clone().unwrap_or_else(|| DEFAULT_TYPES.to_vec());
    if estimator.is_some() && !kinds.contains(&PacketType::AnalogDataResponse) {
        kinds.push(PacketType::AnalogDataResponse);
    }

    let mut station = Station::open(StationConfig::new(&args.device, args.baud))
        .map_err(|err| mux_error("open failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let (tx, rx) = mpsc::channel::<Packet>();
    for kind in &kinds {
        let tx = Mutex::new(tx.clone());
        station.register_fn(*kind, move |packet: &Packet| {
            if let Ok(tx) = tx.lock() {
                let _ = tx.send(packet.clone());
            }
        });
    }
    drop(tx);
    info!(device = ?args.device, types = ?kinds, "monitoring");

    let printing = args.types.as_ref().unwrap_or(&kinds).clone();
    let mut printed = 0usize;
    let mut next_request = Instant::now();

    let outcome = loop {
        if !running.load(Ordering::SeqCst) {
            break Outcome::Stopped;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break Outcome::TimedOut;
        }
        if let Some(interval) = request_every {
            if Instant::now() >= next_request {
                request_sample(&station)?;
                next_request += interval;
            }
        }

        let wait = match request_every {
            Some(_) => next_request.saturating_duration_since(Instant::now()).min(TICK),
            None => TICK,
        };
        let packet = match rx.recv_timeout(wait) {
            Ok(packet) => packet,
            Err(RecvTimeoutError::Timeout) => {
                if !station.is_healthy() {
                    break Outcome::LinkLost;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break Outcome::LinkLost,
        };

        if let (Some(estimator), Some(sample)) = (&estimator, packet.as_analog_data()) {
            match estimator.update(sample) {
                Some(attitude) => print_attitude(&attitude, format),
                None => debug!(channels = sample.channel_count(), "sample too short for attitude"),
            }
        }
        if !printing.contains(&packet.kind()) {
            continue;
        }
        let frame = encode(&packet).map(|frame| frame.to_vec()).unwrap_or_default();
        print_packet(&packet, &frame, format);
        printed = printed.saturating_add(1);
        if args.count.is_some_and(|count| printed >= count) {
            break Outcome::CountReached;
        }
    };

    let stats = station.stats();
    let closed = station.close();
    if !args.no_stats {
        print_stats(&stats, format);
    }

    match outcome {
        Outcome::Stopped | Outcome::CountReached => {
            closed.map_err(|err| mux_error("close failed", err))?;
            Ok(SUCCESS)
        }
        Outcome::TimedOut => Err(CliError::new(
            TIMEOUT,
            format!("timed out after {printed} packets"),
        )),
        Outcome::LinkLost => Err(match closed {
            Err(err) => mux_error("device lost", err),
            Ok(()) => CliError::new(TRANSPORT_ERROR, "device lost"),
        }),
    }
}

fn request_sample(station: &Station) -> CliResult<()> {
    let request = Packet::request(PacketType::AnalogDataRequest)
        .map_err(|err| frame_error("request failed", err))?;
    match station.transmit(request) {
        Ok(()) => Ok(()),
        Err(MuxError::BufferOverflow { .. }) => {
            warn!("device is not keeping up with requests; skipping one");
            Ok(())
        }
        Err(err) => Err(mux_error("request failed", err)),
    }
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
