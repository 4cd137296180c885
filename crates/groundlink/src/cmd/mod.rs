use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use groundlink_frame::{Packet, PacketType};
use groundlink_transport::BaudRate;

use crate::exit::{frame_error, CliError, CliResult};
use crate::output::OutputFormat;

pub mod decode;
pub mod doctor;
pub mod encode;
#[cfg(unix)]
pub mod monitor;
#[cfg(unix)]
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print packets received from a device.
    Monitor(MonitorArgs),
    /// Send a single packet to a device.
    Send(SendArgs),
    /// Print the wire frame for a packet.
    Encode(EncodeArgs),
    /// Decode frames given as text.
    Decode(DecodeArgs),
    /// Run local environment and device health checks.
    Doctor(DoctorArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        #[cfg(unix)]
        Command::Monitor(args) => monitor::run(args, format),
        #[cfg(unix)]
        Command::Send(args) => send::run(args, format),
        #[cfg(not(unix))]
        Command::Monitor(_) | Command::Send(_) => Err(CliError::new(
            crate::exit::TRANSPORT_ERROR,
            "serial devices are not supported on this platform",
        )),
        Command::Encode(args) => encode::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        Command::Doctor(args) => doctor::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Serial device path.
    pub device: PathBuf,
    /// Line speed.
    #[arg(long, short = 'b', default_value = "57600")]
    pub baud: BaudRate,
    /// Packet types to print (comma-separated names or tags). Default: all responses.
    #[arg(long, value_delimiter = ',')]
    pub types: Option<Vec<PacketType>>,
    /// Exit after printing N packets.
    #[arg(long)]
    pub count: Option<usize>,
    /// Give up if --count packets have not arrived within this time (e.g. 10s).
    #[arg(long, requires = "count")]
    pub timeout: Option<String>,
    /// Send an analog-data-request on this interval (e.g. 100ms, 1s).
    #[arg(long, value_name = "DURATION")]
    pub request_every: Option<String>,
    /// Print roll and pitch computed from each analog sample.
    #[arg(long)]
    pub attitude: bool,
    /// Sensor calibration file (JSON). Implies --attitude.
    #[arg(long, value_name = "FILE")]
    pub calibration: Option<PathBuf>,
    /// Do not print multiplexer counters on exit.
    #[arg(long)]
    pub no_stats: bool,
}

#[derive(Args, Debug)]
pub struct PacketArgs {
    /// Packet type (name such as analog-data-request, or tag letter).
    #[arg(long = "type", short = 't', value_name = "TYPE")]
    pub kind: PacketType,
    /// Channel values for an analog-data-response (comma-separated).
    #[arg(
        long,
        value_delimiter = ',',
        allow_hyphen_values = true,
        conflicts_with = "payload"
    )]
    pub values: Option<Vec<i16>>,
    /// Opaque payload for any other type, as hex.
    #[arg(long, value_name = "HEX")]
    pub payload: Option<String>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Serial device path.
    pub device: PathBuf,
    /// Line speed.
    #[arg(long, short = 'b', default_value = "57600")]
    pub baud: BaudRate,
    #[command(flatten)]
    pub packet: PacketArgs,
    /// Wait for the device's response to a request and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    #[command(flatten)]
    pub packet: PacketArgs,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Frame text such as "(C>@)". Use "-" to read from stdin.
    pub frame: String,
}

#[derive(Args, Debug)]
pub struct DoctorArgs {
    /// Serial device to probe.
    pub device: Option<PathBuf>,
    /// Line speed used for the probe.
    #[arg(long, short = 'b', default_value = "57600")]
    pub baud: BaudRate,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

impl PacketArgs {
    pub fn to_packet(&self) -> CliResult<Packet> {
        if self.kind == PacketType::AnalogDataResponse {
            if self.payload.is_some() {
                return Err(CliError::usage(
                    "analog-data-response takes --values, not --payload",
                ));
            }
            let values = self.values.clone().unwrap_or_default();
            return Packet::analog_data(values).map_err(|err| frame_error("invalid values", err));
        }
        if self.values.is_some() {
            return Err(CliError::usage(format!(
                "--values only applies to analog-data-response, not {}",
                self.kind
            )));
        }
        let payload = match &self.payload {
            Some(text) => parse_hex(text)?,
            None => Vec::new(),
        };
        Packet::raw(self.kind, payload).map_err(|err| frame_error("invalid payload", err))
    }
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::usage("duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::usage(format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::usage("duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

pub fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let digits: Vec<u8> = input
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    if digits.len() % 2 != 0 {
        return Err(CliError::usage("hex payload must have an even number of digits"));
    }
    digits
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|text| u8::from_str_radix(text, 16).ok())
                .ok_or_else(|| CliError::usage(format!("invalid hex payload: {input}")))
        })
        .collect()
}
