use std::fmt::Write as _;
use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use groundlink_frame::Packet;
use groundlink_mux::StatsSnapshot;
use serde::Serialize;

use crate::attitude::Attitude;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Debug, Serialize)]
struct PacketOutput {
    event: &'static str,
    kind: &'static str,
    tag: String,
    wire_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    values: Option<Vec<i16>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<String>,
    timestamp: String,
}

impl PacketOutput {
    fn new(packet: &Packet) -> Self {
        let (values, payload) = match packet {
            Packet::AnalogData(data) => (Some(data.values().to_vec()), None),
            Packet::Raw { payload, .. } => (None, Some(hex(payload))),
        };
        Self {
            event: "packet",
            kind: packet.kind().name(),
            tag: char::from(packet.kind().tag()).to_string(),
            wire_size: packet.wire_size(),
            values,
            payload,
            timestamp: now_unix_seconds(),
        }
    }

    fn contents(&self) -> String {
        match (&self.values, &self.payload) {
            (Some(values), _) => format!("{values:?}"),
            (None, Some(payload)) if !payload.is_empty() => payload.clone(),
            _ => "-".to_string(),
        }
    }
}

/// Print one decoded packet. `frame` is its wire form, used by `raw`.
pub fn print_packet(packet: &Packet, frame: &[u8], format: OutputFormat) {
    let out = PacketOutput::new(packet);
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["TYPE", "TAG", "SIZE", "CONTENTS"])
                .add_row(vec![
                    out.kind.to_string(),
                    out.tag.clone(),
                    out.wire_size.to_string(),
                    out.contents(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("{}", pretty_packet(&out)),
        OutputFormat::Raw => {
            print_raw(frame);
            println!();
        }
    }
}

fn pretty_packet(out: &PacketOutput) -> String {
    format!(
        "type={} ({}) size={} contents={}",
        out.kind,
        out.tag,
        out.wire_size,
        out.contents()
    )
}

#[derive(Debug, Serialize)]
struct AttitudeOutput<'a> {
    event: &'static str,
    #[serde(flatten)]
    attitude: &'a Attitude,
    timestamp: String,
}

pub fn print_attitude(attitude: &Attitude, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&AttitudeOutput {
            event: "attitude",
            attitude,
            timestamp: now_unix_seconds(),
        }),
        OutputFormat::Table | OutputFormat::Pretty | OutputFormat::Raw => {
            println!("{}", pretty_attitude(attitude));
        }
    }
}

fn pretty_attitude(attitude: &Attitude) -> String {
    let [x, y, z] = attitude.acc_g;
    let mut line = format!(
        "attitude roll={:.1} pitch={:.1} acc=({x:.3}, {y:.3}, {z:.3})g",
        attitude.roll_deg, attitude.pitch_deg
    );
    if let Some([gx, gy, gz]) = attitude.gyro_dps {
        let _ = write!(line, " gyro=({gx:.1}, {gy:.1}, {gz:.1})dps");
    }
    line
}

#[derive(Debug, Serialize)]
struct StatsOutput<'a> {
    event: &'static str,
    #[serde(flatten)]
    stats: &'a StatsSnapshot,
    frames_rejected: u64,
}

pub fn print_stats(stats: &StatsSnapshot, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&StatsOutput {
            event: "stats",
            stats,
            frames_rejected: stats.frames_rejected(),
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["COUNTER", "VALUE"]);
            for (name, value) in stats_rows(stats) {
                table.add_row(vec![name.to_string(), value.to_string()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            let line = stats_rows(stats)
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join(" ");
            println!("stats {line}");
        }
    }
}

fn stats_rows(stats: &StatsSnapshot) -> [(&'static str, u64); 8] {
    [
        ("bytes_ingested", stats.bytes_ingested),
        ("frames_decoded", stats.frames_decoded),
        ("frames_rejected", stats.frames_rejected()),
        ("packets_dispatched", stats.packets_dispatched),
        ("inbound_dropped", stats.inbound_dropped),
        ("outbound_dropped", stats.outbound_dropped),
        ("accumulation_overflows", stats.accumulation_overflows),
        ("packets_sent", stats.packets_sent),
    ]
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
