use groundlink_frame::{checksum, encode, Packet};
use serde::Serialize;

use crate::cmd::EncodeArgs;
use crate::exit::{frame_error, CliResult, SUCCESS};
use crate::output::{print_json, print_raw, OutputFormat};

#[derive(Debug, Serialize)]
struct FrameOutput {
    event: &'static str,
    kind: &'static str,
    frame: String,
    wire_size: usize,
    checksum: u16,
}

pub fn run(args: EncodeArgs, format: OutputFormat) -> CliResult<i32> {
    let packet = args.packet.to_packet()?;
    let frame = encode(&packet).map_err(|err| frame_error("encode failed", err))?;

    match format {
        OutputFormat::Json => print_json(&frame_output(&packet, &frame)),
        OutputFormat::Raw => print_raw(&frame),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("{}", String::from_utf8_lossy(&frame));
        }
    }
    Ok(SUCCESS)
}

fn frame_output(packet: &Packet, frame: &[u8]) -> FrameOutput {
    // Everything between START and the two checksum characters.
    let covered = &frame[1..frame.len() - 3];
    FrameOutput {
        event: "frame",
        kind: packet.kind().name(),
        frame: String::from_utf8_lossy(frame).into_owned(),
        wire_size: frame.len(),
        checksum: checksum(covered),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use groundlink_frame::PacketType;

    #[test]
    fn reports_frame_and_checksum() {
        let packet = Packet::request(PacketType::AnalogDataRequest).unwrap();
        let frame = encode(&packet).unwrap();
        let out = frame_output(&packet, &frame);
        assert_eq!(out.frame, "(C>@)");
        assert_eq!(out.wire_size, 5);
        assert_eq!(out.checksum, 67);

        let sample = Packet::analog_data(vec![100, -50, 0]).unwrap();
        let out = frame_output(&sample, &encode(&sample).unwrap());
        assert_eq!(out.frame, "(D=sM=ply=====MA)");
        assert_eq!(out.checksum, 1028);
    }
}
