use std::io::Read;

use groundlink_frame::{decode_packet, FrameScanner, Packet};

use crate::cmd::DecodeArgs;
use crate::exit::{frame_error, io_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_packet, OutputFormat};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let input = if args.frame == "-" {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .map_err(|err| io_error("failed reading stdin", err))?;
        buf
    } else {
        args.frame.into_bytes()
    };

    for (frame, packet) in decode_all(&input)? {
        print_packet(&packet, &frame, format);
    }
    Ok(SUCCESS)
}

/// Every frame in `input`, in order. Bytes outside frames are ignored.
fn decode_all(input: &[u8]) -> CliResult<Vec<(Vec<u8>, Packet)>> {
    let mut scanner = FrameScanner::with_capacity(input.len());
    scanner
        .push(input)
        .map_err(|err| frame_error("scan failed", err))?;

    let mut decoded = Vec::new();
    while let Some(frame) = scanner.next_frame() {
        let packet = decode_packet(&frame).map_err(|err| {
            frame_error(
                &format!("frame {} ({})", decoded.len() + 1, String::from_utf8_lossy(&frame)),
                err,
            )
        })?;
        decoded.push((frame.to_vec(), packet));
    }

    if decoded.is_empty() {
        return Err(CliError::new(DATA_INVALID, "no frame found in input"));
    }
    Ok(decoded)
}
