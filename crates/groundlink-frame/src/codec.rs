use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::packet::{AnalogData, Packet, PacketType, MAX_CHANNELS};

/// Opens every frame.
pub const START: u8 = b'(';

/// Closes every frame.
pub const END: u8 = b')';

/// First character of the 64-symbol transform alphabet (`'='` through `'|'`).
pub const OFFSET: u8 = b'=';

/// Checksums are reported modulo this value as two alphabet characters.
pub const CHECKSUM_MODULUS: u32 = 4096;

/// Largest frame the device firmware accepts, markers included.
pub const MAX_FRAME_LEN: usize = 200;

/// START + TYPE + two checksum characters + END.
pub const FRAME_OVERHEAD: usize = 5;

/// Number of wire characters produced for `raw_len` payload bytes.
pub fn transformed_len(raw_len: usize) -> usize {
    raw_len.div_ceil(3) * 4
}

/// Total wire size of a frame carrying `raw_len` payload bytes.
pub fn frame_len(raw_len: usize) -> usize {
    FRAME_OVERHEAD + transformed_len(raw_len)
}

/// Spread every 3 payload bytes across 4 printable characters.
///
/// A trailing partial group is zero-padded, so the output length is always
/// a multiple of 4 and every character lies in `OFFSET..OFFSET + 64`.
pub fn transform(raw: &[u8], dst: &mut BytesMut) {
    dst.reserve(transformed_len(raw.len()));
    for group in raw.chunks(3) {
        let a = group[0];
        let b = group.get(1).copied().unwrap_or(0);
        let c = group.get(2).copied().unwrap_or(0);
        dst.put_u8(OFFSET + (a >> 2));
        dst.put_u8(OFFSET + (((a & 0x03) << 4) | (b >> 4)));
        dst.put_u8(OFFSET + (((b & 0x0f) << 2) | (c >> 6)));
        dst.put_u8(OFFSET + (c & 0x3f));
    }
}

/// Reverse [`transform`], appending 3 bytes for every 4 characters.
pub fn untransform(chars: &[u8], dst: &mut BytesMut) -> Result<()> {
    if chars.len() % 4 != 0 {
        return Err(FrameError::Malformed(format!(
            "transformed payload length {} is not a multiple of 4",
            chars.len()
        )));
    }
    dst.reserve(chars.len() / 4 * 3);
    for group in chars.chunks_exact(4) {
        let mut sextets = [0u8; 4];
        for (slot, &ch) in sextets.iter_mut().zip(group) {
            *slot = sextet(ch)?;
        }
        let [a, b, c, d] = sextets;
        dst.put_u8((a << 2) | (b >> 4));
        dst.put_u8(((b & 0x0f) << 4) | (c >> 2));
        dst.put_u8(((c & 0x03) << 6) | d);
    }
    Ok(())
}

fn sextet(ch: u8) -> Result<u8> {
    ch.checked_sub(OFFSET)
        .filter(|value| *value < 64)
        .ok_or_else(|| FrameError::Malformed(format!("byte {ch:#04x} is outside the frame alphabet")))
}

/// Sum of `bytes` modulo [`CHECKSUM_MODULUS`].
///
/// Frames checksum the TYPE byte and the transformed payload; the markers
/// and the checksum characters themselves are not covered.
pub fn checksum(bytes: &[u8]) -> u16 {
    let sum: u32 = bytes.iter().map(|&b| u32::from(b)).sum();
    // Always below 4096.
    (sum % CHECKSUM_MODULUS) as u16
}

fn checksum_chars(sum: u16) -> [u8; 2] {
    [OFFSET + (sum / 64) as u8, OFFSET + (sum % 64) as u8]
}

fn embedded_checksum(chars: [u8; 2]) -> u16 {
    u16::from(chars[0].wrapping_sub(OFFSET)) * 64 + u16::from(chars[1].wrapping_sub(OFFSET))
}

/// Encode a packet into the wire format.
///
/// Wire format:
/// ```text
/// ┌───────┬──────┬──────────────────────┬───────┬───────┬─────┐
/// │ '('   │ TYPE │ transformed payload  │ CK_HI │ CK_LO │ ')' │
/// │       │ A..J │ 4 chars per 3 bytes  │       │       │     │
/// └───────┴──────┴──────────────────────┴───────┴───────┴─────┘
/// ```
///
/// Appends to `dst`. Fails with [`FrameError::PayloadTooLarge`] when the
/// frame would exceed [`MAX_FRAME_LEN`], and with [`FrameError::Malformed`]
/// for a packet that would not decode back to itself (see
/// [`Packet::validate`]). `dst` is left untouched on failure.
pub fn encode_packet(packet: &Packet, dst: &mut BytesMut) -> Result<()> {
    packet.validate()?;
    let mut raw = BytesMut::new();
    write_payload(packet, &mut raw);

    dst.reserve(frame_len(raw.len()));
    let body_start = dst.len() + 1;
    dst.put_u8(START);
    dst.put_u8(packet.kind().tag());
    transform(&raw, dst);
    let sum = checksum(&dst[body_start..]);
    dst.put_slice(&checksum_chars(sum));
    dst.put_u8(END);
    Ok(())
}

/// Encode a packet into a fresh buffer.
pub fn encode(packet: &Packet) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    encode_packet(packet, &mut buf)?;
    Ok(buf.freeze())
}

/// Decode one complete frame, START through END inclusive.
///
/// The checksum is verified before anything else, so any corruption of the
/// covered bytes surfaces as [`FrameError::ChecksumMismatch`]. Structure and
/// alphabet are checked next, then the type tag and the payload.
pub fn decode_packet(frame: &[u8]) -> Result<Packet> {
    if frame.len() < FRAME_OVERHEAD {
        return Err(FrameError::Malformed(format!(
            "frame of {} bytes is shorter than the {FRAME_OVERHEAD}-byte minimum",
            frame.len()
        )));
    }
    if frame[0] != START || frame[frame.len() - 1] != END {
        return Err(FrameError::Malformed("frame is missing its markers".to_string()));
    }

    let trailer = frame.len() - 3;
    let body = &frame[1..trailer];
    let embedded = [frame[trailer], frame[trailer + 1]];
    let actual = checksum(body);
    if checksum_chars(actual) != embedded {
        return Err(FrameError::ChecksumMismatch {
            expected: embedded_checksum(embedded),
            actual,
        });
    }

    let mut raw = BytesMut::new();
    untransform(&body[1..], &mut raw)?;
    let kind = PacketType::try_from(body[0])?;
    read_payload(kind, raw.freeze())
}

fn write_payload(packet: &Packet, dst: &mut BytesMut) {
    match packet {
        Packet::AnalogData(data) => {
            // AnalogData never holds more than MAX_CHANNELS values.
            dst.put_u8(data.channel_count() as u8);
            for value in data.values() {
                dst.put_i16_le(*value);
            }
        }
        Packet::Raw { payload, .. } => dst.put_slice(payload),
    }
}

fn read_payload(kind: PacketType, raw: Bytes) -> Result<Packet> {
    match kind {
        PacketType::AnalogDataResponse => {
            let Some((&count, samples)) = raw.split_first() else {
                return Err(FrameError::Malformed("analog payload is empty".to_string()));
            };
            let count = usize::from(count);
            if count > MAX_CHANNELS {
                return Err(FrameError::TooManyChannels {
                    count,
                    max: MAX_CHANNELS,
                });
            }
            if samples.len() < count * 2 {
                return Err(FrameError::Malformed(format!(
                    "analog payload declares {count} channels but carries {} bytes",
                    samples.len()
                )));
            }
            let values: Vec<i16> = samples
                .chunks_exact(2)
                .take(count)
                .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            AnalogData::new(values).map(Packet::AnalogData)
        }
        kind => Ok(Packet::Raw { kind, payload: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with(tag: u8, transformed: &[u8]) -> Vec<u8> {
        let mut body = vec![tag];
        body.extend_from_slice(transformed);
        let sum = checksum(&body);
        let mut frame = vec![START];
        frame.extend_from_slice(&body);
        frame.extend_from_slice(&checksum_chars(sum));
        frame.push(END);
        frame
    }

    fn transformed(raw: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        transform(raw, &mut buf);
        buf.to_vec()
    }

    #[test]
    fn analog_sample_known_encoding() {
        let packet = Packet::analog_data(vec![100, -50, 0]).unwrap();
        let wire = encode(&packet).unwrap();
        assert_eq!(&wire[..], b"(D=sM=ply=====MA)");
        assert_eq!(decode_packet(&wire).unwrap(), packet);
    }

    #[test]
    fn request_is_five_bytes() {
        let wire = encode(&Packet::request(PacketType::AnalogDataRequest).unwrap()).unwrap();
        assert_eq!(&wire[..], b"(C>@)");
        assert_eq!(
            decode_packet(&wire).unwrap(),
            Packet::request(PacketType::AnalogDataRequest).unwrap()
        );
    }

    #[test]
    fn wire_bytes_stay_printable() {
        let packet = Packet::analog_data(vec![i16::MIN, -1, 0, 1, i16::MAX]).unwrap();
        let wire = encode(&packet).unwrap();
        assert_eq!(wire[0], START);
        assert_eq!(wire[wire.len() - 1], END);
        assert_eq!(wire[1], b'D');
        for &byte in &wire[2..wire.len() - 1] {
            assert!((OFFSET..OFFSET + 64).contains(&byte), "byte {byte:#04x}");
        }
        assert_eq!(wire.len(), frame_len(1 + 5 * 2));
    }

    #[test]
    fn every_channel_count_survives() {
        for count in 0..=MAX_CHANNELS {
            let values: Vec<i16> = (0..count as i16).map(|i| i * 1117 - 9000).collect();
            let packet = Packet::analog_data(values).unwrap();
            let wire = encode(&packet).unwrap();
            assert_eq!(wire.len(), packet.wire_size());
            assert!(wire.len() <= MAX_FRAME_LEN);
            assert_eq!(decode_packet(&wire).unwrap(), packet, "count {count}");
        }
    }

    #[test]
    fn raw_payload_aligned_to_group_round_trips() {
        let packet = Packet::raw(PacketType::MotorControl, vec![1u8, 2, 3]).unwrap();
        let wire = encode(&packet).unwrap();
        assert_eq!(&wire[..], b"(G=ME@BS)");
        assert_eq!(decode_packet(&wire).unwrap(), packet);
    }

    #[test]
    fn every_raw_payload_length_round_trips() {
        for len in 0..=12u8 {
            let payload: Vec<u8> = (1..=len).collect();
            let packet = Packet::raw(PacketType::ParamResponse, payload).unwrap();
            let wire = encode(&packet).unwrap();
            assert_eq!(wire.len(), packet.wire_size());
            assert_eq!(decode_packet(&wire).unwrap(), packet, "length {len}");
        }
    }

    #[test]
    fn unencodable_raw_packets_rejected_without_writing() {
        let mut fake_samples = vec![25u8];
        fake_samples.resize(51, 1);
        for packet in [
            Packet::Raw {
                kind: PacketType::AnalogDataResponse,
                payload: Bytes::new(),
            },
            Packet::Raw {
                kind: PacketType::AnalogDataResponse,
                payload: Bytes::from(fake_samples),
            },
            Packet::Raw {
                kind: PacketType::DeviceInfoResponse,
                payload: Bytes::from_static(&[1, 2]),
            },
        ] {
            let mut dst = BytesMut::from(&b"keep"[..]);
            let err = encode_packet(&packet, &mut dst).unwrap_err();
            assert!(matches!(err, FrameError::Malformed(_)), "{packet:?}: {err}");
            assert_eq!(&dst[..], b"keep");
        }
    }

    #[test]
    fn transform_bit_layout() {
        assert_eq!(transformed(&[0xff, 0xff, 0xff]), b"||||".to_vec());
        assert_eq!(transformed(&[0x00]), b"====".to_vec());
        // 0b111111_00 0b0000_1111 0b00_000000 ... split into sextets.
        assert_eq!(
            transformed(&[0xfc, 0x0f, 0x00]),
            vec![OFFSET + 63, OFFSET, OFFSET + 60, OFFSET]
        );

        let mut back = BytesMut::new();
        untransform(&transformed(&[0xde, 0xad, 0xbe, 0xef]), &mut back).unwrap();
        assert_eq!(&back[..], &[0xde, 0xad, 0xbe, 0xef, 0, 0]);
    }

    #[test]
    fn any_single_byte_corruption_is_detected() {
        let wire = encode(&Packet::analog_data(vec![100, -50, 0]).unwrap()).unwrap();
        for index in 1..wire.len() - 1 {
            for flip in [0x01u8, 0x02, 0x10, 0x20, 0x40] {
                let mut corrupted = wire.to_vec();
                corrupted[index] ^= flip;
                let err = decode_packet(&corrupted).unwrap_err();
                assert!(
                    matches!(err, FrameError::ChecksumMismatch { .. }),
                    "index {index} flip {flip:#04x}: {err}"
                );
            }
        }
    }

    #[test]
    fn checksum_mismatch_reports_both_sums() {
        let mut wire = b"(C>@)".to_vec();
        wire[3] = b'A';
        match decode_packet(&wire).unwrap_err() {
            FrameError::ChecksumMismatch { expected, actual } => {
                assert_eq!(expected, 68);
                assert_eq!(actual, 67);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_tag_is_unsupported() {
        let frame = frame_with(b'Z', b"");
        assert_eq!(frame, b"(Z>W)".to_vec());
        assert!(matches!(
            decode_packet(&frame).unwrap_err(),
            FrameError::UnsupportedType(b'Z')
        ));
    }

    #[test]
    fn too_many_declared_channels_rejected() {
        let mut raw = vec![21u8];
        raw.resize(1 + 21 * 2, 0);
        let frame = frame_with(b'D', &transformed(&raw));
        assert!(matches!(
            decode_packet(&frame).unwrap_err(),
            FrameError::TooManyChannels { count: 21, max: 20 }
        ));
    }

    #[test]
    fn short_analog_payload_is_malformed() {
        // Declares 5 channels, carries 2 values.
        let frame = frame_with(b'D', &transformed(&[5, 1, 0, 2, 0]));
        assert!(matches!(
            decode_packet(&frame).unwrap_err(),
            FrameError::Malformed(_)
        ));

        let empty = frame_with(b'D', b"");
        assert!(matches!(
            decode_packet(&empty).unwrap_err(),
            FrameError::Malformed(_)
        ));
    }

    #[test]
    fn structural_problems_are_malformed() {
        for frame in [
            b"(C>)".to_vec(),
            b"xC>@)".to_vec(),
            b"(C>@x".to_vec(),
            frame_with(b'D', b"==="),
            frame_with(b'D', b"==!="),
        ] {
            assert!(
                matches!(decode_packet(&frame).unwrap_err(), FrameError::Malformed(_)),
                "{}",
                String::from_utf8_lossy(&frame)
            );
        }
    }

    #[test]
    fn oversize_payload_rejected_without_writing() {
        let packet = Packet::raw(PacketType::ParamSave, vec![0u8; 150]).unwrap();
        let mut dst = BytesMut::from(&b"keep"[..]);
        let err = encode_packet(&packet, &mut dst).unwrap_err();
        assert!(matches!(
            err,
            FrameError::PayloadTooLarge { size: 205, max: MAX_FRAME_LEN }
        ));
        assert_eq!(&dst[..], b"keep");
    }

    #[test]
    fn encode_appends_to_existing_buffer() {
        let mut dst = BytesMut::new();
        encode_packet(&Packet::request(PacketType::AnalogDataRequest).unwrap(), &mut dst).unwrap();
        encode_packet(&Packet::request(PacketType::AnalogDataRequest).unwrap(), &mut dst).unwrap();
        assert_eq!(&dst[..], b"(C>@)(C>@)");
    }
}
