use std::fmt;
use std::str::FromStr;

use bytes::{Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Maximum number of channels an analog sample may carry.
pub const MAX_CHANNELS: usize = 20;

/// Packet kinds understood by the device firmware.
///
/// The discriminant is the type tag carried verbatim on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum PacketType {
    AnalogNameRequest = b'A',
    AnalogNameResponse = b'B',
    AnalogDataRequest = b'C',
    AnalogDataResponse = b'D',
    DeviceInfoRequest = b'E',
    DeviceInfoResponse = b'F',
    MotorControl = b'G',
    ParamRequest = b'H',
    ParamResponse = b'I',
    ParamSave = b'J',
}

impl PacketType {
    /// Every known packet type, in tag order.
    pub const ALL: [PacketType; 10] = [
        PacketType::AnalogNameRequest,
        PacketType::AnalogNameResponse,
        PacketType::AnalogDataRequest,
        PacketType::AnalogDataResponse,
        PacketType::DeviceInfoRequest,
        PacketType::DeviceInfoResponse,
        PacketType::MotorControl,
        PacketType::ParamRequest,
        PacketType::ParamResponse,
        PacketType::ParamSave,
    ];

    /// The wire tag for this type.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Stable kebab-case name, used in logs and CLI output.
    pub fn name(self) -> &'static str {
        match self {
            PacketType::AnalogNameRequest => "analog-name-request",
            PacketType::AnalogNameResponse => "analog-name-response",
            PacketType::AnalogDataRequest => "analog-data-request",
            PacketType::AnalogDataResponse => "analog-data-response",
            PacketType::DeviceInfoRequest => "device-info-request",
            PacketType::DeviceInfoResponse => "device-info-response",
            PacketType::MotorControl => "motor-control",
            PacketType::ParamRequest => "param-request",
            PacketType::ParamResponse => "param-response",
            PacketType::ParamSave => "param-save",
        }
    }

    /// The type the device answers a request with, if this is a request.
    pub fn response(self) -> Option<PacketType> {
        match self {
            PacketType::AnalogNameRequest => Some(PacketType::AnalogNameResponse),
            PacketType::AnalogDataRequest => Some(PacketType::AnalogDataResponse),
            PacketType::DeviceInfoRequest => Some(PacketType::DeviceInfoResponse),
            PacketType::ParamRequest => Some(PacketType::ParamResponse),
            _ => None,
        }
    }
}

impl TryFrom<u8> for PacketType {
    type Error = FrameError;

    fn try_from(tag: u8) -> Result<Self> {
        PacketType::ALL
            .into_iter()
            .find(|kind| kind.tag() == tag)
            .ok_or(FrameError::UnsupportedType(tag))
    }
}

/// Accepts either the kebab-case name or the single-letter wire tag.
impl FromStr for PacketType {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let [tag] = s.as_bytes() {
            return PacketType::try_from(tag.to_ascii_uppercase());
        }
        PacketType::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| FrameError::Malformed(format!("unknown packet type {s:?}")))
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One multi-channel analog sample.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AnalogData {
    values: Vec<i16>,
}

impl AnalogData {
    /// Build a sample, rejecting more than [`MAX_CHANNELS`] values.
    pub fn new(values: impl Into<Vec<i16>>) -> Result<Self> {
        let values = values.into();
        if values.len() > MAX_CHANNELS {
            return Err(FrameError::TooManyChannels {
                count: values.len(),
                max: MAX_CHANNELS,
            });
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> &[i16] {
        &self.values
    }

    pub fn channel_count(&self) -> usize {
        self.values.len()
    }

    /// The value of one channel, if present.
    pub fn channel(&self, index: usize) -> Option<i16> {
        self.values.get(index).copied()
    }
}

/// A decoded protocol message.
///
/// Analog samples are decoded into typed values. Every other known type
/// keeps its payload as opaque bytes, always a whole number of 3-byte
/// groups so that a decoded frame yields exactly the packet that was sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    AnalogData(AnalogData),
    Raw { kind: PacketType, payload: Bytes },
}

impl Packet {
    /// An analog sample packet.
    pub fn analog_data(values: impl Into<Vec<i16>>) -> Result<Self> {
        AnalogData::new(values).map(Packet::AnalogData)
    }

    /// A packet with no payload, as used for requests.
    ///
    /// Fails for [`PacketType::AnalogDataResponse`], which always carries a
    /// channel count; use [`Packet::analog_data`] instead.
    pub fn request(kind: PacketType) -> Result<Self> {
        Packet::raw(kind, Bytes::new())
    }

    /// A packet carrying an opaque payload.
    ///
    /// A trailing partial group is zero-padded to 3 bytes, the shape the
    /// payload has after a decode. Analog samples are rejected here.
    pub fn raw(kind: PacketType, payload: impl Into<Bytes>) -> Result<Self> {
        if kind == PacketType::AnalogDataResponse {
            return Err(FrameError::Malformed(
                "analog samples must be built from channel values".to_string(),
            ));
        }
        let mut payload = payload.into();
        if payload.len() % 3 != 0 {
            let mut padded = BytesMut::from(&payload[..]);
            padded.resize(payload.len().div_ceil(3) * 3, 0);
            payload = padded.freeze();
        }
        Ok(Packet::Raw { kind, payload })
    }

    /// Check that this packet can be encoded and decoded back unchanged.
    ///
    /// `Raw` variants built by hand must not claim the analog type and must
    /// hold whole 3-byte groups; every packet must fit in one frame.
    pub fn validate(&self) -> Result<()> {
        if let Packet::Raw { kind, payload } = self {
            if *kind == PacketType::AnalogDataResponse {
                return Err(FrameError::Malformed(
                    "raw packet cannot carry the analog data type".to_string(),
                ));
            }
            if payload.len() % 3 != 0 {
                return Err(FrameError::Malformed(format!(
                    "raw payload of {} bytes is not a whole number of 3-byte groups",
                    payload.len()
                )));
            }
        }
        let size = self.wire_size();
        if size > crate::codec::MAX_FRAME_LEN {
            return Err(FrameError::PayloadTooLarge {
                size,
                max: crate::codec::MAX_FRAME_LEN,
            });
        }
        Ok(())
    }

    /// The packet's type tag.
    pub fn kind(&self) -> PacketType {
        match self {
            Packet::AnalogData(_) => PacketType::AnalogDataResponse,
            Packet::Raw { kind, .. } => *kind,
        }
    }

    /// Size of this packet's frame on the wire, markers included.
    pub fn wire_size(&self) -> usize {
        let raw_len = match self {
            Packet::AnalogData(data) => 1 + 2 * data.channel_count(),
            Packet::Raw { payload, .. } => payload.len(),
        };
        crate::codec::frame_len(raw_len)
    }

    pub fn as_analog_data(&self) -> Option<&AnalogData> {
        match self {
            Packet::AnalogData(data) => Some(data),
            Packet::Raw { .. } => None,
        }
    }
}

impl From<AnalogData> for Packet {
    fn from(data: AnalogData) -> Self {
        Packet::AnalogData(data)
    }
}
