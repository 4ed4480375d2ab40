//! Protocol message definitions
//!
//! Commands exchanged on the TCP control channel, the audio format
//! descriptor negotiated at session start and the stream id that binds the
//! UDP data channel to its control connection.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::error::{CodecError, NetworkError};

/// Control channel command, sent as a 4-byte little-endian ordinal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum Command {
    None = 0,
    GetFormat = 1,
    StartPlay = 2,
    Heartbeat = 3,
}

impl Command {
    pub const ALL: [Command; 4] = [
        Command::None,
        Command::GetFormat,
        Command::StartPlay,
        Command::Heartbeat,
    ];

    pub fn ordinal(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for Command {
    type Error = CodecError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Command::None),
            1 => Ok(Command::GetFormat),
            2 => Ok(Command::StartPlay),
            3 => Ok(Command::Heartbeat),
            _ => Err(CodecError::UnknownCommand(value)),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::None => "NONE",
            Command::GetFormat => "GET_FORMAT",
            Command::StartPlay => "START_PLAY",
            Command::Heartbeat => "HEARTBEAT",
        };
        f.write_str(name)
    }
}

/// Sample encoding carried in the format payload
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration, Serialize, Deserialize,
)]
#[repr(i32)]
pub enum Encoding {
    Invalid = 0,
    PcmFloat = 1,
    Pcm8 = 2,
    Pcm16 = 3,
    Pcm24 = 4,
    Pcm32 = 5,
}

impl Encoding {
    /// Nominal sample width in bits
    pub fn bits(self) -> Option<u32> {
        match self {
            Encoding::Invalid => None,
            Encoding::Pcm8 => Some(8),
            Encoding::Pcm16 => Some(16),
            Encoding::Pcm24 => Some(24),
            Encoding::PcmFloat | Encoding::Pcm32 => Some(32),
        }
    }
}

/// Serialized format message as it travels inside the GET_FORMAT reply
#[derive(Clone, PartialEq, prost::Message)]
pub struct FormatMessage {
    #[prost(enumeration = "Encoding", tag = "1")]
    pub encoding: i32,
    #[prost(int32, tag = "2")]
    pub channels: i32,
    #[prost(int32, tag = "3")]
    pub sample_rate: i32,
    /// Zero when the server only sends the encoding
    #[prost(int32, tag = "4")]
    pub bits_per_sample: i32,
}

/// Negotiated audio format, immutable once received
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u32,
    pub encoding: Encoding,
    pub bits_per_sample: u32,
}

impl AudioFormat {
    /// Build a format whose sample width follows the encoding
    pub fn new(sample_rate: u32, channels: u32, encoding: Encoding) -> Self {
        Self {
            sample_rate,
            channels,
            encoding,
            bits_per_sample: encoding.bits().unwrap_or(0),
        }
    }

    /// Validate a decoded format message
    pub fn from_message(message: &FormatMessage) -> Result<Self, CodecError> {
        let encoding = Encoding::try_from(message.encoding).map_err(|_| {
            CodecError::InvalidFormat(format!("unknown encoding {}", message.encoding))
        })?;
        let nominal_bits = encoding
            .bits()
            .ok_or_else(|| CodecError::InvalidFormat("invalid encoding".to_string()))?;

        if message.sample_rate <= 0 {
            return Err(CodecError::InvalidFormat(format!(
                "sample rate {}",
                message.sample_rate
            )));
        }
        if message.channels <= 0 {
            return Err(CodecError::InvalidFormat(format!(
                "channel count {}",
                message.channels
            )));
        }

        // Servers may report a container width here; the encoding decides
        if message.bits_per_sample != 0 && message.bits_per_sample as u32 != nominal_bits {
            debug!(
                "Ignoring {} bits per sample for {:?}, using {}",
                message.bits_per_sample, encoding, nominal_bits
            );
        }

        Ok(Self {
            sample_rate: message.sample_rate as u32,
            channels: message.channels as u32,
            encoding,
            bits_per_sample: nominal_bits,
        })
    }

    pub fn to_message(&self) -> FormatMessage {
        FormatMessage {
            encoding: self.encoding as i32,
            channels: self.channels as i32,
            sample_rate: self.sample_rate as i32,
            bits_per_sample: self.bits_per_sample as i32,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        (self.bits_per_sample / 8) as usize
    }

    /// Bytes per interleaved frame (one sample for every channel)
    pub fn block_align(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }

    pub fn bytes_per_second(&self) -> usize {
        self.block_align() * self.sample_rate as usize
    }

    /// Number of whole frames contained in `len` bytes
    pub fn frames_in(&self, len: usize) -> usize {
        match self.block_align() {
            0 => 0,
            align => len / align,
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Hz, {} channels, {:?} ({} bits)",
            self.sample_rate, self.channels, self.encoding, self.bits_per_sample
        )
    }
}

/// Server-issued token correlating the UDP stream with its TCP session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(i32);

impl StreamId {
    pub fn new(id: i32) -> Result<Self, NetworkError> {
        if id <= 0 {
            return Err(NetworkError::InvalidStreamId(id));
        }
        Ok(Self(id))
    }

    pub fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Frames the server sends on the control channel
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    None,
    Format(AudioFormat),
    /// Raw id, validated by the control channel
    StreamStarted(i32),
    Heartbeat,
}

impl ServerFrame {
    pub fn command(&self) -> Command {
        match self {
            ServerFrame::None => Command::None,
            ServerFrame::Format(_) => Command::GetFormat,
            ServerFrame::StreamStarted(_) => Command::StartPlay,
            ServerFrame::Heartbeat => Command::Heartbeat,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_command_ordinals() {
        for (ordinal, command) in Command::ALL.iter().enumerate() {
            assert_eq!(command.ordinal(), ordinal as i32);
            assert_eq!(Command::try_from(ordinal as i32).unwrap(), *command);
        }
        assert_eq!(Command::try_from(4), Err(CodecError::UnknownCommand(4)));
        assert_eq!(Command::try_from(-1), Err(CodecError::UnknownCommand(-1)));
    }

    #[test]
    fn test_format_message_roundtrip() {
        let format = AudioFormat::new(48000, 2, Encoding::PcmFloat);
        let bytes = format.to_message().encode_to_vec();
        let decoded = FormatMessage::decode(bytes.as_slice()).unwrap();
        assert_eq!(AudioFormat::from_message(&decoded).unwrap(), format);
        assert_eq!(format.block_align(), 8);
        assert_eq!(format.bytes_per_second(), 384_000);
    }

    #[test]
    fn test_bits_derived_from_encoding() {
        let message = FormatMessage {
            encoding: Encoding::Pcm16 as i32,
            channels: 1,
            sample_rate: 44100,
            bits_per_sample: 0,
        };
        let format = AudioFormat::from_message(&message).unwrap();
        assert_eq!(format.bits_per_sample, 16);
        assert_eq!(format.frames_in(10), 5);
    }

    #[test]
    fn test_invalid_formats_rejected() {
        let base = AudioFormat::new(48000, 2, Encoding::Pcm24).to_message();

        let mut invalid = base.clone();
        invalid.encoding = Encoding::Invalid as i32;
        assert!(AudioFormat::from_message(&invalid).is_err());

        let mut unknown = base.clone();
        unknown.encoding = 42;
        assert!(AudioFormat::from_message(&unknown).is_err());

        let mut no_channels = base.clone();
        no_channels.channels = 0;
        assert!(AudioFormat::from_message(&no_channels).is_err());

        let mut zero_rate = base;
        zero_rate.sample_rate = 0;
        assert!(AudioFormat::from_message(&zero_rate).is_err());
    }

    #[test]
    fn test_container_width_follows_encoding() {
        let message = FormatMessage {
            encoding: Encoding::Pcm24 as i32,
            channels: 2,
            sample_rate: 48000,
            bits_per_sample: 32,
        };
        let format = AudioFormat::from_message(&message).unwrap();
        assert_eq!(format, AudioFormat::new(48000, 2, Encoding::Pcm24));
        assert_eq!(format.bits_per_sample, 24);
        assert_eq!(format.block_align(), 6);
    }

    #[test]
    fn test_stream_id_must_be_positive() {
        assert_eq!(StreamId::new(42).unwrap().get(), 42);
        assert!(StreamId::new(0).is_err());
        assert!(StreamId::new(-7).is_err());
    }
}
