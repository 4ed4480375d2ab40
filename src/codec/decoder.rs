//! Frame decoding
//!
//! Slice decoders never consume input: they either return a whole frame and
//! the number of bytes it occupies, or `Truncated` with the total size the
//! frame needs. The [`Decoder`] impls build stream semantics on top of that,
//! leaving the buffer untouched until a complete frame has arrived.

use bytes::{Buf, BytesMut};
use prost::Message;
use tokio_util::codec::Decoder;

use super::{ControlCodec, ServerCodec, INT_SIZE, MAX_FORMAT_PAYLOAD};
use crate::error::{CodecError, Error};
use crate::protocol::{AudioFormat, Command, FormatMessage, ServerFrame};

fn require(src: &[u8], needed: usize) -> Result<(), CodecError> {
    if src.len() < needed {
        return Err(CodecError::Truncated {
            needed,
            available: src.len(),
        });
    }
    Ok(())
}

fn read_i32_at(src: &[u8], offset: usize) -> Result<i32, CodecError> {
    require(src, offset + INT_SIZE)?;
    let mut raw = [0u8; INT_SIZE];
    raw.copy_from_slice(&src[offset..offset + INT_SIZE]);
    Ok(i32::from_le_bytes(raw))
}

/// Decode a little-endian `i32` from the start of `src`
pub fn decode_i32(src: &[u8]) -> Result<i32, CodecError> {
    read_i32_at(src, 0)
}

/// Decode a command ordinal from the start of `src`
pub fn decode_command(src: &[u8]) -> Result<Command, CodecError> {
    Command::try_from(decode_i32(src)?)
}

/// Decode one server frame, returning it with its encoded size
pub fn decode_server_frame(src: &[u8]) -> Result<(ServerFrame, usize), CodecError> {
    let command = decode_command(src)?;

    match command {
        Command::None => Ok((ServerFrame::None, INT_SIZE)),
        Command::Heartbeat => Ok((ServerFrame::Heartbeat, INT_SIZE)),
        Command::StartPlay => {
            let id = read_i32_at(src, INT_SIZE)?;
            Ok((ServerFrame::StreamStarted(id), 2 * INT_SIZE))
        }
        Command::GetFormat => {
            let declared = read_i32_at(src, INT_SIZE)?;
            if declared < 0 || declared as usize > MAX_FORMAT_PAYLOAD {
                return Err(CodecError::InvalidLength(declared));
            }

            let header = 2 * INT_SIZE;
            let total = header + declared as usize;
            require(src, total)?;

            let message = FormatMessage::decode(&src[header..total])
                .map_err(|e| CodecError::InvalidFormat(e.to_string()))?;
            let format = AudioFormat::from_message(&message)?;
            Ok((ServerFrame::Format(format), total))
        }
    }
}

impl Decoder for ControlCodec {
    type Item = ServerFrame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match decode_server_frame(&src[..]) {
            Ok((frame, consumed)) => {
                src.advance(consumed);
                Ok(Some(frame))
            }
            Err(CodecError::Truncated { needed, available }) => {
                src.reserve(needed - available);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() => Ok(None),
            // Peer went away in the middle of a frame
            None => match decode_server_frame(&buf[..]) {
                Err(e) => Err(e.into()),
                Ok((frame, consumed)) => {
                    buf.advance(consumed);
                    Ok(Some(frame))
                }
            },
        }
    }
}

impl Decoder for ServerCodec {
    type Item = Command;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < INT_SIZE {
            return Ok(None);
        }
        let command = decode_command(&src[..])?;
        src.advance(INT_SIZE);
        Ok(Some(command))
    }
}
